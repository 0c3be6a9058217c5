use std::{fmt::Display, path::PathBuf};

use colored::Colorize;
use itertools::Itertools;
use thiserror::Error;

use crate::frontend::{
    ast::Type,
    location::{ModuleReference, Range},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorKind {
    SyntaxError,
    UnexpectedType,
    NotWellDefinedIdentifier,
    UnresolvedName,
    UnsupportedClassTypeDefinition,
    UnexpectedTypeKind,
    TupleSizeMismatch,
    InsufficientTypeInferenceContext,
    Collision,
    IllegalOtherClassMatch,
    IllegalThis,
    InconsistentFieldsInObject,
    DuplicateFieldDeclaration,
    NonExhausiveMatch,
    CyclicDependency,
}

/// A user-facing error tied to a source range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileTimeError {
    pub module_reference: ModuleReference,
    pub range: Range,
    pub kind: ErrorKind,
    pub message: String,
}

impl CompileTimeError {
    /// Colored form for terminals
    pub fn render(&self) -> String {
        format!(
            "{}:{}: {}: {}",
            self.module_reference.to_filename().bold(),
            self.range.to_string().dimmed(),
            format!("[{}]", self.kind).bright_red(),
            self.message
        )
    }
}

impl Display for CompileTimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: [{}]: {}",
            self.module_reference.to_filename(),
            self.range,
            self.kind,
            self.message
        )
    }
}

/// Accumulates errors across every stage of a compilation
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<CompileTimeError>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reporter(&mut self, module_reference: &ModuleReference) -> ErrorReporter<'_> {
        ErrorReporter {
            collector: self,
            module_reference: module_reference.clone(),
        }
    }

    pub fn push(&mut self, error: CompileTimeError) {
        tracing::trace!(%error, "reported");
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[CompileTimeError] {
        &self.errors
    }

    /// Errors ordered by file, then by position
    pub fn into_sorted(self) -> Vec<CompileTimeError> {
        self.errors
            .into_iter()
            .sorted_by(|a, b| {
                (&a.module_reference, a.range).cmp(&(&b.module_reference, b.range))
            })
            .collect()
    }
}

/// Reports errors on behalf of a single module
pub struct ErrorReporter<'a> {
    collector: &'a mut ErrorCollector,
    module_reference: ModuleReference,
}

impl ErrorReporter<'_> {
    pub fn report(&mut self, range: Range, kind: ErrorKind, message: String) {
        self.collector.push(CompileTimeError {
            module_reference: self.module_reference.clone(),
            range,
            kind,
            message,
        });
    }

    pub fn syntax_error(&mut self, range: Range, message: impl Into<String>) {
        self.report(range, ErrorKind::SyntaxError, message.into());
    }

    pub fn unexpected_type(&mut self, range: Range, expected: &Type, actual: &Type) {
        self.report(
            range,
            ErrorKind::UnexpectedType,
            format!("Expected: `{expected}`, actual: `{actual}`."),
        );
    }

    pub fn not_well_defined_identifier(&mut self, range: Range, name: &str) {
        self.report(
            range,
            ErrorKind::NotWellDefinedIdentifier,
            format!("`{name}` is not well defined."),
        );
    }

    pub fn unresolved_name(&mut self, range: Range, name: &str) {
        self.report(
            range,
            ErrorKind::UnresolvedName,
            format!("Name `{name}` is not resolved."),
        );
    }

    pub fn unsupported_class_type_definition(&mut self, range: Range, expected_kind: &str) {
        self.report(
            range,
            ErrorKind::UnsupportedClassTypeDefinition,
            format!("Expect the current class to have `{expected_kind}` type definition, but it doesn't."),
        );
    }

    pub fn unexpected_type_kind(&mut self, range: Range, expected_kind: &str, actual: &Type) {
        self.report(
            range,
            ErrorKind::UnexpectedTypeKind,
            format!("Expected kind: `{expected_kind}`, actual: `{actual}`."),
        );
    }

    pub fn tuple_size_mismatch(&mut self, range: Range, expected: usize, actual: usize) {
        self.report(
            range,
            ErrorKind::TupleSizeMismatch,
            format!("Incorrect tuple size. Expected: {expected}, actual: {actual}."),
        );
    }

    pub fn insufficient_type_inference_context(&mut self, range: Range) {
        self.report(
            range,
            ErrorKind::InsufficientTypeInferenceContext,
            "There is not enough context information to decide the type of this expression."
                .into(),
        );
    }

    pub fn collision(&mut self, range: Range, name: &str) {
        self.report(
            range,
            ErrorKind::Collision,
            format!("Name `{name}` collides with a previously defined name."),
        );
    }

    pub fn illegal_other_class_match(&mut self, range: Range) {
        self.report(
            range,
            ErrorKind::IllegalOtherClassMatch,
            "It is illegal to match on a value of other class's type.".into(),
        );
    }

    pub fn illegal_this(&mut self, range: Range) {
        self.report(
            range,
            ErrorKind::IllegalThis,
            "Keyword 'this' cannot be used in this context.".into(),
        );
    }

    pub fn inconsistent_fields_in_object(
        &mut self,
        range: Range,
        expected: &[String],
        actual: &[String],
    ) {
        self.report(
            range,
            ErrorKind::InconsistentFieldsInObject,
            format!(
                "Inconsistent field declaration. Expected: [{}], actual: [{}].",
                expected.iter().join(", "),
                actual.iter().join(", ")
            ),
        );
    }

    pub fn duplicate_field_declaration(&mut self, range: Range, field_name: &str) {
        self.report(
            range,
            ErrorKind::DuplicateFieldDeclaration,
            format!("Field name `{field_name}` is declared twice."),
        );
    }

    pub fn non_exhaustive_match(&mut self, range: Range, missing_tags: &[String]) {
        self.report(
            range,
            ErrorKind::NonExhausiveMatch,
            format!(
                "The following tags are not considered in the match: [{}].",
                missing_tags.iter().join(", ")
            ),
        );
    }

    pub fn cyclic_dependency(&mut self, range: Range, cycle: &[ModuleReference]) {
        self.report(
            range,
            ErrorKind::CyclicDependency,
            format!(
                "There is a cyclic dependency: [{}].",
                cycle.iter().join(" -> ")
            ),
        );
    }
}

/// A violated invariant inside the compiler, never caused by user input alone
#[derive(Debug, Clone, Error)]
#[error("internal compiler error: {message}{location}")]
pub struct InternalError {
    pub message: String,
    location: String,
}

impl InternalError {
    #[doc(hidden)]
    pub fn new(message: String, location: String) -> Self {
        Self { message, location }
    }
}

/// Builds an [`InternalError`], recording where it was raised when the
/// `error-backtrace` feature is enabled
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::errors::InternalError::new(
            format!($($arg)*),
            if cfg!(feature = "error-backtrace") {
                format!(" (raised at {}:{})", file!(), line!())
            } else {
                String::new()
            },
        )
    };
}

#[derive(Debug, Error)]
pub enum CompilationError {
    #[error("found {} compile-time error(s)", .0.len())]
    CompileTime(Vec<CompileTimeError>),
    #[error(transparent)]
    Internal(#[from] InternalError),
    #[error("failed to access `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("failed to link `{program}`: {message}")]
    Link { program: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::location::Position;

    #[test]
    fn errors_display_with_one_indexed_ranges() {
        let mut collector = ErrorCollector::new();
        collector.reporter(&ModuleReference::from_dotted("foo.bar")).unexpected_type(
            Range::new(Position::new(0, 38), Position::new(0, 40)),
            &Type::INT,
            &Type::STRING,
        );

        assert_eq!(
            collector.errors()[0].to_string(),
            "foo/bar.sam:1:39-1:41: [UnexpectedType]: Expected: `int`, actual: `string`."
        );
    }

    #[test]
    fn colored_rendering_strips_to_plain_text() {
        colored::control::set_override(true);
        let error = CompileTimeError {
            module_reference: ModuleReference::from_dotted("Main"),
            range: Range::DUMMY,
            kind: ErrorKind::IllegalThis,
            message: "Keyword 'this' cannot be used in this context.".into(),
        };

        assert_eq!(strip_ansi_escapes::strip_str(error.render()), error.to_string());
    }

    #[test]
    fn errors_sorted_by_module_then_range() {
        let mut collector = ErrorCollector::new();
        let later = Range::new(Position::new(3, 0), Position::new(3, 1));
        collector.reporter(&ModuleReference::from_dotted("b")).collision(Range::DUMMY, "x");
        collector.reporter(&ModuleReference::from_dotted("a")).collision(later, "y");
        collector.reporter(&ModuleReference::from_dotted("a")).collision(Range::DUMMY, "z");

        let messages = collector
            .into_sorted()
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>();

        assert!(messages[0].contains("`z`"));
        assert!(messages[1].contains("`y`"));
        assert!(messages[2].contains("`x`"));
    }
}
