use std::path::PathBuf;

use self::{lexer::Span, location::ModuleReference};

pub mod ast;
pub mod lexer;
pub mod location;
pub mod parser;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

/// A source file together with the module reference it is compiled as
#[derive(Debug)]
pub struct ModuleSource {
    pub reference: ModuleReference,
    pub file: SourceFile,
}

impl ModuleSource {
    pub fn in_memory(reference: ModuleReference, contents: impl Into<String>) -> Self {
        Self {
            reference,
            file: SourceFile {
                contents: contents.into(),
                origin: SourceFileOrigin::Memory,
            },
        }
    }
}
