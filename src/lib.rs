//! samc compiles SAMLANG programs ahead of time to x86-64 assembly.
//!
//! Sources are parsed and type checked as a whole compilation, then every
//! entry module is lowered through HIR and MIR, optimized, and finally
//! handed to the backend.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::{
    backend::{
        CodegenOptions,
        targets::{CodeGenerator, Target},
    },
    config::ProjectConfiguration,
    errors::{CompilationError, ErrorCollector},
    frontend::{
        ModuleSource, SourceFile, SourceFileOrigin, ast::UndecidedTypeCounter,
        location::ModuleReference, parser,
    },
    middle::{
        allocator::ResourceAllocator,
        hir,
        mir,
        optimization::{OptimizationConfig, optimize_sources},
        type_checking::{TypeCheckedSources, type_check_sources},
    },
};

pub mod backend;
pub mod config;
pub mod errors;
pub mod frontend;
pub mod middle;

pub const SOURCE_EXTENSION: &str = "sam";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    pub optimization: OptimizationConfig,
    pub codegen: CodegenOptions,
    /// Turns self tail calls into jumps
    pub tail_recursion: bool,
    pub report_cyclic_dependencies: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            optimization: OptimizationConfig::all(),
            codegen: CodegenOptions::default(),
            tail_recursion: true,
            report_cyclic_dependencies: false,
        }
    }
}

/// Parses and type checks every module. Syntax errors stop the compilation
/// before type checking; otherwise every type error found is reported,
/// sorted by position.
#[tracing::instrument(skip_all, fields(modules = sources.len()))]
pub fn check_sources(
    sources: &[ModuleSource],
    options: &CompilerOptions,
) -> Result<TypeCheckedSources, CompilationError> {
    let mut counter = UndecidedTypeCounter::new();
    let mut errors = ErrorCollector::new();

    let modules = sources
        .iter()
        .map(|source| {
            let module = parser::parse_module(source, &mut counter, &mut errors);
            (source.reference.clone(), module)
        })
        .collect::<BTreeMap<_, _>>();

    if !errors.is_empty() {
        return Err(CompilationError::CompileTime(errors.into_sorted()));
    }

    let checked = type_check_sources(
        modules,
        &mut counter,
        &mut errors,
        options.report_cyclic_dependencies,
    );

    if errors.is_empty() {
        Ok(checked)
    } else {
        Err(CompilationError::CompileTime(errors.into_sorted()))
    }
}

pub fn compile_to_hir(
    sources: &[ModuleSource],
    entry_module: &ModuleReference,
    options: &CompilerOptions,
) -> Result<hir::Sources, CompilationError> {
    let checked = check_sources(sources, options)?;
    let mut allocator = ResourceAllocator::new();
    Ok(hir::lowering::lower_sources(
        &checked,
        entry_module,
        &mut allocator,
    )?)
}

/// Optimized MIR of the program starting at `Main.main` of `entry_module`
pub fn compile_to_mir(
    sources: &[ModuleSource],
    entry_module: &ModuleReference,
    options: &CompilerOptions,
) -> Result<mir::Sources, CompilationError> {
    let checked = check_sources(sources, options)?;
    lower_checked(&checked, entry_module, options)
}

fn lower_checked(
    checked: &TypeCheckedSources,
    entry_module: &ModuleReference,
    options: &CompilerOptions,
) -> Result<mir::Sources, CompilationError> {
    let mut allocator = ResourceAllocator::new();
    let hir_sources = hir::lowering::lower_sources(checked, entry_module, &mut allocator)?;
    let mut mir_sources =
        mir::generation::lower_sources(&hir_sources, &mut allocator, options.tail_recursion)?;
    optimize_sources(&mut mir_sources, &mut allocator, &options.optimization);
    Ok(mir_sources)
}

pub fn compile_to_assembly(
    sources: &[ModuleSource],
    entry_module: &ModuleReference,
    options: &CompilerOptions,
) -> Result<String, CompilationError> {
    let mir_sources = compile_to_mir(sources, entry_module, options)?;
    Ok(Target::default()
        .get_code_generator()
        .translate_to_asm(&mir_sources, &options.codegen)?)
}

/// Assembly for every entry module, checking the sources only once
#[tracing::instrument(skip_all, fields(entries = entry_modules.len()))]
pub fn compile_entry_points(
    sources: &[ModuleSource],
    entry_modules: &[ModuleReference],
    options: &CompilerOptions,
) -> Result<Vec<(ModuleReference, String)>, CompilationError> {
    let checked = check_sources(sources, options)?;
    let generator = Target::default().get_code_generator();

    entry_modules
        .iter()
        .map(|entry_module| {
            let mir_sources = lower_checked(&checked, entry_module, options)?;
            let asm = generator.translate_to_asm(&mir_sources, &options.codegen)?;
            Ok((entry_module.clone(), asm))
        })
        .collect()
}

fn module_reference_of(source_directory: &Path, path: &Path) -> Option<ModuleReference> {
    let relative = path.strip_prefix(source_directory).ok()?.with_extension("");
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_str().map(String::from))
        .collect::<Option<Vec<_>>>()?;
    Some(ModuleReference::new(parts))
}

fn walk(
    configuration: &ProjectConfiguration,
    directory: &Path,
    found: &mut Vec<PathBuf>,
) -> Result<(), CompilationError> {
    let io_error = |source| CompilationError::Io {
        path: directory.to_path_buf(),
        source,
    };

    for entry in std::fs::read_dir(directory).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let ignored = configuration
            .ignores
            .iter()
            .any(|ignore| path.to_string_lossy().contains(ignore.as_str()));
        if ignored {
            continue;
        }

        if path.is_dir() {
            walk(configuration, &path, found)?;
        } else if path.extension().is_some_and(|extension| extension == SOURCE_EXTENSION) {
            found.push(path);
        }
    }
    Ok(())
}

/// Reads every `.sam` file under the configured source directory
pub fn collect_sources(
    configuration: &ProjectConfiguration,
) -> Result<Vec<ModuleSource>, CompilationError> {
    let mut paths = Vec::new();
    walk(configuration, &configuration.source_directory, &mut paths)?;
    paths.sort();

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(reference) = module_reference_of(&configuration.source_directory, &path) else {
            tracing::warn!(path = %path.display(), "skipping file without a module name");
            continue;
        };
        let contents = std::fs::read_to_string(&path).map_err(|source| CompilationError::Io {
            path: path.clone(),
            source,
        })?;
        sources.push(ModuleSource {
            reference,
            file: SourceFile {
                contents,
                origin: SourceFileOrigin::File(path),
            },
        });
    }

    tracing::debug!(modules = sources.len(), "collected sources");
    Ok(sources)
}
