use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use colored::Colorize;
use samc::{
    backend::{
        pretty_print::pretty_print_asm,
        targets::{CodeGenerator, Target},
    },
    collect_sources, compile_entry_points, compile_to_hir, compile_to_mir,
    config::ProjectConfiguration,
    errors::CompilationError,
    middle::mir::pretty_print::pretty_print_mir,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory to look for sconfig.json in, defaults to the current one
    #[arg(long, global = true, value_name = "PATH")]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile every entry point of the project to assembly
    Compile {
        /// Print an intermediate form to stdout instead of writing files
        #[arg(long, value_enum)]
        emit: Option<Emit>,

        /// Assemble and link each program with gcc
        #[arg(long, requires = "runtime")]
        link: bool,

        /// Object file or archive providing the builtin functions
        #[arg(long, value_name = "FILE")]
        runtime: Option<PathBuf>,
    },
    /// Type check the project without generating code
    Check,
    /// Print the compiler version
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    Hir,
    Mir,
    Asm,
}

fn report(error: &CompilationError) {
    match error {
        CompilationError::CompileTime(errors) => {
            eprintln!("{}", format!("Found {} error(s).", errors.len()).red().bold());
            for error in errors {
                eprintln!("{}", error.render());
            }
        }
        error => eprintln!("{} {error}", "error:".red().bold()),
    }
}

fn link(asm_path: &Path, runtime: &Path, output: &Path) -> Result<(), CompilationError> {
    let generator = Target::default().get_code_generator();
    let object = mktemp::Temp::new_file().map_err(|source| CompilationError::Io {
        path: std::env::temp_dir(),
        source,
    })?;

    let steps = [
        generator.create_assembler_command(asm_path, object.as_path()),
        generator.create_linker_command(&[object.as_path(), runtime], output),
    ];
    for mut command in steps {
        let program = command.get_program().to_string_lossy().into_owned();
        tracing::debug!(?command, "running");
        let result = command.output().map_err(|source| CompilationError::Io {
            path: PathBuf::from(&program),
            source,
        })?;
        if !result.status.success() {
            return Err(CompilationError::Link {
                program: output.display().to_string(),
                message: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
    }
    Ok(())
}

fn compile(
    configuration: &ProjectConfiguration,
    emit: Option<Emit>,
    runtime: Option<&Path>,
) -> Result<(), CompilationError> {
    let sources = collect_sources(configuration)?;
    let options = configuration.compiler_options();
    let entry_modules = configuration.entry_modules();

    match emit {
        Some(Emit::Hir) => {
            for entry_module in &entry_modules {
                println!("{}", compile_to_hir(&sources, entry_module, &options)?);
            }
            return Ok(());
        }
        Some(Emit::Mir) => {
            for entry_module in &entry_modules {
                print!("{}", pretty_print_mir(&compile_to_mir(&sources, entry_module, &options)?));
            }
            return Ok(());
        }
        Some(Emit::Asm) | None => {}
    }

    let programs = compile_entry_points(&sources, &entry_modules, &options)?;
    if emit == Some(Emit::Asm) {
        for (_, asm) in &programs {
            print!("{}", pretty_print_asm(asm));
        }
        return Ok(());
    }

    let output_directory = &configuration.output_directory;
    std::fs::create_dir_all(output_directory).map_err(|source| CompilationError::Io {
        path: output_directory.clone(),
        source,
    })?;

    for (entry_module, asm) in programs {
        let asm_path = output_directory.join(format!("{entry_module}.s"));
        std::fs::write(&asm_path, asm).map_err(|source| CompilationError::Io {
            path: asm_path.clone(),
            source,
        })?;
        tracing::info!(path = %asm_path.display(), "wrote assembly");

        if let Some(runtime) = runtime {
            let executable = output_directory.join(entry_module.to_string());
            link(&asm_path, runtime, &executable)?;
            tracing::info!(path = %executable.display(), "linked");
        }
    }
    Ok(())
}

fn load_configuration(project: Option<&Path>) -> Result<ProjectConfiguration, CompilationError> {
    let start = match project {
        Some(project) => project.to_path_buf(),
        None => std::env::current_dir().map_err(|source| CompilationError::Io {
            path: PathBuf::from("."),
            source,
        })?,
    };
    Ok(ProjectConfiguration::discover(&start)?)
}

fn run(args: Args) -> Result<(), CompilationError> {
    let load = || load_configuration(args.project.as_deref());

    match &args.command {
        Command::Compile {
            emit,
            link,
            runtime,
        } => {
            let runtime = if *link { runtime.as_deref() } else { None };
            compile(&load()?, *emit, runtime)
        }
        Command::Check => {
            let configuration = load()?;
            let sources = collect_sources(&configuration)?;
            samc::check_sources(&sources, &configuration.compiler_options())?;
            println!("{}", "No errors.".green());
            Ok(())
        }
        Command::Version => {
            println!("samc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    if let Ok(filter) = EnvFilter::try_from_env("SAMC_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report(&error);
            ExitCode::FAILURE
        }
    }
}
