use indoc::indoc;
use samc::{
    CompilerOptions, check_sources, compile_entry_points, compile_to_assembly, compile_to_mir,
    errors::{CompilationError, ErrorKind},
    frontend::{ModuleSource, location::ModuleReference},
    middle::{
        mir::{
            Expression, Statement,
            interpreter::{InterpreterError, InterpreterOptions, interpret_sources},
        },
        optimization::OptimizationConfig,
    },
};

fn main_module() -> ModuleReference {
    ModuleReference::from_dotted("Main")
}

fn sources(code: &str) -> Vec<ModuleSource> {
    vec![ModuleSource::in_memory(main_module(), code)]
}

fn unoptimized() -> CompilerOptions {
    CompilerOptions {
        optimization: OptimizationConfig::default(),
        tail_recursion: false,
        ..CompilerOptions::default()
    }
}

fn run(code: &str, options: &CompilerOptions) -> String {
    let mir = compile_to_mir(&sources(code), &main_module(), options).unwrap();
    interpret_sources(&mir, InterpreterOptions::default()).unwrap()
}

fn compile_time_errors(code: &str) -> Vec<samc::errors::CompileTimeError> {
    match check_sources(&sources(code), &CompilerOptions::default()) {
        Err(CompilationError::CompileTime(errors)) => errors,
        Err(other) => panic!("expected compile-time errors, got {other}"),
        Ok(_) => panic!("expected compile-time errors"),
    }
}

#[test]
fn hello_world_prints_the_concatenation() {
    let code = r#"class Main { function main(): unit = println("Hello "::"World!") }"#;

    assert_eq!(run(code, &unoptimized()), "Hello World!\n");
    assert_eq!(run(code, &CompilerOptions::default()), "Hello World!\n");
}

#[test]
fn truncated_source_reports_a_single_syntax_error() {
    let errors = compile_time_errors("class Main { function main(): string = 3");

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::SyntaxError);

    let compiled = compile_to_mir(
        &sources("class Main { function main(): string = 3"),
        &main_module(),
        &CompilerOptions::default(),
    );
    assert!(matches!(compiled, Err(CompilationError::CompileTime(_))));
}

#[test]
fn adding_an_int_to_a_string_reports_both_operands() {
    let errors = compile_time_errors(r#"class Main { function main(): string = 42 + "" }"#);

    assert_eq!(
        errors.iter().map(|error| error.kind).collect::<Vec<_>>(),
        vec![ErrorKind::UnexpectedType, ErrorKind::UnexpectedType]
    );
    assert_ne!(errors[0].range, errors[1].range);
}

#[test]
fn inlined_helpers_leave_no_calls_behind() {
    let code = indoc! {"
        class Main {
            function helper(x: int): int = x * 2 + 1
            function main(): unit = println(intToString(Main.helper(20)))
        }
    "};
    let inlining = CompilerOptions {
        optimization: OptimizationConfig {
            inlining: true,
            ..OptimizationConfig::default()
        },
        ..unoptimized()
    };

    let mir = compile_to_mir(&sources(code), &main_module(), &inlining).unwrap();

    let calls_helper = mir.functions.iter().any(|function| {
        function.body.iter().any(|statement| {
            matches!(
                statement,
                Statement::Call { function: Expression::Name(name), .. } if name == "_Main_Main_helper"
            )
        })
    });
    assert!(!calls_helper);
    assert_eq!(
        interpret_sources(&mir, InterpreterOptions::default()).unwrap(),
        run(code, &unoptimized())
    );
    assert_eq!(run(code, &unoptimized()), "41\n");
}

#[test]
fn tail_recursion_keeps_deep_loops_within_a_small_stack() {
    let code = indoc! {"
        class Main {
            function count(n: int, acc: int): int =
                if n == 0 then acc else Main.count(n - 1, acc + 1)
            function main(): unit = println(intToString(Main.count(1000, 0)))
        }
    "};
    let shallow = InterpreterOptions {
        max_call_depth: 200,
    };

    let without = compile_to_mir(&sources(code), &main_module(), &unoptimized()).unwrap();
    assert!(matches!(
        interpret_sources(&without, shallow),
        Err(InterpreterError::StackOverflow(200))
    ));

    let with = CompilerOptions {
        tail_recursion: true,
        ..unoptimized()
    };
    let optimized = compile_to_mir(&sources(code), &main_module(), &with).unwrap();
    assert_eq!(interpret_sources(&optimized, shallow).unwrap(), "1000\n");
}

#[test]
fn assembly_exports_the_entry_and_lays_out_strings() {
    let code = r#"class Main { function main(): unit = println("ok") }"#;

    let asm = compile_to_assembly(&sources(code), &main_module(), &CompilerOptions::default())
        .unwrap();

    assert!(asm.contains(".globl _compiled_program_main"));
    assert!(asm.contains("_compiled_program_main:"));
    assert!(asm.contains("call _builtin_println"));
    assert!(asm.contains(".quad 2\n    .quad 111 ## o\n    .quad 107 ## k\n"));
}

#[test]
fn every_entry_point_gets_its_own_program() {
    let modules = vec![
        ModuleSource::in_memory(
            ModuleReference::from_dotted("A"),
            r#"class Main { function main(): unit = println("a") }"#,
        ),
        ModuleSource::in_memory(
            ModuleReference::from_dotted("B"),
            r#"class Main { function main(): unit = println("b") }"#,
        ),
    ];
    let entries = [ModuleReference::from_dotted("A"), ModuleReference::from_dotted("B")];

    let programs = compile_entry_points(&modules, &entries, &CompilerOptions::default()).unwrap();

    assert_eq!(programs.len(), 2);
    assert_eq!(programs[0].0, ModuleReference::from_dotted("A"));
    assert_eq!(programs[1].0, ModuleReference::from_dotted("B"));
    for (_, asm) in &programs {
        assert!(asm.contains("_compiled_program_main:"));
        assert!(asm.contains("call _builtin_println"));
    }
    assert!(programs[0].1.contains(".quad 1\n    .quad 97 ## a\n"));
    assert!(!programs[0].1.contains(".quad 98 ## b"));
    assert!(programs[1].1.contains(".quad 1\n    .quad 98 ## b\n"));
    assert!(!programs[1].1.contains(".quad 97 ## a"));
}
