use indoc::indoc;
use samc::{
    CompilerOptions, compile_to_mir,
    frontend::{ModuleSource, location::ModuleReference},
    middle::{
        mir::interpreter::{InterpreterOptions, interpret_sources},
        optimization::OptimizationConfig,
    },
};

const ARITHMETIC: &str = indoc! {r#"
    class Main {
        function main(): unit = {
            val a = 3 * 4 + 10 / 2 - 7 % 3;
            val b = a * 2;
            val c = a * 2;
            println(intToString(a) :: " " :: intToString(b + c) :: "!")
        }
    }
"#};

const FIBONACCI: &str = indoc! {"
    class Main {
        function fib(n: int): int = if n < 2 then n else Main.fib(n - 1) + Main.fib(n - 2)
        function main(): unit = println(intToString(Main.fib(10)))
    }
"};

const VARIANTS: &str = indoc! {"
    class Option(Some(int), None(unit)) {
        function of(value: int): Option = Some(value)
        function empty(): Option = None({})
        method orElse(fallback: int): int =
            match (this) {
                | Some value -> value
                | None _ -> fallback
            }
    }

    class Main {
        function main(): unit = {
            val some = Option.of(7);
            val none = Option.empty();
            println(intToString(some.orElse(0) + none.orElse(3)))
        }
    }
"};

const CLOSURES: &str = indoc! {"
    class Main {
        function apply(f: (int) -> int, x: int): int = f(x)
        function main(): unit = {
            val k = 5;
            val add = (x: int) -> x + k;
            println(intToString(Main.apply(add, 10)))
        }
    }
"};

const SHORT_CIRCUIT: &str = indoc! {r#"
    class Main {
        function loud(b: bool): bool = { val _ = println("evaluated"); b }
        function main(): unit = {
            val first = false && Main.loud(true);
            val second = true || Main.loud(false);
            val third = true && Main.loud(true);
            println(if first || !second || !third then "wrong" else "right")
        }
    }
"#};

fn corpus() -> [(&'static str, &'static str, &'static str); 5] {
    [
        ("arithmetic", ARITHMETIC, "16 64!\n"),
        ("fibonacci", FIBONACCI, "55\n"),
        ("variants", VARIANTS, "10\n"),
        ("closures", CLOSURES, "15\n"),
        ("short circuit", SHORT_CIRCUIT, "evaluated\nright\n"),
    ]
}

fn run(code: &str, optimization: OptimizationConfig) -> String {
    let main = ModuleReference::from_dotted("Main");
    let sources = vec![ModuleSource::in_memory(main.clone(), code)];
    let options = CompilerOptions {
        optimization,
        tail_recursion: false,
        ..CompilerOptions::default()
    };

    let mir = compile_to_mir(&sources, &main, &options).unwrap();
    interpret_sources(&mir, InterpreterOptions::default()).unwrap()
}

fn single_pass_configs() -> Vec<(&'static str, OptimizationConfig)> {
    let none = OptimizationConfig::default;
    vec![
        ("constant propagation", OptimizationConfig { constant_propagation: true, ..none() }),
        ("algebraic", OptimizationConfig { algebraic_optimization: true, ..none() }),
        ("constant folding", OptimizationConfig { constant_folding: true, ..none() }),
        ("copy propagation", OptimizationConfig { copy_propagation: true, ..none() }),
        ("local value numbering", OptimizationConfig { local_value_numbering: true, ..none() }),
        ("cse", OptimizationConfig { common_subexpression_elimination: true, ..none() }),
        ("dead code", OptimizationConfig { dead_code_elimination: true, ..none() }),
        ("inlining", OptimizationConfig { inlining: true, ..none() }),
        ("all", OptimizationConfig::all()),
    ]
}

#[test]
fn unoptimized_programs_print_the_expected_output() {
    for (name, code, expected) in corpus() {
        assert_eq!(run(code, OptimizationConfig::default()), expected, "{name}");
    }
}

#[test]
fn every_pass_preserves_program_output() {
    for (name, code, expected) in corpus() {
        for (pass, config) in single_pass_configs() {
            assert_eq!(run(code, config), expected, "{pass} changed the output of {name}");
        }
    }
}

#[test]
fn a_single_round_is_enough_to_stay_correct() {
    let config = OptimizationConfig {
        max_iterations: Some(1),
        ..OptimizationConfig::all()
    };
    for (name, code, expected) in corpus() {
        assert_eq!(run(code, config.clone()), expected, "{name}");
    }
}
