use std::fmt::Write;

use colored::Colorize;
use itertools::Itertools;

use crate::middle::mir::{self, Statement};

/// Colored listing of a whole MIR program for terminals
pub fn pretty_print_mir(sources: &mir::Sources) -> String {
    let mut out = String::new();

    for global in &sources.global_variables {
        let _ = writeln!(
            out,
            "{} {} {} {}",
            "const".magenta(),
            global.name.blue(),
            "=".white(),
            format!("{:?}", global.content).green()
        );
    }

    for function in &sources.functions {
        let _ = writeln!(
            out,
            "\n{} {}{}{}{}",
            "function".magenta(),
            function.name.blue(),
            "(".white(),
            function.arguments.iter().join(", ").white(),
            ") {".white()
        );

        for statement in &function.body {
            let _ = writeln!(out, "{}", pretty_print_statement(statement));
        }

        let _ = writeln!(out, "{}", "}".white());
    }

    out
}

fn pretty_print_statement(statement: &Statement) -> String {
    match statement {
        Statement::Label(label) => format!("{}", format!("{label}:").bright_red()),
        Statement::MoveTemp { temporary, source } => {
            format!("  {temporary} {} {source};", "=".white())
        }
        Statement::MoveMem { target, source } => {
            format!("  {}[{target}] {} {source};", "MEM".cyan(), "=".white())
        }
        Statement::Call {
            function,
            arguments,
            return_collector,
        } => {
            let collector = return_collector
                .as_ref()
                .map(|collector| format!("{collector} {} ", "=".white()))
                .unwrap_or_default();
            format!(
                "  {collector}{}{}({});",
                "call ".cyan(),
                function,
                arguments.iter().join(", ")
            )
        }
        Statement::Jump(label) => format!("  {} {};", "goto".cyan(), label.bright_red()),
        Statement::ConditionalJumpFallThrough { condition, label } => format!(
            "  {} ({condition}) {} {};",
            "if".cyan(),
            "goto".cyan(),
            label.bright_red()
        ),
        Statement::Return(value) => format!("  {} {value};", "return".cyan()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{Expression, Function, Sources};

    #[test]
    fn plain_listing_matches_display() {
        let sources = Sources {
            global_variables: vec![],
            functions: vec![Function {
                name: "f".into(),
                arguments: vec!["a".into()],
                body: vec![
                    Statement::Label("start".into()),
                    Statement::Return(Expression::temporary("a")),
                ],
            }],
        };

        let plain = strip_ansi_escapes::strip_str(pretty_print_mir(&sources));
        assert_eq!(plain, "\nfunction f(a) {\nstart:\n  return a;\n}\n");
    }
}
