use std::fmt::Write;

use colored::Colorize;

/// Colors an assembly listing for terminals: labels, directives, comments
/// and mnemonics each get their own color.
pub fn pretty_print_asm(asm: &str) -> String {
    let mut out = String::new();

    for line in asm.lines() {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];

        let colored = if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with("##") {
            trimmed.dimmed().to_string()
        } else if trimmed.ends_with(':') {
            trimmed.bright_red().to_string()
        } else if trimmed.starts_with('.') {
            trimmed.magenta().to_string()
        } else {
            match trimmed.split_once(' ') {
                Some((mnemonic, operands)) => {
                    let (operands, comment) = match operands.split_once("##") {
                        Some((operands, comment)) => (operands, Some(comment)),
                        None => (operands, None),
                    };
                    let mut colored = format!("{} {}", mnemonic.cyan(), operands.white());
                    if let Some(comment) = comment {
                        colored.push_str(&format!("##{comment}").dimmed().to_string());
                    }
                    colored
                }
                None => trimmed.cyan().to_string(),
            }
        };

        let _ = writeln!(out, "{indent}{colored}");
    }

    out
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn plain_listing_survives_coloring() {
        let asm = indoc! {"
                .text
            main:
                ## return 0;
                mov rax, 0
                ret
        "};

        assert_eq!(strip_ansi_escapes::strip_str(pretty_print_asm(asm)), asm);
    }
}
