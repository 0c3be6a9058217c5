use std::{fmt::Write, path::Path, process::Command};

use itertools::Itertools;

use crate::{
    backend::{
        CodegenOptions, abi,
        asm::Instruction,
        register_allocation::allocate_registers,
        targets::CodeGenerator,
        tiling::tile_function,
    },
    errors::InternalError,
    middle::{
        allocator::GlobalVariable,
        hir::ENTRY_FUNCTION_NAME,
        mir::{self, Function},
    },
};

pub struct CodeGeneratorX86_64LinuxGnu;

impl CodeGenerator for CodeGeneratorX86_64LinuxGnu {
    #[tracing::instrument(skip_all, fields(functions = sources.functions.len()))]
    fn translate_to_asm(
        &self,
        sources: &mir::Sources,
        options: &CodegenOptions,
    ) -> Result<String, InternalError> {
        let function_bodies = sources
            .functions
            .iter()
            .map(|function| codegen_function(function, options))
            .collect::<Result<Vec<_>, _>>()?
            .join("\n");

        let static_strings = sources
            .global_variables
            .iter()
            .map(format_string_global)
            .join("");

        Ok(format!(
            indoc::indoc! {"
                    .text
                    .intel_syntax noprefix
                    .p2align 4, 0x90
                    .globl {0}
                {1}
                    .data
                {2}"
            },
            ENTRY_FUNCTION_NAME, function_bodies, static_strings
        ))
    }

    fn create_assembler_command(&self, input_file: &Path, output_file: &Path) -> Command {
        let mut cmd = Command::new("gcc");
        cmd.arg("-c").arg("-o").arg(output_file).arg(input_file);
        cmd
    }

    fn create_linker_command(&self, object_files: &[&Path], output_file: &Path) -> Command {
        let mut cmd = Command::new("gcc");
        cmd.arg("-o").arg(output_file).args(object_files);
        cmd
    }
}

fn codegen_function(function: &Function, options: &CodegenOptions) -> Result<String, InternalError> {
    let tiled = tile_function(function)?;
    let tiled = if options.emit_comments {
        tiled
    } else {
        tiled
            .into_iter()
            .filter(|instruction| !instruction.is_comment())
            .collect()
    };

    let allocation = allocate_registers(tiled, &function.name, options.register_allocator)?;
    let instructions = abi::finalize_function(&function.name, function.arguments.len(), allocation);

    let mut out = String::new();
    for instruction in &instructions {
        out.push_str(&render_instruction(instruction));
    }
    Ok(out)
}

/// Labels sit in the first column, everything else is indented
fn render_instruction(instruction: &Instruction) -> String {
    let mut out = String::new();
    match instruction {
        Instruction::Label(label) => {
            let _ = writeln!(out, "{label}:");
        }
        instruction => {
            for line in instruction.to_string().lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
    }
    out
}

/// The length word followed by one word per character
fn format_string_global(global: &GlobalVariable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}:", global.name);
    let _ = writeln!(out, "    .quad {}", global.content.chars().count());
    for character in global.content.chars() {
        let _ = writeln!(
            out,
            "    .quad {} ## {}",
            character as u32,
            character.escape_default()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        backend::register_allocation::RegisterAllocatorKind,
        middle::mir::{Expression, Operator, Statement},
    };

    fn hello_world() -> mir::Sources {
        mir::Sources {
            global_variables: vec![GlobalVariable {
                name: "GLOBAL_STRING_0".into(),
                content: "Hi\n".into(),
            }],
            functions: vec![Function {
                name: ENTRY_FUNCTION_NAME.into(),
                arguments: vec![],
                body: vec![
                    Statement::Call {
                        function: Expression::Name("_builtin_println".into()),
                        arguments: vec![Expression::binary(
                            Operator::Add,
                            Expression::Name("GLOBAL_STRING_0".into()),
                            Expression::Constant(8),
                        )],
                        return_collector: None,
                    },
                    Statement::Return(Expression::ZERO),
                ],
            }],
        }
    }

    #[test]
    fn strings_are_emitted_word_per_character() {
        let asm = CodeGeneratorX86_64LinuxGnu
            .translate_to_asm(&hello_world(), &CodegenOptions::default())
            .unwrap();

        assert!(asm.starts_with(indoc! {"
                .text
                .intel_syntax noprefix
                .p2align 4, 0x90
                .globl _compiled_program_main
            _compiled_program_main:
        "}));
        assert!(asm.ends_with(indoc! {"
                .data
            GLOBAL_STRING_0:
                .quad 3
                .quad 72 ## H
                .quad 105 ## i
                .quad 10 ## \\n
        "}));
        assert!(asm.contains("qword ptr [rip + GLOBAL_STRING_0 + 8]"));
        assert!(asm.contains("call _builtin_println"));
    }

    #[test]
    fn both_allocators_produce_the_same_calls() {
        for register_allocator in [RegisterAllocatorKind::Coloring, RegisterAllocatorKind::Naive] {
            let options = CodegenOptions {
                register_allocator,
                emit_comments: true,
            };
            let asm = CodeGeneratorX86_64LinuxGnu
                .translate_to_asm(&hello_world(), &options)
                .unwrap();

            assert!(asm.contains("    ## "), "comments were requested");
            assert!(asm.contains("    push rbp\n    mov rbp, rsp\n"));
            assert!(asm.contains("    mov rsp, rbp\n    pop rbp\n    ret\n"));
            assert!(!asm.contains("_ASM_REG_"), "{register_allocator} left virtual registers");
        }
    }
}
