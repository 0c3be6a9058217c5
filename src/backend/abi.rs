//! Frame setup and teardown around an allocated function body.

use crate::backend::{
    asm::{BinaryOperator, Instruction, Operand, PhysicalRegister, Register},
    register_allocation::Allocation,
};

fn calls_out(instructions: &[Instruction]) -> bool {
    instructions
        .iter()
        .any(|instruction| matches!(instruction, Instruction::Call { .. }))
}

/// A jump to the label right after it falls through anyway
fn remove_jumps_to_next(instructions: Vec<Instruction>) -> Vec<Instruction> {
    let mut kept: Vec<Instruction> = Vec::with_capacity(instructions.len());
    for instruction in instructions {
        if let Instruction::Label(label) = &instruction {
            let jumps_here = matches!(
                kept.last(),
                Some(Instruction::Jump { condition: None, label: target }) if target == label
            );
            if jumps_here {
                kept.pop();
            }
        }
        kept.push(instruction);
    }
    kept
}

/// Wraps the body in a prologue and an epilogue. Only functions that call
/// out, use stack slots or read arguments from the caller's frame get a
/// frame pointer; calls require `rsp` to stay 16 byte aligned, so non-leaf
/// frames are rounded up to an even number of slots.
pub fn finalize_function(
    name: &str,
    parameters: usize,
    allocation: Allocation,
) -> Vec<Instruction> {
    let Allocation {
        instructions: body,
        stack_slots,
    } = allocation;
    let is_leaf = !calls_out(&body);
    let needs_frame =
        !is_leaf || stack_slots > 0 || parameters > PhysicalRegister::ARGUMENTS.len();

    let mut instructions = vec![Instruction::Label(name.to_string())];
    if needs_frame {
        instructions.push(Instruction::Push(Register::RBP.into()));
        instructions.push(Instruction::mov(Register::RBP, Register::RSP));

        let slots = if is_leaf {
            stack_slots
        } else {
            stack_slots.next_multiple_of(2)
        };
        if slots > 0 {
            instructions.push(Instruction::binary(
                BinaryOperator::Sub,
                Register::RSP,
                Operand::Immediate(8 * slots as i64),
            ));
        }
    }

    instructions.extend(remove_jumps_to_next(body));

    if needs_frame {
        instructions.push(Instruction::mov(Register::RSP, Register::RBP));
        instructions.push(Instruction::PopRbp);
    }
    instructions.push(Instruction::Return);
    instructions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::asm::CallTarget;

    fn printed(instructions: &[Instruction]) -> Vec<String> {
        instructions.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn leaf_functions_without_slots_skip_the_frame() {
        let allocation = Allocation {
            instructions: vec![
                Instruction::mov(Register::RAX, Operand::Immediate(1)),
                Instruction::jump("LABEL_FUNCTION_CALL_EPILOGUE_FOR_f"),
                Instruction::Label("LABEL_FUNCTION_CALL_EPILOGUE_FOR_f".into()),
            ],
            stack_slots: 0,
        };

        assert_eq!(
            printed(&finalize_function("f", 0, allocation)),
            vec![
                "f:",
                "mov rax, 1",
                "LABEL_FUNCTION_CALL_EPILOGUE_FOR_f:",
                "ret"
            ]
        );
    }

    #[test]
    fn calling_functions_keep_the_stack_aligned() {
        let allocation = Allocation {
            instructions: vec![Instruction::Call {
                target: CallTarget::Direct("g".into()),
                arguments: 0,
            }],
            stack_slots: 3,
        };

        assert_eq!(
            printed(&finalize_function("f", 0, allocation)),
            vec![
                "f:",
                "push rbp",
                "mov rbp, rsp",
                "sub rsp, 32",
                "call g",
                "mov rsp, rbp",
                "pop rbp",
                "ret"
            ]
        );
    }

    #[test]
    fn stack_arguments_need_the_frame_pointer() {
        let allocation = Allocation {
            instructions: vec![],
            stack_slots: 0,
        };

        let instructions = finalize_function("f", 7, allocation);

        assert_eq!(
            printed(&instructions),
            vec!["f:", "push rbp", "mov rbp, rsp", "mov rsp, rbp", "pop rbp", "ret"]
        );
    }
}
