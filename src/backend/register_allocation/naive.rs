//! Gives every virtual register a stack slot and shuttles values through a
//! few scratch registers around each instruction. Slow code, but a useful
//! baseline when the coloring allocator is suspected.

use hashbrown::HashMap;

use super::{Allocation, rewrite_spilled};
use crate::{
    backend::asm::{Instruction, PhysicalRegister, Register},
    errors::InternalError,
    internal_error,
};

const SCRATCH: [PhysicalRegister; 3] = [
    PhysicalRegister::R10,
    PhysicalRegister::R11,
    PhysicalRegister::Rax,
];

fn scratch_registers(instruction: &Instruction, count: usize) -> Result<Vec<Register>, InternalError> {
    let mentioned = instruction.mentioned_registers();
    let implicit_rax = matches!(instruction, Instruction::Cqo | Instruction::IDiv(_));

    let available = SCRATCH
        .iter()
        .map(|register| Register::Physical(*register))
        .filter(|register| !mentioned.contains(&register))
        .filter(|register| !(implicit_rax && *register == Register::RAX))
        .take(count)
        .collect::<Vec<_>>();

    if available.len() < count {
        return Err(internal_error!(
            "not enough scratch registers for `{instruction}`"
        ));
    }
    Ok(available)
}

pub fn allocate(instructions: Vec<Instruction>) -> Result<Allocation, InternalError> {
    let mut slots = HashMap::new();
    for instruction in &instructions {
        for register in instruction.mentioned_registers() {
            if matches!(register, Register::Virtual(_)) && !slots.contains_key(register) {
                slots.insert(register.clone(), slots.len());
            }
        }
    }

    let instructions = rewrite_spilled(instructions, &slots, scratch_registers)?;
    Ok(Allocation {
        instructions,
        stack_slots: slots.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::asm::{Memory, Operand};

    #[test]
    fn every_virtual_register_gets_a_slot() {
        let instructions = vec![
            Instruction::mov(Register::virtual_register("a"), PhysicalRegister::Rdi),
            Instruction::mov(
                Register::virtual_register("b"),
                Memory::base(Register::virtual_register("a")),
            ),
            Instruction::mov(Register::RAX, Register::virtual_register("b")),
        ];

        let allocation = allocate(instructions).unwrap();

        assert_eq!(allocation.stack_slots, 2);
        assert_eq!(
            allocation
                .instructions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec![
                "mov r10, rdi",
                "mov qword ptr [rbp - 8], r10",
                "mov r11, qword ptr [rbp - 8]",
                "mov r10, qword ptr [r11]",
                "mov qword ptr [rbp - 16], r10",
                "mov r10, qword ptr [rbp - 16]",
                "mov rax, r10",
            ]
        );
    }

    #[test]
    fn division_never_borrows_rax() {
        let divisor = Register::virtual_register("d");
        let instructions = vec![Instruction::IDiv(Operand::Register(divisor))];

        let allocation = allocate(instructions).unwrap();

        assert_eq!(
            allocation.instructions[1],
            Instruction::IDiv(Operand::Register(PhysicalRegister::R10.into()))
        );
    }

    #[test]
    fn scratch_registers_run_out_eventually() {
        let instruction = Instruction::mov(
            Memory {
                base: Some(Register::RAX),
                index: Some((PhysicalRegister::R10.into(), 8)),
                symbol: None,
                displacement: 0,
            },
            Register::virtual_register("x"),
        );

        assert!(scratch_registers(&instruction, 2).is_err());
        assert_eq!(
            scratch_registers(&instruction, 1).unwrap(),
            vec![Register::from(PhysicalRegister::R11)]
        );
    }
}
