//! Replaces virtual registers with physical registers and stack slots.
//! Both allocators hand back the number of slots they used so the frame can
//! be sized around them.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    backend::asm::{Instruction, Memory, Register},
    errors::InternalError,
};

pub mod coloring;
pub mod naive;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RegisterAllocatorKind {
    /// Graph coloring with optimistic spilling
    #[default]
    Coloring,
    /// Every virtual register lives in its own stack slot
    Naive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub instructions: Vec<Instruction>,
    pub stack_slots: usize,
}

pub fn allocate_registers(
    instructions: Vec<Instruction>,
    function_name: &str,
    kind: RegisterAllocatorKind,
) -> Result<Allocation, InternalError> {
    let allocation = match kind {
        RegisterAllocatorKind::Coloring => coloring::allocate(instructions, function_name)?,
        RegisterAllocatorKind::Naive => naive::allocate(instructions)?,
    };
    tracing::debug!(
        function = function_name,
        allocator = %kind,
        stack_slots = allocation.stack_slots,
        "allocated registers"
    );
    Ok(allocation)
}

fn distinct_spilled<'a>(
    instruction: &'a Instruction,
    slots: &HashMap<Register, usize>,
) -> Vec<&'a Register> {
    let mut spilled = Vec::new();
    for register in instruction.mentioned_registers() {
        if slots.contains_key(register) && !spilled.contains(&register) {
            spilled.push(register);
        }
    }
    spilled
}

/// Rewrites every instruction mentioning a register in `slots`. Each such
/// register is replaced by one that `replacements` picks for the
/// instruction, loaded from its slot before the instruction when read and
/// stored back after it when written.
fn rewrite_spilled(
    instructions: Vec<Instruction>,
    slots: &HashMap<Register, usize>,
    mut replacements: impl FnMut(&Instruction, usize) -> Result<Vec<Register>, InternalError>,
) -> Result<Vec<Instruction>, InternalError> {
    let mut rewritten = Vec::with_capacity(instructions.len());

    for instruction in instructions {
        let spilled = distinct_spilled(&instruction, slots);
        if spilled.is_empty() {
            rewritten.push(instruction);
            continue;
        }

        let chosen = replacements(&instruction, spilled.len())?;
        let renaming = spilled
            .iter()
            .map(|register| (*register).clone())
            .zip(chosen)
            .collect::<Vec<_>>();
        let uses = instruction.uses();
        let definitions = instruction.definitions();

        for (original, replacement) in &renaming {
            if uses.contains(original) {
                rewritten.push(Instruction::mov(
                    replacement.clone(),
                    Memory::stack_slot(slots[original]),
                ));
            }
        }
        rewritten.push(instruction.map_registers(&mut |register| {
            renaming
                .iter()
                .find(|(original, _)| original == register)
                .map_or_else(|| register.clone(), |(_, replacement)| replacement.clone())
        }));
        for (original, replacement) in &renaming {
            if definitions.contains(original) {
                rewritten.push(Instruction::mov(
                    Memory::stack_slot(slots[original]),
                    replacement.clone(),
                ));
            }
        }
    }

    Ok(rewritten)
}
