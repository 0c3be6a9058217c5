//! Chaitin-Briggs style allocation: build the interference graph from
//! liveness, simplify nodes of low degree, push the rest optimistically,
//! then color in reverse. Registers that fail to color go to the stack and
//! the whole process starts over on the rewritten code.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

use super::{Allocation, rewrite_spilled};
use crate::{
    backend::{
        asm::{Instruction, Operand, PhysicalRegister, Register},
        liveness,
        tiling::epilogue_label,
    },
    errors::InternalError,
    internal_error,
};

const COLORS: usize = PhysicalRegister::ALLOCATABLE.len();
const MAX_ROUNDS: usize = 32;

const SPILL_PREFIX: &str = "_SPILL_";
const CALLEE_SAVED_PREFIX: &str = "_CALLEE_SAVED_";

fn is_virtual(register: &Register) -> bool {
    matches!(register, Register::Virtual(_))
}

fn is_spill_temporary(register: &Register) -> bool {
    matches!(register, Register::Virtual(name) if name.starts_with(SPILL_PREFIX))
}

fn is_callee_saved_temporary(register: &Register) -> bool {
    matches!(register, Register::Virtual(name) if name.starts_with(CALLEE_SAVED_PREFIX))
}

/// Copies every callee saved register into a temporary on entry and back
/// after the epilogue label, so the allocator is free to use them.
fn preserve_callee_saved(
    mut instructions: Vec<Instruction>,
    function_name: &str,
) -> Result<Vec<Instruction>, InternalError> {
    let epilogue = Instruction::Label(epilogue_label(function_name));
    let position = instructions
        .iter()
        .position(|instruction| *instruction == epilogue)
        .ok_or_else(|| internal_error!("{function_name} has no epilogue label"))?;

    let temporary =
        |register: PhysicalRegister| Register::virtual_register(format!("{CALLEE_SAVED_PREFIX}{register}"));
    let restores = PhysicalRegister::CALLEE_SAVED
        .iter()
        .map(|register| Instruction::mov(*register, temporary(*register)));
    instructions.splice(position + 1..position + 1, restores);

    let saves = PhysicalRegister::CALLEE_SAVED
        .iter()
        .map(|register| Instruction::mov(temporary(*register), *register));
    instructions.splice(0..0, saves);

    Ok(instructions)
}

fn register_move(instruction: &Instruction) -> Option<(&Register, &Register)> {
    match instruction {
        Instruction::Move {
            destination: Operand::Register(destination),
            source: Operand::Register(source),
        } => Some((destination, source)),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct InterferenceGraph {
    adjacent: BTreeMap<Register, BTreeSet<Register>>,
    move_partners: BTreeMap<Register, BTreeSet<Register>>,
}

impl InterferenceGraph {
    fn build(instructions: &[Instruction]) -> Self {
        let live_out = liveness::live_out(instructions);
        let mut graph = Self::default();

        for (instruction, live) in instructions.iter().zip(&live_out) {
            for register in instruction.mentioned_registers() {
                if is_virtual(register) {
                    graph.adjacent.entry(register.clone()).or_default();
                }
            }

            let copied = register_move(instruction);
            if let Some((destination, source)) = copied {
                if destination.is_tracked() && source.is_tracked() {
                    graph.add_move(destination, source);
                }
            }

            for definition in instruction.definitions() {
                for other in live {
                    let is_copy_source = copied.is_some_and(|(_, source)| source == other);
                    if *other != definition && !is_copy_source {
                        graph.add_edge(&definition, other);
                    }
                }
            }
        }

        graph
    }

    /// Only virtual registers get adjacency lists. Physical registers are
    /// precolored and never simplified.
    fn add_edge(&mut self, a: &Register, b: &Register) {
        if is_virtual(a) {
            self.adjacent.entry(a.clone()).or_default().insert(b.clone());
        }
        if is_virtual(b) {
            self.adjacent.entry(b.clone()).or_default().insert(a.clone());
        }
    }

    fn add_move(&mut self, a: &Register, b: &Register) {
        self.move_partners
            .entry(a.clone())
            .or_default()
            .insert(b.clone());
        self.move_partners
            .entry(b.clone())
            .or_default()
            .insert(a.clone());
    }

    fn degree(&self, register: &Register, remaining: &BTreeSet<Register>) -> usize {
        self.adjacent.get(register).map_or(0, |neighbors| {
            neighbors
                .iter()
                .filter(|neighbor| !is_virtual(neighbor) || remaining.contains(*neighbor))
                .count()
        })
    }

    /// Removes nodes of insignificant degree first. When none is left, the
    /// node that is cheapest to spill goes on the stack optimistically.
    fn simplify(&self) -> Vec<Register> {
        let mut remaining = self.adjacent.keys().cloned().collect::<BTreeSet<_>>();
        let mut stack = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .find(|register| self.degree(register, &remaining) < COLORS)
                .or_else(|| {
                    remaining.iter().max_by_key(|register| {
                        (
                            is_callee_saved_temporary(register),
                            !is_spill_temporary(register),
                            self.degree(register, &remaining),
                        )
                    })
                })
                .cloned();
            let Some(next) = next else {
                break;
            };
            remaining.remove(&next);
            stack.push(next);
        }

        stack
    }

    /// Colors registers in reverse simplification order, preferring the
    /// color of a move partner. Returns the coloring and the registers that
    /// could not be colored.
    fn select(
        &self,
        mut stack: Vec<Register>,
    ) -> (HashMap<Register, PhysicalRegister>, Vec<Register>) {
        let mut colors = HashMap::new();
        let mut spilled = Vec::new();

        let color_of = |register: &Register, colors: &HashMap<Register, PhysicalRegister>| match register {
            Register::Physical(physical) => Some(*physical),
            Register::Virtual(_) => colors.get(register).copied(),
        };

        while let Some(register) = stack.pop() {
            let forbidden = self
                .adjacent
                .get(&register)
                .into_iter()
                .flatten()
                .filter_map(|neighbor| color_of(neighbor, &colors))
                .collect::<BTreeSet<_>>();

            let preferred = self
                .move_partners
                .get(&register)
                .into_iter()
                .flatten()
                .filter_map(|partner| color_of(partner, &colors))
                .find(|color| {
                    PhysicalRegister::ALLOCATABLE.contains(color) && !forbidden.contains(color)
                });
            let color = preferred.or_else(|| {
                PhysicalRegister::ALLOCATABLE
                    .iter()
                    .copied()
                    .find(|color| !forbidden.contains(color))
            });

            match color {
                Some(color) => {
                    colors.insert(register, color);
                }
                None => spilled.push(register),
            }
        }

        (colors, spilled)
    }
}

fn is_self_move(instruction: &Instruction) -> bool {
    register_move(instruction).is_some_and(|(destination, source)| destination == source)
}

pub fn allocate(
    instructions: Vec<Instruction>,
    function_name: &str,
) -> Result<Allocation, InternalError> {
    let mut instructions = preserve_callee_saved(instructions, function_name)?;
    let mut slots = HashMap::new();
    let mut next_spill = 0;

    for round in 1..=MAX_ROUNDS {
        let graph = InterferenceGraph::build(&instructions);
        let (colors, spilled) = graph.select(graph.simplify());

        if spilled.is_empty() {
            let colored = instructions
                .iter()
                .map(|instruction| {
                    instruction.map_registers(&mut |register| match colors.get(register) {
                        Some(color) => Register::Physical(*color),
                        None => register.clone(),
                    })
                })
                .filter(|instruction| !is_self_move(instruction))
                .collect();
            return Ok(Allocation {
                instructions: colored,
                stack_slots: slots.len(),
            });
        }

        tracing::trace!(function = function_name, round, spilled = spilled.len(), "spilling");
        for register in spilled {
            let slot = slots.len();
            slots.insert(register, slot);
        }
        instructions = rewrite_spilled(instructions, &slots, |_, count| {
            Ok((0..count)
                .map(|_| {
                    let register = Register::virtual_register(format!("{SPILL_PREFIX}{next_spill}"));
                    next_spill += 1;
                    register
                })
                .collect())
        })?;
    }

    Err(internal_error!(
        "register allocation for {function_name} did not settle after {MAX_ROUNDS} rounds"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::asm::{BinaryOperator, CallTarget, Memory};

    fn register(name: &str) -> Register {
        Register::virtual_register(name)
    }

    fn epilogue() -> Instruction {
        Instruction::Label(epilogue_label("f"))
    }

    fn assert_fully_allocated(allocation: &Allocation) {
        for instruction in &allocation.instructions {
            assert!(
                instruction.mentioned_registers().iter().all(|register| !is_virtual(register)),
                "{instruction} still mentions a virtual register"
            );
        }
    }

    #[test]
    fn simple_functions_need_no_stack() {
        let instructions = vec![
            Instruction::mov(register("a"), PhysicalRegister::Rdi),
            Instruction::binary(BinaryOperator::Add, register("a"), Operand::Immediate(1)),
            Instruction::mov(Register::RAX, register("a")),
            Instruction::jump(epilogue_label("f")),
            epilogue(),
        ];

        let allocation = allocate(instructions, "f").unwrap();

        assert_fully_allocated(&allocation);
        assert_eq!(allocation.stack_slots, 0);
        assert!(!allocation.instructions.iter().any(is_self_move));
    }

    #[test]
    fn values_live_across_calls_avoid_caller_saved_registers() {
        let instructions = vec![
            Instruction::mov(register("kept"), PhysicalRegister::Rdi),
            Instruction::Call {
                target: CallTarget::Direct("g".into()),
                arguments: 0,
            },
            Instruction::binary(BinaryOperator::Add, Register::RAX, register("kept")),
            Instruction::jump(epilogue_label("f")),
            epilogue(),
        ];

        let allocation = allocate(instructions, "f").unwrap();

        assert_fully_allocated(&allocation);
        let add_source = allocation.instructions.iter().find_map(|instruction| match instruction {
            Instruction::Binary {
                destination: Operand::Register(destination),
                source,
                ..
            } if *destination == Register::RAX => Some(source.clone()),
            _ => None,
        });
        match add_source {
            Some(Operand::Register(Register::Physical(physical))) => {
                assert!(!PhysicalRegister::CALLER_SAVED.contains(&physical));
            }
            Some(Operand::Memory(_)) | None => {}
            other => panic!("unexpected operand {other:?}"),
        }
    }

    #[test]
    fn pressure_beyond_the_register_file_spills_to_the_stack() {
        let names = (0..20).map(|index| format!("v{index}")).collect::<Vec<_>>();
        let mut instructions = names
            .iter()
            .enumerate()
            .map(|(index, name)| Instruction::mov(register(name), Operand::Immediate(index as i64)))
            .collect::<Vec<_>>();
        instructions.push(Instruction::mov(Register::RAX, Operand::Immediate(0)));
        for name in &names {
            instructions.push(Instruction::binary(BinaryOperator::Add, Register::RAX, register(name)));
        }
        instructions.push(Instruction::jump(epilogue_label("f")));
        instructions.push(epilogue());

        let allocation = allocate(instructions, "f").unwrap();

        assert_fully_allocated(&allocation);
        assert!(allocation.stack_slots > 0);
        assert!(allocation.instructions.iter().any(|instruction| matches!(
            instruction,
            Instruction::Move { destination: Operand::Memory(Memory { base: Some(base), .. }), .. }
                if *base == Register::RBP
        )));
    }

    #[test]
    fn functions_without_an_epilogue_are_rejected() {
        assert!(allocate(vec![Instruction::Return], "f").is_err());
    }
}
