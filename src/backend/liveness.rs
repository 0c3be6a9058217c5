use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::{
    backend::asm::{Instruction, PhysicalRegister, Register},
    middle::optimization::dataflow::{self, Analysis, ControlFlowGraph, Direction},
};

/// One node per instruction. Returns end at the epilogue, so the only exits
/// are the instructions falling off the end of the function.
pub fn instruction_graph(instructions: &[Instruction]) -> ControlFlowGraph {
    let labels = instructions
        .iter()
        .enumerate()
        .filter_map(|(index, instruction)| match instruction {
            Instruction::Label(label) => Some((label.as_str(), index)),
            _ => None,
        })
        .collect::<HashMap<_, _>>();
    let next = |index: usize| (index + 1 < instructions.len()).then_some(index + 1);

    let successors = instructions
        .iter()
        .enumerate()
        .map(|(index, instruction)| match instruction {
            Instruction::Jump {
                condition: None,
                label,
            } => labels.get(label.as_str()).copied().into_iter().collect(),
            Instruction::Jump {
                condition: Some(_),
                label,
            } => {
                let mut successors = next(index).into_iter().collect::<Vec<_>>();
                match labels.get(label.as_str()) {
                    Some(&target) if !successors.contains(&target) => successors.push(target),
                    _ => {}
                }
                successors
            }
            Instruction::Return => Vec::new(),
            _ => next(index).into_iter().collect(),
        })
        .collect();

    ControlFlowGraph::from_successors(successors)
}

struct LiveRegisters<'a> {
    instructions: &'a [Instruction],
}

impl Analysis for LiveRegisters<'_> {
    type Fact = BTreeSet<Register>;

    const DIRECTION: Direction = Direction::Backward;

    fn initial(&self) -> Self::Fact {
        BTreeSet::new()
    }

    /// The return value and the callee saved registers leave the function
    fn boundary(&self) -> Self::Fact {
        std::iter::once(Register::RAX)
            .chain(PhysicalRegister::CALLEE_SAVED.map(Register::Physical))
            .collect()
    }

    fn join(&self, a: &Self::Fact, b: &Self::Fact) -> Self::Fact {
        a.union(b).cloned().collect()
    }

    fn transfer(&self, node: usize, live_out: &Self::Fact) -> Self::Fact {
        let instruction = &self.instructions[node];
        let mut live_in = live_out.clone();
        for definition in instruction.definitions() {
            live_in.remove(&definition);
        }
        live_in.extend(instruction.uses());
        live_in
    }
}

/// Registers live right after each instruction
pub fn live_out(instructions: &[Instruction]) -> Vec<BTreeSet<Register>> {
    let graph = instruction_graph(instructions);
    dataflow::solve(&graph, &LiveRegisters { instructions }).inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::asm::{BinaryOperator, Condition, Operand};

    fn register(name: &str) -> Register {
        Register::virtual_register(name)
    }

    #[test]
    fn loop_carried_registers_stay_live_around_the_back_edge() {
        let instructions = vec![
            Instruction::mov(register("i"), Operand::Immediate(0)),
            Instruction::Label("loop".into()),
            Instruction::binary(BinaryOperator::Add, register("i"), Operand::Immediate(1)),
            Instruction::Compare {
                left: register("i").into(),
                right: Operand::Immediate(10),
            },
            Instruction::Jump {
                condition: Some(Condition::Less),
                label: "loop".into(),
            },
            Instruction::mov(Register::RAX, register("i")),
        ];

        let live = live_out(&instructions);

        assert!(live[0].contains(&register("i")));
        assert!(live[4].contains(&register("i")));
        assert!(!live[5].contains(&register("i")));
        assert!(live[5].contains(&Register::RAX));
    }

    #[test]
    fn calls_kill_caller_saved_registers() {
        let instructions = vec![
            Instruction::mov(register("x"), Operand::Immediate(1)),
            Instruction::mov(Register::from(PhysicalRegister::Rdi), register("x")),
            Instruction::Call {
                target: crate::backend::asm::CallTarget::Direct("f".into()),
                arguments: 1,
            },
            Instruction::mov(register("y"), Register::RAX),
            Instruction::mov(Register::RAX, register("y")),
        ];

        let live = live_out(&instructions);

        assert!(live[1].contains(&Register::from(PhysicalRegister::Rdi)));
        assert!(!live[1].contains(&register("x")));
        assert!(live[2].contains(&Register::RAX));
    }
}
