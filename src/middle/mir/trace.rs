//! Splits a function body into basic blocks and lays them out again as
//! greedy traces, so most conditional jumps can fall through.

use hashbrown::{HashMap, HashSet};

use crate::{
    errors::InternalError,
    internal_error,
    middle::{
        allocator::ResourceAllocator,
        mir::{Expression, LoweredStatement, Statement},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminator {
    Jump(String),
    ConditionalJump {
        condition: Expression,
        true_label: String,
        false_label: String,
    },
    Return(Expression),
}

impl Terminator {
    /// Successor labels, most preferred first
    fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Jump(label) => vec![label],
            Terminator::ConditionalJump {
                true_label,
                false_label,
                ..
            } => vec![false_label, true_label],
            Terminator::Return(_) => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct BasicBlock {
    label: String,
    statements: Vec<Statement>,
    terminator: Terminator,
}

/// A block whose terminator has not been seen yet
struct OpenBlock {
    label: String,
    statements: Vec<Statement>,
}

struct BlockBuilder<'a> {
    function_name: &'a str,
    allocator: &'a mut ResourceAllocator,
    blocks: Vec<BasicBlock>,
    labels: HashSet<String>,
    current: Option<OpenBlock>,
    /// Label the next block must carry because a fall-through targets it
    pending_label: Option<String>,
}

impl BlockBuilder<'_> {
    fn open(&mut self, label: String) -> Result<(), InternalError> {
        if !self.labels.insert(label.clone()) {
            return Err(internal_error!(
                "duplicate label `{label}` in `{}`",
                self.function_name
            ));
        }
        self.current = Some(OpenBlock {
            label,
            statements: Vec::new(),
        });
        Ok(())
    }

    fn current(&mut self) -> Result<&mut OpenBlock, InternalError> {
        if self.current.is_none() {
            let label = match self.pending_label.take() {
                Some(label) => label,
                None => self.allocator.label("BLOCK"),
            };
            self.open(label)?;
        }

        self.current
            .as_mut()
            .ok_or_else(|| internal_error!("no open block in `{}`", self.function_name))
    }

    fn close(&mut self, terminator: Terminator) -> Result<(), InternalError> {
        self.current()?;
        if let Some(OpenBlock { label, statements }) = self.current.take() {
            self.blocks.push(BasicBlock {
                label,
                statements,
                terminator,
            });
        }
        Ok(())
    }

    fn label(&mut self, label: String) -> Result<(), InternalError> {
        if self.current.is_some() {
            self.close(Terminator::Jump(label.clone()))?;
        }
        self.open(label)
    }

    fn build(
        mut self,
        statements: Vec<LoweredStatement>,
    ) -> Result<Vec<BasicBlock>, InternalError> {
        let mut statements = statements.into_iter().peekable();

        while let Some(statement) = statements.next() {
            match statement {
                LoweredStatement::Canonical(Statement::Label(label)) => self.label(label)?,
                LoweredStatement::Canonical(Statement::Jump(label)) => {
                    self.close(Terminator::Jump(label))?
                }
                LoweredStatement::Canonical(Statement::Return(value)) => {
                    self.close(Terminator::Return(value))?
                }
                LoweredStatement::ConditionalJump {
                    condition,
                    true_label,
                    false_label,
                } => self.close(Terminator::ConditionalJump {
                    condition,
                    true_label,
                    false_label,
                })?,
                LoweredStatement::Canonical(Statement::ConditionalJumpFallThrough {
                    condition,
                    label,
                }) => {
                    let false_label = match statements.peek() {
                        Some(LoweredStatement::Canonical(Statement::Jump(target))) => {
                            let target = target.clone();
                            statements.next();
                            target
                        }
                        Some(LoweredStatement::Canonical(Statement::Label(target))) => {
                            target.clone()
                        }
                        _ => {
                            let target = self.allocator.label("FALL_THROUGH");
                            self.pending_label = Some(target.clone());
                            target
                        }
                    };
                    let true_label = label;
                    self.close_with_pending(Terminator::ConditionalJump {
                        condition,
                        true_label,
                        false_label,
                    })?;
                }
                LoweredStatement::Canonical(statement) => {
                    self.current()?.statements.push(statement)
                }
            }
        }

        if let Some(pending) = self.pending_label.take() {
            return Err(internal_error!(
                "`{}` falls through to `{pending}` past its last statement",
                self.function_name
            ));
        }
        if let Some(open) = self.current.take() {
            return Err(internal_error!(
                "block `{}` at the end of `{}` does not end in a jump or return",
                open.label,
                self.function_name
            ));
        }

        Ok(self.blocks)
    }

    /// Closes the current block without consuming a label reserved for the
    /// block that follows it
    fn close_with_pending(&mut self, terminator: Terminator) -> Result<(), InternalError> {
        let pending = self.pending_label.take();
        self.close(terminator)?;
        self.pending_label = pending;
        Ok(())
    }
}

/// Orders blocks as greedy traces, following the false target of a
/// conditional jump first
fn schedule(blocks: Vec<BasicBlock>) -> Vec<BasicBlock> {
    let index_of = blocks
        .iter()
        .enumerate()
        .map(|(index, block)| (block.label.clone(), index))
        .collect::<HashMap<_, _>>();

    let mut marked = vec![false; blocks.len()];
    let mut order = Vec::with_capacity(blocks.len());

    for start in 0..blocks.len() {
        let mut current = Some(start);
        while let Some(index) = current.filter(|index| !marked[*index]) {
            marked[index] = true;
            order.push(index);

            current = blocks[index]
                .terminator
                .successors()
                .into_iter()
                .filter_map(|label| index_of.get(label).copied())
                .find(|successor| !marked[*successor]);
        }
    }

    let mut slots = blocks.into_iter().map(Some).collect::<Vec<_>>();
    order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

fn emit(blocks: Vec<BasicBlock>) -> Vec<Statement> {
    let next_labels = blocks
        .iter()
        .skip(1)
        .map(|block| Some(block.label.clone()))
        .chain(std::iter::once(None))
        .collect::<Vec<_>>();

    let mut out = Vec::new();
    for (block, next) in blocks.into_iter().zip(next_labels) {
        out.push(Statement::Label(block.label));
        out.extend(block.statements);

        match block.terminator {
            Terminator::Jump(target) if next.as_ref() == Some(&target) => {}
            Terminator::Jump(target) => out.push(Statement::Jump(target)),
            Terminator::Return(value) => out.push(Statement::Return(value)),
            Terminator::ConditionalJump {
                condition,
                true_label,
                false_label,
            } => {
                if next.as_ref() == Some(&false_label) {
                    out.push(Statement::ConditionalJumpFallThrough {
                        condition,
                        label: true_label,
                    });
                } else if next.as_ref() == Some(&true_label) {
                    out.push(Statement::ConditionalJumpFallThrough {
                        condition: condition.invert_condition(),
                        label: false_label,
                    });
                } else {
                    out.push(Statement::ConditionalJumpFallThrough {
                        condition,
                        label: true_label,
                    });
                    out.push(Statement::Jump(false_label));
                }
            }
        }
    }
    out
}

/// Builds the basic blocks of `statements` and emits them in trace order
pub fn reorder_function(
    function_name: &str,
    statements: Vec<LoweredStatement>,
    allocator: &mut ResourceAllocator,
) -> Result<Vec<Statement>, InternalError> {
    let builder = BlockBuilder {
        function_name,
        allocator,
        blocks: Vec::new(),
        labels: HashSet::new(),
        current: None,
        pending_label: None,
    };
    let blocks = builder.build(statements)?;
    tracing::trace!(function = function_name, blocks = blocks.len(), "built basic blocks");

    Ok(emit(schedule(blocks)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::hir::Operator;

    fn canonical(statements: Vec<Statement>) -> Vec<LoweredStatement> {
        statements.into_iter().map(LoweredStatement::Canonical).collect()
    }

    fn less_than() -> Expression {
        Expression::binary(
            Operator::Lt,
            Expression::temporary("x"),
            Expression::Constant(10),
        )
    }

    fn if_else() -> Vec<LoweredStatement> {
        vec![
            LoweredStatement::ConditionalJump {
                condition: less_than(),
                true_label: "t".into(),
                false_label: "f".into(),
            },
            LoweredStatement::Canonical(Statement::Label("t".into())),
            LoweredStatement::Canonical(Statement::move_temp("y", Expression::ONE)),
            LoweredStatement::Canonical(Statement::Jump("end".into())),
            LoweredStatement::Canonical(Statement::Label("f".into())),
            LoweredStatement::Canonical(Statement::move_temp("y", Expression::ZERO)),
            LoweredStatement::Canonical(Statement::Jump("end".into())),
            LoweredStatement::Canonical(Statement::Label("end".into())),
            LoweredStatement::Canonical(Statement::Return(Expression::temporary("y"))),
        ]
    }

    #[test]
    fn false_branch_is_laid_out_first() {
        let mut allocator = ResourceAllocator::new();
        let ordered = reorder_function("f", if_else(), &mut allocator).unwrap();
        let labels = ordered
            .iter()
            .filter_map(|statement| match statement {
                Statement::Label(label) => Some(label.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(labels, vec!["l0_BLOCK", "f", "end", "t"]);
        assert_eq!(
            ordered[1],
            Statement::ConditionalJumpFallThrough {
                condition: less_than(),
                label: "t".into(),
            }
        );
    }

    #[test]
    fn reordering_is_idempotent() {
        let mut allocator = ResourceAllocator::new();
        let once = reorder_function("f", if_else(), &mut allocator).unwrap();
        let twice = reorder_function("f", canonical(once.clone()), &mut allocator).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn jump_to_true_target_inverts_condition() {
        let mut allocator = ResourceAllocator::new();
        let statements = vec![
            LoweredStatement::Canonical(Statement::Label("f".into())),
            LoweredStatement::Canonical(Statement::Return(Expression::ZERO)),
            LoweredStatement::Canonical(Statement::Label("start".into())),
            LoweredStatement::ConditionalJump {
                condition: less_than(),
                true_label: "t".into(),
                false_label: "f".into(),
            },
            LoweredStatement::Canonical(Statement::Label("t".into())),
            LoweredStatement::Canonical(Statement::Return(Expression::ONE)),
        ];

        let ordered = reorder_function("g", statements, &mut allocator).unwrap();
        assert_eq!(
            ordered,
            vec![
                Statement::Label("f".into()),
                Statement::Return(Expression::ZERO),
                Statement::Label("start".into()),
                Statement::ConditionalJumpFallThrough {
                    condition: Expression::binary(
                        Operator::Ge,
                        Expression::temporary("x"),
                        Expression::Constant(10),
                    ),
                    label: "f".into(),
                },
                Statement::Label("t".into()),
                Statement::Return(Expression::ONE),
            ]
        );
    }

    #[test]
    fn unterminated_final_block_is_an_internal_error() {
        let mut allocator = ResourceAllocator::new();
        let statements = canonical(vec![
            Statement::Label("start".into()),
            Statement::move_temp("x", Expression::ONE),
        ]);

        let error = reorder_function("broken", statements, &mut allocator).unwrap_err();
        assert!(error.message.contains("start"));
        assert!(error.message.contains("broken"));
    }

    #[test]
    fn duplicate_labels_are_an_internal_error() {
        let mut allocator = ResourceAllocator::new();
        let statements = canonical(vec![
            Statement::Label("a".into()),
            Statement::Label("a".into()),
            Statement::Return(Expression::ZERO),
        ]);

        assert!(reorder_function("dup", statements, &mut allocator).is_err());
    }
}
