use std::collections::BTreeMap;

use crate::middle::{
    mir::{Expression, Statement},
    optimization::{
        dataflow::{self, Analysis, ControlFlowGraph, Direction},
        folding::{FoldingOptions, fold_expression},
    },
};

/// Temporaries known to hold a constant on every path, `None` before the
/// edge is reached
type KnownConstants = Option<BTreeMap<String, i64>>;

const FOLD_CONSTANTS: FoldingOptions = FoldingOptions {
    constants: true,
    algebra: false,
};

fn substitute(expression: &Expression, constants: &BTreeMap<String, i64>) -> Expression {
    let substituted = expression.map_temporaries(&mut |name| match constants.get(name) {
        Some(value) => Expression::Constant(*value),
        None => Expression::temporary(name),
    });
    fold_expression(&substituted, FOLD_CONSTANTS)
}

struct ConstantAnalysis<'a> {
    body: &'a [Statement],
}

impl Analysis for ConstantAnalysis<'_> {
    type Fact = KnownConstants;

    const DIRECTION: Direction = Direction::Forward;

    fn initial(&self) -> KnownConstants {
        None
    }

    fn boundary(&self) -> KnownConstants {
        Some(BTreeMap::new())
    }

    fn join(&self, a: &KnownConstants, b: &KnownConstants) -> KnownConstants {
        match (a, b) {
            (None, other) | (other, None) => other.clone(),
            (Some(a), Some(b)) => Some(
                a.iter()
                    .filter(|(name, value)| b.get(*name) == Some(*value))
                    .map(|(name, value)| (name.clone(), *value))
                    .collect(),
            ),
        }
    }

    fn transfer(&self, node: usize, input: &KnownConstants) -> KnownConstants {
        let mut constants = input.clone()?;

        match &self.body[node] {
            Statement::MoveTemp { temporary, source } => {
                match substitute(source, &constants) {
                    Expression::Constant(value) => constants.insert(temporary.clone(), value),
                    _ => constants.remove(temporary),
                };
            }
            statement => {
                if let Some(defined) = statement.defined_temporary() {
                    constants.remove(defined);
                }
            }
        }

        Some(constants)
    }
}

/// Replaces temporaries known to be constant and folds what that enables.
/// Returns whether anything changed.
pub fn propagate_constants(body: &mut Vec<Statement>) -> bool {
    let graph = ControlFlowGraph::from_statements(body);
    let solution = dataflow::solve(&graph, &ConstantAnalysis { body: &body[..] });

    let rewritten = body
        .iter()
        .zip(&solution.inputs)
        .map(|(statement, constants)| match constants {
            Some(constants) if !constants.is_empty() => {
                statement.map_expressions(&mut |expression| substitute(expression, constants))
            }
            _ => statement.clone(),
        })
        .collect::<Vec<_>>();

    let changed = rewritten != *body;
    *body = rewritten;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::Operator;

    #[test]
    fn constants_flow_through_straight_line_code() {
        let mut body = vec![
            Statement::move_temp("a", Expression::Constant(20)),
            Statement::move_temp(
                "b",
                Expression::binary(Operator::Add, Expression::temporary("a"), Expression::Constant(1)),
            ),
            Statement::Return(Expression::binary(
                Operator::Mul,
                Expression::temporary("b"),
                Expression::Constant(2),
            )),
        ];

        assert!(propagate_constants(&mut body));
        assert_eq!(body[1], Statement::move_temp("b", Expression::Constant(21)));
        assert_eq!(body[2], Statement::Return(Expression::Constant(42)));
    }

    #[test]
    fn disagreeing_paths_are_not_constant() {
        let mut body = vec![
            Statement::move_temp("a", Expression::ONE),
            Statement::ConditionalJumpFallThrough {
                condition: Expression::temporary("c"),
                label: "other".into(),
            },
            Statement::move_temp("a", Expression::Constant(2)),
            Statement::Label("other".into()),
            Statement::Return(Expression::temporary("a")),
        ];

        propagate_constants(&mut body);
        assert_eq!(body[4], Statement::Return(Expression::temporary("a")));
    }
}
