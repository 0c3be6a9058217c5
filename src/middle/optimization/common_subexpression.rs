use std::collections::{BTreeMap, BTreeSet};

use crate::middle::{
    allocator::ResourceAllocator,
    mir::{Expression, Statement},
    optimization::dataflow::{self, Analysis, ControlFlowGraph, Direction},
};

/// Expressions computed on every path with operands unchanged since, `None`
/// before the edge is reached
type AvailableExpressions = Option<BTreeSet<Expression>>;

/// Expression a statement computes into a temporary, when it is worth
/// sharing
fn computed(statement: &Statement) -> Option<(&str, &Expression)> {
    match statement {
        Statement::MoveTemp { temporary, source }
            if matches!(source, Expression::Binary { .. })
                && !source.reads_memory()
                && !source.uses_temporary(temporary) =>
        {
            Some((temporary, source))
        }
        _ => None,
    }
}

struct AvailableExpressionsAnalysis<'a> {
    body: &'a [Statement],
}

impl Analysis for AvailableExpressionsAnalysis<'_> {
    type Fact = AvailableExpressions;

    const DIRECTION: Direction = Direction::Forward;

    fn initial(&self) -> AvailableExpressions {
        None
    }

    fn boundary(&self) -> AvailableExpressions {
        Some(BTreeSet::new())
    }

    fn join(&self, a: &AvailableExpressions, b: &AvailableExpressions) -> AvailableExpressions {
        match (a, b) {
            (None, other) | (other, None) => other.clone(),
            (Some(a), Some(b)) => Some(a.intersection(b).cloned().collect()),
        }
    }

    fn transfer(&self, node: usize, input: &AvailableExpressions) -> AvailableExpressions {
        let mut available = input.clone()?;
        let statement = &self.body[node];

        if let Some(defined) = statement.defined_temporary() {
            available.retain(|expression| !expression.uses_temporary(defined));
        }
        if let Some((_, expression)) = computed(statement) {
            available.insert(expression.clone());
        }

        Some(available)
    }
}

/// Eliminates expressions recomputed on every path after an earlier
/// computation. Every computation of such an expression also stores it in a
/// holder temporary, and the redundant ones read the holder instead.
/// Returns whether anything changed.
pub fn eliminate_common_subexpressions(
    body: &mut Vec<Statement>,
    allocator: &mut ResourceAllocator,
) -> bool {
    let graph = ControlFlowGraph::from_statements(body);
    let solution = dataflow::solve(&graph, &AvailableExpressionsAnalysis { body: &body[..] });

    let redundant = body
        .iter()
        .zip(&solution.inputs)
        .filter_map(|(statement, available)| {
            let (_, expression) = computed(statement)?;
            available
                .as_ref()
                .filter(|available| available.contains(expression))
                .map(|_| expression.clone())
        })
        .collect::<BTreeSet<_>>();

    if redundant.is_empty() {
        return false;
    }

    let holders = redundant
        .into_iter()
        .map(|expression| (expression, allocator.temp()))
        .collect::<BTreeMap<_, _>>();

    let mut rewritten = Vec::with_capacity(body.len());
    for (statement, available) in body.iter().zip(&solution.inputs) {
        let holder = computed(statement).and_then(|(temporary, expression)| {
            let holder = holders.get(expression)?;
            let is_available = available
                .as_ref()
                .is_some_and(|available| available.contains(expression));
            Some((temporary, expression, holder, is_available))
        });

        match holder {
            Some((temporary, _, holder, true)) => {
                rewritten.push(Statement::move_temp(temporary, Expression::temporary(holder)));
            }
            Some((temporary, expression, holder, false)) => {
                rewritten.push(Statement::move_temp(holder.clone(), expression.clone()));
                rewritten.push(Statement::move_temp(temporary, Expression::temporary(holder)));
            }
            None => rewritten.push(statement.clone()),
        }
    }

    *body = rewritten;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::Operator;

    fn temp(name: &str) -> Expression {
        Expression::temporary(name)
    }

    fn product() -> Expression {
        Expression::binary(Operator::Mul, temp("a"), temp("b"))
    }

    #[test]
    fn expressions_available_on_every_path_are_shared() {
        let mut allocator = ResourceAllocator::new();
        let mut body = vec![
            Statement::ConditionalJumpFallThrough {
                condition: temp("c"),
                label: "other".into(),
            },
            Statement::move_temp("x", product()),
            Statement::Jump("join".into()),
            Statement::Label("other".into()),
            Statement::move_temp("y", product()),
            Statement::Label("join".into()),
            Statement::move_temp("z", product()),
            Statement::Return(temp("z")),
        ];

        assert!(eliminate_common_subexpressions(&mut body, &mut allocator));
        assert_eq!(body[1], Statement::move_temp("_t0", product()));
        assert_eq!(body[2], Statement::move_temp("x", temp("_t0")));
        assert!(body.contains(&Statement::move_temp("z", temp("_t0"))));
        assert!(!body.contains(&Statement::move_temp("z", product())));
    }

    #[test]
    fn expressions_available_on_one_path_stay() {
        let mut allocator = ResourceAllocator::new();
        let mut body = vec![
            Statement::ConditionalJumpFallThrough {
                condition: temp("c"),
                label: "join".into(),
            },
            Statement::move_temp("x", product()),
            Statement::Label("join".into()),
            Statement::move_temp("z", product()),
            Statement::Return(temp("z")),
        ];

        assert!(!eliminate_common_subexpressions(&mut body, &mut allocator));
    }
}
