use std::collections::BTreeSet;

use crate::middle::{
    mir::Statement,
    optimization::dataflow::{self, Analysis, ControlFlowGraph, Direction, Solution},
};

/// Temporaries live into each statement, backward and joined by union
pub struct LiveVariables<'a> {
    body: &'a [Statement],
}

impl<'a> LiveVariables<'a> {
    pub fn new(body: &'a [Statement]) -> Self {
        Self { body }
    }

    pub fn solve(&self) -> Solution<BTreeSet<String>> {
        dataflow::solve(&ControlFlowGraph::from_statements(self.body), self)
    }
}

impl Analysis for LiveVariables<'_> {
    type Fact = BTreeSet<String>;

    const DIRECTION: Direction = Direction::Backward;

    fn initial(&self) -> Self::Fact {
        BTreeSet::new()
    }

    fn boundary(&self) -> Self::Fact {
        BTreeSet::new()
    }

    fn join(&self, a: &Self::Fact, b: &Self::Fact) -> Self::Fact {
        a.union(b).cloned().collect()
    }

    fn transfer(&self, node: usize, live_out: &Self::Fact) -> Self::Fact {
        let statement = &self.body[node];
        let mut live_in = live_out.clone();
        if let Some(defined) = statement.defined_temporary() {
            live_in.remove(defined);
        }
        live_in.extend(statement.used_temporaries().into_iter().map(String::from));
        live_in
    }
}

/// Drops moves into temporaries nobody reads afterwards. Calls stay even
/// when their result is unused. Returns whether anything changed.
pub fn eliminate_dead_code(body: &mut Vec<Statement>) -> bool {
    let solution = LiveVariables::new(body).solve();

    let before = body.len();
    let mut index = 0;
    body.retain(|statement| {
        let live_out = &solution.inputs[index];
        index += 1;
        match statement {
            Statement::MoveTemp { temporary, .. } => live_out.contains(temporary),
            _ => true,
        }
    });
    body.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{Expression, Operator};

    #[test]
    fn unused_moves_are_removed_and_calls_kept() {
        let mut body = vec![
            Statement::move_temp("unused", Expression::Constant(3)),
            Statement::Call {
                function: Expression::Name("f".into()),
                arguments: vec![],
                return_collector: Some("ignored".into()),
            },
            Statement::move_temp("x", Expression::ONE),
            Statement::Return(Expression::binary(
                Operator::Add,
                Expression::temporary("x"),
                Expression::ONE,
            )),
        ];

        assert!(eliminate_dead_code(&mut body));
        assert_eq!(body.len(), 3);
        assert!(matches!(body[0], Statement::Call { .. }));
        assert!(!eliminate_dead_code(&mut body));
    }

    #[test]
    fn values_used_around_loops_stay_live() {
        let mut body = vec![
            Statement::move_temp("i", Expression::ZERO),
            Statement::Label("loop".into()),
            Statement::move_temp(
                "i",
                Expression::binary(Operator::Add, Expression::temporary("i"), Expression::ONE),
            ),
            Statement::ConditionalJumpFallThrough {
                condition: Expression::binary(
                    Operator::Lt,
                    Expression::temporary("i"),
                    Expression::Constant(10),
                ),
                label: "loop".into(),
            },
            Statement::Return(Expression::temporary("i")),
        ];

        assert!(!eliminate_dead_code(&mut body));
    }
}
