use std::collections::BTreeMap;

use crate::middle::{
    mir::{Expression, Statement},
    optimization::dataflow::{self, Analysis, ControlFlowGraph, Direction},
};

/// Copies `destination = source` that hold on every path. `None` stands for
/// every copy, the value of edges not reached yet.
pub type AvailableCopies = Option<BTreeMap<String, String>>;

pub struct AvailableCopiesAnalysis<'a> {
    body: &'a [Statement],
}

impl<'a> AvailableCopiesAnalysis<'a> {
    pub fn new(body: &'a [Statement]) -> Self {
        Self { body }
    }
}

/// Keeps the copies both sides agree on, which drops destinations copied
/// from different sources
pub fn join_copies(a: &AvailableCopies, b: &AvailableCopies) -> AvailableCopies {
    match (a, b) {
        (None, other) | (other, None) => other.clone(),
        (Some(a), Some(b)) => Some(
            a.iter()
                .filter(|(destination, source)| b.get(*destination) == Some(*source))
                .map(|(destination, source)| (destination.clone(), source.clone()))
                .collect(),
        ),
    }
}

impl Analysis for AvailableCopiesAnalysis<'_> {
    type Fact = AvailableCopies;

    const DIRECTION: Direction = Direction::Forward;

    fn initial(&self) -> AvailableCopies {
        None
    }

    fn boundary(&self) -> AvailableCopies {
        Some(BTreeMap::new())
    }

    fn join(&self, a: &AvailableCopies, b: &AvailableCopies) -> AvailableCopies {
        join_copies(a, b)
    }

    fn transfer(&self, node: usize, input: &AvailableCopies) -> AvailableCopies {
        let mut copies = input.clone()?;
        let statement = &self.body[node];

        if let Some(defined) = statement.defined_temporary() {
            copies.retain(|destination, source| destination != defined && source != defined);
        }
        if let Statement::MoveTemp {
            temporary,
            source: Expression::Temporary(source),
        } = statement
        {
            if temporary != source {
                copies.insert(temporary.clone(), source.clone());
            }
        }

        Some(copies)
    }
}

/// Follows copies back to the temporary they all came from
fn root<'a>(copies: &'a BTreeMap<String, String>, temporary: &'a str) -> &'a str {
    let mut current = temporary;
    for _ in 0..copies.len() {
        match copies.get(current) {
            Some(source) => current = source,
            None => break,
        }
    }
    current
}

/// Rewrites uses of copied temporaries to their roots. Returns whether
/// anything changed.
pub fn propagate_copies(body: &mut Vec<Statement>) -> bool {
    let graph = ControlFlowGraph::from_statements(body);
    let solution = dataflow::solve(&graph, &AvailableCopiesAnalysis::new(&body[..]));

    let rewritten = body
        .iter()
        .zip(&solution.inputs)
        .map(|(statement, copies)| match copies {
            Some(copies) if !copies.is_empty() => statement.map_expressions(&mut |expression| {
                expression.map_temporaries(&mut |name| Expression::temporary(root(copies, name)))
            }),
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

    fn copies(pairs: &[(&str, &str)]) -> AvailableCopies {
        Some(
            pairs
                .iter()
                .map(|(destination, source)| (destination.to_string(), source.to_string()))
                .collect(),
        )
    }

    #[test]
    fn join_keeps_agreeing_copies() {
        let a = copies(&[("x", "a"), ("y", "b")]);
        let b = copies(&[("x", "a"), ("y", "c")]);

        assert_eq!(join_copies(&a, &b), copies(&[("x", "a")]));
        assert_eq!(join_copies(&None, &b), b);
        assert_eq!(join_copies(&a, &None), a);
    }

    #[test]
    fn uses_are_rewritten_to_the_root_copy() {
        let mut body = vec![
            Statement::move_temp("b", Expression::temporary("a")),
            Statement::move_temp("c", Expression::temporary("b")),
            Statement::Return(Expression::binary(
                Operator::Add,
                Expression::temporary("c"),
                Expression::ONE,
            )),
        ];

        assert!(propagate_copies(&mut body));
        assert_eq!(
            body[2],
            Statement::Return(Expression::binary(
                Operator::Add,
                Expression::temporary("a"),
                Expression::ONE,
            ))
        );
    }

    #[test]
    fn redefined_sources_stop_propagation() {
        let mut body = vec![
            Statement::move_temp("b", Expression::temporary("a")),
            Statement::Call {
                function: Expression::Name("f".into()),
                arguments: vec![],
                return_collector: Some("a".into()),
            },
            Statement::Return(Expression::temporary("b")),
        ];

        assert!(!propagate_copies(&mut body));
    }
}
