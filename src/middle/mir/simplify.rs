//! Local control-flow cleanup over a reordered function body

use hashbrown::{HashMap, HashSet};

use crate::middle::mir::Statement;

fn retarget(statement: Statement, resolve: &impl Fn(&str) -> String) -> Statement {
    match statement {
        Statement::Jump(label) => Statement::Jump(resolve(&label)),
        Statement::ConditionalJumpFallThrough { condition, label } => {
            Statement::ConditionalJumpFallThrough {
                condition,
                label: resolve(&label),
            }
        }
        statement => statement,
    }
}

/// Keeps the first of consecutive labels
fn coalesce_labels(statements: Vec<Statement>) -> Vec<Statement> {
    let mut alias = HashMap::new();
    let mut first: Option<&str> = None;
    for statement in &statements {
        match statement {
            Statement::Label(label) => match first {
                Some(first) => {
                    alias.insert(label.clone(), first.to_string());
                }
                None => first = Some(label),
            },
            _ => first = None,
        }
    }

    let resolve = |label: &str| alias.get(label).cloned().unwrap_or_else(|| label.to_string());
    statements
        .into_iter()
        .filter(|statement| !matches!(statement, Statement::Label(label) if alias.contains_key(label)))
        .map(|statement| retarget(statement, &resolve))
        .collect()
}

/// Sends jumps that land on an unconditional jump straight to its target
fn thread_jumps(statements: Vec<Statement>) -> Vec<Statement> {
    let forward = statements
        .windows(2)
        .filter_map(|pair| match pair {
            [Statement::Label(label), Statement::Jump(target)] if label != target => {
                Some((label.clone(), target.clone()))
            }
            _ => None,
        })
        .collect::<HashMap<_, _>>();

    let resolve = |label: &str| {
        let mut current = label.to_string();
        let mut seen = HashSet::new();
        while let Some(next) = forward.get(&current) {
            if !seen.insert(current.clone()) {
                break;
            }
            current = next.clone();
        }
        current
    };

    statements
        .into_iter()
        .map(|statement| retarget(statement, &resolve))
        .collect()
}

fn drop_unreachable(statements: Vec<Statement>) -> Vec<Statement> {
    let mut reachable = true;
    let mut out = Vec::with_capacity(statements.len());
    for statement in statements {
        match statement {
            Statement::Label(_) => {
                reachable = true;
                out.push(statement);
            }
            _ if reachable => {
                if matches!(statement, Statement::Jump(_) | Statement::Return(_)) {
                    reachable = false;
                }
                out.push(statement);
            }
            _ => {}
        }
    }
    out
}

fn drop_jumps_to_next(statements: Vec<Statement>) -> Vec<Statement> {
    let mut out = Vec::with_capacity(statements.len());
    let mut statements = statements.into_iter().peekable();
    while let Some(statement) = statements.next() {
        match (&statement, statements.peek()) {
            (Statement::Jump(target), Some(Statement::Label(next))) if target == next => {}
            _ => out.push(statement),
        }
    }
    out
}

fn drop_unused_labels(statements: Vec<Statement>) -> Vec<Statement> {
    let used = statements
        .iter()
        .filter_map(|statement| match statement {
            Statement::Jump(label) | Statement::ConditionalJumpFallThrough { label, .. } => {
                Some(label.clone())
            }
            _ => None,
        })
        .collect::<HashSet<_>>();

    statements
        .into_iter()
        .filter(|statement| !matches!(statement, Statement::Label(label) if !used.contains(label)))
        .collect()
}

/// Runs the cleanups until none of them changes the body
pub fn simplify_function(statements: Vec<Statement>) -> Vec<Statement> {
    let mut current = statements;
    loop {
        let simplified = drop_unused_labels(drop_jumps_to_next(drop_unreachable(thread_jumps(
            coalesce_labels(current.clone()),
        ))));
        if simplified == current {
            return simplified;
        }
        current = simplified;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::Expression;

    fn label(name: &str) -> Statement {
        Statement::Label(name.into())
    }

    fn jump(name: &str) -> Statement {
        Statement::Jump(name.into())
    }

    #[test]
    fn jumps_through_jumps_are_threaded() {
        let statements = vec![
            Statement::ConditionalJumpFallThrough {
                condition: Expression::temporary("c"),
                label: "a".into(),
            },
            Statement::Return(Expression::ZERO),
            label("a"),
            jump("b"),
            label("b"),
            Statement::Return(Expression::ONE),
        ];

        assert_eq!(
            simplify_function(statements),
            vec![
                Statement::ConditionalJumpFallThrough {
                    condition: Expression::temporary("c"),
                    label: "b".into(),
                },
                Statement::Return(Expression::ZERO),
                label("b"),
                Statement::Return(Expression::ONE),
            ]
        );
    }

    #[test]
    fn unreachable_code_and_unused_labels_are_dropped() {
        let statements = vec![
            label("entry"),
            label("alias"),
            Statement::move_temp("x", Expression::ONE),
            jump("alias"),
            Statement::move_temp("y", Expression::ONE),
            label("dead"),
            Statement::Return(Expression::temporary("x")),
        ];

        assert_eq!(
            simplify_function(statements),
            vec![
                label("entry"),
                Statement::move_temp("x", Expression::ONE),
                jump("entry"),
            ]
        );
    }

    #[test]
    fn jump_to_following_label_is_dropped() {
        let statements = vec![
            Statement::move_temp("x", Expression::ONE),
            jump("next"),
            label("next"),
            Statement::Return(Expression::temporary("x")),
        ];

        assert_eq!(
            simplify_function(statements),
            vec![
                Statement::move_temp("x", Expression::ONE),
                Statement::Return(Expression::temporary("x")),
            ]
        );
    }
}
