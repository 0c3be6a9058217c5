use hashbrown::{HashMap, HashSet};

use crate::middle::{
    allocator::ResourceAllocator,
    mir::{Expression, Function, Statement, simplify::simplify_function},
};

/// Whether control leaving `body[start..]` through labels, jumps and copies
/// of the call result reaches a return of that result
fn returns_call_result(
    body: &[Statement],
    labels: &HashMap<&str, usize>,
    start: usize,
    collector: Option<&str>,
    returns_only_unit: bool,
) -> bool {
    let mut holder = collector.map(str::to_string);
    let mut position = start;
    let mut visited = HashSet::new();
    loop {
        match body.get(position) {
            Some(Statement::Label(_)) => position += 1,
            Some(Statement::MoveTemp {
                temporary,
                source: Expression::Temporary(source),
            }) if holder.as_ref() == Some(source) => {
                holder = Some(temporary.clone());
                position += 1;
            }
            Some(Statement::Jump(target)) => {
                let Some(label) = labels.get(target.as_str()) else {
                    return false;
                };
                if !visited.insert(position) {
                    return false;
                }
                position = label + 1;
            }
            Some(Statement::Return(Expression::Temporary(value))) => {
                return holder.as_ref() == Some(value);
            }
            Some(Statement::Return(value)) => return returns_only_unit && *value == Expression::ZERO,
            _ => return false,
        }
    }
}

/// Turns self-calls in tail position into argument moves and a jump back
/// to the start of the function
pub fn optimize_tail_recursion(function: &mut Function, allocator: &mut ResourceAllocator) {
    let returns_only_unit = function
        .body
        .iter()
        .all(|statement| !matches!(statement, Statement::Return(value) if *value != Expression::ZERO));

    let tail_calls = {
        let labels = function
            .body
            .iter()
            .enumerate()
            .filter_map(|(index, statement)| match statement {
                Statement::Label(label) => Some((label.as_str(), index)),
                _ => None,
            })
            .collect::<HashMap<_, _>>();

        let calls = function
            .body
            .iter()
            .enumerate()
            .filter_map(|(index, statement)| match statement {
                Statement::Call {
                    function: Expression::Name(callee),
                    arguments,
                    return_collector,
                } if *callee == function.name
                    && arguments.len() == function.arguments.len()
                    && returns_call_result(
                        &function.body,
                        &labels,
                        index + 1,
                        return_collector.as_deref(),
                        returns_only_unit,
                    ) =>
                {
                    Some(index)
                }
                _ => None,
            })
            .collect::<HashSet<_>>();
        calls
    };

    if tail_calls.is_empty() {
        return;
    }

    let entry_label = allocator.label("TAIL_RECURSION_ENTRY");
    let mut body = vec![Statement::Label(entry_label.clone())];
    for (index, statement) in std::mem::take(&mut function.body).into_iter().enumerate() {
        match statement {
            Statement::Call { arguments, .. } if tail_calls.contains(&index) => {
                let temporaries = arguments
                    .iter()
                    .map(|_| allocator.temp())
                    .collect::<Vec<_>>();
                for (temporary, argument) in temporaries.iter().zip(arguments) {
                    body.push(Statement::move_temp(temporary.clone(), argument));
                }
                for (parameter, temporary) in function.arguments.iter().zip(temporaries) {
                    body.push(Statement::move_temp(
                        parameter.clone(),
                        Expression::Temporary(temporary),
                    ));
                }
                body.push(Statement::Jump(entry_label.clone()));
            }
            statement => body.push(statement),
        }
    }

    tracing::debug!(function = %function.name, calls = tail_calls.len(), "removed tail calls");
    function.body = simplify_function(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::hir::Operator;

    fn temp(name: &str) -> Expression {
        Expression::temporary(name)
    }

    fn self_call(collector: Option<&str>) -> Statement {
        Statement::Call {
            function: Expression::Name("sum".into()),
            arguments: vec![
                Expression::binary(Operator::Add, temp("n"), Expression::Constant(-1)),
                Expression::binary(Operator::Add, temp("acc"), temp("n")),
            ],
            return_collector: collector.map(String::from),
        }
    }

    fn sum(body: Vec<Statement>) -> Function {
        Function {
            name: "sum".into(),
            arguments: vec!["n".into(), "acc".into()],
            body,
        }
    }

    #[test]
    fn self_call_before_return_becomes_jump() {
        let mut allocator = ResourceAllocator::new();
        let mut function = sum(vec![
            Statement::ConditionalJumpFallThrough {
                condition: Expression::binary(Operator::Eq, temp("n"), Expression::ZERO),
                label: "done".into(),
            },
            self_call(Some("r")),
            Statement::move_temp("result", temp("r")),
            Statement::Jump("end".into()),
            Statement::Label("done".into()),
            Statement::move_temp("result", temp("acc")),
            Statement::Label("end".into()),
            Statement::Return(temp("result")),
        ]);

        optimize_tail_recursion(&mut function, &mut allocator);

        assert!(!function
            .body
            .iter()
            .any(|statement| matches!(statement, Statement::Call { .. })));
        assert_eq!(
            function.body[0],
            Statement::Label("l0_TAIL_RECURSION_ENTRY".into())
        );
        assert!(function
            .body
            .contains(&Statement::move_temp("n", temp("_t0"))));
        assert!(function
            .body
            .contains(&Statement::Jump("l0_TAIL_RECURSION_ENTRY".into())));
    }

    #[test]
    fn self_calls_in_both_branches_become_jumps() {
        let mut allocator = ResourceAllocator::new();
        let mut function = sum(vec![
            Statement::ConditionalJumpFallThrough {
                condition: Expression::binary(Operator::Lt, temp("n"), Expression::ZERO),
                label: "else".into(),
            },
            self_call(Some("a")),
            Statement::move_temp("result", temp("a")),
            Statement::Jump("end".into()),
            Statement::Label("else".into()),
            self_call(Some("b")),
            Statement::move_temp("result", temp("b")),
            Statement::Jump("end".into()),
            Statement::Label("end".into()),
            Statement::Return(temp("result")),
        ]);

        optimize_tail_recursion(&mut function, &mut allocator);

        assert!(!function
            .body
            .iter()
            .any(|statement| matches!(statement, Statement::Call { .. })));
        let entry = Statement::Jump("l0_TAIL_RECURSION_ENTRY".into());
        assert_eq!(
            function.body.iter().filter(|statement| **statement == entry).count(),
            2
        );
        assert!(function
            .body
            .contains(&Statement::move_temp("n", temp("_t0"))));
        assert!(function
            .body
            .contains(&Statement::move_temp("n", temp("_t2"))));
    }

    #[test]
    fn call_whose_result_is_used_is_kept() {
        let mut allocator = ResourceAllocator::new();
        let body = vec![
            self_call(Some("r")),
            Statement::Return(Expression::binary(Operator::Add, temp("r"), Expression::ONE)),
        ];
        let mut function = sum(body.clone());

        optimize_tail_recursion(&mut function, &mut allocator);
        assert_eq!(function.body, body);
    }

    #[test]
    fn unit_call_is_rewritten_only_when_every_return_is_unit() {
        let mut allocator = ResourceAllocator::new();
        let mut unit = sum(vec![
            self_call(None),
            Statement::Jump("end".into()),
            Statement::Label("end".into()),
            Statement::Return(Expression::ZERO),
        ]);
        optimize_tail_recursion(&mut unit, &mut allocator);
        assert!(!unit
            .body
            .iter()
            .any(|statement| matches!(statement, Statement::Call { .. })));

        let body = vec![
            Statement::ConditionalJumpFallThrough {
                condition: temp("n"),
                label: "other".into(),
            },
            self_call(Some("r")),
            Statement::Return(Expression::ZERO),
            Statement::Label("other".into()),
            Statement::Return(temp("acc")),
        ];
        let mut mixed = sum(body.clone());
        optimize_tail_recursion(&mut mixed, &mut allocator);
        assert_eq!(mixed.body, body);
    }
}
