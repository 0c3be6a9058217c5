use hashbrown::{HashMap, HashSet};

use crate::middle::{
    allocator::ResourceAllocator,
    mir::{Expression, Function, Statement, simplify::simplify_function},
};

/// Largest callee worth copying into its callers
const CALLEE_COST_THRESHOLD: usize = 30;
/// Callers past this size get no more inlined code
const CALLER_COST_THRESHOLD: usize = 1000;

fn cost(function: &Function) -> usize {
    function
        .body
        .iter()
        .filter(|statement| !matches!(statement, Statement::Label(_)))
        .count()
}

fn direct_callee(statement: &Statement) -> Option<&str> {
    match statement {
        Statement::Call {
            function: Expression::Name(name),
            ..
        } => Some(name),
        _ => None,
    }
}

/// Functions that can reach themselves through direct calls
fn recursive_functions(functions: &[Function]) -> HashSet<String> {
    let calls = functions
        .iter()
        .map(|function| {
            let callees = function
                .body
                .iter()
                .filter_map(direct_callee)
                .collect::<HashSet<_>>();
            (function.name.as_str(), callees)
        })
        .collect::<HashMap<_, _>>();

    functions
        .iter()
        .filter(|function| {
            let mut stack = calls
                .get(function.name.as_str())
                .map(|callees| callees.iter().copied().collect::<Vec<_>>())
                .unwrap_or_default();
            let mut visited = HashSet::new();
            while let Some(name) = stack.pop() {
                if name == function.name {
                    return true;
                }
                if visited.insert(name) {
                    stack.extend(calls.get(name).into_iter().flatten().copied());
                }
            }
            false
        })
        .map(|function| function.name.clone())
        .collect()
}

/// Copies `callee` in place of one call, renaming its temporaries and
/// labels so they cannot clash with the caller's
fn expand_call(
    callee: &Function,
    arguments: Vec<Expression>,
    return_collector: Option<String>,
    allocator: &mut ResourceAllocator,
    out: &mut Vec<Statement>,
) {
    let prefix = allocator.inline_prefix();
    let end_label = allocator.label("INLINE_END");
    let rename = |name: &str| format!("{prefix}{name}");
    let mut rename_expression =
        |expression: &Expression| expression.map_temporaries(&mut |name| Expression::temporary(rename(name)));

    for (parameter, argument) in callee.arguments.iter().zip(arguments) {
        out.push(Statement::move_temp(rename(parameter), argument));
    }

    for statement in &callee.body {
        match statement {
            Statement::Return(value) => {
                if let Some(collector) = &return_collector {
                    out.push(Statement::move_temp(collector.clone(), rename_expression(value)));
                }
                out.push(Statement::Jump(end_label.clone()));
            }
            Statement::Label(label) => out.push(Statement::Label(rename(label))),
            Statement::Jump(label) => out.push(Statement::Jump(rename(label))),
            Statement::ConditionalJumpFallThrough { condition, label } => {
                out.push(Statement::ConditionalJumpFallThrough {
                    condition: rename_expression(condition),
                    label: rename(label),
                })
            }
            Statement::MoveTemp { temporary, source } => {
                out.push(Statement::move_temp(rename(temporary), rename_expression(source)))
            }
            Statement::Call {
                function,
                arguments,
                return_collector,
            } => out.push(Statement::Call {
                function: rename_expression(function),
                arguments: arguments.iter().map(&mut rename_expression).collect(),
                return_collector: return_collector.as_deref().map(rename),
            }),
            Statement::MoveMem { target, source } => out.push(Statement::MoveMem {
                target: rename_expression(target),
                source: rename_expression(source),
            }),
        }
    }

    out.push(Statement::Label(end_label));
}

/// Callees before their callers, so every body copied into a caller has
/// already received its own inlined calls
fn bottom_up_order(functions: &[Function]) -> Vec<usize> {
    let positions = functions
        .iter()
        .enumerate()
        .map(|(index, function)| (function.name.as_str(), index))
        .collect::<HashMap<_, _>>();
    let callees = functions
        .iter()
        .map(|function| {
            function
                .body
                .iter()
                .filter_map(direct_callee)
                .filter_map(|name| positions.get(name).copied())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut order = Vec::with_capacity(functions.len());
    let mut visited = HashSet::new();
    for root in 0..functions.len() {
        if !visited.insert(root) {
            continue;
        }

        let mut stack = vec![(root, 0)];
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            match callees[node].get(*next) {
                Some(&callee) => {
                    *next += 1;
                    if visited.insert(callee) {
                        stack.push((callee, 0));
                    }
                }
                None => {
                    stack.pop();
                    order.push(node);
                }
            }
        }
    }
    order
}

/// Inlines small non-recursive callees into callers that are not too large
/// yet, callees first. Returns whether anything changed.
#[tracing::instrument(skip_all)]
pub fn inline_functions(functions: &mut [Function], allocator: &mut ResourceAllocator) -> bool {
    let recursive = recursive_functions(functions);
    let positions = functions
        .iter()
        .enumerate()
        .map(|(index, function)| (function.name.clone(), index))
        .collect::<HashMap<_, _>>();

    let mut changed = false;
    for index in bottom_up_order(functions) {
        if cost(&functions[index]) > CALLER_COST_THRESHOLD {
            continue;
        }

        let mut inlined = 0;
        let mut body = Vec::with_capacity(functions[index].body.len());
        for statement in std::mem::take(&mut functions[index].body) {
            let Statement::Call {
                function: Expression::Name(name),
                arguments,
                return_collector,
            } = statement
            else {
                body.push(statement);
                continue;
            };

            let callee = positions
                .get(&name)
                .copied()
                .filter(|position| *position != index)
                .map(|position| &functions[position])
                .filter(|callee| {
                    !recursive.contains(&callee.name)
                        && cost(callee) <= CALLEE_COST_THRESHOLD
                        && callee.arguments.len() == arguments.len()
                });

            match callee {
                Some(callee) => {
                    expand_call(callee, arguments, return_collector, allocator, &mut body);
                    inlined += 1;
                }
                None => body.push(Statement::Call {
                    function: Expression::Name(name),
                    arguments,
                    return_collector,
                }),
            }
        }

        let function = &mut functions[index];
        function.body = if inlined > 0 {
            tracing::debug!(function = %function.name, inlined, "inlined calls");
            changed = true;
            simplify_function(body)
        } else {
            body
        };
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::Operator;

    fn temp(name: &str) -> Expression {
        Expression::temporary(name)
    }

    fn call(callee: &str, arguments: Vec<Expression>, collector: &str) -> Statement {
        Statement::Call {
            function: Expression::Name(callee.into()),
            arguments,
            return_collector: Some(collector.into()),
        }
    }

    fn increment() -> Function {
        Function {
            name: "increment".into(),
            arguments: vec!["x".into()],
            body: vec![Statement::Return(Expression::binary(
                Operator::Add,
                temp("x"),
                Expression::ONE,
            ))],
        }
    }

    #[test]
    fn small_callees_are_expanded_with_renamed_names() {
        let mut allocator = ResourceAllocator::new();
        let mut functions = vec![
            Function {
                name: "main".into(),
                arguments: vec![],
                body: vec![
                    call("increment", vec![Expression::Constant(41)], "r"),
                    Statement::Return(temp("r")),
                ],
            },
            increment(),
        ];

        assert!(inline_functions(&mut functions, &mut allocator));
        assert_eq!(
            functions[0].body,
            vec![
                Statement::move_temp("_inl_0_x", Expression::Constant(41)),
                Statement::move_temp(
                    "r",
                    Expression::binary(Operator::Add, temp("_inl_0_x"), Expression::ONE)
                ),
                Statement::Return(temp("r")),
            ]
        );
    }

    #[test]
    fn callees_are_inlined_before_being_copied() {
        let mut allocator = ResourceAllocator::new();
        let mut functions = vec![
            Function {
                name: "entry".into(),
                arguments: vec![],
                body: vec![call("main", vec![], "m"), Statement::Return(Expression::ZERO)],
            },
            Function {
                name: "main".into(),
                arguments: vec![],
                body: vec![
                    call("increment", vec![Expression::Constant(20)], "r"),
                    Statement::Return(temp("r")),
                ],
            },
            increment(),
        ];

        assert!(inline_functions(&mut functions, &mut allocator));
        assert!(
            functions[0].body.iter().all(|statement| direct_callee(statement).is_none()),
            "{:?}",
            functions[0].body
        );
        assert_eq!(bottom_up_order(&functions), vec![2, 1, 0]);
    }

    #[test]
    fn recursive_functions_are_never_inlined() {
        let mut allocator = ResourceAllocator::new();
        let ping = Function {
            name: "ping".into(),
            arguments: vec!["n".into()],
            body: vec![call("pong", vec![temp("n")], "r"), Statement::Return(temp("r"))],
        };
        let pong = Function {
            name: "pong".into(),
            arguments: vec!["n".into()],
            body: vec![call("ping", vec![temp("n")], "r"), Statement::Return(temp("r"))],
        };

        assert_eq!(
            recursive_functions(&[ping.clone(), pong.clone(), increment()]),
            HashSet::from(["ping".to_string(), "pong".to_string()])
        );

        let mut functions = vec![ping, pong];
        assert!(!inline_functions(&mut functions, &mut allocator));
    }
}
