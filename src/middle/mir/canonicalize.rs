use crate::middle::{
    allocator::ResourceAllocator,
    mir::{Expression, LoweredStatement, Statement, tree},
};

/// Hoists calls and sequences out of expressions so every call becomes a
/// statement of its own
pub fn canonicalize_function(
    statements: Vec<tree::Statement>,
    allocator: &mut ResourceAllocator,
) -> Vec<LoweredStatement> {
    let mut canonicalizer = Canonicalizer {
        allocator,
        out: Vec::new(),
    };
    for statement in statements {
        canonicalizer.statement(statement);
    }
    canonicalizer.out
}

struct Canonicalizer<'a> {
    allocator: &'a mut ResourceAllocator,
    out: Vec<LoweredStatement>,
}

impl Canonicalizer<'_> {
    fn emit(&mut self, statement: Statement) {
        self.out.push(LoweredStatement::Canonical(statement));
    }

    /// Moves a value into a fresh temporary unless it is a constant
    fn save(&mut self, value: Expression) -> Expression {
        match value {
            Expression::Constant(_) | Expression::Name(_) => value,
            value => {
                let temporary = self.allocator.temp();
                self.emit(Statement::move_temp(temporary.clone(), value));
                Expression::Temporary(temporary)
            }
        }
    }

    /// Saves an already evaluated value when evaluating `later` runs
    /// statements that could change it
    fn protect(&mut self, value: Expression, later: &tree::Expression) -> Expression {
        if later.has_effects() {
            self.save(value)
        } else {
            value
        }
    }

    /// Evaluates `expressions` left to right
    fn expressions(&mut self, expressions: Vec<tree::Expression>) -> Vec<Expression> {
        let mut effects_after = vec![false; expressions.len()];
        for index in (1..expressions.len()).rev() {
            effects_after[index - 1] = effects_after[index] || expressions[index].has_effects();
        }

        expressions
            .into_iter()
            .zip(effects_after)
            .map(|(expression, effects_after)| {
                let value = self.expression(expression);
                if effects_after {
                    self.save(value)
                } else {
                    value
                }
            })
            .collect()
    }

    fn expression(&mut self, expression: tree::Expression) -> Expression {
        match expression {
            tree::Expression::Constant(value) => Expression::Constant(value),
            tree::Expression::Name(name) => Expression::Name(name),
            tree::Expression::Temporary(name) => Expression::Temporary(name),
            tree::Expression::Mem(address) => Expression::mem(self.expression(*address)),
            tree::Expression::Binary { operator, e1, e2 } => {
                let v1 = self.expression(*e1);
                let v1 = self.protect(v1, &e2);
                let v2 = self.expression(*e2);
                Expression::binary(operator, v1, v2)
            }
            tree::Expression::Call {
                function,
                arguments,
            } => {
                let temporary = self.allocator.temp();
                self.call(*function, arguments, Some(temporary.clone()));
                Expression::Temporary(temporary)
            }
            tree::Expression::Sequence {
                statements,
                expression,
            } => {
                for statement in statements {
                    self.statement(statement);
                }
                self.expression(*expression)
            }
        }
    }

    fn call(
        &mut self,
        function: tree::Expression,
        arguments: Vec<tree::Expression>,
        return_collector: Option<String>,
    ) {
        let mut all = vec![function];
        all.extend(arguments);
        let mut values = self.expressions(all).into_iter();

        let function = values.next().unwrap_or(Expression::ZERO);
        self.emit(Statement::Call {
            function,
            arguments: values.collect(),
            return_collector,
        });
    }

    fn statement(&mut self, statement: tree::Statement) {
        match statement {
            tree::Statement::MoveTemp {
                temporary,
                source: tree::Expression::Call {
                    function,
                    arguments,
                },
            } => self.call(*function, arguments, Some(temporary)),
            tree::Statement::MoveTemp { temporary, source } => {
                let source = self.expression(source);
                self.emit(Statement::MoveTemp { temporary, source });
            }
            tree::Statement::MoveMem { target, source } => {
                let target = self.expression(target);
                let target = self.protect(target, &source);
                let source = self.expression(source);
                self.emit(Statement::MoveMem { target, source });
            }
            tree::Statement::Expression(tree::Expression::Call {
                function,
                arguments,
            }) => self.call(*function, arguments, None),
            tree::Statement::Expression(expression) => {
                // Only the effects matter
                self.expression(expression);
            }
            tree::Statement::Jump(label) => self.emit(Statement::Jump(label)),
            tree::Statement::Label(label) => self.emit(Statement::Label(label)),
            tree::Statement::ConditionalJump {
                condition,
                true_label,
                false_label,
            } => {
                let condition = self.expression(condition);
                self.out.push(LoweredStatement::ConditionalJump {
                    condition,
                    true_label,
                    false_label,
                });
            }
            tree::Statement::Return(value) => {
                let value = self.expression(value);
                self.emit(Statement::Return(value));
            }
            tree::Statement::Sequence(statements) => {
                for statement in statements {
                    self.statement(statement);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::hir::Operator;

    fn call(name: &str, arguments: Vec<tree::Expression>) -> tree::Expression {
        tree::Expression::call(tree::Expression::Name(name.into()), arguments)
    }

    #[test]
    fn nested_calls_are_hoisted_in_evaluation_order() {
        let mut allocator = ResourceAllocator::new();
        let statements = vec![tree::Statement::Return(tree::Expression::binary(
            Operator::Add,
            call("f", vec![]),
            call("g", vec![call("h", vec![])]),
        ))];

        let lowered = canonicalize_function(statements, &mut allocator);
        let called = lowered
            .iter()
            .filter_map(|statement| match statement {
                LoweredStatement::Canonical(Statement::Call {
                    function: Expression::Name(name),
                    ..
                }) => Some(name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(called, vec!["f", "h", "g"]);
        assert!(matches!(
            lowered.last(),
            Some(LoweredStatement::Canonical(Statement::Return(Expression::Binary { .. })))
        ));
    }

    #[test]
    fn moves_of_calls_collect_directly() {
        let mut allocator = ResourceAllocator::new();
        let statements = vec![tree::Statement::MoveTemp {
            temporary: "x".into(),
            source: call("f", vec![tree::Expression::Constant(1)]),
        }];

        assert_eq!(
            canonicalize_function(statements, &mut allocator),
            vec![LoweredStatement::Canonical(Statement::Call {
                function: Expression::Name("f".into()),
                arguments: vec![Expression::Constant(1)],
                return_collector: Some("x".into()),
            })]
        );
    }
}
