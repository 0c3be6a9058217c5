use crate::{
    errors::InternalError,
    middle::{
        allocator::ResourceAllocator,
        hir::{self, Builtin, Operator},
        mir::{
            self, canonicalize::canonicalize_function, simplify::simplify_function,
            tail_recursion::optimize_tail_recursion, trace::reorder_function,
            tree::{Expression, Statement},
        },
    },
};

const WORD_SIZE: i64 = 8;

/// Lowers HIR to canonical MIR, one function at a time
#[tracing::instrument(skip_all, fields(functions = sources.functions.len()))]
pub fn lower_sources(
    sources: &hir::Sources,
    allocator: &mut ResourceAllocator,
    tail_recursion: bool,
) -> Result<mir::Sources, InternalError> {
    let functions = sources
        .functions
        .iter()
        .map(|function| {
            let body = generate_function(function, allocator);
            let lowered = canonicalize_function(body, allocator);
            let ordered = reorder_function(&function.name, lowered, allocator)?;
            let mut function = mir::Function {
                name: function.name.clone(),
                arguments: function.parameters.clone(),
                body: simplify_function(ordered),
            };

            if tail_recursion {
                optimize_tail_recursion(&mut function, allocator);
            }

            Ok(function)
        })
        .collect::<Result<Vec<_>, InternalError>>()?;

    tracing::debug!(
        statements = functions.iter().map(|f| f.body.len()).sum::<usize>(),
        "lowered to MIR"
    );

    Ok(mir::Sources {
        global_variables: allocator.global_variables().to_vec(),
        functions,
    })
}

fn generate_function(function: &hir::Function, allocator: &mut ResourceAllocator) -> Vec<Statement> {
    let mut generator = Generator { allocator };
    let mut statements = generator.statements(&function.body);

    let return_value = if function.has_return {
        lower_expression(&function.return_value)
    } else {
        Expression::Constant(0)
    };
    statements.push(Statement::Return(return_value));
    statements
}

fn lower_expression(expression: &hir::Expression) -> Expression {
    match expression {
        hir::Expression::IntLiteral(value) => Expression::Constant(*value),
        hir::Expression::StringName(name) => Expression::binary(
            Operator::Add,
            Expression::Name(name.clone()),
            Expression::Constant(WORD_SIZE),
        ),
        hir::Expression::Name(name) => Expression::Name(name.clone()),
        hir::Expression::Variable(name) => Expression::Temporary(name.clone()),
        hir::Expression::IndexAccess { expression, index } => {
            Expression::mem(word_address(lower_expression(expression), *index))
        }
        hir::Expression::Binary { operator, e1, e2 } => {
            Expression::binary(*operator, lower_expression(e1), lower_expression(e2))
        }
    }
}

fn word_address(base: Expression, index: usize) -> Expression {
    if index == 0 {
        base
    } else {
        Expression::binary(Operator::Add, base, Expression::Constant(WORD_SIZE * index as i64))
    }
}

fn builtin_call(builtin: Builtin, arguments: Vec<Expression>) -> Expression {
    Expression::call(Expression::Name(builtin.to_string()), arguments)
}

struct Generator<'a> {
    allocator: &'a mut ResourceAllocator,
}

impl Generator<'_> {
    fn statements(&mut self, statements: &[hir::Statement]) -> Vec<Statement> {
        let mut lowered = Vec::new();
        for statement in statements {
            self.statement(statement, &mut lowered);
        }
        lowered
    }

    /// Jumps on a condition, resolving constant conditions statically
    fn cjump_translate(condition: Expression, true_label: String, false_label: String) -> Statement {
        match condition {
            Expression::Constant(0) => Statement::Jump(false_label),
            Expression::Constant(_) => Statement::Jump(true_label),
            condition => Statement::ConditionalJump {
                condition,
                true_label,
                false_label,
            },
        }
    }

    fn allocate(&mut self, name: &str, elements: Vec<Expression>, out: &mut Vec<Statement>) {
        out.push(Statement::MoveTemp {
            temporary: name.to_string(),
            source: builtin_call(
                Builtin::Malloc,
                vec![Expression::Constant(WORD_SIZE * elements.len() as i64)],
            ),
        });

        for (index, element) in elements.into_iter().enumerate() {
            out.push(Statement::MoveMem {
                target: word_address(Expression::Temporary(name.to_string()), index),
                source: element,
            });
        }
    }

    fn statement(&mut self, statement: &hir::Statement, out: &mut Vec<Statement>) {
        match statement {
            hir::Statement::FunctionApplication {
                function_name,
                arguments,
                result,
            } => out.push(Statement::MoveTemp {
                temporary: result.clone(),
                source: Expression::call(
                    Expression::Name(function_name.clone()),
                    arguments.iter().map(lower_expression).collect(),
                ),
            }),
            hir::Statement::ClosureApplication {
                closure,
                arguments,
                result,
            } => self.closure_application(closure, arguments, result, out),
            hir::Statement::BuiltinCall {
                builtin,
                arguments,
                result,
            } => out.push(Statement::MoveTemp {
                temporary: result.clone(),
                source: builtin_call(*builtin, arguments.iter().map(lower_expression).collect()),
            }),
            hir::Statement::IfElse { condition, s1, s2 } => {
                let true_label = self.allocator.label("TRUE_BRANCH");
                let false_label = self.allocator.label("FALSE_BRANCH");
                let end_label = self.allocator.label("IF_ELSE_END");

                out.push(Self::cjump_translate(
                    lower_expression(condition),
                    true_label.clone(),
                    false_label.clone(),
                ));
                out.push(Statement::Label(true_label));
                out.push(Statement::Sequence(self.statements(s1)));
                out.push(Statement::Jump(end_label.clone()));
                out.push(Statement::Label(false_label));
                out.push(Statement::Sequence(self.statements(s2)));
                out.push(Statement::Jump(end_label.clone()));
                out.push(Statement::Label(end_label));
            }
            hir::Statement::Match {
                variable,
                tag_branches,
                default_branch,
            } => self.tag_match(variable, tag_branches, default_branch.as_deref(), out),
            hir::Statement::Let { name, assigned } => out.push(Statement::MoveTemp {
                temporary: name.clone(),
                source: lower_expression(assigned),
            }),
            hir::Statement::StructConstructor { name, elements } => {
                self.allocate(name, elements.iter().map(lower_expression).collect(), out)
            }
            hir::Statement::ClosureConstructor {
                name,
                function_name,
                context,
            } => self.allocate(
                name,
                vec![Expression::Name(function_name.clone()), lower_expression(context)],
                out,
            ),
            hir::Statement::Throw(message) => out.push(Statement::Expression(builtin_call(
                Builtin::Throw,
                vec![lower_expression(message)],
            ))),
        }
    }

    /// Calls through a closure record, passing its context first unless the
    /// context is zero
    fn closure_application(
        &mut self,
        closure: &hir::Expression,
        arguments: &[hir::Expression],
        result: &str,
        out: &mut Vec<Statement>,
    ) {
        let record = self.allocator.temp();
        let function = self.allocator.temp();
        let context = self.allocator.temp();
        let with_context = self.allocator.label("CLOSURE_WITH_CONTEXT");
        let without_context = self.allocator.label("CLOSURE_WITHOUT_CONTEXT");
        let end_label = self.allocator.label("CLOSURE_APPLICATION_END");

        let arguments = arguments.iter().map(lower_expression).collect::<Vec<_>>();
        let mut arguments_with_context = vec![Expression::Temporary(context.clone())];
        arguments_with_context.extend(arguments.iter().cloned());

        out.push(Statement::MoveTemp {
            temporary: record.clone(),
            source: lower_expression(closure),
        });
        out.push(Statement::MoveTemp {
            temporary: function.clone(),
            source: Expression::mem(Expression::Temporary(record.clone())),
        });
        out.push(Statement::MoveTemp {
            temporary: context.clone(),
            source: Expression::mem(word_address(Expression::Temporary(record), 1)),
        });
        out.push(Statement::ConditionalJump {
            condition: Expression::binary(
                Operator::Eq,
                Expression::Temporary(context),
                Expression::Constant(0),
            ),
            true_label: without_context.clone(),
            false_label: with_context.clone(),
        });
        out.push(Statement::Label(without_context));
        out.push(Statement::MoveTemp {
            temporary: result.to_string(),
            source: Expression::call(Expression::Temporary(function.clone()), arguments),
        });
        out.push(Statement::Jump(end_label.clone()));
        out.push(Statement::Label(with_context));
        out.push(Statement::MoveTemp {
            temporary: result.to_string(),
            source: Expression::call(Expression::Temporary(function), arguments_with_context),
        });
        out.push(Statement::Jump(end_label.clone()));
        out.push(Statement::Label(end_label));
    }

    /// Compares the tag word of the matched variant against each branch in
    /// turn, the last branch taking whatever is left
    fn tag_match(
        &mut self,
        variable: &str,
        tag_branches: &[(usize, Vec<hir::Statement>)],
        default_branch: Option<&[hir::Statement]>,
        out: &mut Vec<Statement>,
    ) {
        let tag = self.allocator.temp();
        let end_label = self.allocator.label("MATCH_END");

        out.push(Statement::MoveTemp {
            temporary: tag.clone(),
            source: Expression::mem(Expression::Temporary(variable.to_string())),
        });

        let mut branches = tag_branches
            .iter()
            .map(|(tag_order, statements)| (Some(*tag_order), statements.as_slice()))
            .collect::<Vec<_>>();
        if let Some(statements) = default_branch {
            branches.push((None, statements));
        }

        let last = branches.len().saturating_sub(1);
        for (index, (tag_order, statements)) in branches.into_iter().enumerate() {
            match tag_order {
                Some(tag_order) if index != last => {
                    let branch_label = self.allocator.label("MATCH_BRANCH");
                    let next_label = self.allocator.label("MATCH_NEXT");

                    out.push(Statement::ConditionalJump {
                        condition: Expression::binary(
                            Operator::Eq,
                            Expression::Temporary(tag.clone()),
                            Expression::Constant(tag_order as i64),
                        ),
                        true_label: branch_label.clone(),
                        false_label: next_label.clone(),
                    });
                    out.push(Statement::Label(branch_label));
                    out.push(Statement::Sequence(self.statements(statements)));
                    out.push(Statement::Jump(end_label.clone()));
                    out.push(Statement::Label(next_label));
                }
                _ => {
                    out.push(Statement::Sequence(self.statements(statements)));
                    out.push(Statement::Jump(end_label.clone()));
                }
            }
        }

        out.push(Statement::Label(end_label));
    }
}
