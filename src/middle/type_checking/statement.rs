use hashbrown::HashMap;

use crate::{
    frontend::{
        ast::{
            Expression, ExpressionKind, Pattern, PatternKind, StatementBlock, Type,
            TypeDefinitionKind, ValStatement,
        },
        location::Range,
    },
    middle::type_checking::expression::ExpressionTypeChecker,
};

impl ExpressionTypeChecker<'_, '_, '_> {
    pub(super) fn check_statement_block(
        &mut self,
        range: Range,
        block: StatementBlock,
        expected: &Type,
    ) -> Expression {
        self.local.push_scope();

        let statements = block
            .statements
            .into_iter()
            .map(|statement| self.check_val_statement(statement))
            .collect();

        let (expression, ty) = match block.expression {
            Some(expression) => {
                let expression = self.check(expression, expected);
                let ty = expression.ty.clone();
                (Some(expression), ty)
            }
            None => (None, self.constrain(expected, &Type::UNIT, range)),
        };

        self.local.pop_scope();

        let block = StatementBlock {
            range: block.range,
            statements,
            expression,
        };
        Expression::new(range, ty, ExpressionKind::StatementBlock(Box::new(block)))
    }

    fn check_val_statement(&mut self, statement: ValStatement) -> ValStatement {
        let ValStatement {
            range,
            pattern,
            type_annotation,
            assigned,
        } = statement;

        let hint = match &type_annotation {
            Some(annotation) => {
                let type_parameters = self.type_parameters.clone();
                self.context
                    .validate_type(annotation, &type_parameters, range, self.reporter);
                annotation.clone()
            }
            None => self.fresh_type(),
        };

        let assigned = self.check(assigned, &hint);
        let assigned_type = self.resolution.resolve(&assigned.ty);
        let pattern = self.bind_pattern(pattern, &assigned_type);

        ValStatement {
            range,
            pattern,
            type_annotation,
            assigned,
        }
    }

    fn fresh_type(&mut self) -> Type {
        self.counter.fresh()
    }

    /// Destructures `assigned_type` according to `pattern`, adding every bound
    /// name to the innermost scope
    fn bind_pattern(&mut self, mut pattern: Pattern, assigned_type: &Type) -> Pattern {
        match &mut pattern.kind {
            PatternKind::Tuple(names) => match assigned_type {
                Type::Tuple(element_types) => {
                    if element_types.len() != names.len() {
                        self.reporter.tuple_size_mismatch(
                            pattern.range,
                            element_types.len(),
                            names.len(),
                        );
                    }

                    for (index, name) in names.iter().enumerate() {
                        let Some((name, name_range)) = name else {
                            continue;
                        };
                        let element_type = match element_types.get(index) {
                            Some(element_type) => element_type.clone(),
                            None => self.fresh_type(),
                        };
                        self.local.add(name, element_type, *name_range, self.reporter);
                    }
                }
                other => {
                    self.report_destructuring_kind(pattern.range, "tuple", other);
                    for (name, name_range) in names.iter().flatten() {
                        let fresh = self.fresh_type();
                        self.local.add(name, fresh, *name_range, self.reporter);
                    }
                }
            },
            PatternKind::Object(names) => {
                let fields = match assigned_type {
                    Type::Identifier {
                        name: class_name,
                        type_arguments,
                    } => match self.context.class(class_name) {
                        Some(class) if class.type_definition.kind == TypeDefinitionKind::Object => {
                            let mapping = class
                                .type_parameters
                                .iter()
                                .cloned()
                                .zip(type_arguments.iter().cloned())
                                .collect::<HashMap<_, _>>();
                            Some((class_name.clone(), class, mapping))
                        }
                        _ => {
                            self.reporter
                                .unsupported_class_type_definition(pattern.range, "object");
                            None
                        }
                    },
                    other => {
                        self.report_destructuring_kind(pattern.range, "identifier", other);
                        None
                    }
                };

                for name in names.iter_mut() {
                    let field_type = fields.as_ref().and_then(|(class_name, class, mapping)| {
                        let definition = &class.type_definition;
                        let field = definition.mappings.get(&name.field_name)?;
                        let visible = field.is_public || *class_name == self.context.current_class;

                        visible.then(|| {
                            name.field_order = definition.order_of(&name.field_name).unwrap_or(0);
                            field.ty.substitute(mapping)
                        })
                    });

                    let field_type = match field_type {
                        Some(field_type) => field_type,
                        None => {
                            if fields.is_some() {
                                self.reporter.unresolved_name(name.range, &name.field_name);
                            }
                            self.fresh_type()
                        }
                    };

                    self.local
                        .add(name.bound_name(), field_type, name.range, self.reporter);
                }
            }
            PatternKind::Variable(name) => {
                self.local
                    .add(name, assigned_type.clone(), pattern.range, self.reporter);
            }
            PatternKind::Wildcard => {}
        }

        pattern
    }

    fn report_destructuring_kind(&mut self, range: Range, expected_kind: &str, actual: &Type) {
        if let Type::Undecided(_) = actual {
            self.reporter.insufficient_type_inference_context(range);
        } else {
            self.reporter.unexpected_type_kind(range, expected_kind, actual);
        }
    }
}
