use hashbrown::{HashMap, HashSet};

use crate::{
    errors::ErrorReporter,
    frontend::{
        ast::{
            BinaryOperator, Expression, ExpressionKind, LambdaParameter, MatchCase,
            ObjectConstructorField, Type, TypeDefinitionKind, UnaryOperator, UndecidedTypeCounter,
        },
        location::Range,
    },
    middle::type_checking::{
        context::{AccessibleGlobalTypingContext, LocalTypingContext},
        resolution::TypeResolution,
    },
};

/// Bidirectional checker for the body of one class member
pub(super) struct ExpressionTypeChecker<'c, 'a, 'r> {
    pub(super) context: &'c AccessibleGlobalTypingContext<'a>,
    pub(super) resolution: TypeResolution,
    pub(super) local: LocalTypingContext,
    pub(super) counter: &'c mut UndecidedTypeCounter,
    pub(super) reporter: &'c mut ErrorReporter<'r>,
    /// Class and member type parameters visible in the body
    pub(super) type_parameters: Vec<String>,
}

impl ExpressionTypeChecker<'_, '_, '_> {
    /// Meets `expected` with `actual`, reporting a mismatch at `range` and
    /// falling back to the expected type
    pub(super) fn constrain(&mut self, expected: &Type, actual: &Type, range: Range) -> Type {
        match self.resolution.check_and_infer(expected, actual) {
            Some(ty) => ty,
            None => {
                let expected = self.resolution.resolve(expected);
                let actual = self.resolution.resolve(actual);
                self.reporter.unexpected_type(range, &expected, &actual);
                expected
            }
        }
    }

    fn fresh(&mut self) -> Type {
        self.counter.fresh()
    }

    /// Fresh type arguments for the current class along with the mapping
    /// from its type parameters
    fn instantiate_current_class(&mut self) -> (Type, HashMap<String, Type>) {
        let parameters = self
            .context
            .current_class()
            .map(|class| class.type_parameters.clone())
            .unwrap_or_default();

        let mut mapping = HashMap::new();
        let mut type_arguments = Vec::new();
        for parameter in parameters {
            let fresh = self.fresh();
            type_arguments.push(fresh.clone());
            mapping.insert(parameter, fresh);
        }

        (
            Type::identifier(self.context.current_class.clone(), type_arguments),
            mapping,
        )
    }

    pub(super) fn check(&mut self, expression: Expression, expected: &Type) -> Expression {
        let Expression { range, kind, .. } = expression;

        match kind {
            ExpressionKind::Literal(literal) => {
                let ty = self.constrain(expected, &literal.ty(), range);
                Expression::new(range, ty, ExpressionKind::Literal(literal))
            }
            ExpressionKind::This => {
                let ty = match self.local.get("this") {
                    Some(this_type) => self.constrain(expected, &this_type, range),
                    None => {
                        self.reporter.illegal_this(range);
                        expected.clone()
                    }
                };
                Expression::new(range, ty, ExpressionKind::This)
            }
            ExpressionKind::Variable(name) => {
                let ty = match self.local.get(&name) {
                    Some(variable_type) => self.constrain(expected, &variable_type, range),
                    None => {
                        self.reporter.unresolved_name(range, &name);
                        expected.clone()
                    }
                };
                Expression::new(range, ty, ExpressionKind::Variable(name))
            }
            ExpressionKind::ClassMember {
                class_name,
                class_name_range,
                member_name,
                member_name_range,
                ..
            } => {
                let (ty, type_arguments) =
                    match self
                        .context
                        .function_type(&class_name, &member_name, self.counter)
                    {
                        Some((function_type, type_arguments)) => (
                            self.constrain(expected, &function_type, range),
                            type_arguments,
                        ),
                        None => {
                            self.reporter
                                .unresolved_name(range, &format!("{class_name}.{member_name}"));
                            (expected.clone(), Vec::new())
                        }
                    };

                Expression::new(
                    range,
                    ty,
                    ExpressionKind::ClassMember {
                        class_name,
                        class_name_range,
                        member_name,
                        member_name_range,
                        type_arguments,
                    },
                )
            }
            ExpressionKind::TupleConstructor(elements) => {
                let hints = match self.resolution.resolve(expected) {
                    Type::Tuple(hints) if hints.len() == elements.len() => hints,
                    _ => elements.iter().map(|_| self.fresh()).collect(),
                };

                let elements = elements
                    .into_iter()
                    .zip(hints)
                    .map(|(element, hint)| self.check(element, &hint))
                    .collect::<Vec<_>>();

                let actual = Type::Tuple(elements.iter().map(|e| e.ty.clone()).collect());
                let ty = self.constrain(expected, &actual, range);
                Expression::new(range, ty, ExpressionKind::TupleConstructor(elements))
            }
            ExpressionKind::ObjectConstructor(fields) => {
                self.check_object_constructor(range, fields, expected)
            }
            ExpressionKind::VariantConstructor {
                tag,
                tag_range,
                data,
                ..
            } => {
                let definition = self
                    .context
                    .current_class()
                    .map(|class| class.type_definition.clone());
                let (class_type, mapping) = self.instantiate_current_class();

                let (tag_type, tag_order, ty) = match definition {
                    Some(definition) if definition.kind == TypeDefinitionKind::Variant => {
                        match definition.order_of(&tag) {
                            Some(order) => (
                                definition.mappings[&tag].ty.substitute(&mapping),
                                order,
                                self.constrain(expected, &class_type, range),
                            ),
                            None => {
                                self.reporter.unresolved_name(tag_range, &tag);
                                (self.fresh(), 0, expected.clone())
                            }
                        }
                    }
                    _ => {
                        self.reporter
                            .unsupported_class_type_definition(range, "variant");
                        (self.fresh(), 0, expected.clone())
                    }
                };

                let data = self.check(*data, &tag_type);

                Expression::new(
                    range,
                    ty,
                    ExpressionKind::VariantConstructor {
                        tag,
                        tag_range,
                        tag_order,
                        data: Box::new(data),
                    },
                )
            }
            ExpressionKind::FieldAccess {
                expression,
                field_name,
                field_range,
                ..
            }
            | ExpressionKind::MethodAccess {
                expression,
                method_name: field_name,
                method_range: field_range,
            } => self.check_member_access(range, *expression, field_name, field_range, expected),
            ExpressionKind::Unary {
                operator,
                expression,
            } => {
                let operand_type = match operator {
                    UnaryOperator::Not => Type::BOOL,
                    UnaryOperator::Negate => Type::INT,
                };
                let expression = self.check(*expression, &operand_type);
                let ty = self.constrain(expected, &operand_type, range);

                Expression::new(
                    range,
                    ty,
                    ExpressionKind::Unary {
                        operator,
                        expression: Box::new(expression),
                    },
                )
            }
            ExpressionKind::Panic(message) => {
                let message = self.check(*message, &Type::STRING);
                Expression::new(range, expected.clone(), ExpressionKind::Panic(Box::new(message)))
            }
            ExpressionKind::BuiltinCall { function, argument } => {
                let argument = self.check(*argument, &function.argument_type());
                let ty = self.constrain(expected, &function.return_type(), range);

                Expression::new(
                    range,
                    ty,
                    ExpressionKind::BuiltinCall {
                        function,
                        argument: Box::new(argument),
                    },
                )
            }
            ExpressionKind::FunctionApplication {
                function,
                arguments,
            } => self.check_function_application(range, *function, arguments, expected),
            ExpressionKind::Binary {
                operator,
                operator_range,
                e1,
                e2,
            } => {
                let (e1, e2, result_type) = match operator {
                    BinaryOperator::Multiply
                    | BinaryOperator::Divide
                    | BinaryOperator::Modulo
                    | BinaryOperator::Plus
                    | BinaryOperator::Minus => (
                        self.check(*e1, &Type::INT),
                        self.check(*e2, &Type::INT),
                        Type::INT,
                    ),
                    BinaryOperator::LessThan
                    | BinaryOperator::LessThanOrEqual
                    | BinaryOperator::GreaterThan
                    | BinaryOperator::GreaterThanOrEqual => (
                        self.check(*e1, &Type::INT),
                        self.check(*e2, &Type::INT),
                        Type::BOOL,
                    ),
                    BinaryOperator::Equal | BinaryOperator::NotEqual => {
                        let hint = self.fresh();
                        let e1 = self.check(*e1, &hint);
                        let e1_type = e1.ty.clone();
                        (e1, self.check(*e2, &e1_type), Type::BOOL)
                    }
                    BinaryOperator::And | BinaryOperator::Or => (
                        self.check(*e1, &Type::BOOL),
                        self.check(*e2, &Type::BOOL),
                        Type::BOOL,
                    ),
                    BinaryOperator::Concat => (
                        self.check(*e1, &Type::STRING),
                        self.check(*e2, &Type::STRING),
                        Type::STRING,
                    ),
                };

                let ty = self.constrain(expected, &result_type, range);

                Expression::new(
                    range,
                    ty,
                    ExpressionKind::Binary {
                        operator,
                        operator_range,
                        e1: Box::new(e1),
                        e2: Box::new(e2),
                    },
                )
            }
            ExpressionKind::IfElse {
                condition,
                e1,
                e2,
            } => {
                let condition = self.check(*condition, &Type::BOOL);
                let e1 = self.check(*e1, expected);
                let e1_type = e1.ty.clone();
                let e2 = self.check(*e2, &e1_type);
                let ty = self.resolution.resolve(&e1_type);

                Expression::new(
                    range,
                    ty,
                    ExpressionKind::IfElse {
                        condition: Box::new(condition),
                        e1: Box::new(e1),
                        e2: Box::new(e2),
                    },
                )
            }
            ExpressionKind::Match { matched, cases } => {
                self.check_match(range, *matched, cases, expected)
            }
            ExpressionKind::Lambda {
                parameters, body, ..
            } => self.check_lambda(range, parameters, *body, expected),
            ExpressionKind::StatementBlock(block) => self.check_statement_block(range, *block, expected),
        }
    }

    fn check_object_constructor(
        &mut self,
        range: Range,
        fields: Vec<ObjectConstructorField>,
        expected: &Type,
    ) -> Expression {
        let definition = self
            .context
            .current_class()
            .map(|class| class.type_definition.clone())
            .filter(|definition| definition.kind == TypeDefinitionKind::Object);
        let (class_type, mapping) = self.instantiate_current_class();

        let Some(definition) = definition else {
            self.reporter
                .unsupported_class_type_definition(range, "object");

            let fields = fields
                .into_iter()
                .map(|mut field| {
                    let hint = self.fresh();
                    field.expression = self.check(field.expression, &hint);
                    field
                })
                .collect();

            return Expression::new(range, expected.clone(), ExpressionKind::ObjectConstructor(fields));
        };

        let mut seen = HashSet::new();
        let mut checked_fields = Vec::with_capacity(fields.len());

        for mut field in fields {
            if !seen.insert(field.name.clone()) {
                self.reporter
                    .duplicate_field_declaration(field.range, &field.name);
            }

            let hint = match definition.mappings.get(&field.name) {
                Some(field_type) => field_type.ty.substitute(&mapping),
                None => self.fresh(),
            };

            field.order = definition.order_of(&field.name).unwrap_or(0);
            field.expression = self.check(field.expression, &hint);
            checked_fields.push(field);
        }

        let mut expected_names = definition.names.clone();
        let mut actual_names = checked_fields.iter().map(|f| f.name.clone()).collect::<Vec<_>>();
        expected_names.sort();
        actual_names.sort();
        actual_names.dedup();

        let ty = if expected_names != actual_names {
            self.reporter
                .inconsistent_fields_in_object(range, &expected_names, &actual_names);
            expected.clone()
        } else {
            self.constrain(expected, &class_type, range)
        };

        Expression::new(range, ty, ExpressionKind::ObjectConstructor(checked_fields))
    }

    /// `e.name` is a method access when the receiver's class has such a
    /// method, otherwise a field access
    fn check_member_access(
        &mut self,
        range: Range,
        expression: Expression,
        name: String,
        name_range: Range,
        expected: &Type,
    ) -> Expression {
        let hint = self.fresh();
        let receiver = self.check(expression, &hint);
        let receiver_type = self.resolution.resolve(&receiver.ty);

        let Type::Identifier {
            name: class_name,
            type_arguments,
        } = &receiver_type
        else {
            if let Type::Undecided(_) = receiver_type {
                self.reporter
                    .insufficient_type_inference_context(receiver.range);
            } else {
                self.reporter
                    .unexpected_type_kind(receiver.range, "identifier", &receiver_type);
            }

            return Expression::new(
                range,
                expected.clone(),
                ExpressionKind::FieldAccess {
                    expression: Box::new(receiver),
                    field_name: name,
                    field_range: name_range,
                    field_order: 0,
                },
            );
        };

        if let Some(method_type) =
            self.context
                .method_type(class_name, &name, type_arguments, self.counter)
        {
            let ty = self.constrain(expected, &method_type, range);
            return Expression::new(
                range,
                ty,
                ExpressionKind::MethodAccess {
                    expression: Box::new(receiver),
                    method_name: name,
                    method_range: name_range,
                },
            );
        }

        let field = self.context.class(class_name).and_then(|class| {
            let definition = &class.type_definition;
            let field = definition.mappings.get(&name)?;
            let visible = field.is_public || *class_name == self.context.current_class;

            (definition.kind == TypeDefinitionKind::Object && visible).then(|| {
                let mapping = class
                    .type_parameters
                    .iter()
                    .cloned()
                    .zip(type_arguments.iter().cloned())
                    .collect::<HashMap<_, _>>();
                (field.ty.substitute(&mapping), definition.order_of(&name).unwrap_or(0))
            })
        });

        let (ty, field_order) = match field {
            Some((field_type, order)) => (self.constrain(expected, &field_type, range), order),
            None => {
                self.reporter.unresolved_name(name_range, &name);
                (expected.clone(), 0)
            }
        };

        Expression::new(
            range,
            ty,
            ExpressionKind::FieldAccess {
                expression: Box::new(receiver),
                field_name: name,
                field_range: name_range,
                field_order,
            },
        )
    }

    fn check_function_application(
        &mut self,
        range: Range,
        function: Expression,
        arguments: Vec<Expression>,
        expected: &Type,
    ) -> Expression {
        let hint = self.fresh();
        let function = self.check(function, &hint);

        let (parameter_types, return_type) = match self.resolution.resolve(&function.ty) {
            Type::Function {
                argument_types,
                return_type,
            } if argument_types.len() == arguments.len() => (argument_types, *return_type),
            function_type @ Type::Function { .. } => {
                let parameter_types = arguments.iter().map(|_| self.fresh()).collect::<Vec<_>>();
                let called_as = Type::function(parameter_types.clone(), expected.clone());
                self.reporter
                    .unexpected_type(function.range, &called_as, &function_type);
                (parameter_types, expected.clone())
            }
            Type::Undecided(_) => {
                let parameter_types = arguments.iter().map(|_| self.fresh()).collect::<Vec<_>>();
                let return_type = self.fresh();
                let called_as = Type::function(parameter_types.clone(), return_type.clone());
                self.constrain(&called_as, &function.ty, function.range);
                (parameter_types, return_type)
            }
            other => {
                self.reporter
                    .unexpected_type_kind(function.range, "function", &other);
                let parameter_types = arguments.iter().map(|_| self.fresh()).collect();
                (parameter_types, expected.clone())
            }
        };

        let arguments = arguments
            .into_iter()
            .zip(parameter_types)
            .map(|(argument, parameter_type)| {
                let parameter_type = self.resolution.resolve(&parameter_type);
                self.check(argument, &parameter_type)
            })
            .collect();

        let ty = self.constrain(expected, &return_type, range);

        Expression::new(
            range,
            ty,
            ExpressionKind::FunctionApplication {
                function: Box::new(function),
                arguments,
            },
        )
    }

    fn check_match(
        &mut self,
        range: Range,
        matched: Expression,
        cases: Vec<MatchCase>,
        expected: &Type,
    ) -> Expression {
        let hint = self.fresh();
        let matched = self.check(matched, &hint);
        let matched_type = self.resolution.resolve(&matched.ty);

        let mut variant = None;
        match &matched_type {
            Type::Identifier {
                name,
                type_arguments,
            } => {
                if *name != self.context.current_class {
                    self.reporter.illegal_other_class_match(matched.range);
                }

                match self.context.class(name) {
                    Some(class) if class.type_definition.kind == TypeDefinitionKind::Variant => {
                        let mapping = class
                            .type_parameters
                            .iter()
                            .cloned()
                            .zip(type_arguments.iter().cloned())
                            .collect::<HashMap<_, _>>();
                        variant = Some((class.type_definition.clone(), mapping));
                    }
                    _ => self
                        .reporter
                        .unsupported_class_type_definition(matched.range, "variant"),
                }
            }
            Type::Undecided(_) => self
                .reporter
                .insufficient_type_inference_context(matched.range),
            other => self
                .reporter
                .unexpected_type_kind(matched.range, "identifier", other),
        }

        let mut unused_tags = variant
            .as_ref()
            .map(|(definition, _)| definition.names.clone())
            .unwrap_or_default();
        let mut has_wildcard = false;
        let mut result_type = expected.clone();
        let mut checked_cases = Vec::with_capacity(cases.len());

        for mut case in cases {
            let mut data_type = None;

            match &case.tag {
                Some((tag, tag_range)) => {
                    unused_tags.retain(|unused| unused != tag);

                    if let Some((definition, mapping)) = &variant {
                        match definition.order_of(tag) {
                            Some(order) => {
                                case.tag_order = order;
                                data_type = Some(definition.mappings[tag].ty.substitute(mapping));
                            }
                            None => self.reporter.unresolved_name(*tag_range, tag),
                        }
                    }
                }
                None => has_wildcard = true,
            }

            self.local.push_scope();
            if let Some((name, name_range)) = &case.data_variable {
                let data_type = data_type.unwrap_or_else(|| self.fresh());
                self.local.add(name, data_type, *name_range, self.reporter);
            }
            case.expression = self.check(case.expression, &result_type);
            self.local.pop_scope();

            result_type = self.resolution.resolve(&case.expression.ty);
            checked_cases.push(case);
        }

        if variant.is_some() && !has_wildcard && !unused_tags.is_empty() {
            self.reporter.non_exhaustive_match(range, &unused_tags);
        }

        Expression::new(
            range,
            result_type,
            ExpressionKind::Match {
                matched: Box::new(matched),
                cases: checked_cases,
            },
        )
    }

    fn check_lambda(
        &mut self,
        range: Range,
        mut parameters: Vec<LambdaParameter>,
        body: Expression,
        expected: &Type,
    ) -> Expression {
        let hint = match self.resolution.resolve(expected) {
            Type::Function {
                argument_types,
                return_type,
            } if argument_types.len() == parameters.len() => Some((argument_types, *return_type)),
            _ => None,
        };

        let type_parameters = self.type_parameters.clone();
        for parameter in &parameters {
            self.context
                .validate_type(&parameter.ty, &type_parameters, parameter.range, self.reporter);
        }

        if let Some((argument_hints, _)) = &hint {
            for (parameter, argument_hint) in parameters.iter_mut().zip(argument_hints) {
                parameter.ty = self.constrain(argument_hint, &parameter.ty, parameter.range);
            }
        }

        self.local.push_scope();
        for parameter in &parameters {
            self.local
                .add(&parameter.name, parameter.ty.clone(), parameter.range, self.reporter);
        }

        let body_hint = match hint {
            Some((_, return_hint)) => return_hint,
            None => self.fresh(),
        };
        let body = self.check(body, &body_hint);
        let captured = self.local.pop_scope();

        let lambda_type = Type::function(
            parameters.iter().map(|p| p.ty.clone()).collect(),
            body.ty.clone(),
        );
        let ty = self.constrain(expected, &lambda_type, range);

        Expression::new(
            range,
            ty,
            ExpressionKind::Lambda {
                parameters,
                captured,
                body: Box::new(body),
            },
        )
    }
}
