use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

use crate::{
    errors::InternalError,
    frontend::{
        ast::{
            self, BinaryOperator, BuiltinFunction, ExpressionKind, LambdaParameter, Literal,
            PatternKind, StatementBlock, Type, UnaryOperator,
        },
        location::ModuleReference,
    },
    internal_error,
    middle::{
        allocator::ResourceAllocator,
        hir::{Builtin, ENTRY_FUNCTION_NAME, Expression, Function, Operator, Sources, Statement},
        type_checking::TypeCheckedSources,
    },
};

/// Global symbol of a class function or method
pub fn encode_function_name(module: &ModuleReference, class_name: &str, function_name: &str) -> String {
    format!("_{}_{class_name}_{function_name}", module.encoded())
}

const THIS: &str = "_this";
const CONTEXT: &str = "_context";

/// Lowers every class member of a checked compilation, with an entry
/// function calling `Main.main` of `entry_module`
#[tracing::instrument(skip_all, fields(entry = %entry_module))]
pub fn lower_sources(
    checked: &TypeCheckedSources,
    entry_module: &ModuleReference,
    allocator: &mut ResourceAllocator,
) -> Result<Sources, InternalError> {
    let mut functions = Vec::new();
    let mut lambdas = Vec::new();

    for (reference, module) in &checked.modules {
        let resolver = class_resolver(reference, module);

        for class in &module.classes {
            for member in &class.members {
                let name = encode_function_name(reference, &class.name, &member.name);
                let mut lowering =
                    FunctionLowering::new(&resolver, allocator, &mut lambdas, name.clone());

                let mut parameters = Vec::new();
                if member.is_method {
                    lowering.bind("this");
                    parameters.push(THIS.to_string());
                }
                for parameter in &member.parameters {
                    parameters.push(lowering.bind(&parameter.name));
                }

                let mut body = Vec::new();
                let return_value = lowering.lower(&member.body, &mut body)?;

                functions.push(Function {
                    name,
                    parameters,
                    has_return: member.return_type != Type::UNIT,
                    body,
                    return_value,
                });
            }
        }
    }

    functions.append(&mut lambdas);
    functions.push(entry_function(checked, entry_module, allocator));

    tracing::debug!(functions = functions.len(), "lowered to HIR");

    Ok(Sources {
        global_variables: allocator.global_variables().to_vec(),
        functions,
    })
}

fn entry_function(
    checked: &TypeCheckedSources,
    entry_module: &ModuleReference,
    allocator: &mut ResourceAllocator,
) -> Function {
    let has_main = checked
        .global
        .class(entry_module, "Main")
        .is_some_and(|class| class.functions.contains_key("main"));

    let body = if has_main {
        vec![Statement::FunctionApplication {
            function_name: encode_function_name(entry_module, "Main", "main"),
            arguments: Vec::new(),
            result: allocator.temp(),
        }]
    } else {
        Vec::new()
    };

    Function {
        name: ENTRY_FUNCTION_NAME.to_string(),
        parameters: Vec::new(),
        has_return: true,
        body,
        return_value: Expression::ZERO,
    }
}

/// Class names visible in a module mapped to the module defining them
fn class_resolver(reference: &ModuleReference, module: &ast::Module) -> HashMap<String, ModuleReference> {
    let mut resolver = HashMap::new();

    for import in &module.imports {
        for (name, _) in &import.imported_members {
            resolver.insert(name.clone(), import.imported_module.clone());
        }
    }
    for class in &module.classes {
        resolver.insert(class.name.clone(), reference.clone());
    }

    resolver
}

struct FunctionLowering<'a> {
    resolver: &'a HashMap<String, ModuleReference>,
    allocator: &'a mut ResourceAllocator,
    lambdas: &'a mut Vec<Function>,
    function_name: String,
    next_lambda: usize,
    /// Source names to the names they are lowered to, innermost last
    scopes: Vec<HashMap<String, String>>,
    used_names: HashSet<String>,
}

impl<'a> FunctionLowering<'a> {
    fn new(
        resolver: &'a HashMap<String, ModuleReference>,
        allocator: &'a mut ResourceAllocator,
        lambdas: &'a mut Vec<Function>,
        function_name: String,
    ) -> Self {
        Self {
            resolver,
            allocator,
            lambdas,
            function_name,
            next_lambda: 0,
            scopes: vec![HashMap::new()],
            used_names: HashSet::new(),
        }
    }

    /// Introduces a source variable, renaming it when it shadows another
    fn bind(&mut self, name: &str) -> String {
        let lowered = if name == "this" {
            THIS.to_string()
        } else {
            let candidate = self.allocator.variable(name);
            if self.used_names.contains(&candidate) {
                self.allocator.shadowing_variable(name)
            } else {
                candidate
            }
        };

        self.used_names.insert(lowered.clone());
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), lowered.clone());
        }
        lowered
    }

    fn lookup(&self, name: &str) -> Result<String, InternalError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
            .ok_or_else(|| internal_error!("unbound variable `{name}` in `{}`", self.function_name))
    }

    fn method_name(&self, receiver_type: &Type, method_name: &str) -> Result<String, InternalError> {
        let Type::Identifier { name, .. } = receiver_type else {
            return Err(internal_error!("method `{method_name}` called on `{receiver_type}`"));
        };
        self.function_name_of(name, method_name)
    }

    fn function_name_of(&self, class_name: &str, member_name: &str) -> Result<String, InternalError> {
        let module = self
            .resolver
            .get(class_name)
            .ok_or_else(|| internal_error!("unresolved class `{class_name}`"))?;
        Ok(encode_function_name(module, class_name, member_name))
    }

    fn temp(&mut self) -> String {
        self.allocator.temp()
    }

    /// Binds `value` to a name unless it already is a variable
    fn to_variable(&mut self, value: Expression, out: &mut Vec<Statement>) -> Expression {
        if let Expression::Variable(_) = value {
            return value;
        }

        let name = self.temp();
        out.push(Statement::Let {
            name: name.clone(),
            assigned: value,
        });
        Expression::Variable(name)
    }

    fn construct(&mut self, elements: Vec<Expression>, out: &mut Vec<Statement>) -> Expression {
        let name = self.temp();
        out.push(Statement::StructConstructor {
            name: name.clone(),
            elements,
        });
        Expression::Variable(name)
    }

    fn closure(&mut self, function_name: String, context: Expression, out: &mut Vec<Statement>) -> Expression {
        let name = self.temp();
        out.push(Statement::ClosureConstructor {
            name: name.clone(),
            function_name,
            context,
        });
        Expression::Variable(name)
    }

    fn lower_all(
        &mut self,
        expressions: &[ast::Expression],
        out: &mut Vec<Statement>,
    ) -> Result<Vec<Expression>, InternalError> {
        expressions.iter().map(|e| self.lower(e, out)).collect()
    }

    /// Emits the effects of `expression` into `out` in evaluation order and
    /// returns its value
    fn lower(&mut self, expression: &ast::Expression, out: &mut Vec<Statement>) -> Result<Expression, InternalError> {
        let value = match &expression.kind {
            ExpressionKind::Literal(Literal::Int(value)) => Expression::IntLiteral(*value),
            ExpressionKind::Literal(Literal::Bool(value)) => Expression::IntLiteral(*value as i64),
            ExpressionKind::Literal(Literal::String(value)) => {
                Expression::StringName(self.allocator.global_string(value))
            }
            ExpressionKind::This => Expression::Variable(self.lookup("this")?),
            ExpressionKind::Variable(name) => Expression::Variable(self.lookup(name)?),
            ExpressionKind::ClassMember {
                class_name,
                member_name,
                ..
            } => {
                let function_name = self.function_name_of(class_name, member_name)?;
                self.closure(function_name, Expression::ZERO, out)
            }
            ExpressionKind::TupleConstructor(elements) => {
                let elements = self.lower_all(elements, out)?;
                self.construct(elements, out)
            }
            ExpressionKind::ObjectConstructor(fields) => {
                let mut elements = BTreeMap::new();
                for field in fields {
                    elements.insert(field.order, self.lower(&field.expression, out)?);
                }
                self.construct(elements.into_values().collect(), out)
            }
            ExpressionKind::VariantConstructor { tag_order, data, .. } => {
                let data = self.lower(data, out)?;
                self.construct(vec![Expression::IntLiteral(*tag_order as i64), data], out)
            }
            ExpressionKind::FieldAccess {
                expression,
                field_order,
                ..
            } => Expression::index(self.lower(expression, out)?, *field_order),
            ExpressionKind::MethodAccess {
                expression,
                method_name,
                ..
            } => {
                let function_name = self.method_name(&expression.ty, method_name)?;
                let receiver = self.lower(expression, out)?;
                self.closure(function_name, receiver, out)
            }
            ExpressionKind::Unary {
                operator,
                expression,
            } => {
                let value = self.lower(expression, out)?;
                match operator {
                    UnaryOperator::Not => Expression::binary(Operator::Xor, value, Expression::ONE),
                    UnaryOperator::Negate => Expression::binary(Operator::Sub, Expression::ZERO, value),
                }
            }
            ExpressionKind::Panic(message) => {
                let message = self.lower(message, out)?;
                out.push(Statement::Throw(message));
                Expression::ZERO
            }
            ExpressionKind::BuiltinCall { function, argument } => {
                let argument = self.lower(argument, out)?;
                let builtin = match function {
                    BuiltinFunction::Println => Builtin::Println,
                    BuiltinFunction::IntToString => Builtin::IntToString,
                    BuiltinFunction::StringToInt => Builtin::StringToInt,
                };
                self.builtin_call(builtin, vec![argument], out)
            }
            ExpressionKind::FunctionApplication {
                function,
                arguments,
            } => self.lower_application(function, arguments, out)?,
            ExpressionKind::Binary {
                operator, e1, e2, ..
            } => self.lower_binary(*operator, e1, e2, out)?,
            ExpressionKind::IfElse {
                condition,
                e1,
                e2,
            } => {
                let condition = self.lower(condition, out)?;
                let result = self.temp();

                let mut s1 = Vec::new();
                let v1 = self.lower(e1, &mut s1)?;
                s1.push(Statement::Let {
                    name: result.clone(),
                    assigned: v1,
                });

                let mut s2 = Vec::new();
                let v2 = self.lower(e2, &mut s2)?;
                s2.push(Statement::Let {
                    name: result.clone(),
                    assigned: v2,
                });

                out.push(Statement::IfElse { condition, s1, s2 });
                Expression::Variable(result)
            }
            ExpressionKind::Match { matched, cases } => self.lower_match(matched, cases, out)?,
            ExpressionKind::Lambda {
                parameters,
                captured,
                body,
            } => self.lower_lambda(parameters, captured, body, out)?,
            ExpressionKind::StatementBlock(block) => self.lower_block(block, out)?,
        };

        Ok(value)
    }

    fn builtin_call(&mut self, builtin: Builtin, arguments: Vec<Expression>, out: &mut Vec<Statement>) -> Expression {
        let result = self.temp();
        out.push(Statement::BuiltinCall {
            builtin,
            arguments,
            result: result.clone(),
        });
        Expression::Variable(result)
    }

    fn lower_application(
        &mut self,
        function: &ast::Expression,
        arguments: &[ast::Expression],
        out: &mut Vec<Statement>,
    ) -> Result<Expression, InternalError> {
        let result = self.temp();

        let statement = match &function.kind {
            ExpressionKind::ClassMember {
                class_name,
                member_name,
                ..
            } => Statement::FunctionApplication {
                function_name: self.function_name_of(class_name, member_name)?,
                arguments: self.lower_all(arguments, out)?,
                result: result.clone(),
            },
            ExpressionKind::MethodAccess {
                expression,
                method_name,
                ..
            } => {
                let function_name = self.method_name(&expression.ty, method_name)?;
                let receiver = self.lower(expression, out)?;
                let mut lowered_arguments = vec![receiver];
                lowered_arguments.extend(self.lower_all(arguments, out)?);

                Statement::FunctionApplication {
                    function_name,
                    arguments: lowered_arguments,
                    result: result.clone(),
                }
            }
            _ => {
                let closure = self.lower(function, out)?;
                Statement::ClosureApplication {
                    closure,
                    arguments: self.lower_all(arguments, out)?,
                    result: result.clone(),
                }
            }
        };

        out.push(statement);
        Ok(Expression::Variable(result))
    }

    fn lower_binary(
        &mut self,
        operator: BinaryOperator,
        e1: &ast::Expression,
        e2: &ast::Expression,
        out: &mut Vec<Statement>,
    ) -> Result<Expression, InternalError> {
        let operator = match operator {
            BinaryOperator::And | BinaryOperator::Or => {
                let condition = self.lower(e1, out)?;
                let result = self.temp();

                let mut evaluated = Vec::new();
                let v2 = self.lower(e2, &mut evaluated)?;
                evaluated.push(Statement::Let {
                    name: result.clone(),
                    assigned: v2,
                });
                let short_circuit = vec![Statement::Let {
                    name: result.clone(),
                    assigned: Expression::IntLiteral((operator == BinaryOperator::Or) as i64),
                }];

                let (s1, s2) = if operator == BinaryOperator::And {
                    (evaluated, short_circuit)
                } else {
                    (short_circuit, evaluated)
                };
                out.push(Statement::IfElse { condition, s1, s2 });
                return Ok(Expression::Variable(result));
            }
            BinaryOperator::Concat => {
                let v1 = self.lower(e1, out)?;
                let v2 = self.lower(e2, out)?;
                return Ok(self.builtin_call(Builtin::StringConcat, vec![v1, v2], out));
            }
            BinaryOperator::Multiply => Operator::Mul,
            BinaryOperator::Divide => Operator::Div,
            BinaryOperator::Modulo => Operator::Mod,
            BinaryOperator::Plus => Operator::Add,
            BinaryOperator::Minus => Operator::Sub,
            BinaryOperator::LessThan => Operator::Lt,
            BinaryOperator::LessThanOrEqual => Operator::Le,
            BinaryOperator::GreaterThan => Operator::Gt,
            BinaryOperator::GreaterThanOrEqual => Operator::Ge,
            BinaryOperator::Equal => Operator::Eq,
            BinaryOperator::NotEqual => Operator::Ne,
        };

        let v1 = self.lower(e1, out)?;
        let v2 = self.lower(e2, out)?;
        Ok(Expression::binary(operator, v1, v2))
    }

    fn lower_match(
        &mut self,
        matched: &ast::Expression,
        cases: &[ast::MatchCase],
        out: &mut Vec<Statement>,
    ) -> Result<Expression, InternalError> {
        let matched = self.lower(matched, out)?;
        let Expression::Variable(variable) = self.to_variable(matched, out) else {
            return Err(internal_error!("matched value not bound to a variable"));
        };
        let result = self.temp();

        let mut tag_branches = Vec::new();
        let mut default_branch = None;

        for case in cases {
            let mut statements = Vec::new();
            self.scopes.push(HashMap::new());

            if let Some((name, _)) = &case.data_variable {
                let lowered = self.bind(name);
                statements.push(Statement::Let {
                    name: lowered,
                    assigned: Expression::index(Expression::Variable(variable.clone()), 1),
                });
            }

            let value = self.lower(&case.expression, &mut statements)?;
            statements.push(Statement::Let {
                name: result.clone(),
                assigned: value,
            });
            self.scopes.pop();

            match case.tag {
                Some(_) => tag_branches.push((case.tag_order, statements)),
                None => default_branch = Some(statements),
            }
        }

        out.push(Statement::Match {
            variable,
            tag_branches,
            default_branch,
        });
        Ok(Expression::Variable(result))
    }

    fn lower_lambda(
        &mut self,
        parameters: &[LambdaParameter],
        captured: &BTreeMap<String, Type>,
        body: &ast::Expression,
        out: &mut Vec<Statement>,
    ) -> Result<Expression, InternalError> {
        let name = format!("{}__lambda_{}", self.function_name, self.next_lambda);
        self.next_lambda += 1;

        let context = if captured.is_empty() {
            Expression::ONE
        } else {
            let values = captured
                .keys()
                .map(|captured_name| self.lookup(captured_name).map(Expression::Variable))
                .collect::<Result<Vec<_>, _>>()?;
            self.construct(values, out)
        };

        let mut nested = FunctionLowering::new(self.resolver, self.allocator, self.lambdas, name.clone());
        let mut statements = Vec::new();

        for (index, captured_name) in captured.keys().enumerate() {
            let lowered = nested.bind(captured_name);
            statements.push(Statement::Let {
                name: lowered,
                assigned: Expression::index(Expression::Variable(CONTEXT.to_string()), index),
            });
        }

        let mut lowered_parameters = vec![CONTEXT.to_string()];
        for parameter in parameters {
            lowered_parameters.push(nested.bind(&parameter.name));
        }

        let return_value = nested.lower(body, &mut statements)?;
        nested.lambdas.push(Function {
            name: name.clone(),
            parameters: lowered_parameters,
            has_return: body.ty != Type::UNIT,
            body: statements,
            return_value,
        });

        Ok(self.closure(name, context, out))
    }

    fn lower_block(&mut self, block: &StatementBlock, out: &mut Vec<Statement>) -> Result<Expression, InternalError> {
        self.scopes.push(HashMap::new());

        for statement in &block.statements {
            let assigned = self.lower(&statement.assigned, out)?;

            match &statement.pattern.kind {
                PatternKind::Variable(name) => {
                    let lowered = self.bind(name);
                    out.push(Statement::Let {
                        name: lowered,
                        assigned,
                    });
                }
                PatternKind::Tuple(names) => {
                    let record = self.to_variable(assigned, out);
                    for (index, name) in names.iter().enumerate() {
                        if let Some((name, _)) = name {
                            let lowered = self.bind(name);
                            out.push(Statement::Let {
                                name: lowered,
                                assigned: Expression::index(record.clone(), index),
                            });
                        }
                    }
                }
                PatternKind::Object(names) => {
                    let record = self.to_variable(assigned, out);
                    for name in names {
                        let lowered = self.bind(name.bound_name());
                        out.push(Statement::Let {
                            name: lowered,
                            assigned: Expression::index(record.clone(), name.field_order),
                        });
                    }
                }
                PatternKind::Wildcard => {}
            }
        }

        let value = match &block.expression {
            Some(expression) => self.lower(expression, out)?,
            None => Expression::ZERO,
        };

        self.scopes.pop();
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        errors::ErrorCollector,
        frontend::{ModuleSource, ast::UndecidedTypeCounter, parser::parse_module},
        middle::type_checking::type_check_sources,
    };

    fn lower(code: &str) -> Sources {
        let mut counter = UndecidedTypeCounter::new();
        let mut errors = ErrorCollector::new();
        let source = ModuleSource::in_memory(ModuleReference::from_dotted("Main"), code);
        let module = parse_module(&source, &mut counter, &mut errors);
        let checked = type_check_sources(
            BTreeMap::from([(source.reference.clone(), module)]),
            &mut counter,
            &mut errors,
            false,
        );
        assert!(errors.is_empty(), "{:?}", errors.errors());

        lower_sources(&checked, &source.reference, &mut ResourceAllocator::new()).unwrap()
    }

    fn function<'s>(sources: &'s Sources, name: &str) -> &'s Function {
        sources.functions.iter().find(|f| f.name == name).unwrap()
    }

    #[test]
    fn entry_function_calls_main() {
        let sources = lower(r#"class Main { function main(): unit = println("hi") }"#);
        let entry = function(&sources, ENTRY_FUNCTION_NAME);

        assert!(matches!(
            &entry.body[..],
            [Statement::FunctionApplication { function_name, .. }] if function_name == "_Main_Main_main"
        ));
        assert_eq!(sources.global_variables[0].content, "hi");
    }

    #[test]
    fn short_circuit_operators_become_branches() {
        let sources = lower("class Main { function f(a: bool, b: bool): bool = a && b }");
        let f = function(&sources, "_Main_Main_f");

        assert!(matches!(&f.body[..], [Statement::IfElse { .. }]));
        assert!(f.has_return);
    }

    #[test]
    fn lambdas_become_functions_reading_their_context() {
        let sources = lower(indoc! {"
            class Main {
                function f(x: int): (int) -> int = (y) -> x + y
            }
        "});
        let lambda = function(&sources, "_Main_Main_f__lambda_0");

        assert_eq!(lambda.parameters, vec!["_context", "_v_y"]);
        assert_eq!(
            lambda.body[0],
            Statement::Let {
                name: "_v_x".to_string(),
                assigned: Expression::index(Expression::Variable("_context".to_string()), 0)
            }
        );
    }

    #[test]
    fn shadowed_variables_get_unique_names() {
        let sources = lower("class Main { function f(): int = { val a = 1; { val a = 2; a } } }");
        let f = function(&sources, "_Main_Main_f");

        let Statement::Let { name: first, .. } = &f.body[0] else {
            panic!("expected a let");
        };
        let Statement::Let { name: second, .. } = &f.body[1] else {
            panic!("expected a let");
        };
        assert_ne!(first, second);
        assert_eq!(f.return_value, Expression::Variable(second.clone()));
    }

    #[test]
    fn object_fields_evaluated_in_source_order_and_laid_out_by_definition() {
        let sources = lower(indoc! {r#"
            class Main(val a: int, val b: int) {
                function f(): Main = { b: Main.g(2), a: Main.g(1) }
                function g(x: int): int = x
            }
        "#});
        let f = function(&sources, "_Main_Main_f");

        let [
            Statement::FunctionApplication { arguments: first, result: r1, .. },
            Statement::FunctionApplication { arguments: second, result: r2, .. },
            Statement::StructConstructor { elements, .. },
        ] = &f.body[..]
        else {
            panic!("unexpected body {:?}", f.body);
        };
        assert_eq!(first, &vec![Expression::IntLiteral(2)]);
        assert_eq!(second, &vec![Expression::IntLiteral(1)]);
        assert_eq!(
            elements,
            &vec![Expression::Variable(r2.clone()), Expression::Variable(r1.clone())]
        );
    }
}
