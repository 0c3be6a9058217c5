use std::{collections::BTreeMap, fmt};

use hashbrown::HashMap;
use itertools::Itertools;
use strum::Display;

use crate::frontend::location::{ModuleReference, Range};

/// Index of a type variable introduced during inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UndecidedTypeId(u32);

impl fmt::Display for UndecidedTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveType {
    Unit,
    Bool,
    Int,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(PrimitiveType),
    Identifier {
        name: String,
        type_arguments: Vec<Type>,
    },
    Tuple(Vec<Type>),
    Function {
        argument_types: Vec<Type>,
        return_type: Box<Type>,
    },
    Undecided(UndecidedTypeId),
}

impl Type {
    pub const UNIT: Type = Type::Primitive(PrimitiveType::Unit);
    pub const BOOL: Type = Type::Primitive(PrimitiveType::Bool);
    pub const INT: Type = Type::Primitive(PrimitiveType::Int);
    pub const STRING: Type = Type::Primitive(PrimitiveType::String);

    pub fn identifier(name: impl Into<String>, type_arguments: Vec<Type>) -> Self {
        Type::Identifier {
            name: name.into(),
            type_arguments,
        }
    }

    pub fn function(argument_types: Vec<Type>, return_type: Type) -> Self {
        Type::Function {
            argument_types,
            return_type: Box::new(return_type),
        }
    }

    pub fn contains_undecided(&self) -> bool {
        match self {
            Type::Primitive(_) => false,
            Type::Undecided(_) => true,
            Type::Identifier { type_arguments, .. } => {
                type_arguments.iter().any(Type::contains_undecided)
            }
            Type::Tuple(elements) => elements.iter().any(Type::contains_undecided),
            Type::Function {
                argument_types,
                return_type,
            } => {
                argument_types.iter().any(Type::contains_undecided)
                    || return_type.contains_undecided()
            }
        }
    }

    /// Replaces identifier types naming a key of `mapping` with its value
    pub fn substitute(&self, mapping: &HashMap<String, Type>) -> Type {
        match self {
            Type::Primitive(_) | Type::Undecided(_) => self.clone(),
            Type::Identifier {
                name,
                type_arguments,
            } => {
                if type_arguments.is_empty() {
                    if let Some(replacement) = mapping.get(name) {
                        return replacement.clone();
                    }
                }

                Type::Identifier {
                    name: name.clone(),
                    type_arguments: type_arguments.iter().map(|t| t.substitute(mapping)).collect(),
                }
            }
            Type::Tuple(elements) => {
                Type::Tuple(elements.iter().map(|t| t.substitute(mapping)).collect())
            }
            Type::Function {
                argument_types,
                return_type,
            } => Type::Function {
                argument_types: argument_types.iter().map(|t| t.substitute(mapping)).collect(),
                return_type: Box::new(return_type.substitute(mapping)),
            },
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Primitive(primitive) => write!(f, "{primitive}"),
            Type::Identifier {
                name,
                type_arguments,
            } if type_arguments.is_empty() => f.write_str(name),
            Type::Identifier {
                name,
                type_arguments,
            } => write!(f, "{name}<{}>", type_arguments.iter().join(", ")),
            Type::Tuple(elements) => write!(f, "[{}]", elements.iter().join(" * ")),
            Type::Function {
                argument_types,
                return_type,
            } => write!(f, "({}) -> {return_type}", argument_types.iter().join(", ")),
            Type::Undecided(_) => f.write_str("__UNDECIDED__"),
        }
    }
}

/// Issues fresh undecided types for one compilation session
#[derive(Debug, Default)]
pub struct UndecidedTypeCounter {
    next: u32,
}

impl UndecidedTypeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> Type {
        let id = UndecidedTypeId(self.next);
        self.next += 1;
        Type::Undecided(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Int(i64),
    String(String),
    Bool(bool),
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Int(_) => Type::INT,
            Literal::String(_) => Type::STRING,
            Literal::Bool(_) => Type::BOOL,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int(value) => write!(f, "{value}"),
            Literal::String(value) => write!(f, "{value:?}"),
            Literal::Bool(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    pub imports: Vec<ModuleMembersImport>,
    pub classes: Vec<ClassDefinition>,
}

/// import { A, B } from foo.bar
#[derive(Debug, Clone)]
pub struct ModuleMembersImport {
    pub range: Range,
    pub imported_members: Vec<(String, Range)>,
    pub imported_module: ModuleReference,
    pub imported_module_range: Range,
}

#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub range: Range,
    pub name: String,
    pub name_range: Range,
    pub is_public: bool,
    pub type_parameters: Vec<String>,
    pub type_definition: TypeDefinition,
    pub members: Vec<ClassMemberDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TypeDefinitionKind {
    #[strum(serialize = "object")]
    Object,
    #[strum(serialize = "variant")]
    Variant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
    pub ty: Type,
    pub is_public: bool,
}

/// Fields of an object class or tags of a variant class, in declaration order
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub range: Range,
    pub kind: TypeDefinitionKind,
    pub names: Vec<String>,
    pub mappings: HashMap<String, FieldType>,
}

impl TypeDefinition {
    pub fn empty_object(range: Range) -> Self {
        Self {
            range,
            kind: TypeDefinitionKind::Object,
            names: Vec::new(),
            mappings: HashMap::new(),
        }
    }

    pub fn order_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub name_range: Range,
    pub ty: Type,
    pub type_range: Range,
}

#[derive(Debug, Clone)]
pub struct ClassMemberDefinition {
    pub range: Range,
    pub is_public: bool,
    pub is_method: bool,
    pub name: String,
    pub name_range: Range,
    pub type_parameters: Vec<String>,
    pub parameters: Vec<Parameter>,
    pub return_type: Type,
    pub body: Expression,
}

impl ClassMemberDefinition {
    pub fn function_type(&self) -> Type {
        Type::function(
            self.parameters.iter().map(|p| p.ty.clone()).collect(),
            self.return_type.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnaryOperator {
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "-")]
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinaryOperator {
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "%")]
    Modulo,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = "<=")]
    LessThanOrEqual,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = ">=")]
    GreaterThanOrEqual,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "::")]
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "camelCase")]
pub enum BuiltinFunction {
    Println,
    IntToString,
    StringToInt,
}

impl BuiltinFunction {
    pub fn argument_type(self) -> Type {
        match self {
            BuiltinFunction::Println | BuiltinFunction::StringToInt => Type::STRING,
            BuiltinFunction::IntToString => Type::INT,
        }
    }

    pub fn return_type(self) -> Type {
        match self {
            BuiltinFunction::Println => Type::UNIT,
            BuiltinFunction::IntToString => Type::STRING,
            BuiltinFunction::StringToInt => Type::INT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub range: Range,
    pub ty: Type,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone)]
pub struct ObjectConstructorField {
    pub name: String,
    pub range: Range,
    /// Position of the field in the class definition, set by the checker
    pub order: usize,
    pub expression: Expression,
}

#[derive(Debug, Clone)]
pub struct MatchCase {
    pub range: Range,
    /// `None` for the wildcard arm `| _ -> ...`
    pub tag: Option<(String, Range)>,
    pub tag_order: usize,
    pub data_variable: Option<(String, Range)>,
    pub expression: Expression,
}

#[derive(Debug, Clone)]
pub struct LambdaParameter {
    pub name: String,
    pub range: Range,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Literal(Literal),
    This,
    Variable(String),
    ClassMember {
        class_name: String,
        class_name_range: Range,
        member_name: String,
        member_name_range: Range,
        type_arguments: Vec<Type>,
    },
    TupleConstructor(Vec<Expression>),
    ObjectConstructor(Vec<ObjectConstructorField>),
    VariantConstructor {
        tag: String,
        tag_range: Range,
        tag_order: usize,
        data: Box<Expression>,
    },
    FieldAccess {
        expression: Box<Expression>,
        field_name: String,
        field_range: Range,
        field_order: usize,
    },
    MethodAccess {
        expression: Box<Expression>,
        method_name: String,
        method_range: Range,
    },
    Unary {
        operator: UnaryOperator,
        expression: Box<Expression>,
    },
    Panic(Box<Expression>),
    BuiltinCall {
        function: BuiltinFunction,
        argument: Box<Expression>,
    },
    FunctionApplication {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        operator_range: Range,
        e1: Box<Expression>,
        e2: Box<Expression>,
    },
    IfElse {
        condition: Box<Expression>,
        e1: Box<Expression>,
        e2: Box<Expression>,
    },
    Match {
        matched: Box<Expression>,
        cases: Vec<MatchCase>,
    },
    Lambda {
        parameters: Vec<LambdaParameter>,
        /// Names read from enclosing scopes, set by the checker
        captured: BTreeMap<String, Type>,
        body: Box<Expression>,
    },
    StatementBlock(Box<StatementBlock>),
}

impl Expression {
    pub fn new(range: Range, ty: Type, kind: ExpressionKind) -> Self {
        Self { range, ty, kind }
    }

    /// Visits `self` and every nested expression in pre-order
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expression)) {
        visit(self);

        match &self.kind {
            ExpressionKind::Literal(_)
            | ExpressionKind::This
            | ExpressionKind::Variable(_)
            | ExpressionKind::ClassMember { .. } => {}
            ExpressionKind::TupleConstructor(elements) => {
                elements.iter().for_each(|e| e.walk(visit))
            }
            ExpressionKind::ObjectConstructor(fields) => {
                fields.iter().for_each(|f| f.expression.walk(visit))
            }
            ExpressionKind::VariantConstructor { data, .. } => data.walk(visit),
            ExpressionKind::FieldAccess { expression, .. }
            | ExpressionKind::MethodAccess { expression, .. }
            | ExpressionKind::Unary { expression, .. }
            | ExpressionKind::Panic(expression)
            | ExpressionKind::BuiltinCall {
                argument: expression,
                ..
            } => expression.walk(visit),
            ExpressionKind::FunctionApplication {
                function,
                arguments,
            } => {
                function.walk(visit);
                arguments.iter().for_each(|e| e.walk(visit));
            }
            ExpressionKind::Binary { e1, e2, .. } => {
                e1.walk(visit);
                e2.walk(visit);
            }
            ExpressionKind::IfElse {
                condition,
                e1,
                e2,
            } => {
                condition.walk(visit);
                e1.walk(visit);
                e2.walk(visit);
            }
            ExpressionKind::Match { matched, cases } => {
                matched.walk(visit);
                cases.iter().for_each(|c| c.expression.walk(visit));
            }
            ExpressionKind::Lambda { body, .. } => body.walk(visit),
            ExpressionKind::StatementBlock(block) => {
                for statement in &block.statements {
                    statement.assigned.walk(visit);
                }
                if let Some(expression) = &block.expression {
                    expression.walk(visit);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatementBlock {
    pub range: Range,
    pub statements: Vec<ValStatement>,
    pub expression: Option<Expression>,
}

/// val pattern: type = assigned;
#[derive(Debug, Clone)]
pub struct ValStatement {
    pub range: Range,
    pub pattern: Pattern,
    pub type_annotation: Option<Type>,
    pub assigned: Expression,
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pub range: Range,
    pub kind: PatternKind,
}

#[derive(Debug, Clone)]
pub struct ObjectPatternName {
    pub range: Range,
    pub field_name: String,
    /// Position of the field in the class definition, set by the checker
    pub field_order: usize,
    pub alias: Option<String>,
}

impl ObjectPatternName {
    pub fn bound_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field_name)
    }
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    /// `[a, _, c]`, `None` entries are wildcards
    Tuple(Vec<Option<(String, Range)>>),
    /// `{ a, b as c }`
    Object(Vec<ObjectPatternName>),
    Variable(String),
    Wildcard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_type_equality() {
        let a = Type::function(
            vec![Type::identifier("Box", vec![Type::INT])],
            Type::Tuple(vec![Type::BOOL, Type::STRING]),
        );
        let b = Type::function(
            vec![Type::identifier("Box", vec![Type::INT])],
            Type::Tuple(vec![Type::BOOL, Type::STRING]),
        );
        let c = Type::function(
            vec![Type::identifier("Box", vec![Type::BOOL])],
            Type::Tuple(vec![Type::BOOL, Type::STRING]),
        );

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(Type::INT, Type::BOOL);
        assert_ne!(Type::identifier("A", vec![]), Type::identifier("B", vec![]));
    }

    #[test]
    fn undecided_types_compare_by_index() {
        let mut counter = UndecidedTypeCounter::new();
        let a = counter.fresh();
        let b = counter.fresh();

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(Type::Tuple(vec![Type::INT, b.clone()]).contains_undecided());

        let (Type::Undecided(first), Type::Undecided(second)) = (a, b) else {
            panic!("expected undecided types");
        };
        assert!(first < second);
        assert_eq!(second.to_string(), "_1");
    }

    #[test]
    fn types_display() {
        let ty = Type::function(
            vec![Type::identifier("Map", vec![Type::STRING, Type::INT]), Type::UNIT],
            Type::Tuple(vec![Type::INT, Type::BOOL]),
        );

        assert_eq!(ty.to_string(), "(Map<string, int>, unit) -> [int * bool]");
    }

    #[test]
    fn substitution_replaces_type_parameters() {
        let mapping = HashMap::from([("T".to_string(), Type::INT)]);
        let ty = Type::function(vec![Type::identifier("T", vec![])], Type::identifier("List", vec![Type::identifier("T", vec![])]));

        assert_eq!(
            ty.substitute(&mapping),
            Type::function(vec![Type::INT], Type::identifier("List", vec![Type::INT]))
        );
    }
}
