//! HIR (High-level Intermediate Representation). Classes, generics, pattern
//! matching and closures are gone: every value is a word, every compound value
//! is a heap record, and each member body is a flat list of statements that
//! preserves the evaluation order of the source.

use std::fmt;

use itertools::Itertools;
use strum::{Display, IntoStaticStr};

pub use crate::middle::allocator::GlobalVariable;

pub mod lowering;

/// Name of the function the runtime calls to start a program
pub const ENTRY_FUNCTION_NAME: &str = "_compiled_program_main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Operator {
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "&")]
    And,
    #[strum(serialize = "|")]
    Or,
    #[strum(serialize = "^")]
    Xor,
}

impl Operator {
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Operator::Add
                | Operator::Mul
                | Operator::And
                | Operator::Or
                | Operator::Xor
                | Operator::Eq
                | Operator::Ne
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge | Operator::Eq | Operator::Ne
        )
    }

    /// Evaluates the operator on two words, `None` on division by zero
    pub fn apply(self, v1: i64, v2: i64) -> Option<i64> {
        let value = match self {
            Operator::Mul => v1.wrapping_mul(v2),
            Operator::Div => {
                if v2 == 0 {
                    return None;
                }
                v1.wrapping_div(v2)
            }
            Operator::Mod => {
                if v2 == 0 {
                    return None;
                }
                v1.wrapping_rem(v2)
            }
            Operator::Add => v1.wrapping_add(v2),
            Operator::Sub => v1.wrapping_sub(v2),
            Operator::Lt => (v1 < v2) as i64,
            Operator::Le => (v1 <= v2) as i64,
            Operator::Gt => (v1 > v2) as i64,
            Operator::Ge => (v1 >= v2) as i64,
            Operator::Eq => (v1 == v2) as i64,
            Operator::Ne => (v1 != v2) as i64,
            Operator::And => v1 & v2,
            Operator::Or => v1 | v2,
            Operator::Xor => v1 ^ v2,
        };

        Some(value)
    }
}

/// Functions provided by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum Builtin {
    #[strum(serialize = "_builtin_println")]
    Println,
    #[strum(serialize = "_builtin_intToString")]
    IntToString,
    #[strum(serialize = "_builtin_stringToInt")]
    StringToInt,
    #[strum(serialize = "_builtin_stringConcat")]
    StringConcat,
    #[strum(serialize = "_builtin_throw")]
    Throw,
    #[strum(serialize = "_builtin_malloc")]
    Malloc,
}

impl Builtin {
    pub const ALL: [Builtin; 6] = [
        Builtin::Println,
        Builtin::IntToString,
        Builtin::StringToInt,
        Builtin::StringConcat,
        Builtin::Throw,
        Builtin::Malloc,
    ];

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL
            .into_iter()
            .find(|builtin| builtin.to_string() == name)
    }
}

/// Side-effect free expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    IntLiteral(i64),
    /// Pointer to the characters of a string global
    StringName(String),
    /// Address of a function
    Name(String),
    Variable(String),
    IndexAccess {
        expression: Box<Expression>,
        index: usize,
    },
    Binary {
        operator: Operator,
        e1: Box<Expression>,
        e2: Box<Expression>,
    },
}

impl Expression {
    pub const ZERO: Expression = Expression::IntLiteral(0);
    pub const ONE: Expression = Expression::IntLiteral(1);

    pub fn binary(operator: Operator, e1: Expression, e2: Expression) -> Self {
        Expression::Binary {
            operator,
            e1: Box::new(e1),
            e2: Box::new(e2),
        }
    }

    pub fn index(expression: Expression, index: usize) -> Self {
        Expression::IndexAccess {
            expression: Box::new(expression),
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Direct call of a known function
    FunctionApplication {
        function_name: String,
        arguments: Vec<Expression>,
        result: String,
    },
    /// Call through a `[function, context]` record
    ClosureApplication {
        closure: Expression,
        arguments: Vec<Expression>,
        result: String,
    },
    BuiltinCall {
        builtin: Builtin,
        arguments: Vec<Expression>,
        result: String,
    },
    IfElse {
        condition: Expression,
        s1: Vec<Statement>,
        s2: Vec<Statement>,
    },
    /// Branches on the tag word of the variant held by `variable`
    Match {
        variable: String,
        tag_branches: Vec<(usize, Vec<Statement>)>,
        default_branch: Option<Vec<Statement>>,
    },
    Let {
        name: String,
        assigned: Expression,
    },
    /// Allocates a record of words
    StructConstructor {
        name: String,
        elements: Vec<Expression>,
    },
    ClosureConstructor {
        name: String,
        function_name: String,
        context: Expression,
    },
    Throw(Expression),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<String>,
    /// Whether the value returned is meaningful, false for unit functions
    pub has_return: bool,
    pub body: Vec<Statement>,
    pub return_value: Expression,
}

/// Every function of a program together with its string constants
#[derive(Debug, Clone, Default)]
pub struct Sources {
    pub global_variables: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::IntLiteral(value) => write!(f, "{value}"),
            Expression::StringName(name) | Expression::Name(name) => write!(f, "{name}"),
            Expression::Variable(name) => f.write_str(name),
            Expression::IndexAccess { expression, index } => write!(f, "{expression}[{index}]"),
            Expression::Binary { operator, e1, e2 } => write!(f, "({e1} {operator} {e2})"),
        }
    }
}

impl Statement {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);

        match self {
            Statement::FunctionApplication {
                function_name,
                arguments,
                result,
            } => writeln!(f, "{pad}let {result} = {function_name}({});", arguments.iter().join(", ")),
            Statement::ClosureApplication {
                closure,
                arguments,
                result,
            } => writeln!(f, "{pad}let {result} = {closure}.call({});", arguments.iter().join(", ")),
            Statement::BuiltinCall {
                builtin,
                arguments,
                result,
            } => writeln!(f, "{pad}let {result} = {builtin}({});", arguments.iter().join(", ")),
            Statement::IfElse { condition, s1, s2 } => {
                writeln!(f, "{pad}if {condition} {{")?;
                s1.iter().try_for_each(|s| s.fmt_indented(f, indent + 1))?;
                writeln!(f, "{pad}}} else {{")?;
                s2.iter().try_for_each(|s| s.fmt_indented(f, indent + 1))?;
                writeln!(f, "{pad}}}")
            }
            Statement::Match {
                variable,
                tag_branches,
                default_branch,
            } => {
                writeln!(f, "{pad}match {variable}[0] {{")?;
                for (tag, statements) in tag_branches {
                    writeln!(f, "{pad}  case {tag} {{")?;
                    statements.iter().try_for_each(|s| s.fmt_indented(f, indent + 2))?;
                    writeln!(f, "{pad}  }}")?;
                }
                if let Some(statements) = default_branch {
                    writeln!(f, "{pad}  default {{")?;
                    statements.iter().try_for_each(|s| s.fmt_indented(f, indent + 2))?;
                    writeln!(f, "{pad}  }}")?;
                }
                writeln!(f, "{pad}}}")
            }
            Statement::Let { name, assigned } => writeln!(f, "{pad}let {name} = {assigned};"),
            Statement::StructConstructor { name, elements } => {
                writeln!(f, "{pad}let {name} = [{}];", elements.iter().join(", "))
            }
            Statement::ClosureConstructor {
                name,
                function_name,
                context,
            } => writeln!(f, "{pad}let {name} = Closure {{ fun: {function_name}, context: {context} }};"),
            Statement::Throw(expression) => writeln!(f, "{pad}throw {expression};"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}({}) {{", self.name, self.parameters.iter().join(", "))?;
        for statement in &self.body {
            statement.fmt_indented(f, 1)?;
        }
        if self.has_return {
            writeln!(f, "  return {};", self.return_value)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in &self.global_variables {
            writeln!(f, "const {} = {:?};", global.name, global.content)?;
        }
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}
