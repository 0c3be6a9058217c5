//! MIR (Mid-level Intermediate Representation). Expressions are pure trees of
//! words, control flow is made of labels and jumps and every call is its own
//! statement. Conditional jumps have a single target and fall through
//! otherwise, the form the code generator consumes.
//!
//! Lowering from HIR goes through [`tree`], where calls and statement
//! sequences may still nest inside expressions, and through
//! [`LoweredStatement`], which is canonical except that conditional jumps
//! still name both targets until blocks are ordered.

use std::fmt;

use itertools::Itertools;

pub use crate::middle::{allocator::GlobalVariable, hir::Operator};

pub mod canonicalize;
pub mod generation;
pub mod interpreter;
pub mod pretty_print;
pub mod simplify;
pub mod tail_recursion;
pub mod trace;
pub mod tree;

/// Canonical expressions. The derived order ranks the variants in
/// declaration order and is used to normalize commutative operators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expression {
    Constant(i64),
    Name(String),
    Temporary(String),
    Mem(Box<Expression>),
    Binary {
        operator: Operator,
        e1: Box<Expression>,
        e2: Box<Expression>,
    },
}

impl Expression {
    pub const ZERO: Expression = Expression::Constant(0);
    pub const ONE: Expression = Expression::Constant(1);

    pub fn temporary(name: impl Into<String>) -> Self {
        Expression::Temporary(name.into())
    }

    pub fn mem(address: Expression) -> Self {
        Expression::Mem(Box::new(address))
    }

    /// Builds a binary expression with `x - c` rewritten to `x + (-c)` and
    /// the larger operand of a commutative operator placed first
    pub fn binary(operator: Operator, e1: Expression, e2: Expression) -> Self {
        match (operator, e2) {
            (Operator::Sub, Expression::Constant(c)) if c != i64::MIN => {
                Expression::binary(Operator::Add, e1, Expression::Constant(-c))
            }
            (operator, e2) if operator.is_commutative() && e1 < e2 => Expression::Binary {
                operator,
                e1: Box::new(e2),
                e2: Box::new(e1),
            },
            (operator, e2) => Expression::Binary {
                operator,
                e1: Box::new(e1),
                e2: Box::new(e2),
            },
        }
    }

    /// Address of word `index` of the record at `base`
    pub fn word_address(base: Expression, index: usize) -> Self {
        if index == 0 {
            base
        } else {
            Expression::binary(Operator::Add, base, Expression::Constant(8 * index as i64))
        }
    }

    /// Temporaries read by the expression
    pub fn collect_temporaries<'a>(&'a self, found: &mut Vec<&'a str>) {
        match self {
            Expression::Constant(_) | Expression::Name(_) => {}
            Expression::Temporary(name) => found.push(name),
            Expression::Mem(address) => address.collect_temporaries(found),
            Expression::Binary { e1, e2, .. } => {
                e1.collect_temporaries(found);
                e2.collect_temporaries(found);
            }
        }
    }

    pub fn uses_temporary(&self, temporary: &str) -> bool {
        match self {
            Expression::Constant(_) | Expression::Name(_) => false,
            Expression::Temporary(name) => name == temporary,
            Expression::Mem(address) => address.uses_temporary(temporary),
            Expression::Binary { e1, e2, .. } => {
                e1.uses_temporary(temporary) || e2.uses_temporary(temporary)
            }
        }
    }

    pub fn reads_memory(&self) -> bool {
        match self {
            Expression::Constant(_) | Expression::Name(_) | Expression::Temporary(_) => false,
            Expression::Mem(_) => true,
            Expression::Binary { e1, e2, .. } => e1.reads_memory() || e2.reads_memory(),
        }
    }

    /// Rewrites every temporary through `rename`
    pub fn map_temporaries(&self, rename: &mut impl FnMut(&str) -> Expression) -> Expression {
        match self {
            Expression::Constant(_) | Expression::Name(_) => self.clone(),
            Expression::Temporary(name) => rename(name),
            Expression::Mem(address) => Expression::mem(address.map_temporaries(rename)),
            Expression::Binary { operator, e1, e2 } => Expression::binary(
                *operator,
                e1.map_temporaries(rename),
                e2.map_temporaries(rename),
            ),
        }
    }

    /// Negation of a boolean condition
    pub fn invert_condition(self) -> Expression {
        match self {
            Expression::Binary { operator, e1, e2 } => {
                let inverted = match operator {
                    Operator::Lt => Some(Operator::Ge),
                    Operator::Ge => Some(Operator::Lt),
                    Operator::Le => Some(Operator::Gt),
                    Operator::Gt => Some(Operator::Le),
                    Operator::Eq => Some(Operator::Ne),
                    Operator::Ne => Some(Operator::Eq),
                    _ => None,
                };

                match inverted {
                    Some(operator) => Expression::binary(operator, *e1, *e2),
                    None => Expression::binary(
                        Operator::Xor,
                        Expression::Binary { operator, e1, e2 },
                        Expression::ONE,
                    ),
                }
            }
            Expression::Constant(value) => Expression::Constant((value == 0) as i64),
            other => Expression::binary(Operator::Xor, other, Expression::ONE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    MoveTemp {
        temporary: String,
        source: Expression,
    },
    /// Stores `source` at the address computed by `target`
    MoveMem {
        target: Expression,
        source: Expression,
    },
    Call {
        function: Expression,
        arguments: Vec<Expression>,
        return_collector: Option<String>,
    },
    Jump(String),
    Label(String),
    /// Jumps to `label` when `condition` is non-zero, falls through otherwise
    ConditionalJumpFallThrough {
        condition: Expression,
        label: String,
    },
    Return(Expression),
}

impl Statement {
    pub fn move_temp(temporary: impl Into<String>, source: Expression) -> Self {
        Statement::MoveTemp {
            temporary: temporary.into(),
            source,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Statement::Jump(_) | Statement::ConditionalJumpFallThrough { .. } | Statement::Return(_)
        )
    }

    /// Temporary written by the statement
    pub fn defined_temporary(&self) -> Option<&str> {
        match self {
            Statement::MoveTemp { temporary, .. } => Some(temporary),
            Statement::Call {
                return_collector, ..
            } => return_collector.as_deref(),
            _ => None,
        }
    }

    /// Expressions evaluated by the statement
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            Statement::MoveTemp { source, .. } => vec![source],
            Statement::MoveMem { target, source } => vec![target, source],
            Statement::Call {
                function,
                arguments,
                ..
            } => std::iter::once(function).chain(arguments).collect(),
            Statement::Jump(_) | Statement::Label(_) => Vec::new(),
            Statement::ConditionalJumpFallThrough { condition, .. } => vec![condition],
            Statement::Return(value) => vec![value],
        }
    }

    pub fn used_temporaries(&self) -> Vec<&str> {
        let mut found = Vec::new();
        for expression in self.expressions() {
            expression.collect_temporaries(&mut found);
        }
        found
    }

    /// Rewrites every expression of the statement through `rewrite`
    pub fn map_expressions(&self, rewrite: &mut impl FnMut(&Expression) -> Expression) -> Statement {
        match self {
            Statement::MoveTemp { temporary, source } => Statement::MoveTemp {
                temporary: temporary.clone(),
                source: rewrite(source),
            },
            Statement::MoveMem { target, source } => Statement::MoveMem {
                target: rewrite(target),
                source: rewrite(source),
            },
            Statement::Call {
                function,
                arguments,
                return_collector,
            } => Statement::Call {
                function: rewrite(function),
                arguments: arguments.iter().map(|a| rewrite(a)).collect(),
                return_collector: return_collector.clone(),
            },
            Statement::Jump(_) | Statement::Label(_) => self.clone(),
            Statement::ConditionalJumpFallThrough { condition, label } => {
                Statement::ConditionalJumpFallThrough {
                    condition: rewrite(condition),
                    label: label.clone(),
                }
            }
            Statement::Return(value) => Statement::Return(rewrite(value)),
        }
    }
}

/// Canonical statements plus conditional jumps naming both targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoweredStatement {
    Canonical(Statement),
    ConditionalJump {
        condition: Expression,
        true_label: String,
        false_label: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sources {
    pub global_variables: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
}

impl Sources {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant(value) => write!(f, "{value}"),
            Expression::Name(name) | Expression::Temporary(name) => f.write_str(name),
            Expression::Mem(address) => write!(f, "MEM[{address}]"),
            Expression::Binary { operator, e1, e2 } => write!(f, "({e1} {operator} {e2})"),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::MoveTemp { temporary, source } => write!(f, "{temporary} = {source};"),
            Statement::MoveMem { target, source } => write!(f, "MEM[{target}] = {source};"),
            Statement::Call {
                function,
                arguments,
                return_collector,
            } => {
                if let Some(collector) = return_collector {
                    write!(f, "{collector} = ")?;
                }
                write!(f, "{function}({});", arguments.iter().join(", "))
            }
            Statement::Jump(label) => write!(f, "goto {label};"),
            Statement::Label(label) => write!(f, "{label}:"),
            Statement::ConditionalJumpFallThrough { condition, label } => {
                write!(f, "if ({condition}) goto {label};")
            }
            Statement::Return(value) => write!(f, "return {value};"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}({}) {{", self.name, self.arguments.iter().join(", "))?;
        for statement in &self.body {
            let indent = if let Statement::Label(_) = statement { "" } else { "  " };
            writeln!(f, "{indent}{statement}")?;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn temp(name: &str) -> Expression {
        Expression::temporary(name)
    }

    #[test]
    fn subtraction_of_constant_becomes_addition() {
        assert_eq!(
            Expression::binary(Operator::Sub, temp("x"), Expression::Constant(3)),
            Expression::binary(Operator::Add, temp("x"), Expression::Constant(-3))
        );
        assert_eq!(
            Expression::binary(Operator::Sub, temp("x"), Expression::Constant(i64::MIN)).to_string(),
            "(x - -9223372036854775808)"
        );
    }

    #[test]
    fn commutative_operands_are_ordered() {
        let a = Expression::binary(Operator::Add, Expression::Constant(1), temp("x"));
        let b = Expression::binary(Operator::Add, temp("x"), Expression::Constant(1));

        assert_eq!(a, b);
        assert_eq!(a.to_string(), "(x + 1)");
        assert_eq!(
            Expression::binary(Operator::Lt, Expression::Constant(1), temp("x")).to_string(),
            "(1 < x)"
        );
    }

    #[test]
    fn conditions_invert_syntactically() {
        let lt = Expression::binary(Operator::Lt, temp("a"), temp("b"));
        assert_eq!(lt.invert_condition().to_string(), "(a >= b)");
        assert_eq!(temp("c").invert_condition().to_string(), "(c ^ 1)");
    }
}
