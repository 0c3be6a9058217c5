//! Pre-canonical MIR, where calls and statement sequences may appear inside
//! expressions

use crate::middle::hir::Operator;

#[derive(Debug, Clone, PartialEq, Eq)]
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
    Call {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    /// Runs the statements, then evaluates to the expression
    Sequence {
        statements: Vec<Statement>,
        expression: Box<Expression>,
    },
}

impl Expression {
    pub fn binary(operator: Operator, e1: Expression, e2: Expression) -> Self {
        Expression::Binary {
            operator,
            e1: Box::new(e1),
            e2: Box::new(e2),
        }
    }

    pub fn mem(address: Expression) -> Self {
        Expression::Mem(Box::new(address))
    }

    pub fn call(function: Expression, arguments: Vec<Expression>) -> Self {
        Expression::Call {
            function: Box::new(function),
            arguments,
        }
    }

    /// Whether evaluating the expression may run statements or calls
    pub fn has_effects(&self) -> bool {
        match self {
            Expression::Constant(_) | Expression::Name(_) | Expression::Temporary(_) => false,
            Expression::Mem(address) => address.has_effects(),
            Expression::Binary { e1, e2, .. } => e1.has_effects() || e2.has_effects(),
            Expression::Call { .. } | Expression::Sequence { .. } => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    MoveTemp {
        temporary: String,
        source: Expression,
    },
    MoveMem {
        target: Expression,
        source: Expression,
    },
    /// Evaluates an expression for its effects only
    Expression(Expression),
    Jump(String),
    Label(String),
    ConditionalJump {
        condition: Expression,
        true_label: String,
        false_label: String,
    },
    Return(Expression),
    Sequence(Vec<Statement>),
}
