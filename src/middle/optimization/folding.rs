use crate::middle::mir::{Expression, Operator, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldingOptions {
    pub constants: bool,
    pub algebra: bool,
}

/// Folds an expression bottom up. Arithmetic wraps at 64 bits and division
/// by zero is left for the program to fail on.
pub fn fold_expression(expression: &Expression, options: FoldingOptions) -> Expression {
    match expression {
        Expression::Constant(_) | Expression::Name(_) | Expression::Temporary(_) => {
            expression.clone()
        }
        Expression::Mem(address) => Expression::mem(fold_expression(address, options)),
        Expression::Binary { operator, e1, e2 } => fold_binary(
            *operator,
            fold_expression(e1, options),
            fold_expression(e2, options),
            options,
        ),
    }
}

/// Whether evaluating the expression may trap on a zero divisor
fn may_trap(expression: &Expression) -> bool {
    match expression {
        Expression::Constant(_) | Expression::Name(_) | Expression::Temporary(_) => false,
        Expression::Mem(address) => may_trap(address),
        Expression::Binary { operator, e1, e2 } => {
            matches!(operator, Operator::Div | Operator::Mod) || may_trap(e1) || may_trap(e2)
        }
    }
}

fn fold_binary(
    operator: Operator,
    e1: Expression,
    e2: Expression,
    options: FoldingOptions,
) -> Expression {
    if options.constants {
        if let (Expression::Constant(v1), Expression::Constant(v2)) = (&e1, &e2) {
            if let Some(value) = operator.apply(*v1, *v2) {
                return Expression::Constant(value);
            }
        }
    }

    if !options.algebra {
        return Expression::binary(operator, e1, e2);
    }

    match (operator, e1, e2) {
        (Operator::Add | Operator::Sub | Operator::Xor | Operator::Or, e1, Expression::Constant(0)) => {
            e1
        }
        (Operator::Mul | Operator::Div, e1, Expression::Constant(1)) => e1,
        (Operator::Mul | Operator::And, e1, Expression::Constant(0)) if !may_trap(&e1) => {
            Expression::ZERO
        }
        (Operator::Mod, e1, Expression::Constant(1 | -1)) if !may_trap(&e1) => Expression::ZERO,
        (
            Operator::Add,
            Expression::Binary {
                operator: Operator::Add,
                e1: inner,
                e2: constant,
            },
            Expression::Constant(c2),
        ) => match *constant {
            Expression::Constant(c1) => fold_binary(
                Operator::Add,
                *inner,
                Expression::Constant(c1.wrapping_add(c2)),
                options,
            ),
            constant => Expression::binary(
                Operator::Add,
                Expression::binary(Operator::Add, *inner, constant),
                Expression::Constant(c2),
            ),
        },
        (operator, e1, e2) => Expression::binary(operator, e1, e2),
    }
}

/// Folds every expression of a statement and resolves conditional jumps on
/// constants. Returns `None` when the statement disappears.
pub fn fold_statement(statement: &Statement, options: FoldingOptions) -> Option<Statement> {
    let folded = statement.map_expressions(&mut |expression| fold_expression(expression, options));

    match folded {
        Statement::ConditionalJumpFallThrough {
            condition: Expression::Constant(value),
            label,
        } if options.constants => {
            if value == 0 {
                None
            } else {
                Some(Statement::Jump(label))
            }
        }
        folded => Some(folded),
    }
}

/// Returns whether anything changed
pub fn fold_function(body: &mut Vec<Statement>, options: FoldingOptions) -> bool {
    let folded = body
        .iter()
        .filter_map(|statement| fold_statement(statement, options))
        .collect::<Vec<_>>();
    let changed = folded != *body;
    *body = folded;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: FoldingOptions = FoldingOptions {
        constants: true,
        algebra: true,
    };

    fn temp(name: &str) -> Expression {
        Expression::temporary(name)
    }

    fn binary(operator: Operator, e1: Expression, e2: Expression) -> Expression {
        Expression::binary(operator, e1, e2)
    }

    #[test]
    fn constants_fold_with_wrapping() {
        let sum = binary(Operator::Add, Expression::Constant(i64::MAX), Expression::ONE);
        assert_eq!(fold_expression(&sum, ALL), Expression::Constant(i64::MIN));

        let division = binary(Operator::Div, Expression::ONE, Expression::ZERO);
        assert_eq!(fold_expression(&division, ALL), division);
    }

    #[test]
    fn algebraic_identities_and_reassociation() {
        let x = temp("x");
        assert_eq!(fold_expression(&binary(Operator::Mul, x.clone(), Expression::ONE), ALL), x);
        assert_eq!(
            fold_expression(&binary(Operator::Mul, x.clone(), Expression::ZERO), ALL),
            Expression::ZERO
        );
        assert_eq!(
            fold_expression(&binary(Operator::Mod, x.clone(), Expression::ONE), ALL),
            Expression::ZERO
        );

        let nested = binary(
            Operator::Add,
            binary(Operator::Add, x.clone(), Expression::Constant(2)),
            Expression::Constant(3),
        );
        let folded = fold_expression(&nested, ALL);
        assert_eq!(folded, binary(Operator::Add, x.clone(), Expression::Constant(5)));
        assert_eq!(fold_expression(&folded, ALL), folded);

        let cancelled = binary(
            Operator::Add,
            binary(Operator::Add, x.clone(), Expression::Constant(2)),
            Expression::Constant(-2),
        );
        assert_eq!(fold_expression(&cancelled, ALL), x);
    }

    #[test]
    fn annihilation_keeps_operands_that_can_trap() {
        let quotient = binary(Operator::Div, Expression::ONE, temp("z"));
        let product = binary(Operator::Mul, quotient.clone(), Expression::ZERO);
        assert_eq!(fold_expression(&product, ALL), product);

        let masked = binary(Operator::And, binary(Operator::Mod, temp("x"), temp("z")), Expression::ZERO);
        assert_eq!(fold_expression(&masked, ALL), masked);

        let remainder = binary(Operator::Mod, quotient, Expression::ONE);
        assert_eq!(fold_expression(&remainder, ALL), remainder);

        let safe = binary(Operator::Mul, binary(Operator::Add, temp("x"), Expression::ONE), Expression::ZERO);
        assert_eq!(fold_expression(&safe, ALL), Expression::ZERO);
    }

    #[test]
    fn constant_conditions_resolve_jumps() {
        let taken = Statement::ConditionalJumpFallThrough {
            condition: binary(Operator::Lt, Expression::ONE, Expression::Constant(2)),
            label: "l".into(),
        };
        assert_eq!(fold_statement(&taken, ALL), Some(Statement::Jump("l".into())));

        let skipped = Statement::ConditionalJumpFallThrough {
            condition: Expression::ZERO,
            label: "l".into(),
        };
        assert_eq!(fold_statement(&skipped, ALL), None);
    }
}
