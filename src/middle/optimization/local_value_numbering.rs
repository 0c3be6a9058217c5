use hashbrown::HashMap;

use crate::middle::mir::{Expression, Operator, Statement};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Operand {
    Constant(i64),
    Name(String),
    Value(usize),
}

type Key = (Operator, Operand, Operand);

/// Value numbers of one basic block
#[derive(Default)]
struct ValueTable {
    next_value: usize,
    /// Current value number of every temporary seen in the block
    values: HashMap<String, usize>,
    keys: HashMap<Key, usize>,
    /// A temporary currently holding each value
    holders: HashMap<usize, String>,
}

impl ValueTable {
    fn fresh(&mut self) -> usize {
        self.next_value += 1;
        self.next_value
    }

    fn value_of_temporary(&mut self, name: &str) -> usize {
        if let Some(value) = self.values.get(name) {
            return *value;
        }
        let value = self.fresh();
        self.values.insert(name.to_string(), value);
        self.holders.insert(value, name.to_string());
        value
    }

    /// Numbers a memory free expression
    fn operand(&mut self, expression: &Expression) -> Option<Operand> {
        match expression {
            Expression::Constant(value) => Some(Operand::Constant(*value)),
            Expression::Name(name) => Some(Operand::Name(name.clone())),
            Expression::Temporary(name) => Some(Operand::Value(self.value_of_temporary(name))),
            Expression::Mem(_) => None,
            Expression::Binary { operator, e1, e2 } => {
                let mut o1 = self.operand(e1)?;
                let mut o2 = self.operand(e2)?;
                if operator.is_commutative() && o1 > o2 {
                    std::mem::swap(&mut o1, &mut o2);
                }

                let key = (*operator, o1, o2);
                let value = match self.keys.get(&key) {
                    Some(value) => *value,
                    None => {
                        let value = self.fresh();
                        self.keys.insert(key, value);
                        value
                    }
                };
                Some(Operand::Value(value))
            }
        }
    }

    fn holder(&self, value: usize) -> Option<&String> {
        self.holders
            .get(&value)
            .filter(|holder| self.values.get(holder.as_str()) == Some(&value))
    }

    fn define(&mut self, temporary: &str, value: usize) {
        if let Some(previous) = self.values.get(temporary).copied() {
            if self.holders.get(&previous).map(String::as_str) == Some(temporary) {
                self.holders.remove(&previous);
            }
        }
        self.values.insert(temporary.to_string(), value);
        self.holders
            .entry(value)
            .or_insert_with(|| temporary.to_string());
    }

    fn statement(&mut self, statement: Statement) -> Statement {
        match statement {
            Statement::MoveTemp { temporary, source } => {
                let numbered = match &source {
                    Expression::Binary { .. } | Expression::Temporary(_) => self.operand(&source),
                    _ => None,
                };

                match numbered {
                    Some(Operand::Value(value)) => {
                        let source = match (&source, self.holder(value)) {
                            (Expression::Binary { .. }, Some(holder)) if *holder != temporary => {
                                Expression::temporary(holder.clone())
                            }
                            _ => source,
                        };
                        self.define(&temporary, value);
                        Statement::MoveTemp { temporary, source }
                    }
                    _ => {
                        let value = self.fresh();
                        self.define(&temporary, value);
                        Statement::MoveTemp { temporary, source }
                    }
                }
            }
            statement => {
                if let Some(defined) = statement.defined_temporary() {
                    let value = self.fresh();
                    self.define(defined, value);
                }
                statement
            }
        }
    }
}

/// Reuses values already computed earlier in the same basic block.
/// Commutative operands are keyed in a canonical order. Returns whether
/// anything changed.
pub fn number_values(body: &mut Vec<Statement>) -> bool {
    let mut table = ValueTable::default();
    let mut numbered = Vec::with_capacity(body.len());

    for statement in body.iter().cloned() {
        if matches!(statement, Statement::Label(_)) {
            table = ValueTable::default();
        }
        let ends_block = statement.is_terminator();
        numbered.push(table.statement(statement));
        if ends_block {
            table = ValueTable::default();
        }
    }

    let changed = numbered != *body;
    *body = numbered;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp(name: &str) -> Expression {
        Expression::temporary(name)
    }

    #[test]
    fn repeated_computations_reuse_the_first_holder() {
        let mut body = vec![
            Statement::move_temp("x", Expression::binary(Operator::Add, temp("a"), temp("b"))),
            Statement::move_temp("c", temp("a")),
            Statement::move_temp("y", Expression::binary(Operator::Add, temp("b"), temp("c"))),
            Statement::Return(temp("y")),
        ];

        assert!(number_values(&mut body));
        assert_eq!(body[2], Statement::move_temp("y", temp("x")));
    }

    #[test]
    fn redefined_holders_are_not_reused() {
        let mut body = vec![
            Statement::move_temp("x", Expression::binary(Operator::Mul, temp("a"), temp("b"))),
            Statement::move_temp("x", Expression::ZERO),
            Statement::move_temp("y", Expression::binary(Operator::Mul, temp("a"), temp("b"))),
            Statement::Return(temp("y")),
        ];

        assert!(!number_values(&mut body));
    }

    #[test]
    fn blocks_do_not_share_values() {
        let mut body = vec![
            Statement::move_temp("x", Expression::binary(Operator::Add, temp("a"), temp("b"))),
            Statement::Label("next".into()),
            Statement::move_temp("y", Expression::binary(Operator::Add, temp("a"), temp("b"))),
            Statement::Return(temp("y")),
        ];

        assert!(!number_values(&mut body));
    }
}
