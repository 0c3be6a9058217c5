use hashbrown::HashMap;

use crate::frontend::ast::{Type, UndecidedTypeId};

/// Solutions found so far for undecided types
#[derive(Debug, Default)]
pub struct TypeResolution {
    bindings: HashMap<UndecidedTypeId, Type>,
}

impl TypeResolution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follows bindings until `ty` is not a bound undecided type
    fn shallow_resolve(&self, ty: &Type) -> Type {
        let mut current = ty.clone();

        while let Type::Undecided(id) = current {
            match self.bindings.get(&id) {
                Some(bound) => current = bound.clone(),
                None => break,
            }
        }

        current
    }

    /// Replaces every bound undecided type inside `ty`
    pub fn resolve(&self, ty: &Type) -> Type {
        match self.shallow_resolve(ty) {
            ty @ (Type::Primitive(_) | Type::Undecided(_)) => ty,
            Type::Identifier {
                name,
                type_arguments,
            } => Type::Identifier {
                name,
                type_arguments: type_arguments.iter().map(|t| self.resolve(t)).collect(),
            },
            Type::Tuple(elements) => Type::Tuple(elements.iter().map(|t| self.resolve(t)).collect()),
            Type::Function {
                argument_types,
                return_type,
            } => Type::Function {
                argument_types: argument_types.iter().map(|t| self.resolve(t)).collect(),
                return_type: Box::new(self.resolve(&return_type)),
            },
        }
    }

    fn occurs(&self, id: UndecidedTypeId, ty: &Type) -> bool {
        match self.shallow_resolve(ty) {
            Type::Primitive(_) => false,
            Type::Undecided(other) => other == id,
            Type::Identifier { type_arguments, .. } => {
                type_arguments.iter().any(|t| self.occurs(id, t))
            }
            Type::Tuple(elements) => elements.iter().any(|t| self.occurs(id, t)),
            Type::Function {
                argument_types,
                return_type,
            } => argument_types.iter().any(|t| self.occurs(id, t)) || self.occurs(id, &return_type),
        }
    }

    fn bind(&mut self, id: UndecidedTypeId, ty: &Type) -> Option<Type> {
        if self.occurs(id, ty) {
            return None;
        }

        let resolved = self.resolve(ty);
        self.bindings.insert(id, resolved.clone());
        Some(resolved)
    }

    /// Meets `expected` and `actual`, solving undecided types on either side.
    ///
    /// Returns `None` when the two types are structurally incompatible; any
    /// bindings made before the mismatch was found are kept.
    pub fn check_and_infer(&mut self, expected: &Type, actual: &Type) -> Option<Type> {
        let expected = self.shallow_resolve(expected);
        let actual = self.shallow_resolve(actual);

        match (&expected, &actual) {
            (Type::Undecided(e), Type::Undecided(a)) if e == a => Some(actual),
            (Type::Undecided(e), _) => self.bind(*e, &actual),
            (_, Type::Undecided(a)) => self.bind(*a, &expected),
            (Type::Primitive(e), Type::Primitive(a)) => (e == a).then_some(expected),
            (
                Type::Identifier {
                    name: expected_name,
                    type_arguments: expected_arguments,
                },
                Type::Identifier {
                    name: actual_name,
                    type_arguments: actual_arguments,
                },
            ) if expected_name == actual_name
                && expected_arguments.len() == actual_arguments.len() =>
            {
                let type_arguments = expected_arguments
                    .iter()
                    .zip(actual_arguments)
                    .map(|(e, a)| self.check_and_infer(e, a))
                    .collect::<Option<Vec<_>>>()?;

                Some(Type::Identifier {
                    name: expected_name.clone(),
                    type_arguments,
                })
            }
            (Type::Tuple(expected_elements), Type::Tuple(actual_elements))
                if expected_elements.len() == actual_elements.len() =>
            {
                expected_elements
                    .iter()
                    .zip(actual_elements)
                    .map(|(e, a)| self.check_and_infer(e, a))
                    .collect::<Option<Vec<_>>>()
                    .map(Type::Tuple)
            }
            (
                Type::Function {
                    argument_types: expected_arguments,
                    return_type: expected_return,
                },
                Type::Function {
                    argument_types: actual_arguments,
                    return_type: actual_return,
                },
            ) if expected_arguments.len() == actual_arguments.len() => {
                let argument_types = expected_arguments
                    .iter()
                    .zip(actual_arguments)
                    .map(|(e, a)| self.check_and_infer(e, a))
                    .collect::<Option<Vec<_>>>()?;
                let return_type = self.check_and_infer(expected_return, actual_return)?;

                Some(Type::function(argument_types, return_type))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::UndecidedTypeCounter;

    #[test]
    fn solves_undecided_types_on_both_sides() {
        let mut counter = UndecidedTypeCounter::new();
        let mut resolution = TypeResolution::new();
        let a = counter.fresh();
        let b = counter.fresh();

        let expected = Type::function(vec![a.clone()], Type::INT);
        let actual = Type::function(vec![Type::BOOL], b.clone());

        assert_eq!(
            resolution.check_and_infer(&expected, &actual),
            Some(Type::function(vec![Type::BOOL], Type::INT))
        );
        assert_eq!(resolution.resolve(&a), Type::BOOL);
        assert_eq!(resolution.resolve(&b), Type::INT);
    }

    #[test]
    fn chains_of_undecided_types_resolve_transitively() {
        let mut counter = UndecidedTypeCounter::new();
        let mut resolution = TypeResolution::new();
        let a = counter.fresh();
        let b = counter.fresh();

        assert!(resolution.check_and_infer(&a, &b).is_some());
        assert!(resolution.check_and_infer(&b, &Type::STRING).is_some());
        assert_eq!(resolution.resolve(&a), Type::STRING);
    }

    #[test]
    fn rejects_mismatches_and_infinite_types() {
        let mut counter = UndecidedTypeCounter::new();
        let mut resolution = TypeResolution::new();
        let a = counter.fresh();

        assert_eq!(resolution.check_and_infer(&Type::INT, &Type::STRING), None);
        assert_eq!(
            resolution.check_and_infer(&Type::Tuple(vec![Type::INT]), &Type::Tuple(vec![Type::INT, Type::INT])),
            None
        );
        assert_eq!(
            resolution.check_and_infer(&a, &Type::Tuple(vec![a.clone(), Type::INT])),
            None
        );
    }
}
