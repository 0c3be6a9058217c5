use crate::frontend::{
    ast::{Module, Type},
    location::{Position, Range},
};

/// Ranges of checked expressions with their types
#[derive(Debug, Default)]
pub struct LocationLookup {
    entries: Vec<(Range, Type)>,
}

impl LocationLookup {
    pub fn build(module: &Module) -> Self {
        let mut entries = Vec::new();

        for class in &module.classes {
            for member in &class.members {
                member.body.walk(&mut |expression| {
                    entries.push((expression.range, expression.ty.clone()));
                });
            }
        }

        Self { entries }
    }

    /// Type of the innermost expression containing `position`
    pub fn type_at(&self, position: Position) -> Option<&Type> {
        self.entries
            .iter()
            .filter(|(range, _)| range.contains_position(position))
            .reduce(|innermost, candidate| {
                if innermost.0.contains_range(&candidate.0) {
                    candidate
                } else {
                    innermost
                }
            })
            .map(|(_, ty)| ty)
    }
}
