use std::collections::{BTreeMap, BTreeSet};

use crate::frontend::{ast::Module, location::ModuleReference};

/// Import edges between the modules of a compilation
#[derive(Debug, Default)]
pub struct DependencyTracker {
    forward: BTreeMap<ModuleReference, BTreeSet<ModuleReference>>,
    reverse: BTreeMap<ModuleReference, BTreeSet<ModuleReference>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build<'m>(modules: impl IntoIterator<Item = (&'m ModuleReference, &'m Module)>) -> Self {
        let mut tracker = Self::new();
        for (reference, module) in modules {
            tracker.update(
                reference,
                module.imports.iter().map(|import| import.imported_module.clone()),
            );
        }
        tracker
    }

    /// Replaces the imports recorded for `module`
    pub fn update(
        &mut self,
        module: &ModuleReference,
        imports: impl IntoIterator<Item = ModuleReference>,
    ) {
        if let Some(previous) = self.forward.remove(module) {
            for imported in previous {
                if let Some(importers) = self.reverse.get_mut(&imported) {
                    importers.remove(module);
                }
            }
        }

        let imports = imports.into_iter().collect::<BTreeSet<_>>();
        for imported in &imports {
            self.reverse
                .entry(imported.clone())
                .or_default()
                .insert(module.clone());
        }
        self.forward.insert(module.clone(), imports);
    }

    pub fn imports_of(&self, module: &ModuleReference) -> impl Iterator<Item = &ModuleReference> {
        self.forward.get(module).into_iter().flatten()
    }

    /// `changed` together with every module that transitively imports one
    /// of them
    pub fn modules_affected_by<'a>(
        &self,
        changed: impl IntoIterator<Item = &'a ModuleReference>,
    ) -> BTreeSet<ModuleReference> {
        let mut affected = BTreeSet::new();
        let mut stack = changed.into_iter().cloned().collect::<Vec<_>>();

        while let Some(module) = stack.pop() {
            if !affected.insert(module.clone()) {
                continue;
            }
            if let Some(importers) = self.reverse.get(&module) {
                stack.extend(importers.iter().cloned());
            }
        }

        affected
    }

    /// Every import cycle, each listed from its smallest module and closed
    /// by repeating that module
    pub fn cycles(&self) -> Vec<Vec<ModuleReference>> {
        let mut cycles = BTreeSet::new();
        let mut path = Vec::new();
        let mut finished = BTreeSet::new();

        for start in self.forward.keys() {
            self.find_cycles_from(start, &mut path, &mut finished, &mut cycles);
        }

        cycles.into_iter().collect()
    }

    fn find_cycles_from(
        &self,
        module: &ModuleReference,
        path: &mut Vec<ModuleReference>,
        finished: &mut BTreeSet<ModuleReference>,
        cycles: &mut BTreeSet<Vec<ModuleReference>>,
    ) {
        if let Some(position) = path.iter().position(|m| m == module) {
            let mut cycle = path[position..].to_vec();
            if let Some(smallest) = cycle.iter().enumerate().min_by_key(|(_, m)| *m).map(|(i, _)| i) {
                cycle.rotate_left(smallest);
            }
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            cycles.insert(cycle);
            return;
        }

        if finished.contains(module) {
            return;
        }

        path.push(module.clone());
        for imported in self.imports_of(module) {
            self.find_cycles_from(imported, path, finished, cycles);
        }
        path.pop();
        finished.insert(module.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str) -> ModuleReference {
        ModuleReference::from_dotted(name)
    }

    fn tracker(edges: &[(&str, &[&str])]) -> DependencyTracker {
        let mut tracker = DependencyTracker::new();
        for (module, imports) in edges {
            tracker.update(&reference(module), imports.iter().map(|i| reference(i)));
        }
        tracker
    }

    #[test]
    fn affected_modules_follow_reverse_edges() {
        let tracker = tracker(&[("A", &["B"]), ("B", &["C"]), ("D", &[])]);

        let affected = tracker.modules_affected_by([&reference("C")]);
        assert_eq!(
            affected.into_iter().collect::<Vec<_>>(),
            vec![reference("A"), reference("B"), reference("C")]
        );
    }

    #[test]
    fn updating_imports_removes_stale_edges() {
        let mut tracker = tracker(&[("A", &["B"])]);
        tracker.update(&reference("A"), []);

        assert_eq!(
            tracker.modules_affected_by([&reference("B")]).len(),
            1
        );
    }

    #[test]
    fn finds_import_cycles() {
        let tracker = tracker(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"]), ("D", &["A"])]);

        assert_eq!(
            tracker.cycles(),
            vec![vec![reference("A"), reference("B"), reference("C"), reference("A")]]
        );
        assert!(self::tracker(&[("A", &["B"])]).cycles().is_empty());
    }
}
