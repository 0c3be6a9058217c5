use hashbrown::HashMap;

/// A string constant laid out in the data section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVariable {
    pub name: String,
    pub content: String,
}

/// The single source of fresh names for one compilation unit
#[derive(Debug, Default)]
pub struct ResourceAllocator {
    next_temp: u32,
    next_variable: u32,
    next_label: u32,
    next_inline_prefix: u32,
    strings: HashMap<String, String>,
    global_variables: Vec<GlobalVariable>,
}

impl ResourceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temp(&mut self) -> String {
        let name = format!("_t{}", self.next_temp);
        self.next_temp += 1;
        name
    }

    /// Temporary holding the source variable `name`
    pub fn variable(&self, name: &str) -> String {
        format!("_v_{name}")
    }

    /// Temporary for a variable that shadows an earlier one of the same name
    pub fn shadowing_variable(&mut self, name: &str) -> String {
        self.next_variable += 1;
        format!("_v{}_{name}", self.next_variable)
    }

    pub fn label(&mut self, annotation: &str) -> String {
        let name = format!("l{}_{annotation}", self.next_label);
        self.next_label += 1;
        name
    }

    /// Prefix used to alpha-rename the names of an inlined body
    pub fn inline_prefix(&mut self) -> String {
        let prefix = format!("_inl_{}_", self.next_inline_prefix);
        self.next_inline_prefix += 1;
        prefix
    }

    /// Name of the global holding `content`, shared by equal strings
    pub fn global_string(&mut self, content: &str) -> String {
        if let Some(name) = self.strings.get(content) {
            return name.clone();
        }

        let name = format!("GLOBAL_STRING_{}", self.global_variables.len());
        self.strings.insert(content.to_string(), name.clone());
        self.global_variables.push(GlobalVariable {
            name: name.clone(),
            content: content.to_string(),
        });
        name
    }

    pub fn global_variables(&self) -> &[GlobalVariable] {
        &self.global_variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_never_repeat() {
        let mut allocator = ResourceAllocator::new();

        assert_eq!(allocator.temp(), "_t0");
        assert_eq!(allocator.temp(), "_t1");
        assert_eq!(allocator.label("TRUE"), "l0_TRUE");
        assert_eq!(allocator.label("TRUE"), "l1_TRUE");
        assert_eq!(allocator.variable("a"), "_v_a");
        assert_ne!(allocator.shadowing_variable("a"), allocator.shadowing_variable("a"));
    }

    #[test]
    fn strings_are_deduplicated() {
        let mut allocator = ResourceAllocator::new();

        let hello = allocator.global_string("hello");
        let world = allocator.global_string("world");

        assert_eq!(allocator.global_string("hello"), hello);
        assert_ne!(hello, world);
        assert_eq!(allocator.global_variables().len(), 2);
    }
}
