use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::{
    errors::ErrorReporter,
    frontend::{
        ast::{ClassDefinition, Module, Type, TypeDefinition, UndecidedTypeCounter},
        location::{ModuleReference, Range},
    },
};

#[derive(Debug, Clone)]
pub struct MemberTypeInformation {
    pub is_public: bool,
    pub type_parameters: Vec<String>,
    /// Always a function type
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct ClassTypingContext {
    pub is_public: bool,
    pub type_parameters: Vec<String>,
    pub type_definition: TypeDefinition,
    pub functions: HashMap<String, MemberTypeInformation>,
    pub methods: HashMap<String, MemberTypeInformation>,
}

impl ClassTypingContext {
    fn from_definition(class: &ClassDefinition) -> Self {
        let mut functions = HashMap::new();
        let mut methods = HashMap::new();

        for member in &class.members {
            let information = MemberTypeInformation {
                is_public: member.is_public,
                type_parameters: member.type_parameters.clone(),
                ty: member.function_type(),
            };

            let table = if member.is_method {
                &mut methods
            } else {
                &mut functions
            };
            table.entry(member.name.clone()).or_insert(information);
        }

        Self {
            is_public: class.is_public,
            type_parameters: class.type_parameters.clone(),
            type_definition: class.type_definition.clone(),
            functions,
            methods,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleTypingContext {
    pub classes: HashMap<String, ClassTypingContext>,
}

/// Signatures of every class in every module of a compilation
#[derive(Debug, Clone, Default)]
pub struct GlobalTypingContext {
    pub modules: HashMap<ModuleReference, ModuleTypingContext>,
}

impl GlobalTypingContext {
    /// Collects class signatures without validating them, so modules may
    /// import each other cyclically
    pub fn build<'m>(modules: impl IntoIterator<Item = (&'m ModuleReference, &'m Module)>) -> Self {
        let modules = modules
            .into_iter()
            .map(|(reference, module)| {
                let mut classes = HashMap::new();
                for class in &module.classes {
                    classes
                        .entry(class.name.clone())
                        .or_insert_with(|| ClassTypingContext::from_definition(class));
                }
                (reference.clone(), ModuleTypingContext { classes })
            })
            .collect();

        Self { modules }
    }

    pub fn class(&self, module: &ModuleReference, class_name: &str) -> Option<&ClassTypingContext> {
        self.modules.get(module)?.classes.get(class_name)
    }
}

/// The view of the global context from inside one class
#[derive(Debug)]
pub struct AccessibleGlobalTypingContext<'a> {
    global: &'a GlobalTypingContext,
    module_reference: ModuleReference,
    /// Imported class name to the module defining it
    imports: HashMap<String, ModuleReference>,
    pub current_class: String,
}

impl<'a> AccessibleGlobalTypingContext<'a> {
    pub fn new(
        global: &'a GlobalTypingContext,
        module_reference: ModuleReference,
        imports: HashMap<String, ModuleReference>,
        current_class: String,
    ) -> Self {
        Self {
            global,
            module_reference,
            imports,
            current_class,
        }
    }

    pub fn class(&self, class_name: &str) -> Option<&'a ClassTypingContext> {
        if let Some(class) = self.global.class(&self.module_reference, class_name) {
            return Some(class);
        }

        let module = self.imports.get(class_name)?;
        self.global.class(module, class_name)
    }

    pub fn current_class(&self) -> Option<&'a ClassTypingContext> {
        self.class(&self.current_class)
    }

    /// Type of `this` inside methods of the current class
    pub fn this_type(&self) -> Type {
        let type_arguments = self
            .current_class()
            .map(|class| {
                class
                    .type_parameters
                    .iter()
                    .map(|name| Type::identifier(name.clone(), Vec::new()))
                    .collect()
            })
            .unwrap_or_default();

        Type::identifier(self.current_class.clone(), type_arguments)
    }

    /// Instantiated type of `Class.function` along with the type arguments
    /// chosen for its own type parameters. Class type parameters are not in
    /// scope of functions.
    pub fn function_type(
        &self,
        class_name: &str,
        function_name: &str,
        counter: &mut UndecidedTypeCounter,
    ) -> Option<(Type, Vec<Type>)> {
        let class = self.class(class_name)?;
        let function = class.functions.get(function_name)?;

        if !function.is_public && class_name != self.current_class {
            return None;
        }

        let mut mapping = HashMap::new();
        let mut type_arguments = Vec::new();
        for parameter in &function.type_parameters {
            let fresh = counter.fresh();
            type_arguments.push(fresh.clone());
            mapping.insert(parameter.clone(), fresh);
        }

        Some((function.ty.substitute(&mapping), type_arguments))
    }

    /// Instantiated type of a method on a receiver of type
    /// `class_name<class_type_arguments>`
    pub fn method_type(
        &self,
        class_name: &str,
        method_name: &str,
        class_type_arguments: &[Type],
        counter: &mut UndecidedTypeCounter,
    ) -> Option<Type> {
        let class = self.class(class_name)?;
        let method = class.methods.get(method_name)?;

        if !method.is_public && class_name != self.current_class {
            return None;
        }

        let mut mapping = class
            .type_parameters
            .iter()
            .cloned()
            .zip(class_type_arguments.iter().cloned())
            .collect::<HashMap<_, _>>();

        for parameter in &method.type_parameters {
            mapping.insert(parameter.clone(), counter.fresh());
        }

        Some(method.ty.substitute(&mapping))
    }

    /// Checks that every identifier type names a type parameter in scope or a
    /// class with the right number of type arguments
    pub fn validate_type(
        &self,
        ty: &Type,
        type_parameters: &[String],
        range: Range,
        reporter: &mut ErrorReporter<'_>,
    ) -> bool {
        match ty {
            Type::Primitive(_) | Type::Undecided(_) => true,
            Type::Identifier {
                name,
                type_arguments,
            } => {
                let arguments_valid = type_arguments
                    .iter()
                    .map(|argument| self.validate_type(argument, type_parameters, range, reporter))
                    .fold(true, |a, b| a && b);

                let well_defined = if type_parameters.contains(name) {
                    type_arguments.is_empty()
                } else {
                    self.class(name)
                        .is_some_and(|class| class.type_parameters.len() == type_arguments.len())
                };

                if !well_defined {
                    reporter.not_well_defined_identifier(range, &ty.to_string());
                }

                arguments_valid && well_defined
            }
            Type::Tuple(elements) => elements
                .iter()
                .map(|element| self.validate_type(element, type_parameters, range, reporter))
                .fold(true, |a, b| a && b),
            Type::Function {
                argument_types,
                return_type,
            } => {
                let arguments_valid = argument_types
                    .iter()
                    .map(|argument| self.validate_type(argument, type_parameters, range, reporter))
                    .fold(true, |a, b| a && b);

                self.validate_type(return_type, type_parameters, range, reporter) && arguments_valid
            }
        }
    }
}

#[derive(Debug, Default)]
struct Layer {
    bindings: HashMap<String, Type>,
    captured: BTreeMap<String, Type>,
}

/// Stack of lexical scopes for local bindings
#[derive(Debug, Default)]
pub struct LocalTypingContext {
    stack: Vec<Layer>,
}

impl LocalTypingContext {
    pub fn new() -> Self {
        Self {
            stack: vec![Layer::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.stack.push(Layer::default());
    }

    /// Pops the innermost scope, returning the outer names it read
    pub fn pop_scope(&mut self) -> BTreeMap<String, Type> {
        self.stack
            .pop()
            .map(|layer| layer.captured)
            .unwrap_or_default()
    }

    /// Looks a name up, marking it as captured by every scope between the
    /// use and its definition
    pub fn get(&mut self, name: &str) -> Option<Type> {
        let defining_layer = self
            .stack
            .iter()
            .rposition(|layer| layer.bindings.contains_key(name))?;
        let ty = self.stack[defining_layer].bindings[name].clone();

        for layer in &mut self.stack[defining_layer + 1..] {
            layer.captured.insert(name.to_string(), ty.clone());
        }

        Some(ty)
    }

    /// Binds a name in the innermost scope. Redeclaring a name of the same
    /// scope is a collision, shadowing an outer one is not.
    pub fn add(&mut self, name: &str, ty: Type, range: Range, reporter: &mut ErrorReporter<'_>) {
        let Some(layer) = self.stack.last_mut() else {
            return;
        };

        if layer.bindings.contains_key(name) {
            reporter.collision(range, name);
            return;
        }

        layer.bindings.insert(name.to_string(), ty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCollector;

    #[test]
    fn nested_scopes_record_captures() {
        let mut errors = ErrorCollector::new();
        let mut reporter = errors.reporter(&ModuleReference::ROOT);
        let mut context = LocalTypingContext::new();

        context.add("a", Type::INT, Range::DUMMY, &mut reporter);
        context.push_scope();
        context.add("b", Type::BOOL, Range::DUMMY, &mut reporter);
        context.push_scope();

        assert_eq!(context.get("a"), Some(Type::INT));
        assert_eq!(context.get("b"), Some(Type::BOOL));
        assert_eq!(context.get("c"), None);

        let inner = context.pop_scope();
        let outer = context.pop_scope();

        assert_eq!(inner.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(outer.keys().collect::<Vec<_>>(), vec!["a"]);
        drop(reporter);
        assert!(errors.is_empty());
    }

    #[test]
    fn same_scope_redeclaration_collides_but_shadowing_does_not() {
        let mut errors = ErrorCollector::new();
        let mut reporter = errors.reporter(&ModuleReference::ROOT);
        let mut context = LocalTypingContext::new();

        context.add("a", Type::INT, Range::DUMMY, &mut reporter);
        context.push_scope();
        context.add("a", Type::BOOL, Range::DUMMY, &mut reporter);
        assert_eq!(context.get("a"), Some(Type::BOOL));
        context.add("a", Type::STRING, Range::DUMMY, &mut reporter);
        drop(reporter);

        assert_eq!(errors.len(), 1);
    }
}
