//! samc Type Checker
//!
//! Type checking works on whole compilations in 2 steps:
//!
//!   1) collecting the signatures of every class in every module into a
//!      global typing context, before anything is validated, so modules may
//!      import each other freely
//!   2) checking each module against that context: its imports, its class
//!      definitions and finally every member body
//!
//! Member bodies are checked bidirectionally. The expected type of every
//! expression is pushed down from its parent and the actual type is met with
//! it through a [`TypeResolution`], which solves the undecided types created
//! by the parser and by generic instantiation along the way. Once a body is
//! done, its types are fixed by substituting every solution; whatever stays
//! undecided is reported.
//!
//! Errors never stop checking. Every failure falls back to a type that lets
//! the rest of the body be checked, so one pass reports as much as possible.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

use crate::{
    errors::{ErrorCollector, ErrorReporter},
    frontend::{
        ast::{ClassDefinition, ClassMemberDefinition, Module, UndecidedTypeCounter},
        location::ModuleReference,
    },
};

pub use self::{
    context::{AccessibleGlobalTypingContext, GlobalTypingContext, LocalTypingContext},
    dependency::DependencyTracker,
    lookup::LocationLookup,
    resolution::TypeResolution,
};
use self::{expression::ExpressionTypeChecker, fixer::TypeFixer};

mod context;
mod dependency;
mod expression;
mod fixer;
mod lookup;
mod resolution;
mod statement;

/// Annotated modules of a compilation along with the context they were
/// checked against
#[derive(Debug)]
pub struct TypeCheckedSources {
    pub modules: BTreeMap<ModuleReference, Module>,
    pub global: GlobalTypingContext,
    pub dependencies: DependencyTracker,
}

#[tracing::instrument(skip_all, fields(modules = modules.len()))]
pub fn type_check_sources(
    modules: BTreeMap<ModuleReference, Module>,
    counter: &mut UndecidedTypeCounter,
    errors: &mut ErrorCollector,
    report_cyclic_dependencies: bool,
) -> TypeCheckedSources {
    let global = GlobalTypingContext::build(&modules);
    let dependencies = DependencyTracker::build(&modules);

    if report_cyclic_dependencies {
        for cycle in dependencies.cycles() {
            report_cycle(&modules, &cycle, errors);
        }
    }

    let modules = modules
        .into_iter()
        .map(|(reference, module)| {
            let mut reporter = errors.reporter(&reference);
            let module = type_check_module(&global, &reference, module, counter, &mut reporter);
            (reference, module)
        })
        .collect();

    tracing::debug!(errors = errors.len(), "type checked");

    TypeCheckedSources {
        modules,
        global,
        dependencies,
    }
}

fn report_cycle(
    modules: &BTreeMap<ModuleReference, Module>,
    cycle: &[ModuleReference],
    errors: &mut ErrorCollector,
) {
    let [first, second, ..] = cycle else {
        return;
    };

    let range = modules
        .get(first)
        .and_then(|module| {
            module
                .imports
                .iter()
                .find(|import| import.imported_module == *second)
        })
        .map(|import| import.imported_module_range)
        .unwrap_or_default();

    errors.reporter(first).cyclic_dependency(range, cycle);
}

fn type_check_module(
    global: &GlobalTypingContext,
    reference: &ModuleReference,
    mut module: Module,
    counter: &mut UndecidedTypeCounter,
    reporter: &mut ErrorReporter<'_>,
) -> Module {
    let imports = resolve_imports(global, reference, &module, reporter);

    let mut class_names = HashSet::new();
    for class in &module.classes {
        if !class_names.insert(class.name.clone()) {
            reporter.collision(class.name_range, &class.name);
        }
    }

    module.classes = module
        .classes
        .into_iter()
        .map(|mut class| {
            let context = AccessibleGlobalTypingContext::new(
                global,
                reference.clone(),
                imports.clone(),
                class.name.clone(),
            );

            validate_class(&context, &class, reporter);

            class.members = std::mem::take(&mut class.members)
                .into_iter()
                .map(|member| type_check_member(&context, &class, member, counter, reporter))
                .collect();
            class
        })
        .collect();

    module
}

/// Imported class names mapped to the module defining them
fn resolve_imports(
    global: &GlobalTypingContext,
    reference: &ModuleReference,
    module: &Module,
    reporter: &mut ErrorReporter<'_>,
) -> HashMap<String, ModuleReference> {
    let mut imports = HashMap::new();

    for import in &module.imports {
        let Some(imported_module) = global.modules.get(&import.imported_module) else {
            reporter.unresolved_name(import.imported_module_range, &import.imported_module.to_string());
            continue;
        };

        for (name, range) in &import.imported_members {
            match imported_module.classes.get(name) {
                Some(class) if class.is_public => {}
                _ => {
                    reporter.unresolved_name(*range, name);
                    continue;
                }
            }

            let defined_locally = global.class(reference, name).is_some();
            if defined_locally || imports.contains_key(name) {
                reporter.collision(*range, name);
                continue;
            }

            imports.insert(name.clone(), import.imported_module.clone());
        }
    }

    imports
}

fn report_duplicates<'n>(
    names: impl IntoIterator<Item = &'n String>,
    mut report: impl FnMut(&'n String),
) {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            report(name);
        }
    }
}

fn validate_class(
    context: &AccessibleGlobalTypingContext<'_>,
    class: &ClassDefinition,
    reporter: &mut ErrorReporter<'_>,
) {
    report_duplicates(&class.type_parameters, |name| {
        reporter.collision(class.name_range, name)
    });

    let definition = &class.type_definition;
    report_duplicates(&definition.names, |name| {
        reporter.duplicate_field_declaration(definition.range, name)
    });
    for field in definition.mappings.values() {
        context.validate_type(&field.ty, &class.type_parameters, definition.range, reporter);
    }

    for is_method in [false, true] {
        let members = class.members.iter().filter(|m| m.is_method == is_method);
        let mut seen = HashSet::new();
        for member in members {
            if !seen.insert(&member.name) {
                reporter.collision(member.name_range, &member.name);
            }
        }
    }
}

fn type_check_member(
    context: &AccessibleGlobalTypingContext<'_>,
    class: &ClassDefinition,
    member: ClassMemberDefinition,
    counter: &mut UndecidedTypeCounter,
    reporter: &mut ErrorReporter<'_>,
) -> ClassMemberDefinition {
    let ClassMemberDefinition {
        range,
        is_public,
        is_method,
        name,
        name_range,
        type_parameters,
        parameters,
        return_type,
        body,
    } = member;

    let _span = tracing::trace_span!("member", class = %class.name, %name).entered();

    let mut scope_type_parameters = if is_method {
        class.type_parameters.clone()
    } else {
        Vec::new()
    };
    for parameter in &type_parameters {
        if scope_type_parameters.contains(parameter) {
            reporter.collision(name_range, parameter);
        } else {
            scope_type_parameters.push(parameter.clone());
        }
    }

    let mut local = LocalTypingContext::new();
    if is_method {
        local.add("this", context.this_type(), range, reporter);
    }
    for parameter in &parameters {
        context.validate_type(&parameter.ty, &scope_type_parameters, parameter.type_range, reporter);
        local.add(&parameter.name, parameter.ty.clone(), parameter.name_range, reporter);
    }
    context.validate_type(&return_type, &scope_type_parameters, range, reporter);

    let mut checker = ExpressionTypeChecker {
        context,
        resolution: TypeResolution::new(),
        local,
        counter: &mut *counter,
        reporter: &mut *reporter,
        type_parameters: scope_type_parameters,
    };
    let mut body = checker.check(body, &return_type);
    let resolution = checker.resolution;

    TypeFixer::new(&resolution, reporter).fix(&mut body);

    ClassMemberDefinition {
        range,
        is_public,
        is_method,
        name,
        name_range,
        type_parameters,
        parameters,
        return_type,
        body,
    }
}
