use hashbrown::HashSet;

use crate::middle::{
    hir::ENTRY_FUNCTION_NAME,
    mir::{Expression, Function, Sources},
};

fn collect_names<'a>(expression: &'a Expression, names: &mut Vec<&'a str>) {
    match expression {
        Expression::Name(name) => names.push(name),
        Expression::Mem(address) => collect_names(address, names),
        Expression::Binary { e1, e2, .. } => {
            collect_names(e1, names);
            collect_names(e2, names);
        }
        Expression::Constant(_) | Expression::Temporary(_) => {}
    }
}

fn referenced_names(function: &Function) -> Vec<&str> {
    let mut names = Vec::new();
    for statement in &function.body {
        for expression in statement.expressions() {
            collect_names(expression, &mut names);
        }
    }
    names
}

/// Drops functions and globals the entry function cannot reach through the
/// names it and its reachable functions mention
#[tracing::instrument(skip_all)]
pub fn eliminate_unused_names(sources: &mut Sources) {
    let mut used = HashSet::new();
    let mut pending = vec![ENTRY_FUNCTION_NAME.to_string()];
    while let Some(name) = pending.pop() {
        if !used.insert(name.clone()) {
            continue;
        }
        if let Some(function) = sources.function(&name) {
            pending.extend(
                referenced_names(function)
                    .into_iter()
                    .filter(|name| !used.contains(*name))
                    .map(String::from),
            );
        }
    }

    let functions = sources.functions.len();
    let globals = sources.global_variables.len();
    sources.functions.retain(|function| used.contains(&function.name));
    sources
        .global_variables
        .retain(|global| used.contains(&global.name));

    tracing::debug!(
        removed_functions = functions - sources.functions.len(),
        removed_globals = globals - sources.global_variables.len(),
        "eliminated unused names"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{GlobalVariable, Statement};

    fn function(name: &str, body: Vec<Statement>) -> Function {
        Function {
            name: name.into(),
            arguments: vec![],
            body,
        }
    }

    fn global(name: &str) -> GlobalVariable {
        GlobalVariable {
            name: name.into(),
            content: name.to_lowercase(),
        }
    }

    #[test]
    fn only_names_reachable_from_the_entry_survive() {
        let mut sources = Sources {
            global_variables: vec![global("GLOBAL_STRING_0"), global("GLOBAL_STRING_1")],
            functions: vec![
                function(
                    ENTRY_FUNCTION_NAME,
                    vec![
                        Statement::Call {
                            function: Expression::Name("_Main_Main_run".into()),
                            arguments: vec![],
                            return_collector: None,
                        },
                        Statement::Return(Expression::ZERO),
                    ],
                ),
                function(
                    "_Main_Main_run",
                    vec![Statement::Return(Expression::Name("GLOBAL_STRING_1".into()))],
                ),
                function(
                    "_Main_Main_unused",
                    vec![Statement::Return(Expression::Name("GLOBAL_STRING_0".into()))],
                ),
            ],
        };

        eliminate_unused_names(&mut sources);

        let names = sources
            .functions
            .iter()
            .map(|function| function.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec![ENTRY_FUNCTION_NAME, "_Main_Main_run"]);
        assert_eq!(sources.global_variables, vec![global("GLOBAL_STRING_1")]);
    }
}
