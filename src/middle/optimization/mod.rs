//! MIR optimizations. Each pass rewrites one function body and reports
//! whether it changed anything, so the per-function passes can be repeated
//! until they settle.

use serde::{Deserialize, Serialize};

use crate::middle::{
    allocator::ResourceAllocator,
    mir::{Function, Sources, Statement, simplify::simplify_function},
};

pub mod common_subexpression;
pub mod constant_propagation;
pub mod copy_propagation;
pub mod dataflow;
pub mod dead_code;
pub mod folding;
pub mod inlining;
pub mod local_value_numbering;
pub mod unused_names;

use folding::FoldingOptions;

/// Which passes run. Every pass is off unless enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizationConfig {
    pub constant_propagation: bool,
    pub algebraic_optimization: bool,
    pub constant_folding: bool,
    pub copy_propagation: bool,
    pub local_value_numbering: bool,
    pub common_subexpression_elimination: bool,
    pub dead_code_elimination: bool,
    pub inlining: bool,
    /// Rounds of the per-function passes, by default the size of the body
    /// plus ten
    pub max_iterations: Option<usize>,
}

impl OptimizationConfig {
    pub fn all() -> Self {
        Self {
            constant_propagation: true,
            algebraic_optimization: true,
            constant_folding: true,
            copy_propagation: true,
            local_value_numbering: true,
            common_subexpression_elimination: true,
            dead_code_elimination: true,
            inlining: true,
            max_iterations: None,
        }
    }

    fn folding(&self) -> FoldingOptions {
        FoldingOptions {
            constants: self.constant_folding,
            algebra: self.algebraic_optimization,
        }
    }
}

/// One round of every enabled per-function pass, in a fixed order
fn run_round(
    body: &mut Vec<Statement>,
    allocator: &mut ResourceAllocator,
    config: &OptimizationConfig,
) -> bool {
    let folding_options = config.folding();
    let mut changed = false;

    if config.constant_propagation {
        changed |= constant_propagation::propagate_constants(body);
    }
    if folding_options.constants || folding_options.algebra {
        changed |= folding::fold_function(body, folding_options);
    }
    if config.copy_propagation {
        changed |= copy_propagation::propagate_copies(body);
    }
    if config.local_value_numbering {
        changed |= local_value_numbering::number_values(body);
    }
    if config.common_subexpression_elimination {
        changed |= common_subexpression::eliminate_common_subexpressions(body, allocator);
    }
    if config.dead_code_elimination {
        changed |= dead_code::eliminate_dead_code(body);
    }

    let simplified = simplify_function(body.clone());
    changed |= simplified != *body;
    *body = simplified;
    changed
}

fn optimize_function(
    function: &mut Function,
    allocator: &mut ResourceAllocator,
    config: &OptimizationConfig,
) {
    let budget = config
        .max_iterations
        .unwrap_or(function.body.len() + 10);
    let before = function.body.len();

    let mut rounds = 0;
    while rounds < budget {
        rounds += 1;
        if !run_round(&mut function.body, allocator, config) {
            break;
        }
    }

    tracing::debug!(
        function = %function.name,
        rounds,
        before,
        after = function.body.len(),
        "optimized function"
    );
}

fn optimize_functions(
    functions: &mut [Function],
    allocator: &mut ResourceAllocator,
    config: &OptimizationConfig,
) {
    for function in functions {
        optimize_function(function, allocator, config);
    }
}

/// Runs the enabled passes over every function, inlines, optimizes the
/// inlined bodies again and finally drops what the entry cannot reach
#[tracing::instrument(skip_all)]
pub fn optimize_sources(
    sources: &mut Sources,
    allocator: &mut ResourceAllocator,
    config: &OptimizationConfig,
) {
    optimize_functions(&mut sources.functions, allocator, config);

    if config.inlining && inlining::inline_functions(&mut sources.functions, allocator) {
        optimize_functions(&mut sources.functions, allocator, config);
    }

    unused_names::eliminate_unused_names(sources);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{Expression, Operator};

    #[test]
    fn config_reads_camel_case_and_defaults_to_off() {
        let config: OptimizationConfig = serde_json::from_str(
            r#"{ "constantFolding": true, "commonSubexpressionElimination": true, "maxIterations": 3 }"#,
        )
        .unwrap();

        assert!(config.constant_folding);
        assert!(config.common_subexpression_elimination);
        assert!(!config.inlining);
        assert_eq!(config.max_iterations, Some(3));
        assert_eq!(
            serde_json::from_str::<OptimizationConfig>("{}").unwrap(),
            OptimizationConfig::default()
        );
    }

    #[test]
    fn constants_flow_through_the_whole_pipeline() {
        let mut allocator = ResourceAllocator::new();
        let mut function = Function {
            name: "f".into(),
            arguments: vec![],
            body: vec![
                Statement::move_temp("a", Expression::Constant(6)),
                Statement::move_temp("b", Expression::temporary("a")),
                Statement::move_temp(
                    "c",
                    Expression::binary(Operator::Mul, Expression::temporary("b"), Expression::Constant(7)),
                ),
                Statement::Return(Expression::temporary("c")),
            ],
        };

        optimize_function(&mut function, &mut allocator, &OptimizationConfig::all());

        assert_eq!(function.body, vec![Statement::Return(Expression::Constant(42))]);
    }

    #[test]
    fn disabled_passes_leave_bodies_alone() {
        let mut allocator = ResourceAllocator::new();
        let body = vec![
            Statement::move_temp("a", Expression::Constant(6)),
            Statement::Return(Expression::temporary("a")),
        ];
        let mut function = Function {
            name: "f".into(),
            arguments: vec![],
            body: body.clone(),
        };

        optimize_function(&mut function, &mut allocator, &OptimizationConfig::default());

        assert_eq!(function.body, body);
    }
}
