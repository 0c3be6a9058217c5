//! A worklist solver shared by every analysis, over MIR bodies and over
//! assembly alike

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::middle::mir::Statement;

/// A directed graph whose nodes are `0..len()` and whose entry is node 0
pub trait Graph {
    fn len(&self) -> usize;
    fn successors(&self, node: usize) -> &[usize];
    fn predecessors(&self, node: usize) -> &[usize];

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub trait Analysis {
    type Fact: Clone + PartialEq;

    const DIRECTION: Direction;

    /// Value on every edge before anything is known
    fn initial(&self) -> Self::Fact;
    /// Value flowing into the entry (forward) or out of the exits (backward)
    fn boundary(&self) -> Self::Fact;
    fn join(&self, a: &Self::Fact, b: &Self::Fact) -> Self::Fact;
    fn transfer(&self, node: usize, input: &Self::Fact) -> Self::Fact;
}

/// Facts before and after every node, in the direction of the analysis
#[derive(Debug, Clone)]
pub struct Solution<F> {
    pub inputs: Vec<F>,
    pub outputs: Vec<F>,
}

/// Depth-first order from the entry: preorder for forward analyses,
/// postorder for backward ones. Unreachable nodes come last.
fn seed_order<G: Graph + ?Sized>(graph: &G, direction: Direction) -> Vec<usize> {
    let mut visited = vec![false; graph.len()];
    let mut order = Vec::with_capacity(graph.len());

    if !graph.is_empty() {
        let mut stack = vec![(0, 0)];
        visited[0] = true;
        if direction == Direction::Forward {
            order.push(0);
        }

        while let Some((node, next_child)) = stack.pop() {
            match graph.successors(node).get(next_child) {
                Some(&child) => {
                    stack.push((node, next_child + 1));
                    if !visited[child] {
                        visited[child] = true;
                        if direction == Direction::Forward {
                            order.push(child);
                        }
                        stack.push((child, 0));
                    }
                }
                None => {
                    if direction == Direction::Backward {
                        order.push(node);
                    }
                }
            }
        }
    }

    order.extend((0..graph.len()).filter(|node| !visited[*node]));
    order
}

pub fn solve<G: Graph + ?Sized, A: Analysis>(graph: &G, analysis: &A) -> Solution<A::Fact> {
    let sources = |node: usize| match A::DIRECTION {
        Direction::Forward => graph.predecessors(node),
        Direction::Backward => graph.successors(node),
    };
    let targets = |node: usize| match A::DIRECTION {
        Direction::Forward => graph.successors(node),
        Direction::Backward => graph.predecessors(node),
    };
    let is_boundary = |node: usize| match A::DIRECTION {
        Direction::Forward => node == 0,
        Direction::Backward => graph.successors(node).is_empty(),
    };

    let mut inputs = vec![analysis.initial(); graph.len()];
    let mut outputs = vec![analysis.initial(); graph.len()];
    let mut processed = vec![false; graph.len()];
    let mut queued = vec![true; graph.len()];
    let mut worklist = seed_order(graph, A::DIRECTION)
        .into_iter()
        .collect::<VecDeque<_>>();

    while let Some(node) = worklist.pop_front() {
        queued[node] = false;

        let mut input = if is_boundary(node) {
            analysis.boundary()
        } else {
            analysis.initial()
        };
        for &source in sources(node) {
            input = analysis.join(&input, &outputs[source]);
        }

        if processed[node] && input == inputs[node] {
            continue;
        }
        processed[node] = true;

        let output = analysis.transfer(node, &input);
        inputs[node] = input;
        if output != outputs[node] {
            outputs[node] = output;
            for &target in targets(node) {
                if !queued[target] {
                    queued[target] = true;
                    worklist.push_back(target);
                }
            }
        }
    }

    Solution { inputs, outputs }
}

/// An explicit graph, with one node per statement of a MIR body or per
/// assembly instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
}

impl ControlFlowGraph {
    pub fn from_statements(body: &[Statement]) -> Self {
        let labels = body
            .iter()
            .enumerate()
            .filter_map(|(index, statement)| match statement {
                Statement::Label(label) => Some((label.as_str(), index)),
                _ => None,
            })
            .collect::<HashMap<_, _>>();
        let next = |index: usize| (index + 1 < body.len()).then_some(index + 1);

        let successors = body
            .iter()
            .enumerate()
            .map(|(index, statement)| match statement {
                Statement::Jump(label) => labels.get(label.as_str()).copied().into_iter().collect(),
                Statement::ConditionalJumpFallThrough { label, .. } => {
                    let mut successors = next(index).into_iter().collect::<Vec<_>>();
                    match labels.get(label.as_str()) {
                        Some(&target) if !successors.contains(&target) => successors.push(target),
                        _ => {}
                    }
                    successors
                }
                Statement::Return(_) => Vec::new(),
                _ => next(index).into_iter().collect(),
            })
            .collect::<Vec<Vec<usize>>>();

        Self::from_successors(successors)
    }

    /// Builds the graph from the successor list of every node
    pub fn from_successors(successors: Vec<Vec<usize>>) -> Self {
        let mut predecessors = vec![Vec::new(); successors.len()];
        for (node, targets) in successors.iter().enumerate() {
            for &target in targets {
                predecessors[target].push(node);
            }
        }

        Self {
            successors,
            predecessors,
        }
    }
}

impl Graph for ControlFlowGraph {
    fn len(&self) -> usize {
        self.successors.len()
    }

    fn successors(&self, node: usize) -> &[usize] {
        &self.successors[node]
    }

    fn predecessors(&self, node: usize) -> &[usize] {
        &self.predecessors[node]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::middle::mir::Expression;

    /// Reachability from the entry
    struct Reached;

    impl Analysis for Reached {
        type Fact = bool;

        const DIRECTION: Direction = Direction::Forward;

        fn initial(&self) -> bool {
            false
        }

        fn boundary(&self) -> bool {
            true
        }

        fn join(&self, a: &bool, b: &bool) -> bool {
            *a || *b
        }

        fn transfer(&self, _: usize, input: &bool) -> bool {
            *input
        }
    }

    /// Nodes that can still reach a return
    struct Exits<'a>(&'a [Statement]);

    impl Analysis for Exits<'_> {
        type Fact = BTreeSet<usize>;

        const DIRECTION: Direction = Direction::Backward;

        fn initial(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn boundary(&self) -> Self::Fact {
            BTreeSet::new()
        }

        fn join(&self, a: &Self::Fact, b: &Self::Fact) -> Self::Fact {
            a.union(b).copied().collect()
        }

        fn transfer(&self, node: usize, input: &Self::Fact) -> Self::Fact {
            let mut output = input.clone();
            if matches!(self.0[node], Statement::Return(_)) {
                output.insert(node);
            }
            output
        }
    }

    fn looping_body() -> Vec<Statement> {
        vec![
            Statement::Label("head".into()),
            Statement::ConditionalJumpFallThrough {
                condition: Expression::temporary("c"),
                label: "exit".into(),
            },
            Statement::Jump("head".into()),
            Statement::move_temp("dead", Expression::ONE),
            Statement::Label("exit".into()),
            Statement::Return(Expression::ZERO),
        ]
    }

    #[test]
    fn graph_follows_jumps_and_fall_through() {
        let graph = ControlFlowGraph::from_statements(&looping_body());

        assert_eq!(graph.successors(1), &[2, 4]);
        assert_eq!(graph.successors(2), &[0]);
        assert_eq!(graph.predecessors(0), &[2]);
        assert!(graph.successors(5).is_empty());
    }

    #[test]
    fn forward_and_backward_analyses_reach_fixpoint() {
        let body = looping_body();
        let graph = ControlFlowGraph::from_statements(&body);

        let reached = solve(&graph, &Reached);
        assert_eq!(
            reached.outputs,
            vec![true, true, true, false, true, true]
        );

        let exits = solve(&graph, &Exits(&body));
        assert_eq!(exits.outputs[0], BTreeSet::from([5]));
        assert_eq!(exits.outputs[2], BTreeSet::from([5]));
    }
}
