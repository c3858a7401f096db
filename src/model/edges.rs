//! Edge dictionaries: the connected variables of every node in a driver scope.
//!
//! An input of a node is an edge input if it is driven by a connection, is a design
//! parameter or is the independent of a solver coupling. An output is an edge output if a
//! connection reads it, a function references it or it is the dependent of a solver
//! coupling. Sub-model entries list their boundary variables only; their interior gets its
//! own dictionary.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Mode;
use crate::errors::DerivativeError;
use crate::model::{Assembly, Component, Driver, DriverKind, Node, SolverSpec};
use crate::path::VarPath;

/// Map from qualified independent to qualified dependent.
pub type SolverMap = BTreeMap<String, String>;

/// Connected inputs and outputs of one node, local names, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Edges {
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
}

impl Edges {
    /// The half whose variables are unknowns of a terminal component in `mode`.
    pub fn counted(&self, mode: Mode) -> &BTreeSet<String> {
        match mode {
            Mode::Direct => &self.outputs,
            Mode::Adjoint => &self.inputs,
        }
    }

    /// The other half.
    pub fn non_counted(&self, mode: Mode) -> &BTreeSet<String> {
        match mode {
            Mode::Direct => &self.inputs,
            Mode::Adjoint => &self.outputs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

/// Edges of the nodes of one driver's workflow, in workflow order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeDict {
    entries: Vec<(String, Edges)>,
}

impl EdgeDict {
    pub fn get(&self, node: &str) -> Option<&Edges> {
        self.entries
            .iter()
            .find(|(name, _)| name == node)
            .map(|(_, edges)| edges)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Edges)> {
        self.entries.iter().map(|(name, edges)| (name.as_str(), edges))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fully qualified names that make a variable an edge.
#[derive(Debug, Clone, Default)]
pub(crate) struct EdgeContext {
    pub params: BTreeSet<String>,
    pub function_refs: BTreeSet<String>,
    pub independents: BTreeSet<String>,
    pub dependents: BTreeSet<String>,
}

impl EdgeContext {
    pub fn new(
        params: impl IntoIterator<Item = String>,
        function_refs: impl IntoIterator<Item = String>,
        couplings: &SolverMap,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            function_refs: function_refs.into_iter().collect(),
            independents: couplings.keys().cloned().collect(),
            dependents: couplings.values().cloned().collect(),
        }
    }

    fn is_driven(&self, qualified: &str) -> bool {
        self.params.contains(qualified) || self.independents.contains(qualified)
    }

    fn is_read(&self, qualified: &str) -> bool {
        self.function_refs.contains(qualified) || self.dependents.contains(qualified)
    }

    /// Returns `true` if any name of interest lies inside `scope`.
    fn touches(&self, scope: &VarPath) -> bool {
        let head = format!("{}.", scope.dotted());
        self.params
            .iter()
            .chain(&self.function_refs)
            .chain(&self.independents)
            .chain(&self.dependents)
            .any(|name| name.starts_with(&head))
    }
}

/// Builds the edge dictionary of `driver`, whose workflow lives in `scope` at `prefix`.
pub(crate) fn edge_dict(
    scope: &Assembly,
    driver: &Driver,
    prefix: &VarPath,
    ctx: &EdgeContext,
) -> EdgeDict {
    let mut entries = Vec::new();
    for node in driver.workflow() {
        match node {
            Node::Component(component) => {
                let edges = component_edges(scope, component.as_ref(), prefix, ctx);
                if !edges.is_empty() {
                    entries.push((component.name().to_string(), edges));
                }
            }
            Node::SubModel(sub) => {
                let edges = boundary_edges(scope, sub, prefix, ctx);
                if !edges.is_empty() || ctx.touches(&prefix.child(sub.name())) {
                    entries.push((sub.name().to_string(), edges));
                }
            }
            Node::Driver(_) => {}
        }
    }
    EdgeDict { entries }
}

fn component_edges(
    scope: &Assembly,
    component: &dyn Component,
    prefix: &VarPath,
    ctx: &EdgeContext,
) -> Edges {
    let mut edges = Edges::default();
    for input in component.inputs() {
        let local = format!("{}.{}", component.name(), input.name);
        let qualified = prefix.qualify(&local).dotted();
        if scope.connection_to(&local).is_some() || ctx.is_driven(&qualified) {
            edges.inputs.insert(input.name.clone());
        }
    }
    for output in component.outputs() {
        let local = format!("{}.{}", component.name(), output.name);
        let qualified = prefix.qualify(&local).dotted();
        if scope.is_connection_source(&local) || ctx.is_read(&qualified) {
            edges.outputs.insert(output.name.clone());
        }
    }
    edges
}

fn boundary_edges(scope: &Assembly, sub: &Assembly, prefix: &VarPath, ctx: &EdgeContext) -> Edges {
    let mut edges = Edges::default();
    for input in sub.inputs() {
        let local = format!("{}.{}", sub.name(), input.name);
        let qualified = prefix.qualify(&local).dotted();
        if scope.connection_to(&local).is_some() || ctx.is_driven(&qualified) {
            edges.inputs.insert(input.name.clone());
        }
    }
    for output in sub.outputs() {
        let local = format!("{}.{}", sub.name(), output.name);
        let qualified = prefix.qualify(&local).dotted();
        if scope.is_connection_source(&local) || ctx.is_read(&qualified) {
            edges.outputs.insert(output.name.clone());
        }
    }
    edges
}

/// Pairs each independent of a solver with its dependent, both qualified with `prefix`.
///
/// Each equality constraint must reference exactly two variables, exactly one of which is
/// a parameter of the solver.
pub(crate) fn solver_couplings(
    solver: &str,
    spec: &SolverSpec,
    prefix: &VarPath,
) -> Result<SolverMap, DerivativeError> {
    let mut map = SolverMap::new();
    for constraint in &spec.constraints {
        let no_independent = || DerivativeError::NoIndependent {
            solver: prefix.qualify(solver).dotted(),
            constraint: constraint.to_string(),
        };
        let refs = constraint.variables();
        let [first, second] = refs.as_slice() else {
            return Err(no_independent());
        };
        let is_param = |name: &String| spec.parameters.contains(name);
        let (independent, dependent) = match (is_param(first), is_param(second)) {
            (true, false) => (first, second),
            (false, true) => (second, first),
            _ => return Err(no_independent()),
        };
        map.insert(
            prefix.qualify(independent).dotted(),
            prefix.qualify(dependent).dotted(),
        );
    }
    Ok(map)
}

/// Collects the couplings of every solver in the hierarchy.
pub(crate) fn collect_couplings(model: &Assembly) -> Result<SolverMap, DerivativeError> {
    let mut map = SolverMap::new();
    collect_in(model.driver(), &VarPath::root(), &mut map)?;
    Ok(map)
}

fn collect_in(driver: &Driver, prefix: &VarPath, map: &mut SolverMap) -> Result<(), DerivativeError> {
    if let DriverKind::Solver(spec) = driver.kind() {
        map.extend(solver_couplings(driver.name(), spec, prefix)?);
    }
    for node in driver.workflow() {
        match node {
            Node::Driver(inner) => collect_in(inner, prefix, map)?,
            Node::SubModel(sub) => collect_in(sub.driver(), &prefix.child(sub.name()), map)?,
            Node::Component(_) => {}
        }
    }
    Ok(())
}
