//! Enumeration of the unknowns of the linear system.
//!
//! The enumerator walks the workflow depth first. In direct mode the unknowns of a terminal
//! component are its connected outputs, in adjoint mode its connected inputs. Sub-models
//! contribute both halves of their boundary: the half that is not counted for components is
//! recorded before descending into the sub-model, the counted half after it. Nested solvers
//! are walked with the prefix of their enclosing assembly.
//!
//! The result, a [`Topology`], also keeps the edge dictionary and the solver couplings of
//! every driver scope so that the assembler never has to recompute them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use colored::Colorize;

use crate::config::Mode;
use crate::errors::DerivativeError;
use crate::model::edges::{collect_couplings, edge_dict, solver_couplings, EdgeContext};
use crate::model::{
    Assembly, Direction, Driver, DriverKind, EdgeDict, Edges, Node, Problem, SolverMap,
};
use crate::path::VarPath;

/// Ordered, deduplicated list of fully qualified unknown names.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct VariableList {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl VariableList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `name` unless it is already listed. Returns its index.
    pub fn push(&mut self, name: String) -> usize {
        if let Some(&i) = self.index.get(&name) {
            return i;
        }
        let i = self.names.len();
        self.index.insert(name.clone(), i);
        self.names.push(name);
        i
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn name(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Debug for VariableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        for (i, name) in self.names.iter().enumerate() {
            writeln!(f, "    {}: {}", i.to_string().cyan(), name)?;
        }
        writeln!(f, "}}")
    }
}

/// Everything derived from the model structure for one mode.
#[derive(Debug, Clone)]
pub struct Topology {
    pub mode: Mode,
    pub variables: VariableList,
    /// Edge dictionaries keyed by driver scope (see [`Topology::nested_key`]).
    pub edge_dicts: BTreeMap<VarPath, EdgeDict>,
    /// Couplings visible in each driver scope, inner solvers overriding outer ones.
    pub solver_maps: BTreeMap<VarPath, SolverMap>,
    /// Couplings of every solver in the hierarchy.
    pub all_couplings: SolverMap,
    /// Edges of every terminal component that takes part, keyed by qualified path.
    pub component_edges: HashMap<String, Edges>,
}

impl Topology {
    /// Key of the driver scope of `node`, found at `index` in the workflow of the scope
    /// `parent`. The top-level driver has the root key.
    ///
    /// Every segment carries the workflow position, so nested drivers never share a key
    /// with an enclosing or sibling driver of the same name.
    pub fn nested_key(parent: &VarPath, index: usize, node: &Node) -> VarPath {
        parent.child(&format!("{}[{index}]", node.name()))
    }

    pub fn edge_dict(&self, key: &VarPath) -> Option<&EdgeDict> {
        self.edge_dicts.get(key)
    }

    pub fn solver_map(&self, key: &VarPath) -> Option<&SolverMap> {
        self.solver_maps.get(key)
    }
}

/// Enumerates the unknowns of `model` for `problem` in `mode`.
///
/// Validates that every parameter names an input and every function reference names a
/// variable of the model.
///
/// # Errors
/// - `UnknownVariable` for a parameter or function reference that does not resolve
/// - `UnsupportedDriver` for a nested driver that is not a solver
/// - `NestedDriver` for a sub-model that is not run once
/// - `NoIndependent` for a solver constraint without exactly one independent
pub fn enumerate(model: &Assembly, problem: &Problem, mode: Mode) -> Result<Topology, DerivativeError> {
    for parameter in problem.parameters() {
        match model.lookup(&VarPath::parse(parameter)) {
            Some((_, Direction::Input)) => {}
            _ => return Err(DerivativeError::UnknownVariable(parameter.clone())),
        }
    }
    let function_refs = problem.referenced_variables();
    if let Some(missing) = function_refs
        .iter()
        .find(|name| model.variable(&VarPath::parse(name)).is_none())
    {
        return Err(DerivativeError::UnknownVariable(missing.clone()));
    }

    let all_couplings = collect_couplings(model)?;
    let ctx = EdgeContext::new(
        problem.parameters().iter().cloned(),
        function_refs,
        &all_couplings,
    );

    let mut enumerator = Enumerator {
        mode,
        ctx: &ctx,
        topology: Topology {
            mode,
            variables: VariableList::new(),
            edge_dicts: BTreeMap::new(),
            solver_maps: BTreeMap::new(),
            all_couplings: all_couplings.clone(),
            component_edges: HashMap::new(),
        },
    };
    let root = VarPath::root();
    enumerator.walk(model, model.driver(), &root, &root, &SolverMap::new())?;
    Ok(enumerator.topology)
}

struct Enumerator<'a> {
    mode: Mode,
    ctx: &'a EdgeContext,
    topology: Topology,
}

impl Enumerator<'_> {
    fn walk(
        &mut self,
        scope: &Assembly,
        driver: &Driver,
        prefix: &VarPath,
        key: &VarPath,
        inherited: &SolverMap,
    ) -> Result<(), DerivativeError> {
        let mut couplings = inherited.clone();
        if let DriverKind::Solver(spec) = driver.kind() {
            couplings.extend(solver_couplings(driver.name(), spec, prefix)?);
        }
        let dict = edge_dict(scope, driver, prefix, self.ctx);

        for (index, node) in driver.workflow().iter().enumerate() {
            match node {
                Node::Driver(inner) if inner.kind().is_solver() => {
                    let inner_key = Topology::nested_key(key, index, node);
                    self.walk(scope, inner, prefix, &inner_key, &couplings)?;
                }
                Node::Driver(inner) => return Err(Node::unsupported(inner, &prefix.dotted())),
                Node::SubModel(sub) => {
                    let Some(edges) = dict.get(sub.name()) else {
                        continue;
                    };
                    let sub_prefix = prefix.child(sub.name());
                    if !sub.driver().kind().is_run_once() {
                        return Err(DerivativeError::NestedDriver(sub_prefix.dotted()));
                    }
                    for name in edges.non_counted(self.mode) {
                        self.topology.variables.push(sub_prefix.child(name).dotted());
                    }
                    let sub_key = Topology::nested_key(key, index, node);
                    self.walk(sub, sub.driver(), &sub_prefix, &sub_key, &couplings)?;
                    for name in edges.counted(self.mode) {
                        self.topology.variables.push(sub_prefix.child(name).dotted());
                    }
                }
                Node::Component(component) => {
                    let Some(edges) = dict.get(component.name()) else {
                        continue;
                    };
                    let path = prefix.child(component.name());
                    for name in edges.counted(self.mode) {
                        self.topology.variables.push(path.child(name).dotted());
                    }
                    self.topology
                        .component_edges
                        .insert(path.dotted(), edges.clone());
                }
            }
        }

        self.topology.edge_dicts.insert(key.clone(), dict);
        self.topology.solver_maps.insert(key.clone(), couplings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExprComponent, SolverSpec};

    fn pass_through(name: &str) -> ExprComponent {
        ExprComponent::new(name).input("x", 0.0).output("y", "x").unwrap()
    }

    fn chain(n: usize) -> (Assembly, Problem) {
        let mut model = Assembly::new("top");
        for i in 0..n {
            model.add(pass_through(&format!("c{i}")));
        }
        for i in 1..n {
            model
                .connect(&format!("c{}.y", i - 1), &format!("c{i}.x"))
                .unwrap();
        }
        let problem = Problem::new()
            .parameter("c0.x")
            .objective("f", &format!("c{}.y", n - 1))
            .unwrap();
        (model, problem)
    }

    #[test]
    fn test_direct_counts_outputs() {
        let (model, problem) = chain(4);
        let topology = enumerate(&model, &problem, Mode::Direct).unwrap();
        assert_eq!(topology.variables.names(), &["c0.y", "c1.y", "c2.y", "c3.y"]);
    }

    #[test]
    fn test_adjoint_counts_inputs() {
        let (model, problem) = chain(3);
        let topology = enumerate(&model, &problem, Mode::Adjoint).unwrap();
        assert_eq!(topology.variables.names(), &["c0.x", "c1.x", "c2.x"]);
    }

    #[test]
    fn test_enumeration_is_deterministic() {
        let (model, problem) = chain(6);
        let first = enumerate(&model, &problem, Mode::Direct).unwrap();
        let (other, problem) = chain(6);
        let second = enumerate(&other, &problem, Mode::Direct).unwrap();
        assert_eq!(first.variables, second.variables);
        assert_eq!(first.edge_dicts, second.edge_dicts);
    }

    #[test]
    fn test_sub_model_boundary_order() {
        let sub = Assembly::new("sub")
            .input("x", 0.0)
            .output("y")
            .with(pass_through("inner"))
            .connected("x", "inner.x")
            .unwrap()
            .connected("inner.y", "y")
            .unwrap();
        let model = Assembly::new("top")
            .with(pass_through("a"))
            .with(sub)
            .with(pass_through("b"))
            .connected("a.y", "sub.x")
            .unwrap()
            .connected("sub.y", "b.x")
            .unwrap();
        let problem = Problem::new()
            .parameter("a.x")
            .objective("f", "b.y")
            .unwrap();

        let direct = enumerate(&model, &problem, Mode::Direct).unwrap();
        assert_eq!(
            direct.variables.names(),
            &["a.y", "sub.x", "sub.inner.y", "sub.y", "b.y"]
        );

        let adjoint = enumerate(&model, &problem, Mode::Adjoint).unwrap();
        assert_eq!(
            adjoint.variables.names(),
            &["a.x", "sub.y", "sub.inner.x", "sub.x", "b.x"]
        );
    }

    #[test]
    fn test_unsupported_driver() {
        let (mut model, problem) = chain(2);
        model.add(Driver::iterative("doe", "doe").with(pass_through("z")));
        let err = enumerate(&model, &problem, Mode::Direct).unwrap_err();
        assert!(err.is_structural());
        assert!(matches!(err, DerivativeError::UnsupportedDriver { ref name, .. } if name == "doe"));
    }

    #[test]
    fn test_nested_driver_in_sub_model() {
        let sub = Assembly::new("sub")
            .input("x", 0.0)
            .with_driver(Driver::iterative("opt", "optimizer"));
        let (model, problem) = chain(2);
        let model = model.with(sub).connected("c1.y", "sub.x").unwrap();
        assert!(matches!(
            enumerate(&model, &problem, Mode::Direct),
            Err(DerivativeError::NestedDriver(name)) if name == "sub"
        ));
    }

    #[test]
    fn test_unknown_parameter() {
        let (model, _) = chain(2);
        let problem = Problem::new().parameter("c0.y");
        assert!(matches!(
            enumerate(&model, &problem, Mode::Direct),
            Err(DerivativeError::UnknownVariable(name)) if name == "c0.y"
        ));
    }

    #[test]
    fn test_solver_scope_keeps_prefix() {
        let spec = SolverSpec::new()
            .parameter("s1.x")
            .constraint("s2.y = s1.x")
            .unwrap();
        let solver = Driver::solver("solver", spec)
            .with(pass_through("s1"))
            .with(pass_through("s2"));
        let (model, _) = chain(1);
        let model = model
            .with(solver)
            .connected("c0.y", "s2.x")
            .unwrap();
        let problem = Problem::new()
            .parameter("c0.x")
            .objective("f", "s1.y")
            .unwrap();
        let topology = enumerate(&model, &problem, Mode::Direct).unwrap();
        assert_eq!(topology.variables.names(), &["c0.y", "s1.y", "s2.y"]);
        let key = VarPath::parse("solver[1]");
        assert_eq!(
            topology.solver_map(&key).unwrap().get("s1.x").map(String::as_str),
            Some("s2.y")
        );
    }

    #[test]
    fn test_solver_named_like_enclosing_driver() {
        let spec = SolverSpec::new()
            .parameter("s.x")
            .constraint("t.y = s.x")
            .unwrap();
        let solver = Driver::solver("driver", spec)
            .with(pass_through("s"))
            .with(pass_through("t"));
        let model = Assembly::new("top").with(solver);
        let problem = Problem::new().objective("f", "s.y").unwrap();
        let topology = enumerate(&model, &problem, Mode::Direct).unwrap();

        assert_eq!(topology.edge_dicts.len(), 2);
        let inner = topology.edge_dict(&VarPath::parse("driver[0]")).unwrap();
        assert!(inner.get("s").is_some());
        assert!(topology.edge_dict(&VarPath::root()).unwrap().is_empty());
    }

    #[test]
    fn test_sibling_solvers_keep_separate_scopes() {
        let first = Driver::solver(
            "solver",
            SolverSpec::new().parameter("a.x").constraint("a.x = b.y").unwrap(),
        )
        .with(pass_through("a"));
        let second = Driver::solver(
            "solver",
            SolverSpec::new().parameter("b.x").constraint("b.x = a.y").unwrap(),
        )
        .with(pass_through("b"));
        let model = Assembly::new("top").with(first).with(second);
        let problem = Problem::new().objective("f", "b.y").unwrap();
        let topology = enumerate(&model, &problem, Mode::Direct).unwrap();

        let first = topology.edge_dict(&VarPath::parse("solver[0]")).unwrap();
        let second = topology.edge_dict(&VarPath::parse("solver[1]")).unwrap();
        assert!(first.get("a").is_some() && first.get("b").is_none());
        assert!(second.get("b").is_some() && second.get("a").is_none());
    }
}
