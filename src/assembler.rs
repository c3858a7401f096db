//! Assembly of the linear system `LHS · X = RHS`.
//!
//! Phase one walks the model mutably and asks every participating component for its local
//! derivatives, exactly once per pass. Phase two walks it again, read-only, and writes one
//! equation per unknown, in the order fixed by the [`VariableList`](crate::variables::VariableList).
//!
//! Every equation has a unit diagonal. Off-diagonal entries are the negated couplings to
//! other unknowns; couplings to parameters go to the right-hand side. Each coupling
//! coefficient is the product of the local derivative, the derivative of the connection
//! expression and the unit factor of the connection.

use std::collections::HashMap;
use std::fmt;

use colored::Colorize;
use nalgebra::DMatrix;

use crate::config::Mode;
use crate::errors::DerivativeError;
use crate::model::{Assembly, Component, Driver, Edges, LocalDerivatives, Node, SolverMap};
use crate::path::VarPath;
use crate::units::UnitConverter;
use crate::variables::Topology;

/// Local derivatives of one pass, keyed by qualified component path.
pub type LocalMap = HashMap<String, LocalDerivatives>;

/// The four matrices of one linearization.
///
/// `lhs` is `n_var × n_var`, `rhs` is `n_var × n_param`, `eqs` is `n_func × n_var` and
/// `eqs_zero` is `n_func × n_param`.
#[derive(Clone, PartialEq)]
pub struct LinearSystem {
    pub lhs: DMatrix<f64>,
    pub rhs: DMatrix<f64>,
    pub eqs: DMatrix<f64>,
    pub eqs_zero: DMatrix<f64>,
}

impl LinearSystem {
    pub fn zeros(n_var: usize, n_param: usize, n_func: usize) -> Self {
        Self {
            lhs: DMatrix::zeros(n_var, n_var),
            rhs: DMatrix::zeros(n_var, n_param),
            eqs: DMatrix::zeros(n_func, n_var),
            eqs_zero: DMatrix::zeros(n_func, n_param),
        }
    }

    pub fn n_var(&self) -> usize {
        self.lhs.nrows()
    }

    pub fn n_param(&self) -> usize {
        self.rhs.ncols()
    }

    pub fn n_func(&self) -> usize {
        self.eqs.nrows()
    }
}

impl fmt::Debug for LinearSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {}", "LHS".cyan(), self.lhs)?;
        writeln!(f, "    {}: {}", "RHS".cyan(), self.rhs)?;
        writeln!(f, "    {}: {}", "EQS".cyan(), self.eqs)?;
        writeln!(f, "    {}: {}", "EQS_zero".cyan(), self.eqs_zero)?;
        writeln!(f, "}}")
    }
}

/// Collects the local derivatives of every component that takes part in `topology`.
pub fn collect_local_derivatives(
    model: &mut Assembly,
    topology: &Topology,
) -> Result<LocalMap, DerivativeError> {
    let mut locals = LocalMap::new();
    collect_in(model.driver_untracked_mut(), &VarPath::root(), topology, &mut locals)?;
    Ok(locals)
}

fn collect_in(
    driver: &mut Driver,
    prefix: &VarPath,
    topology: &Topology,
    locals: &mut LocalMap,
) -> Result<(), DerivativeError> {
    for node in driver.workflow_mut() {
        match node {
            Node::Component(component) => {
                let path = prefix.child(component.name()).dotted();
                if topology.component_edges.contains_key(&path) && !locals.contains_key(&path) {
                    let derivatives = component.first_derivatives()?;
                    locals.insert(path, derivatives);
                }
            }
            Node::SubModel(sub) => {
                let sub_prefix = prefix.child(sub.name());
                collect_in(sub.driver_untracked_mut(), &sub_prefix, topology, locals)?;
            }
            Node::Driver(inner) => collect_in(inner, prefix, topology, locals)?,
        }
    }
    Ok(())
}

/// The equation a coefficient is written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Row {
    /// The equation of unknown `i`.
    Unknown(usize),
    /// Row `f` of the function matrices.
    Function(usize),
}

/// Writes coefficients into a [`LinearSystem`].
pub(crate) struct Assembler<'a> {
    mode: Mode,
    topology: &'a Topology,
    params: &'a HashMap<String, usize>,
    locals: &'a LocalMap,
    converter: &'a dyn UnitConverter,
    system: LinearSystem,
    i_eq: usize,
}

impl<'a> Assembler<'a> {
    pub fn new(
        topology: &'a Topology,
        params: &'a HashMap<String, usize>,
        locals: &'a LocalMap,
        converter: &'a dyn UnitConverter,
        system: LinearSystem,
    ) -> Self {
        Self {
            mode: topology.mode,
            topology,
            params,
            locals,
            converter,
            system,
            i_eq: 0,
        }
    }

    /// Writes one equation per unknown of `model`.
    pub fn assemble(&mut self, model: &Assembly) -> Result<(), DerivativeError> {
        let root = VarPath::root();
        self.walk(model, model.driver(), &root, &root)?;
        let n_var = self.topology.variables.len();
        if self.i_eq != n_var {
            return Err(DerivativeError::ShapeMismatch {
                what: "equation count",
                expected: (n_var, n_var),
                got: (self.i_eq, n_var),
            });
        }
        Ok(())
    }

    pub fn into_system(self) -> LinearSystem {
        self.system
    }

    fn open_row(&mut self, name: &str) -> Result<Row, DerivativeError> {
        let found = self
            .topology
            .variables
            .index_of(name)
            .ok_or_else(|| DerivativeError::UnknownVariable(name.to_string()))?;
        if found != self.i_eq {
            return Err(DerivativeError::EquationOrder {
                name: name.to_string(),
                expected: self.i_eq,
                found,
            });
        }
        self.system.lhs[(found, found)] = 1.0;
        self.i_eq += 1;
        Ok(Row::Unknown(found))
    }

    fn add_param(&mut self, row: Row, p: usize, c: f64) {
        match row {
            Row::Unknown(i) => self.system.rhs[(i, p)] += c,
            Row::Function(f) => self.system.eqs_zero[(f, p)] += c,
        }
    }

    fn add_unknown(&mut self, row: Row, j: usize, c: f64) {
        match row {
            Row::Unknown(i) => self.system.lhs[(i, j)] -= c,
            Row::Function(f) => self.system.eqs[(f, j)] += c,
        }
    }

    fn walk(
        &mut self,
        scope: &Assembly,
        driver: &Driver,
        prefix: &VarPath,
        key: &VarPath,
    ) -> Result<(), DerivativeError> {
        let topology = self.topology;
        let (Some(dict), Some(couplings)) = (topology.edge_dict(key), topology.solver_map(key)) else {
            return Err(DerivativeError::UnknownVariable(key.dotted()));
        };

        for (index, node) in driver.workflow().iter().enumerate() {
            match node {
                Node::Driver(inner) if inner.kind().is_solver() => {
                    self.walk(scope, inner, prefix, &Topology::nested_key(key, index, node))?;
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
                    let sub_key = Topology::nested_key(key, index, node);
                    match self.mode {
                        Mode::Direct => {
                            self.boundary_inputs(scope, sub, edges, prefix, couplings)?;
                            self.walk(sub, sub.driver(), &sub_prefix, &sub_key)?;
                            self.boundary_outputs(sub, edges, &sub_prefix, &sub_key)?;
                        }
                        Mode::Adjoint => {
                            self.boundary_outputs(sub, edges, &sub_prefix, &sub_key)?;
                            self.walk(sub, sub.driver(), &sub_prefix, &sub_key)?;
                            self.boundary_inputs(scope, sub, edges, prefix, couplings)?;
                        }
                    }
                }
                Node::Component(component) => {
                    let Some(edges) = dict.get(component.name()) else {
                        continue;
                    };
                    self.component_rows(scope, component.as_ref(), edges, prefix, couplings)?;
                }
            }
        }
        Ok(())
    }

    fn component_rows(
        &mut self,
        scope: &Assembly,
        component: &dyn Component,
        edges: &Edges,
        prefix: &VarPath,
        couplings: &SolverMap,
    ) -> Result<(), DerivativeError> {
        let path = prefix.child(component.name());
        match self.mode {
            Mode::Direct => {
                let qualified = path.dotted();
                let all_locals = self.locals;
                let locals = all_locals.get(&qualified).ok_or_else(|| DerivativeError::Component {
                    name: qualified.clone(),
                    message: "no local derivatives collected".to_string(),
                })?;
                for output in &edges.outputs {
                    let row = self.open_row(&path.child(output).dotted())?;
                    for input in &edges.inputs {
                        let d = locals.require(&qualified, output, input)?;
                        let target = format!("{}.{}", component.name(), input);
                        self.resolve_input(row, scope, prefix, &target, d, couplings)?;
                    }
                }
            }
            Mode::Adjoint => {
                for input in &edges.inputs {
                    let row = self.open_row(&path.child(input).dotted())?;
                    let target = format!("{}.{}", component.name(), input);
                    self.resolve_input(row, scope, prefix, &target, 1.0, couplings)?;
                }
            }
        }
        Ok(())
    }

    /// Equations of the boundary inputs of `sub`, driven from the enclosing `scope`.
    fn boundary_inputs(
        &mut self,
        scope: &Assembly,
        sub: &Assembly,
        edges: &Edges,
        prefix: &VarPath,
        couplings: &SolverMap,
    ) -> Result<(), DerivativeError> {
        for input in &edges.inputs {
            let row = self.open_row(&prefix.child(sub.name()).child(input).dotted())?;
            let target = format!("{}.{}", sub.name(), input);
            self.resolve_input(row, scope, prefix, &target, 1.0, couplings)?;
        }
        Ok(())
    }

    /// Equations of the boundary outputs of `sub`, driven from inside it.
    fn boundary_outputs(
        &mut self,
        sub: &Assembly,
        edges: &Edges,
        sub_prefix: &VarPath,
        key: &VarPath,
    ) -> Result<(), DerivativeError> {
        let topology = self.topology;
        let couplings = topology
            .solver_map(key)
            .ok_or_else(|| DerivativeError::UnknownVariable(key.dotted()))?;
        for output in &edges.outputs {
            let row = self.open_row(&sub_prefix.child(output).dotted())?;
            self.resolve_input(row, sub, sub_prefix, output, 1.0, couplings)?;
        }
        Ok(())
    }

    /// Adds `c` times the derivative of `target` (local to `scope`) to `row`.
    ///
    /// A target that is a parameter contributes directly. A solver independent
    /// contributes through its dependent. A connected target contributes through its
    /// source, scaled by the connection derivative and the unit factor. Anything else is
    /// held constant.
    pub fn resolve_input(
        &mut self,
        row: Row,
        scope: &Assembly,
        prefix: &VarPath,
        target: &str,
        c: f64,
        couplings: &SolverMap,
    ) -> Result<(), DerivativeError> {
        let qualified = prefix.qualify(target).dotted();
        if let Some(&p) = self.params.get(&qualified) {
            self.add_param(row, p, c);
            return Ok(());
        }
        if let Some(dependent) = couplings.get(&qualified) {
            return self.term(row, scope, prefix, dependent, c, &qualified);
        }
        let Some(connection) = scope.connection_to(target) else {
            return Ok(());
        };
        let g = connection.expression.derivative(&connection.source, scope)?;
        let k = self.unit_factor(scope, &connection.source, target)?;
        let source = prefix.qualify(&connection.source).dotted();
        self.term(row, scope, prefix, &source, c * g * k, &qualified)
    }

    fn unit_factor(&self, scope: &Assembly, source: &str, target: &str) -> Result<f64, DerivativeError> {
        match (scope.units_of(source), scope.units_of(target)) {
            (Some(from), Some(to)) if from != to => Ok(self.converter.derivative_factor(from, to)?),
            _ => Ok(1.0),
        }
    }

    /// Adds `c` times the qualified variable `name` to `row`.
    ///
    /// In adjoint mode a component output is not an unknown; it is expanded through the
    /// component's local derivatives into its edge inputs.
    pub fn term(
        &mut self,
        row: Row,
        scope: &Assembly,
        prefix: &VarPath,
        name: &str,
        c: f64,
        target: &str,
    ) -> Result<(), DerivativeError> {
        if let Some(&p) = self.params.get(name) {
            self.add_param(row, p, c);
            return Ok(());
        }
        if let Some(j) = self.topology.variables.index_of(name) {
            self.add_unknown(row, j, c);
            return Ok(());
        }

        let path = VarPath::parse(name);
        if self.mode == Mode::Adjoint {
            if let (Some(parent), Some(output)) = (path.parent(), path.last()) {
                let component = parent.dotted();
                let topology = self.topology;
                let locals = self.locals;
                if let (Some(edges), Some(derivatives)) =
                    (topology.component_edges.get(&component), locals.get(&component))
                {
                    for input in &edges.inputs {
                        let d = derivatives.require(&component, output, input)?;
                        let input_name = parent.child(input).dotted();
                        let j = topology
                            .variables
                            .index_of(&input_name)
                            .ok_or_else(|| DerivativeError::UnknownVariable(input_name.clone()))?;
                        self.add_unknown(row, j, c * d);
                    }
                    return Ok(());
                }
            }
        }

        let is_local_boundary = path.parent().as_ref() == Some(prefix)
            && path.last().is_some_and(|last| scope.is_boundary_input(last));
        if is_local_boundary {
            return Ok(());
        }

        Err(DerivativeError::UnresolvedSource {
            target: target.to_string(),
            source_name: name.to_string(),
        })
    }
}
