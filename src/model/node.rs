//! Workflow nodes and drivers.

use std::fmt;

use crate::errors::DerivativeError;
use crate::expression::Constraint;
use crate::model::{Assembly, Component, ExprComponent};

/// How a driver runs its workflow.
#[derive(Debug, Clone)]
pub enum DriverKind {
    /// Executes the workflow once, in order.
    RunOnce,
    /// Iterates its workflow until its equality constraints hold.
    Solver(SolverSpec),
    /// Any other iterative driver (optimizer, DOE, ...), named by its kind.
    Iterative(String),
}

impl DriverKind {
    pub fn is_run_once(&self) -> bool {
        matches!(self, DriverKind::RunOnce)
    }

    pub fn is_solver(&self) -> bool {
        matches!(self, DriverKind::Solver(_))
    }

    pub fn label(&self) -> &str {
        match self {
            DriverKind::RunOnce => "run_once",
            DriverKind::Solver(_) => "solver",
            DriverKind::Iterative(kind) => kind.as_str(),
        }
    }
}

/// Parameters and equality constraints of an equation solver.
///
/// Names are local to the assembly that owns the solver. Each constraint couples one of
/// the parameters (the independent) with another variable (the dependent).
#[derive(Debug, Clone, Default)]
pub struct SolverSpec {
    pub parameters: Vec<String>,
    pub constraints: Vec<Constraint>,
}

impl SolverSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameter(mut self, name: &str) -> Self {
        self.parameters.push(name.to_string());
        self
    }

    /// Adds an equality constraint such as `"comp1.x = comp2.y"`.
    pub fn constraint(mut self, relation: &str) -> Result<Self, DerivativeError> {
        self.constraints.push(Constraint::new(relation)?);
        Ok(self)
    }
}

/// A driver with an ordered workflow.
#[derive(Debug)]
pub struct Driver {
    name: String,
    kind: DriverKind,
    workflow: Vec<Node>,
}

impl Driver {
    pub fn new(name: impl Into<String>, kind: DriverKind) -> Self {
        Self {
            name: name.into(),
            kind,
            workflow: Vec::new(),
        }
    }

    pub fn run_once(name: impl Into<String>) -> Self {
        Self::new(name, DriverKind::RunOnce)
    }

    pub fn solver(name: impl Into<String>, spec: SolverSpec) -> Self {
        Self::new(name, DriverKind::Solver(spec))
    }

    pub fn iterative(name: impl Into<String>, kind: &str) -> Self {
        Self::new(name, DriverKind::Iterative(kind.to_string()))
    }

    /// Appends a node to the workflow (builder style).
    pub fn with(mut self, node: impl Into<Node>) -> Self {
        self.workflow.push(node.into());
        self
    }

    pub fn push(&mut self, node: impl Into<Node>) {
        self.workflow.push(node.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &DriverKind {
        &self.kind
    }

    pub fn workflow(&self) -> &[Node] {
        &self.workflow
    }

    pub(crate) fn workflow_mut(&mut self) -> &mut [Node] {
        &mut self.workflow
    }
}

/// A node of a driver's workflow.
pub enum Node {
    Component(Box<dyn Component>),
    SubModel(Box<Assembly>),
    Driver(Driver),
}

impl Node {
    /// Wraps any component as a workflow node.
    pub fn component(component: impl Component + 'static) -> Self {
        Node::Component(Box::new(component))
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Component(component) => component.name(),
            Node::SubModel(assembly) => assembly.name(),
            Node::Driver(driver) => driver.name(),
        }
    }

    /// Error for a nested driver that is not a solver, qualified with `scope`.
    pub(crate) fn unsupported(driver: &Driver, scope: &str) -> DerivativeError {
        let name = match scope {
            "" => driver.name().to_string(),
            _ => format!("{scope}.{}", driver.name()),
        };
        DerivativeError::UnsupportedDriver {
            name,
            kind: driver.kind().label().to_string(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Component(component) => write!(f, "Component({})", component.name()),
            Node::SubModel(assembly) => write!(f, "SubModel({})", assembly.name()),
            Node::Driver(driver) => write!(f, "Driver({}, {})", driver.name(), driver.kind().label()),
        }
    }
}

impl From<ExprComponent> for Node {
    fn from(component: ExprComponent) -> Self {
        Node::component(component)
    }
}

impl From<Assembly> for Node {
    fn from(assembly: Assembly) -> Self {
        Node::SubModel(Box::new(assembly))
    }
}

impl From<Driver> for Node {
    fn from(driver: Driver) -> Self {
        Node::Driver(driver)
    }
}
