//! Composite models: boundary variables, a driver and a connection table.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use colored::Colorize;

use crate::errors::DerivativeError;
use crate::expression::Expression;
use crate::model::{Component, Driver, Node, Variable};
use crate::path::VarPath;
use crate::types::Values;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A connection `target <- expression(source)` inside one assembly.
///
/// `source` and `target` are local names: `comp.var` for a variable of a child node,
/// a bare name for a boundary variable of the assembly itself.
#[derive(Debug, Clone)]
pub struct Connection {
    pub target: String,
    pub source: String,
    pub expression: Expression,
}

/// Whether a variable is read or written by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// A composite model with boundary inputs and outputs, a driver and connections.
///
/// Every structural edit (adding nodes, variables or connections, replacing the driver)
/// bumps [`Assembly::revision`]. Together with the unique [`Assembly::id`] this keys
/// cached setups, so a cached setup is never reused for a changed model.
///
/// # Example
///
/// ```
/// use evalexpr_analytic::model::{Assembly, ExprComponent};
///
/// let mut model = Assembly::new("top")
///     .with(ExprComponent::new("a").input("x", 1.0).output("y", "2*x").unwrap())
///     .with(ExprComponent::new("b").input("x", 2.0).output("y", "3*x").unwrap());
/// let before = model.revision();
/// model.connect("a.y", "b.x").unwrap();
/// assert!(model.revision() > before);
/// assert_eq!(model.connection_to("b.x").unwrap().source, "a.y");
/// ```
pub struct Assembly {
    name: String,
    id: u64,
    revision: u64,
    inputs: Vec<Variable>,
    outputs: Vec<Variable>,
    values: HashMap<String, f64>,
    driver: Driver,
    connections: BTreeMap<String, Connection>,
}

impl fmt::Debug for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {} (id {}, rev {})", "Assembly".cyan(), self.name, self.id, self.revision)?;
        writeln!(f, "    {}: {:?}", "Inputs".cyan(), self.inputs)?;
        writeln!(f, "    {}: {:?}", "Outputs".cyan(), self.outputs)?;
        writeln!(f, "    {}: {} {:?}", "Driver".cyan(), self.driver.name(), self.driver.workflow())?;
        for connection in self.connections.values() {
            writeln!(
                f,
                "    {} <- {}",
                connection.target.green(),
                connection.expression
            )?;
        }
        writeln!(f, "}}")
    }
}

impl Assembly {
    /// Creates an empty assembly driven by a single-pass driver named `driver`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            revision: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            values: HashMap::new(),
            driver: Driver::run_once("driver"),
            connections: BTreeMap::new(),
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process-unique identifier of this assembly.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Structural revision, bumped by every structural edit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Variable] {
        &self.outputs
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Mutable access to the driver. Counts as a structural edit.
    pub fn driver_mut(&mut self) -> &mut Driver {
        self.touch();
        &mut self.driver
    }

    pub(crate) fn driver_untracked_mut(&mut self) -> &mut Driver {
        &mut self.driver
    }

    /// Replaces the driver, keeping nothing of the previous workflow.
    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.set_driver(driver);
        self
    }

    pub fn set_driver(&mut self, driver: Driver) {
        self.driver = driver;
        self.touch();
    }

    /// Appends a node to the driver's workflow (builder style).
    pub fn with(mut self, node: impl Into<Node>) -> Self {
        self.add(node);
        self
    }

    pub fn add(&mut self, node: impl Into<Node>) {
        self.driver.push(node);
        self.touch();
    }

    /// Declares a boundary input with its value (builder style).
    pub fn input(mut self, name: &str, value: f64) -> Self {
        self.add_input(Variable::new(name), value);
        self
    }

    pub fn input_with_units(mut self, name: &str, units: &str, value: f64) -> Self {
        self.add_input(Variable::with_units(name, units), value);
        self
    }

    /// Declares a boundary output (builder style).
    pub fn output(mut self, name: &str) -> Self {
        self.add_output(Variable::new(name));
        self
    }

    pub fn output_with_units(mut self, name: &str, units: &str) -> Self {
        self.add_output(Variable::with_units(name, units));
        self
    }

    pub fn add_input(&mut self, variable: Variable, value: f64) {
        self.values.insert(variable.name.clone(), value);
        self.inputs.push(variable);
        self.touch();
    }

    pub fn add_output(&mut self, variable: Variable) {
        self.outputs.push(variable);
        self.touch();
    }

    /// Sets the value of a boundary variable.
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), DerivativeError> {
        if !self.is_boundary(name) {
            return Err(DerivativeError::UnknownVariable(name.to_string()));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Connects `target` to `source_expr`, an expression of exactly one variable.
    ///
    /// Both the referenced source and the target must exist, either as a boundary variable
    /// (`x`) or as a variable of a direct child (`comp.x`, `sub.x`). Variables deeper inside
    /// a sub-model are reached through its boundary. A previous connection to the same
    /// target is replaced.
    pub fn connect(&mut self, source_expr: &str, target: &str) -> Result<(), DerivativeError> {
        let expression = Expression::new(source_expr)?;
        let source = expression.single_variable()?.to_string();
        for name in [source.as_str(), target] {
            let path = VarPath::parse(name);
            if path.len() > 2 || self.variable(&path).is_none() {
                return Err(DerivativeError::UnknownVariable(name.to_string()));
            }
        }
        self.connections.insert(
            target.to_string(),
            Connection {
                target: target.to_string(),
                source,
                expression,
            },
        );
        self.touch();
        Ok(())
    }

    /// Builder form of [`Assembly::connect`].
    pub fn connected(mut self, source_expr: &str, target: &str) -> Result<Self, DerivativeError> {
        self.connect(source_expr, target)?;
        Ok(self)
    }

    pub fn disconnect(&mut self, target: &str) -> Option<Connection> {
        let removed = self.connections.remove(target);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// The connection driving `target`, if any.
    pub fn connection_to(&self, target: &str) -> Option<&Connection> {
        self.connections.get(target)
    }

    /// All connections, ordered by target.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Returns `true` if some connection reads `name`.
    pub fn is_connection_source(&self, name: &str) -> bool {
        self.connections.values().any(|c| c.source == name)
    }

    pub fn is_boundary(&self, name: &str) -> bool {
        self.is_boundary_input(name) || self.outputs.iter().any(|v| v.name == name)
    }

    pub fn is_boundary_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|v| v.name == name)
    }

    /// Finds a node of this assembly by name, including nodes inside nested solvers.
    pub fn find_node(&self, name: &str) -> Option<&Node> {
        find_in(self.driver.workflow(), name)
    }

    pub fn component(&self, name: &str) -> Option<&dyn Component> {
        match self.find_node(name)? {
            Node::Component(component) => Some(component.as_ref()),
            _ => None,
        }
    }

    pub fn sub_model(&self, name: &str) -> Option<&Assembly> {
        match self.find_node(name)? {
            Node::SubModel(assembly) => Some(assembly.as_ref()),
            _ => None,
        }
    }

    /// Mutable access to a sub-model. Counts as a structural edit.
    pub fn sub_model_mut(&mut self, name: &str) -> Option<&mut Assembly> {
        self.touch();
        match find_in_mut(self.driver.workflow_mut(), name)? {
            Node::SubModel(assembly) => Some(assembly.as_mut()),
            _ => None,
        }
    }

    /// Looks up a variable by a path relative to this assembly.
    ///
    /// A one-segment path names a boundary variable; longer paths name a variable of a
    /// child component (`comp.x`) or descend into sub-models (`sub.comp.x`, `sub.x`).
    pub fn lookup(&self, path: &VarPath) -> Option<(&Variable, Direction)> {
        match path.segments() {
            [] => None,
            [boundary] => self
                .inputs
                .iter()
                .find(|v| &v.name == boundary)
                .map(|v| (v, Direction::Input))
                .or_else(|| {
                    self.outputs
                        .iter()
                        .find(|v| &v.name == boundary)
                        .map(|v| (v, Direction::Output))
                }),
            [head, rest @ ..] => match self.find_node(head)? {
                Node::Component(component) => match rest {
                    [name] => component
                        .find_input(name)
                        .map(|v| (v, Direction::Input))
                        .or_else(|| component.find_output(name).map(|v| (v, Direction::Output))),
                    _ => None,
                },
                Node::SubModel(assembly) => assembly.lookup(&path.tail()),
                Node::Driver(_) => None,
            },
        }
    }

    pub fn variable(&self, path: &VarPath) -> Option<&Variable> {
        self.lookup(path).map(|(variable, _)| variable)
    }

    /// Declared units of a variable, `None` if unknown or unitless.
    pub fn units_of(&self, name: &str) -> Option<&str> {
        self.variable(&VarPath::parse(name))?.units.as_deref()
    }

    /// Finds the assembly owning the connections that drive `path`.
    ///
    /// Descends into sub-models while the remaining path still names a variable of a
    /// node inside them. Returns the scope, its prefix relative to `self` and the name
    /// local to that scope.
    pub fn locate(&self, path: &VarPath) -> (&Assembly, VarPath, VarPath) {
        let mut scope = self;
        let mut prefix = VarPath::root();
        let mut local = path.clone();
        while local.len() >= 3 {
            match local.first().and_then(|head| scope.sub_model(head)) {
                Some(sub) => {
                    prefix = prefix.child(sub.name());
                    local = local.tail();
                    scope = sub;
                }
                None => break,
            }
        }
        (scope, prefix, local)
    }

    fn value_at(&self, path: &VarPath) -> Option<f64> {
        match path.segments() {
            [] => None,
            [boundary] => self.values.get(boundary).copied(),
            [head, rest @ ..] => match self.find_node(head)? {
                Node::Component(component) => match rest {
                    [name] => component.value(name),
                    _ => None,
                },
                Node::SubModel(assembly) => assembly.value_at(&path.tail()),
                Node::Driver(_) => None,
            },
        }
    }
}

/// Variables are read by dotted paths relative to the assembly.
impl Values for Assembly {
    fn value(&self, name: &str) -> Option<f64> {
        self.value_at(&VarPath::parse(name))
    }
}

fn find_in<'a>(workflow: &'a [Node], name: &str) -> Option<&'a Node> {
    for node in workflow {
        if node.name() == name {
            return Some(node);
        }
        if let Node::Driver(driver) = node {
            if let Some(found) = find_in(driver.workflow(), name) {
                return Some(found);
            }
        }
    }
    None
}

fn find_in_mut<'a>(workflow: &'a mut [Node], name: &str) -> Option<&'a mut Node> {
    for node in workflow.iter_mut() {
        if node.name() == name {
            return Some(node);
        }
        if let Node::Driver(driver) = node {
            if let Some(found) = find_in_mut(driver.workflow_mut(), name) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Driver, ExprComponent, SolverSpec};

    fn chain() -> Assembly {
        Assembly::new("top")
            .input("x", 4.0)
            .output("y")
            .with(ExprComponent::new("a").input("x", 1.0).output("y", "2*x").unwrap())
            .with(
                ExprComponent::new("b")
                    .input_with_units("x", "cm", 0.0)
                    .output_with_units("y", "m", "3*x")
                    .unwrap(),
            )
    }

    #[test]
    fn test_connect_validates_source_count() {
        let mut model = chain();
        assert!(model.connect("a.y", "b.x").is_ok());
        assert!(matches!(
            model.connect("a.y + a.x", "b.x"),
            Err(DerivativeError::Expression(_))
        ));
        assert!(matches!(
            model.connect("a.z", "b.x"),
            Err(DerivativeError::UnknownVariable(name)) if name == "a.z"
        ));
        assert!(model.connect("x", "a.x").is_ok());
        assert!(model.connect("b.y", "y").is_ok());
        assert!(model.is_connection_source("a.y"));
        assert_eq!(model.connections().count(), 3);
    }

    #[test]
    fn test_connect_stays_on_child_boundaries() {
        let inner = Assembly::new("sub")
            .output("y")
            .with(ExprComponent::new("c").input("x", 5.0).output("y", "x").unwrap());
        let mut model = chain().with(inner);
        let revision = model.revision();

        assert!(matches!(
            model.connect("sub.c.y", "b.x"),
            Err(DerivativeError::UnknownVariable(name)) if name == "sub.c.y"
        ));
        assert!(matches!(
            model.connect("a.y", "sub.c.x"),
            Err(DerivativeError::UnknownVariable(name)) if name == "sub.c.x"
        ));
        assert_eq!(model.revision(), revision);
        assert!(model.connect("sub.y", "b.x").is_ok());
    }

    #[test]
    fn test_sub_model_edit_bumps_revision() {
        let inner = Assembly::new("sub")
            .input("x", 0.0)
            .with(ExprComponent::new("c").input("x", 5.0).output("y", "x").unwrap());
        let mut model = chain().with(inner);

        let revision = model.revision();
        model
            .sub_model_mut("sub")
            .unwrap()
            .connect("x", "c.x")
            .unwrap();
        assert!(model.revision() > revision);
    }

    #[test]
    fn test_lookup_and_units() {
        let model = chain();
        let (variable, direction) = model.lookup(&VarPath::parse("b.x")).unwrap();
        assert_eq!(variable.name, "x");
        assert_eq!(direction, Direction::Input);
        assert_eq!(model.units_of("b.x"), Some("cm"));
        assert_eq!(model.units_of("a.y"), None);
        assert_eq!(model.lookup(&VarPath::parse("y")).unwrap().1, Direction::Output);
        assert!(model.lookup(&VarPath::parse("c.x")).is_none());
    }

    #[test]
    fn test_values_and_nested_lookup() {
        let inner = Assembly::new("sub")
            .input("x", 7.0)
            .with(ExprComponent::new("c").input("x", 5.0).output("y", "x").unwrap());
        let solver = Driver::solver("solver", SolverSpec::new())
            .with(ExprComponent::new("d").input("u", 2.0).output("v", "u").unwrap());
        let model = chain().with(inner).with(solver);

        assert_eq!(model.value("x"), Some(4.0));
        assert_eq!(model.value("a.x"), Some(1.0));
        assert_eq!(model.value("sub.x"), Some(7.0));
        assert_eq!(model.value("sub.c.x"), Some(5.0));
        assert_eq!(model.value("d.u"), Some(2.0));
        assert_eq!(model.value("nope.x"), None);

        let (scope, prefix, local) = model.locate(&VarPath::parse("sub.c.x"));
        assert_eq!(scope.name(), "sub");
        assert_eq!(prefix.dotted(), "sub");
        assert_eq!(local.dotted(), "c.x");

        let (scope, _, local) = model.locate(&VarPath::parse("sub.x"));
        assert_eq!(scope.name(), "top");
        assert_eq!(local.dotted(), "sub.x");
    }

    #[test]
    fn test_revision_and_id() {
        let mut model = chain();
        let other = chain();
        assert_ne!(model.id(), other.id());

        let revision = model.revision();
        model.set_value("x", 2.0).unwrap();
        assert_eq!(model.revision(), revision);
        model.connect("a.y", "b.x").unwrap();
        assert_eq!(model.revision(), revision + 1);
        model.disconnect("b.x");
        assert_eq!(model.revision(), revision + 2);
        assert!(model.disconnect("b.x").is_none());
        assert_eq!(model.revision(), revision + 2);
    }
}
