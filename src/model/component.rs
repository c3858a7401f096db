//! Terminal components and their local derivatives.

use std::collections::HashMap;
use std::fmt;

use colored::Colorize;
use itertools::Itertools;

use crate::errors::DerivativeError;
use crate::expression::Expression;

/// A named scalar variable on a component or sub-model boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    pub name: String,
    pub units: Option<String>,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: None,
        }
    }

    pub fn with_units(name: impl Into<String>, units: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Some(units.into()),
        }
    }
}

/// Partial derivatives of a component's outputs with respect to its inputs.
///
/// Keyed by `(output, input)` local names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalDerivatives {
    first_order: HashMap<(String, String), f64>,
}

impl LocalDerivatives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `d output / d input`.
    pub fn set(&mut self, output: &str, input: &str, value: f64) {
        self.first_order
            .insert((output.to_string(), input.to_string()), value);
    }

    pub fn get(&self, output: &str, input: &str) -> Option<f64> {
        self.first_order
            .get(&(output.to_string(), input.to_string()))
            .copied()
    }

    /// Like [`LocalDerivatives::get`], but a missing pair is a structural error.
    pub fn require(&self, component: &str, output: &str, input: &str) -> Result<f64, DerivativeError> {
        self.get(output, input)
            .ok_or_else(|| DerivativeError::MissingLocalDerivative {
                component: component.to_string(),
                output: output.to_string(),
                input: input.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.first_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_order.is_empty()
    }
}

/// A terminal node of a workflow that can supply its own first derivatives.
pub trait Component {
    fn name(&self) -> &str;

    fn inputs(&self) -> &[Variable];

    fn outputs(&self) -> &[Variable];

    /// Current value of a local input or output.
    fn value(&self, name: &str) -> Option<f64>;

    /// Computes `d output / d input` at the current point.
    ///
    /// Called at most once per gradient pass. Every (output, input) pair that the
    /// connection graph needs must be present in the result.
    fn first_derivatives(&mut self) -> Result<LocalDerivatives, DerivativeError>;

    fn find_input(&self, name: &str) -> Option<&Variable> {
        self.inputs().iter().find(|v| v.name == name)
    }

    fn find_output(&self, name: &str) -> Option<&Variable> {
        self.outputs().iter().find(|v| v.name == name)
    }
}

/// A component whose outputs are explicit expressions of its inputs.
///
/// Local derivatives are computed symbolically from the output expressions.
///
/// # Example
///
/// ```
/// use evalexpr_analytic::model::{Component, ExprComponent};
///
/// let mut comp = ExprComponent::new("paraboloid")
///     .input("x", 3.0)
///     .input("y", 1.0)
///     .output("f", "x^2 + x*y")
///     .unwrap();
/// comp.execute().unwrap();
/// assert_eq!(comp.value("f"), Some(12.0));
///
/// let derivatives = comp.first_derivatives().unwrap();
/// assert_eq!(derivatives.get("f", "x"), Some(7.0));
/// assert_eq!(derivatives.get("f", "y"), Some(3.0));
/// ```
#[derive(Clone)]
pub struct ExprComponent {
    name: String,
    inputs: Vec<Variable>,
    outputs: Vec<Variable>,
    equations: Vec<Expression>,
    values: HashMap<String, f64>,
}

impl fmt::Debug for ExprComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {}", "Component".cyan(), self.name)?;
        writeln!(
            f,
            "    {}: [{}]",
            "Inputs".cyan(),
            self.inputs.iter().map(|v| &v.name).join(", ")
        )?;
        for (output, equation) in self.outputs.iter().zip(&self.equations) {
            writeln!(f, "    {} = {}", output.name.green(), equation)?;
        }
        writeln!(f, "}}")
    }
}

impl ExprComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            equations: Vec::new(),
            values: HashMap::new(),
        }
    }

    /// Declares an input with its initial value.
    pub fn input(self, name: &str, value: f64) -> Self {
        self.declare_input(Variable::new(name), value)
    }

    /// Declares an input measured in `units`.
    pub fn input_with_units(self, name: &str, units: &str, value: f64) -> Self {
        self.declare_input(Variable::with_units(name, units), value)
    }

    fn declare_input(mut self, variable: Variable, value: f64) -> Self {
        self.values.insert(variable.name.clone(), value);
        self.inputs.push(variable);
        self
    }

    /// Declares an output computed by `equation`, which may only read declared inputs.
    pub fn output(self, name: &str, equation: &str) -> Result<Self, DerivativeError> {
        self.declare_output(Variable::new(name), equation)
    }

    /// Declares an output measured in `units`.
    pub fn output_with_units(
        self,
        name: &str,
        units: &str,
        equation: &str,
    ) -> Result<Self, DerivativeError> {
        self.declare_output(Variable::with_units(name, units), equation)
    }

    fn declare_output(mut self, variable: Variable, equation: &str) -> Result<Self, DerivativeError> {
        let equation = Expression::new(equation)?;
        if let Some(unknown) = equation
            .variables()
            .iter()
            .find(|name| self.find_input(name).is_none())
        {
            return Err(DerivativeError::UnknownVariable(format!("{}.{unknown}", self.name)));
        }
        self.outputs.push(variable);
        self.equations.push(equation);
        Ok(self)
    }

    /// Sets the value of a declared input.
    pub fn set_input(&mut self, name: &str, value: f64) -> Result<(), DerivativeError> {
        if self.find_input(name).is_none() {
            return Err(DerivativeError::UnknownVariable(format!("{}.{name}", self.name)));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Evaluates all outputs from the current inputs.
    pub fn execute(&mut self) -> Result<(), DerivativeError> {
        for (output, equation) in self.outputs.iter().zip(&self.equations) {
            let value = equation.eval(&self.values)?;
            self.values.insert(output.name.clone(), value);
        }
        Ok(())
    }
}

impl Component for ExprComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    fn outputs(&self) -> &[Variable] {
        &self.outputs
    }

    fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    fn first_derivatives(&mut self) -> Result<LocalDerivatives, DerivativeError> {
        let mut derivatives = LocalDerivatives::new();
        for (output, equation) in self.outputs.iter().zip(&self.equations) {
            for input in &self.inputs {
                let value = equation.derivative(&input.name, &self.values)?;
                derivatives.set(&output.name, &input.name, value);
            }
        }
        Ok(derivatives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_component_derivatives() {
        let mut comp = ExprComponent::new("comp")
            .input("x1", 2.0)
            .input("x2", 5.0)
            .output("y", "3*x1")
            .unwrap()
            .output("z", "x1*x2")
            .unwrap();
        comp.execute().unwrap();
        assert_eq!(comp.value("y"), Some(6.0));
        assert_eq!(comp.value("z"), Some(10.0));

        let derivatives = comp.first_derivatives().unwrap();
        assert_eq!(derivatives.len(), 4);
        assert_eq!(derivatives.get("y", "x1"), Some(3.0));
        assert_eq!(derivatives.get("y", "x2"), Some(0.0));
        assert_eq!(derivatives.get("z", "x1"), Some(5.0));
        assert_eq!(derivatives.get("z", "x2"), Some(2.0));
    }

    #[test]
    fn test_output_must_read_inputs() {
        let result = ExprComponent::new("comp").input("x", 1.0).output("y", "x + w");
        assert!(matches!(
            result,
            Err(DerivativeError::UnknownVariable(name)) if name == "comp.w"
        ));
    }

    #[test]
    fn test_missing_pair_is_structural() {
        let derivatives = LocalDerivatives::new();
        let err = derivatives.require("comp", "y", "x").unwrap_err();
        assert!(err.is_structural());
        assert!(matches!(err, DerivativeError::MissingLocalDerivative { .. }));
    }

    #[test]
    fn test_set_input() {
        let mut comp = ExprComponent::new("comp")
            .input("x", 1.0)
            .output("y", "x^2")
            .unwrap();
        comp.set_input("x", 3.0).unwrap();
        comp.execute().unwrap();
        assert_eq!(comp.value("y"), Some(9.0));
        assert!(comp.set_input("nope", 1.0).is_err());
    }
}
