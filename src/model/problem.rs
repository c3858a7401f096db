//! Design parameters and the functions to differentiate.

use std::collections::BTreeSet;

use crate::errors::DerivativeError;
use crate::expression::{Constraint, Expression};

/// A function whose gradient is requested.
#[derive(Debug, Clone)]
pub enum Function {
    Objective(Expression),
    Constraint(Constraint),
}

impl Function {
    /// Variables the function reads, sorted.
    pub fn variables(&self) -> Vec<String> {
        match self {
            Function::Objective(expression) => expression.variables().to_vec(),
            Function::Constraint(constraint) => constraint.variables(),
        }
    }
}

/// The parameters, objectives and constraints handled by a differentiator.
///
/// Gradient rows follow [`Problem::function_names`]: all objectives first, then all
/// constraints, each group in insertion order. Columns follow [`Problem::parameters`].
///
/// # Example
///
/// ```
/// use evalexpr_analytic::model::Problem;
///
/// let problem = Problem::new()
///     .parameter("comp1.x")
///     .constraint("c1", "comp2.y <= 4")
///     .unwrap()
///     .objective("f", "comp2.y")
///     .unwrap();
/// assert_eq!(problem.function_names(), vec!["f".to_string(), "c1".to_string()]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Problem {
    parameters: Vec<String>,
    objectives: Vec<(String, Expression)>,
    constraints: Vec<(String, Constraint)>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a design parameter, a fully qualified input path. Duplicates are ignored.
    pub fn parameter(mut self, name: &str) -> Self {
        if !self.parameters.iter().any(|p| p == name) {
            self.parameters.push(name.to_string());
        }
        self
    }

    pub fn objective(mut self, name: &str, expression: &str) -> Result<Self, DerivativeError> {
        self.objectives
            .push((name.to_string(), Expression::new(expression)?));
        Ok(self)
    }

    pub fn constraint(mut self, name: &str, relation: &str) -> Result<Self, DerivativeError> {
        self.constraints
            .push((name.to_string(), Constraint::new(relation)?));
        Ok(self)
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Function names in gradient row order.
    pub fn function_names(&self) -> Vec<String> {
        self.objectives
            .iter()
            .map(|(name, _)| name.clone())
            .chain(self.constraints.iter().map(|(name, _)| name.clone()))
            .collect()
    }

    /// Functions in gradient row order.
    pub fn functions(&self) -> Vec<Function> {
        self.objectives
            .iter()
            .map(|(_, expression)| Function::Objective(expression.clone()))
            .chain(
                self.constraints
                    .iter()
                    .map(|(_, constraint)| Function::Constraint(constraint.clone())),
            )
            .collect()
    }

    pub fn n_functions(&self) -> usize {
        self.objectives.len() + self.constraints.len()
    }

    /// Every variable read by any function.
    pub fn referenced_variables(&self) -> BTreeSet<String> {
        self.functions()
            .iter()
            .flat_map(Function::variables)
            .collect()
    }
}
