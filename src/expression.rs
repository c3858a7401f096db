//! Differentiable expressions over named model variables.
//!
//! This module provides [`Expression`], used for connection expressions and objectives, and
//! [`Constraint`], a relation between two expressions. Both are parsed once with evalexpr,
//! converted to the symbolic [`Expr`] tree and differentiated symbolically on creation, so
//! repeated gradient requests only evaluate the stored derivative trees.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use evalexpr_analytic::Expression;
//!
//! let expr = Expression::new("2*comp1.y + comp2.y^2").unwrap();
//! let values: HashMap<String, f64> = [("comp2.y".to_string(), 3.0)].into_iter().collect();
//! let wrt = vec!["comp1.y".to_string(), "comp2.y".to_string()];
//! let gradient = expr.gradient(&wrt, &values).unwrap();
//! assert_eq!(gradient["comp1.y"], 2.0);
//! assert_eq!(gradient["comp2.y"], 6.0);
//! ```

use std::collections::HashMap;
use std::fmt;

use colored::Colorize;
use evalexpr::{build_operator_tree, Node};
use itertools::Itertools;

use crate::convert::{build_ast, build_relation};
use crate::errors::ExpressionError;
use crate::expr::Expr;
use crate::types::{PartialMap, Values};

/// A parsed expression together with its simplified first order derivatives.
///
/// Derivatives are stored for every variable the expression references. The derivative
/// with respect to any other variable is zero.
#[derive(Clone)]
pub struct Expression {
    expression_str: String,
    ast: Box<Expr>,
    derivatives_first_order: HashMap<String, Box<Expr>>,
    sorted_variables: Vec<String>,
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {}", "Expression".cyan(), self.expression_str)?;
        writeln!(f, "    {}: {}", "Tree".cyan(), self.ast)?;
        writeln!(f, "    {}: {:?}", "Variables".cyan(), self.sorted_variables)?;
        for name in &self.sorted_variables {
            if let Some(derivative) = self.derivatives_first_order.get(name) {
                writeln!(f, "    {} {}: {}", "d/d".cyan(), name, derivative)?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression_str)
    }
}

impl Expression {
    /// Parses an expression string such as `"2*comp1.y + comp2.y^2"`.
    ///
    /// # Errors
    /// Returns an error if evalexpr cannot parse the string or the parsed tree uses an
    /// operator or function outside the supported set.
    pub fn new(expression_str: impl Into<String>) -> Result<Self, ExpressionError> {
        let expression_str = expression_str.into();
        let node: Node = build_operator_tree(&expression_str)?;
        let ast = build_ast(&node)?;
        Ok(Self::from_expr(expression_str, ast))
    }

    /// Wraps an already built expression tree. `label` is used for display only.
    pub fn from_expr(label: impl Into<String>, ast: Expr) -> Self {
        let sorted_variables: Vec<String> = ast.variables().into_iter().collect();
        let derivatives_first_order = sorted_variables
            .iter()
            .map(|name| (name.clone(), ast.derivative(name).simplify()))
            .collect();
        Self {
            expression_str: label.into(),
            ast: ast.simplify(),
            derivatives_first_order,
            sorted_variables,
        }
    }

    /// The expression as it was written.
    pub fn as_str(&self) -> &str {
        &self.expression_str
    }

    /// The simplified expression tree.
    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Names of the referenced variables, sorted alphabetically.
    pub fn variables(&self) -> &[String] {
        &self.sorted_variables
    }

    /// Returns `true` if the expression references `name`.
    pub fn references(&self, name: &str) -> bool {
        self.derivatives_first_order.contains_key(name)
    }

    /// Returns the only variable the expression reads.
    ///
    /// # Errors
    /// `ExpressionError::SourceCount` if the expression reads zero or several variables.
    pub fn single_variable(&self) -> Result<&str, ExpressionError> {
        match self.sorted_variables.as_slice() {
            [only] => Ok(only.as_str()),
            names => Err(ExpressionError::SourceCount {
                expression: self.expression_str.clone(),
                found: names.len(),
            }),
        }
    }

    /// Evaluates the expression.
    pub fn eval(&self, values: &dyn Values) -> Result<f64, ExpressionError> {
        self.ast.eval(values)
    }

    /// Partial derivative with respect to `wrt`, zero if the variable is not referenced.
    ///
    /// Values are only queried when the derivative is not constant.
    pub fn derivative(&self, wrt: &str, values: &dyn Values) -> Result<f64, ExpressionError> {
        match self.derivatives_first_order.get(wrt) {
            Some(derivative) => derivative.eval(values),
            None => Ok(0.0),
        }
    }

    /// Partial derivatives with respect to every name in `wrt` the expression references.
    ///
    /// Names in `wrt` that are not referenced are left out of the map (their partial is zero).
    pub fn gradient(&self, wrt: &[String], values: &dyn Values) -> Result<PartialMap, ExpressionError> {
        wrt.iter()
            .filter_map(|name| {
                self.derivatives_first_order
                    .get(name)
                    .map(|derivative| Ok((name.clone(), derivative.eval(values)?)))
            })
            .collect()
    }
}

/// Comparison operator of a [`Constraint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
}

impl Comparator {
    /// Orientation of the constraint: `-1.0` for `>` and `>=`, `+1.0` otherwise.
    ///
    /// A constraint contributes `sign * lhs - sign * rhs`, so `a >= b` is treated as `b - a <= 0`.
    pub fn sign(&self) -> f64 {
        match self {
            Comparator::Greater | Comparator::GreaterEqual => -1.0,
            Comparator::Less | Comparator::LessEqual | Comparator::Equal => 1.0,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparator::Less => "<",
            Comparator::LessEqual => "<=",
            Comparator::Greater => ">",
            Comparator::GreaterEqual => ">=",
            Comparator::Equal => "=",
        };
        write!(f, "{symbol}")
    }
}

/// Partial derivatives of both sides of a constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintGradient {
    pub lhs: PartialMap,
    pub rhs: PartialMap,
    pub comparator: Comparator,
}

impl ConstraintGradient {
    /// Combines both sides into `sign * d(lhs) - sign * d(rhs)`.
    pub fn combined(&self) -> PartialMap {
        let sign = self.comparator.sign();
        let mut combined = PartialMap::new();
        for (name, value) in &self.lhs {
            *combined.entry(name.clone()).or_insert(0.0) += sign * value;
        }
        for (name, value) in &self.rhs {
            *combined.entry(name.clone()).or_insert(0.0) -= sign * value;
        }
        combined
    }
}

/// A relation `lhs <comparator> rhs` between two expressions.
#[derive(Clone)]
pub struct Constraint {
    constraint_str: String,
    lhs: Expression,
    comparator: Comparator,
    rhs: Expression,
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {}", "Constraint".cyan(), self.constraint_str)?;
        writeln!(f, "    {}: {}", "Lhs".cyan(), self.lhs.ast())?;
        writeln!(f, "    {}: {}", "Comparator".cyan(), self.comparator)?;
        writeln!(f, "    {}: {}", "Rhs".cyan(), self.rhs.ast())?;
        writeln!(f, "}}")
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint_str)
    }
}

impl Constraint {
    /// Parses a relation such as `"comp.y >= 2*x"` or `"a.y = b.x"`.
    pub fn new(constraint_str: impl Into<String>) -> Result<Self, ExpressionError> {
        let constraint_str = constraint_str.into();
        let node: Node = build_operator_tree(&constraint_str)?;
        let (lhs, comparator, rhs) = build_relation(&node)?;
        Ok(Self {
            lhs: Expression::from_expr(lhs.to_string(), lhs),
            rhs: Expression::from_expr(rhs.to_string(), rhs),
            comparator,
            constraint_str,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.constraint_str
    }

    pub fn lhs(&self) -> &Expression {
        &self.lhs
    }

    pub fn rhs(&self) -> &Expression {
        &self.rhs
    }

    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    /// Variables referenced on either side, sorted and deduplicated.
    pub fn variables(&self) -> Vec<String> {
        self.lhs
            .variables()
            .iter()
            .merge(self.rhs.variables().iter())
            .dedup()
            .cloned()
            .collect()
    }

    /// Gradients of both sides with respect to `wrt`.
    pub fn gradient(
        &self,
        wrt: &[String],
        values: &dyn Values,
    ) -> Result<ConstraintGradient, ExpressionError> {
        Ok(ConstraintGradient {
            lhs: self.lhs.gradient(wrt, values)?,
            rhs: self.rhs.gradient(wrt, values)?,
            comparator: self.comparator,
        })
    }
}
