//! Error types for the evalexpr-analytic crate.
//!
//! This module defines the failure modes of every layer of the crate:
//!
//! - `ConvertError`: Errors during conversion from the evalexpr AST to the internal expression tree
//! - `ExpressionError`: Errors when building or evaluating connection, objective and constraint expressions
//! - `UnitError`: Errors raised by the unit conversion service
//! - `ConfigError`: Errors when parsing configuration values
//! - `DerivativeError`: Errors raised while enumerating, assembling or solving the linear system
//!
//! `DerivativeError` is classified by [`ErrorKind`] into structural, numerical and lookup
//! failures. Structural failures depend only on the model and never go away by retrying.

use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

/// Errors that can occur during conversion from the evalexpr AST to our internal expression tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    /// Error when encountering an operator that is not supported by our implementation
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// Error when encountering a function that is not supported by our implementation
    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),
    /// Error when the root node does not have exactly one child
    #[error("Expected single child for root node: {0}")]
    RootNode(String),
    /// Error when a constant value is not numeric
    #[error("Expected numeric constant: {0}")]
    ConstOperator(String),
    /// Error when an operator node does not carry the expected number of operands
    #[error("Expected {expected} operands for {operator}, got {got}")]
    Arity {
        operator: String,
        expected: usize,
        got: usize,
    },
    /// Error when a relation (`<`, `>=`, `==`, ...) was expected but not found
    #[error("Expected a relation, found: {0}")]
    NotARelation(String),
}

/// Errors that can occur when building or evaluating an expression.
#[derive(Debug, Error)]
pub enum ExpressionError {
    /// Error when parsing the expression string with evalexpr
    #[error("Failed to build Evalexpr AST")]
    BuildEvalexprError(#[from] EvalexprError<DefaultNumericTypes>),
    /// Error when converting from the evalexpr AST to our internal representation
    #[error("Failed to convert expression: {0}")]
    Convert(#[from] ConvertError),
    /// A variable needed to evaluate the expression has no value
    #[error("No value available for variable: {0}")]
    MissingValue(String),
    /// A connection expression must read exactly one source variable
    #[error("Expression '{expression}' must reference exactly one variable, found {found}")]
    SourceCount { expression: String, found: usize },
}

/// Errors raised by the unit conversion service.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum UnitError {
    /// The unit string could not be parsed or names an unregistered unit
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),
    /// The two units measure different physical dimensions
    #[error("Incompatible units: cannot convert '{from}' to '{to}'")]
    Incompatible { from: String, to: String },
}

/// Errors raised when parsing configuration values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown differentiation mode '{0}', expected 'direct' or 'adjoint'")]
    UnknownMode(String),
    #[error("Pivot tolerance must be finite and non-negative, got {0}")]
    PivotTolerance(f64),
}

/// Broad classification of a [`DerivativeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The model lies outside the supported class. Deterministic, retrying cannot succeed.
    Structural,
    /// The assembled linear system could not be solved at this point.
    Numerical,
    /// A name passed to an accessor is unknown, or no gradient has been computed.
    Lookup,
}

/// Which list a failed lookup was performed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    Function,
    Parameter,
}

impl std::fmt::Display for LookupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupKind::Function => write!(f, "function"),
            LookupKind::Parameter => write!(f, "parameter"),
        }
    }
}

/// Errors raised by the analytic differentiator.
#[derive(Debug, Error)]
pub enum DerivativeError {
    /// A nested driver in a workflow is not an equality-constraint solver
    #[error("Only nested solvers are supported: driver '{name}' is of kind '{kind}'")]
    UnsupportedDriver { name: String, kind: String },
    /// A sub-model is driven by something other than a single-pass run
    #[error("Nested drivers unsupported: sub-model '{0}' is not run once")]
    NestedDriver(String),
    /// A connection source could not be mapped to a parameter or an unknown
    #[error("Cannot resolve source '{source_name}' feeding '{target}'")]
    UnresolvedSource { target: String, source_name: String },
    /// A name does not refer to any variable in the model
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    /// No side of a solver equality constraint is one of the solver's parameters
    #[error("No independent in equation '{constraint}' of solver '{solver}'")]
    NoIndependent { solver: String, constraint: String },
    /// A component did not supply a partial derivative the assembly needs
    #[error("Component '{component}' provides no derivative of '{output}' with respect to '{input}'")]
    MissingLocalDerivative {
        component: String,
        output: String,
        input: String,
    },
    /// The equation counter diverged from the variable list ordering
    #[error("Equation for '{name}' opened at row {expected}, but the variable list places it at {found}")]
    EquationOrder {
        name: String,
        expected: usize,
        found: usize,
    },
    /// Matrix shapes do not agree
    #[error("Shape mismatch in {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },
    /// A component failed to produce its local derivatives
    #[error("Component '{name}' failed: {message}")]
    Component { name: String, message: String },
    /// Expression build or evaluation failure
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    /// Unit conversion failure
    #[error(transparent)]
    Units(#[from] UnitError),
    /// The linear system is singular or nearly so
    #[error("Singular linear system at unknown '{unknown}' (pivot {pivot:e})")]
    SingularSystem { unknown: String, pivot: f64 },
    /// A function or parameter name is not part of the problem
    #[error("{kind} not found: {name}")]
    NotFound { kind: LookupKind, name: String },
    /// No gradient is available, `calc_gradient` has not succeeded yet
    #[error("No gradient has been computed")]
    NoGradient,
}

impl DerivativeError {
    /// Returns the broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DerivativeError::SingularSystem { .. } => ErrorKind::Numerical,
            DerivativeError::NotFound { .. } | DerivativeError::NoGradient => ErrorKind::Lookup,
            _ => ErrorKind::Structural,
        }
    }

    /// Returns `true` for errors caused by the model structure.
    pub fn is_structural(&self) -> bool {
        self.kind() == ErrorKind::Structural
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = DerivativeError::SingularSystem {
            unknown: "comp.y".to_string(),
            pivot: 0.0,
        };
        assert_eq!(err.kind(), ErrorKind::Numerical);

        let err = DerivativeError::NotFound {
            kind: LookupKind::Function,
            name: "f".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Lookup);
        assert_eq!(err.to_string(), "function not found: f");

        let err = DerivativeError::UnsupportedDriver {
            name: "opt".to_string(),
            kind: "doe".to_string(),
        };
        assert!(err.is_structural());
        assert!(err.to_string().starts_with("Only nested solvers are supported"));
    }

    #[test]
    fn test_from_lower_layers() {
        let err: DerivativeError = UnitError::UnknownUnit("furlong".to_string()).into();
        assert!(err.is_structural());
        assert_eq!(err.to_string(), "Unknown unit: furlong");

        let err: DerivativeError = ExpressionError::MissingValue("x".to_string()).into();
        assert!(matches!(
            err,
            DerivativeError::Expression(ExpressionError::MissingValue(_))
        ));
    }
}
