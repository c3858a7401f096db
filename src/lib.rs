//! Analytic gradients of hierarchical component models.
//!
//! This crate computes derivatives of objectives and constraints with respect to design
//! parameters for models made of components wired together by connections. Each
//! component supplies its local partial derivatives; the crate linearizes the connection
//! graph into a sparse-in-structure linear system and solves it, either in direct
//! (forward) or adjoint (reverse) mode. Expressions are parsed with
//! [evalexpr](https://github.com/ISibboI/evalexpr) and differentiated symbolically.
//!
//! # Features
//!
//! - Components with expression-defined outputs or custom local derivatives
//! - Nested sub-models and equation solvers
//! - Connections through single-variable expressions, with unit conversion
//! - Direct and adjoint formulations
//! - Gradient export to `Vec<Vec<f64>>`, `nalgebra` and (feature `ndarray`) `ndarray`
//!
//! # Example
//!
//! ```rust
//! use evalexpr_analytic::prelude::*;
//!
//! let mut model = Assembly::new("top")
//!     .with(ExprComponent::new("comp1").input("x", 3.0).output("y", "x^2").unwrap())
//!     .with(ExprComponent::new("comp2").input("x", 9.0).output("y", "2*x").unwrap())
//!     .connected("comp1.y", "comp2.x")
//!     .unwrap();
//! let problem = Problem::new()
//!     .parameter("comp1.x")
//!     .objective("f", "comp2.y")
//!     .unwrap()
//!     .constraint("g", "comp1.y <= 10")
//!     .unwrap();
//!
//! let config = DifferentiatorConfig::default().with_mode(Mode::Adjoint);
//! let mut analytic = Analytic::new(problem, config);
//! analytic.calc_gradient(&mut model).unwrap();
//!
//! assert_eq!(analytic.derivative("f", "comp1.x").unwrap(), 12.0); // 2 * 2x
//! assert_eq!(analytic.gradient("g").unwrap(), vec![6.0]);
//! ```

pub use config::{DifferentiatorConfig, Mode};
pub use differentiator::Analytic;
pub use errors::{ConfigError, DerivativeError, ErrorKind, ExpressionError, LookupKind, UnitError};
pub use expression::{Comparator, Constraint, Expression};
pub use units::{UnitConverter, UnitTable};

pub mod prelude {
    pub use crate::backends::matrix::GradientMatrix;
    pub use crate::config::{DifferentiatorConfig, Mode};
    pub use crate::differentiator::Analytic;
    pub use crate::errors::DerivativeError;
    pub use crate::expression::{Constraint, Expression};
    pub use crate::model::{Assembly, Component, Driver, ExprComponent, Problem, SolverSpec};
    pub use crate::units::{UnitConverter, UnitTable};
}

/// Assembly of the linear system
pub mod assembler;
/// Gradient export backends
pub mod backends {
    pub mod matrix;
}
/// Per-model setup cache
pub mod cache;
/// Differentiator settings
pub mod config;
/// Conversion from parsed expressions to internal AST
pub mod convert;
/// The analytic differentiator
pub mod differentiator;
/// Error types for the various failure modes
pub mod errors;
/// Expression tree representation and symbolic differentiation
pub mod expr;
/// Parsed expressions and constraints
pub mod expression;
/// Function rows of the system
pub mod functions;
/// Components, assemblies, drivers and problems
pub mod model;
/// Dotted variable paths
pub mod path;
/// Solution of the linear system
pub mod solve;
/// Shared type aliases and value lookup
pub mod types;
/// Unit conversion
pub mod units;
/// Enumeration of the unknowns
pub mod variables;
