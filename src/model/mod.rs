//! The model hierarchy the differentiator walks.
//!
//! An [`Assembly`] owns boundary variables, a [`Driver`] whose workflow holds
//! [`Node`]s (components, sub-models and nested drivers) and a table of connections.
//! A [`Problem`] names the design parameters and the functions to differentiate.

mod assembly;
mod component;
pub(crate) mod edges;
mod node;
mod problem;

pub use assembly::{Assembly, Connection, Direction};
pub use component::{Component, ExprComponent, LocalDerivatives, Variable};
pub use edges::{EdgeDict, Edges, SolverMap};
pub use node::{Driver, DriverKind, Node, SolverSpec};
pub use problem::{Function, Problem};
