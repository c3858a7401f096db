use std::collections::{BTreeMap, HashMap};

/// Sparse map from variable name to partial derivative.
///
/// Variables that do not appear in the map have a zero partial derivative.
pub type PartialMap = HashMap<String, f64>;

/// Source of current variable values used when evaluating expressions and their derivatives.
///
/// Linear expressions never query it; non-linear ones ask for the values of the
/// variables their derivatives still depend on.
pub trait Values {
    /// Returns the current value of `name`, or `None` if it is unknown.
    fn value(&self, name: &str) -> Option<f64>;
}

impl Values for HashMap<String, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Values for BTreeMap<String, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// A `Values` source that knows no variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoValues;

impl Values for NoValues {
    fn value(&self, _name: &str) -> Option<f64> {
        None
    }
}
