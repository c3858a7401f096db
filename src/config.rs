//! Differentiator configuration.

use std::fmt;
use std::str::FromStr;

use crate::errors::ConfigError;

/// Formulation of the linear system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Unknowns are component outputs; one solve per parameter.
    #[default]
    Direct,
    /// Unknowns are component inputs; one solve per function.
    Adjoint,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "forward" => Ok(Mode::Direct),
            "adjoint" | "reverse" => Ok(Mode::Adjoint),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Direct => write!(f, "direct"),
            Mode::Adjoint => write!(f, "adjoint"),
        }
    }
}

/// Settings of an [`Analytic`](crate::Analytic) differentiator.
///
/// ```
/// use evalexpr_analytic::{DifferentiatorConfig, Mode};
///
/// let config = DifferentiatorConfig::default()
///     .with_mode("adjoint".parse().unwrap())
///     .with_pivot_tolerance(1e-10)
///     .unwrap();
/// assert_eq!(config.mode, Mode::Adjoint);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentiatorConfig {
    pub mode: Mode,
    /// Smallest accepted ratio between the smallest and largest LU pivot magnitudes.
    pub pivot_tolerance: f64,
}

impl Default for DifferentiatorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Direct,
            pivot_tolerance: 1e-12,
        }
    }
}

impl DifferentiatorConfig {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_pivot_tolerance(mut self, tolerance: f64) -> Result<Self, ConfigError> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::PivotTolerance(tolerance));
        }
        self.pivot_tolerance = tolerance;
        Ok(self)
    }
}
