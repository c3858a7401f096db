//! Solution of the assembled system.
//!
//! Direct mode solves `LHS · X = RHS` for all parameters at once and forms
//! `EQS_zero + EQS · X`. Adjoint mode solves `LHSᵀ · Λ = EQSᵀ` for all functions at once
//! and forms `EQS_zero + Λᵀ · RHS`. Both yield the `n_func × n_param` gradient.

use nalgebra::{DMatrix, Dyn, LU};

use crate::assembler::LinearSystem;
use crate::config::Mode;
use crate::errors::DerivativeError;
use crate::variables::VariableList;

/// Solves `system` and returns the gradient, rows per function, columns per parameter.
///
/// # Errors
/// - `ShapeMismatch` if the matrices disagree with each other or with `variables`
/// - `SingularSystem` if the smallest LU pivot is below `tolerance` relative to the largest
pub fn solve(
    system: &LinearSystem,
    mode: Mode,
    variables: &VariableList,
    tolerance: f64,
) -> Result<DMatrix<f64>, DerivativeError> {
    check_shapes(system, variables.len())?;
    if system.n_var() == 0 || system.n_param() == 0 || system.n_func() == 0 {
        return Ok(system.eqs_zero.clone());
    }

    match mode {
        Mode::Direct => {
            let lu = system.lhs.clone().lu();
            check_pivots(&lu, variables, tolerance)?;
            let x = lu.solve(&system.rhs).ok_or_else(|| singular(variables, 0, 0.0))?;
            Ok(&system.eqs_zero + &system.eqs * x)
        }
        Mode::Adjoint => {
            let lu = system.lhs.transpose().lu();
            check_pivots(&lu, variables, tolerance)?;
            let lambda = lu
                .solve(&system.eqs.transpose())
                .ok_or_else(|| singular(variables, 0, 0.0))?;
            Ok(&system.eqs_zero + lambda.transpose() * &system.rhs)
        }
    }
}

fn check_shapes(system: &LinearSystem, n_var: usize) -> Result<(), DerivativeError> {
    let n_param = system.n_param();
    let n_func = system.n_func();
    let expected = [
        ("LHS", (n_var, n_var), system.lhs.shape()),
        ("RHS", (n_var, n_param), system.rhs.shape()),
        ("EQS", (n_func, n_var), system.eqs.shape()),
        ("EQS_zero", (n_func, n_param), system.eqs_zero.shape()),
    ];
    match expected.into_iter().find(|(_, want, got)| want != got) {
        Some((what, expected, got)) => Err(DerivativeError::ShapeMismatch { what, expected, got }),
        None => Ok(()),
    }
}

fn check_pivots(lu: &LU<f64, Dyn, Dyn>, variables: &VariableList, tolerance: f64) -> Result<(), DerivativeError> {
    let u = lu.u();
    let pivots = u.diagonal();
    let largest = pivots.iter().fold(0.0_f64, |m, p| m.max(p.abs()));
    let Some((i, smallest)) = pivots
        .iter()
        .map(|p| p.abs())
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
    else {
        return Ok(());
    };
    // NaN pivots fail the comparison as well
    if !(largest > 0.0 && smallest / largest >= tolerance) {
        return Err(singular(variables, i, smallest));
    }
    Ok(())
}

fn singular(variables: &VariableList, i: usize, pivot: f64) -> DerivativeError {
    DerivativeError::SingularSystem {
        unknown: variables.name(i).unwrap_or_default().to_string(),
        pivot,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn variables(names: &[&str]) -> VariableList {
        let mut list = VariableList::new();
        for name in names {
            list.push(name.to_string());
        }
        list
    }

    fn chain_system() -> LinearSystem {
        LinearSystem {
            lhs: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, -3.0, 1.0]),
            rhs: DMatrix::from_row_slice(2, 1, &[2.0, 0.0]),
            eqs: DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
            eqs_zero: DMatrix::zeros(1, 1),
        }
    }

    #[test]
    fn test_direct_solve() {
        let gradient = solve(&chain_system(), Mode::Direct, &variables(&["a.y", "b.y"]), 1e-12).unwrap();
        assert_relative_eq!(gradient[(0, 0)], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_adjoint_solve() {
        let system = LinearSystem {
            lhs: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, -2.0, 1.0]),
            rhs: DMatrix::from_row_slice(2, 1, &[1.0, 0.0]),
            eqs: DMatrix::from_row_slice(1, 2, &[0.0, 3.0]),
            eqs_zero: DMatrix::zeros(1, 1),
        };
        let gradient = solve(&system, Mode::Adjoint, &variables(&["a.x", "b.x"]), 1e-12).unwrap();
        assert_relative_eq!(gradient[(0, 0)], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_system_returns_eqs_zero() {
        let mut system = LinearSystem::zeros(0, 2, 1);
        system.eqs_zero[(0, 1)] = 4.0;
        let gradient = solve(&system, Mode::Direct, &VariableList::new(), 1e-12).unwrap();
        assert_eq!(gradient, DMatrix::from_row_slice(1, 2, &[0.0, 4.0]));
    }

    #[test]
    fn test_singular_system() {
        let system = LinearSystem {
            lhs: DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]),
            rhs: DMatrix::from_row_slice(2, 1, &[1.0, 0.0]),
            eqs: DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            eqs_zero: DMatrix::zeros(1, 1),
        };
        let err = solve(&system, Mode::Direct, &variables(&["u", "v"]), 1e-12).unwrap_err();
        assert!(matches!(err, DerivativeError::SingularSystem { ref unknown, .. } if unknown == "v"));
    }

    #[test]
    fn test_shape_mismatch() {
        let mut system = chain_system();
        system.eqs = DMatrix::zeros(1, 3);
        assert!(matches!(
            solve(&system, Mode::Direct, &variables(&["a.y", "b.y"]), 1e-12),
            Err(DerivativeError::ShapeMismatch { what: "EQS", .. })
        ));
    }
}
