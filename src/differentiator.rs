//! The analytic differentiator.
//!
//! [`Analytic`] linearizes a model around its current values and solves for the gradient
//! of every function of a [`Problem`] with respect to its parameters:
//!
//! 1. `setup` enumerates the unknowns and builds the static function rows, once per
//!    model structure and mode. The result is cached.
//! 2. `calc_gradient` collects the local derivatives of every participating component,
//!    assembles `LHS`, `RHS`, `EQS` and `EQS_zero` and solves the system.
//! 3. `derivative` and `gradient` read the result by name.

use std::collections::HashMap;
use std::fmt;

use colored::Colorize;
use nalgebra::DMatrix;

use crate::assembler::{collect_local_derivatives, LinearSystem};
use crate::backends::matrix::{export, GradientMatrix};
use crate::cache::{Setup, SetupCache, SetupKey};
use crate::config::{DifferentiatorConfig, Mode};
use crate::errors::{DerivativeError, LookupKind};
use crate::functions::{assemble_pass, function_rows};
use crate::model::{Assembly, Problem};
use crate::units::{UnitConverter, UnitTable};
use crate::variables::{enumerate, VariableList};

/// Computes analytic gradients of a [`Problem`] over a model.
///
/// # Example
///
/// ```
/// use evalexpr_analytic::model::{Assembly, ExprComponent, Problem};
/// use evalexpr_analytic::{Analytic, DifferentiatorConfig};
///
/// let mut model = Assembly::new("top")
///     .with(ExprComponent::new("a").input("x", 1.0).output("y", "2*x").unwrap())
///     .with(ExprComponent::new("b").input("x", 0.0).output("y", "3*x").unwrap())
///     .connected("a.y", "b.x")
///     .unwrap();
/// let problem = Problem::new().parameter("a.x").objective("f", "b.y").unwrap();
///
/// let mut analytic = Analytic::new(problem, DifferentiatorConfig::default());
/// analytic.calc_gradient(&mut model).unwrap();
/// assert_eq!(analytic.derivative("f", "a.x").unwrap(), 6.0);
/// ```
pub struct Analytic {
    problem: Problem,
    config: DifferentiatorConfig,
    converter: Box<dyn UnitConverter>,
    cache: SetupCache,
    current: Option<SetupKey>,
    system: Option<LinearSystem>,
    gradient: Option<DMatrix<f64>>,
}

impl Analytic {
    /// Creates a differentiator that converts units with [`UnitTable::standard`].
    pub fn new(problem: Problem, config: DifferentiatorConfig) -> Self {
        Self {
            problem,
            config,
            converter: Box::new(UnitTable::standard()),
            cache: SetupCache::new(),
            current: None,
            system: None,
            gradient: None,
        }
    }

    /// Replaces the unit converter. Cached setups are dropped.
    pub fn with_converter(mut self, converter: impl UnitConverter + 'static) -> Self {
        self.converter = Box::new(converter);
        self.cache.clear();
        self
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn config(&self) -> &DifferentiatorConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// Switches the mode. The previous gradient is discarded.
    pub fn set_mode(&mut self, mode: Mode) {
        if mode != self.config.mode {
            self.config.mode = mode;
            self.reset();
        }
    }

    pub fn cache(&self) -> &SetupCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut SetupCache {
        &mut self.cache
    }

    /// Prepares the structure-dependent part for `model`, reusing a cached setup.
    ///
    /// # Errors
    /// Any structural error of the model or the problem. Nothing is cached on failure.
    pub fn setup(&mut self, model: &Assembly) -> Result<(), DerivativeError> {
        let key = SetupKey::of(model, self.config.mode);
        if !self.cache.contains(&key) {
            let setup = self.build_setup(model)?;
            self.cache.insert(key, setup);
        }
        self.current = Some(key);
        Ok(())
    }

    fn build_setup(&self, model: &Assembly) -> Result<Setup, DerivativeError> {
        let topology = enumerate(model, &self.problem, self.config.mode)?;
        let param_index: HashMap<String, usize> = self
            .problem
            .parameters()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let rows = function_rows(
            model,
            &self.problem,
            &topology,
            &param_index,
            self.converter.as_ref(),
        )?;
        Ok(Setup {
            topology,
            param_index,
            rows,
        })
    }

    /// Linearizes `model` at its current values and solves for the gradient.
    ///
    /// Each participating component is asked for its local derivatives exactly once. On
    /// failure the previous gradient and system are discarded.
    pub fn calc_gradient(&mut self, model: &mut Assembly) -> Result<(), DerivativeError> {
        match self.try_calc_gradient(model) {
            Ok((system, gradient)) => {
                self.system = Some(system);
                self.gradient = Some(gradient);
                Ok(())
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    fn try_calc_gradient(
        &mut self,
        model: &mut Assembly,
    ) -> Result<(LinearSystem, DMatrix<f64>), DerivativeError> {
        self.setup(model)?;
        let key = SetupKey::of(model, self.config.mode);
        let setup = self
            .cache
            .get(&key)
            .ok_or(DerivativeError::NoGradient)?;

        let locals = collect_local_derivatives(model, &setup.topology)?;
        let system = assemble_pass(
            model,
            &setup.topology,
            &setup.param_index,
            &setup.rows,
            &locals,
            self.converter.as_ref(),
        )?;
        let gradient = crate::solve::solve(
            &system,
            self.config.mode,
            &setup.topology.variables,
            self.config.pivot_tolerance,
        )?;
        Ok((system, gradient))
    }

    fn reset(&mut self) {
        self.current = None;
        self.system = None;
        self.gradient = None;
    }

    fn function_row(&self, function: &str) -> Result<usize, DerivativeError> {
        self.problem
            .function_names()
            .iter()
            .position(|name| name == function)
            .ok_or_else(|| DerivativeError::NotFound {
                kind: LookupKind::Function,
                name: function.to_string(),
            })
    }

    fn parameter_column(&self, parameter: &str) -> Result<usize, DerivativeError> {
        self.problem
            .parameters()
            .iter()
            .position(|name| name == parameter)
            .ok_or_else(|| DerivativeError::NotFound {
                kind: LookupKind::Parameter,
                name: parameter.to_string(),
            })
    }

    /// The derivative of `function` with respect to `parameter`.
    pub fn derivative(&self, function: &str, parameter: &str) -> Result<f64, DerivativeError> {
        let row = self.function_row(function)?;
        let col = self.parameter_column(parameter)?;
        let gradient = self.gradient.as_ref().ok_or(DerivativeError::NoGradient)?;
        Ok(gradient[(row, col)])
    }

    /// The gradient of `function`, one entry per parameter.
    pub fn gradient(&self, function: &str) -> Result<Vec<f64>, DerivativeError> {
        let row = self.function_row(function)?;
        let gradient = self.gradient.as_ref().ok_or(DerivativeError::NoGradient)?;
        Ok(gradient.row(row).iter().copied().collect())
    }

    /// The full gradient, rows per function, columns per parameter.
    pub fn gradient_matrix(&self) -> Result<&DMatrix<f64>, DerivativeError> {
        self.gradient.as_ref().ok_or(DerivativeError::NoGradient)
    }

    /// The full gradient exported to another matrix type.
    pub fn gradient_into<M: GradientMatrix>(&self) -> Result<M, DerivativeError> {
        Ok(export(self.gradient_matrix()?))
    }

    /// The system assembled by the last successful [`Analytic::calc_gradient`].
    pub fn linear_system(&self) -> Option<&LinearSystem> {
        self.system.as_ref()
    }

    /// The unknowns of the current setup, in row order.
    pub fn variable_list(&self) -> Option<&VariableList> {
        let key = self.current.as_ref()?;
        self.cache.get(key).map(|setup| &setup.topology.variables)
    }
}

impl fmt::Debug for Analytic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analytic")
            .field("problem", &self.problem)
            .field("config", &self.config)
            .field("cache", &self.cache.len())
            .field("system", &self.system)
            .finish()
    }
}

impl fmt::Display for Analytic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({} mode)", "Analytic gradient".bold(), self.config.mode)?;
        let Some(gradient) = &self.gradient else {
            return writeln!(f, "    {}", "no gradient computed".yellow());
        };
        let parameters = self.problem.parameters();
        for (i, function) in self.problem.function_names().iter().enumerate() {
            writeln!(f, "    {}", function.green())?;
            for (j, parameter) in parameters.iter().enumerate() {
                writeln!(f, "        d/d{}: {}", parameter.cyan(), gradient[(i, j)])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::model::{Component, Driver, ExprComponent, LocalDerivatives, Node, SolverSpec, Variable};
    use crate::units::{Dimension, Unit};

    fn two_step() -> (Assembly, Problem) {
        let model = Assembly::new("top")
            .with(ExprComponent::new("a").input("x", 1.0).output("y", "2*x").unwrap())
            .with(ExprComponent::new("b").input("x", 0.0).output("y", "3*x").unwrap())
            .connected("a.y", "b.x")
            .unwrap();
        let problem = Problem::new().parameter("a.x").objective("f", "b.y").unwrap();
        (model, problem)
    }

    fn analytic(problem: Problem, mode: Mode) -> Analytic {
        Analytic::new(problem, DifferentiatorConfig::default().with_mode(mode))
    }

    #[test]
    fn test_two_step_chain_both_modes() {
        for mode in [Mode::Direct, Mode::Adjoint] {
            let (mut model, problem) = two_step();
            let mut analytic = analytic(problem, mode);
            analytic.calc_gradient(&mut model).unwrap();
            assert_relative_eq!(analytic.derivative("f", "a.x").unwrap(), 6.0, epsilon = 1e-12);
        }

        let (mut model, problem) = two_step();
        let mut analytic = analytic(problem, Mode::Direct);
        analytic.calc_gradient(&mut model).unwrap();
        let system = analytic.linear_system().unwrap();
        assert_eq!(system.lhs, DMatrix::from_row_slice(2, 2, &[1.0, 0.0, -3.0, 1.0]));
        assert_eq!(system.rhs, DMatrix::from_row_slice(2, 1, &[2.0, 0.0]));
    }

    #[test]
    fn test_objective_on_top_level_output() {
        for mode in [Mode::Direct, Mode::Adjoint] {
            let (model, _) = two_step();
            let mut model = model.output("y").connected("b.y", "y").unwrap();
            let problem = Problem::new().parameter("a.x").objective("f", "y").unwrap();
            let mut analytic = analytic(problem, mode);
            analytic.calc_gradient(&mut model).unwrap();
            assert_relative_eq!(analytic.derivative("f", "a.x").unwrap(), 6.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pass_through_chain() {
        let n = 8;
        let mut model = Assembly::new("top");
        for i in 0..n {
            model.add(ExprComponent::new(format!("c{i}")).input("x", 1.0).output("y", "x").unwrap());
        }
        for i in 1..n {
            model.connect(&format!("c{}.y", i - 1), &format!("c{i}.x")).unwrap();
        }
        let problem = Problem::new()
            .parameter("c0.x")
            .objective("f", &format!("c{}.y", n - 1))
            .unwrap();
        let mut analytic = analytic(problem, Mode::Direct);
        analytic.calc_gradient(&mut model).unwrap();
        assert_eq!(analytic.variable_list().unwrap().len(), n);
        assert_relative_eq!(analytic.derivative("f", "c0.x").unwrap(), 1.0);

        let lhs = &analytic.linear_system().unwrap().lhs;
        for i in 0..n {
            for j in 0..n {
                let expected = match (i, j) {
                    _ if i == j => 1.0,
                    _ if i == j + 1 => -1.0,
                    _ => 0.0,
                };
                assert_eq!(lhs[(i, j)], expected, "LHS[{i}, {j}]");
            }
        }
    }

    #[test]
    fn test_nonlinear_chain_matches_chain_rule() {
        for mode in [Mode::Direct, Mode::Adjoint] {
            let mut model = Assembly::new("top")
                .with(ExprComponent::new("a").input("x", 2.0).output("y", "x^2").unwrap())
                .with(ExprComponent::new("b").input("x", 4.0).output("y", "sin(x)").unwrap())
                .connected("a.y", "b.x")
                .unwrap();
            let problem = Problem::new().parameter("a.x").objective("f", "b.y").unwrap();
            let mut analytic = analytic(problem, mode);
            analytic.calc_gradient(&mut model).unwrap();
            // d sin(x^2)/dx = cos(x^2) * 2x at x = 2
            assert_relative_eq!(
                analytic.derivative("f", "a.x").unwrap(),
                4.0_f64.cos() * 4.0,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_unit_factor_doubles_entry() {
        let mut table = UnitTable::new();
        table.register("u", Unit::new(Dimension::LENGTH, 1.0));
        table.register("half", Unit::new(Dimension::LENGTH, 0.5));

        let mut model = Assembly::new("top")
            .with(ExprComponent::new("a").input("x", 1.0).output_with_units("y", "u", "x").unwrap())
            .with(ExprComponent::new("b").input_with_units("x", "half", 0.0).output("y", "3*x").unwrap())
            .connected("a.y", "b.x")
            .unwrap();
        let problem = Problem::new().parameter("a.x").objective("f", "b.y").unwrap();
        let mut analytic = analytic(problem, Mode::Direct).with_converter(table);
        analytic.calc_gradient(&mut model).unwrap();
        let system = analytic.linear_system().unwrap();
        assert_relative_eq!(system.lhs[(1, 0)], -6.0);
        assert_relative_eq!(analytic.derivative("f", "a.x").unwrap(), 6.0);
    }

    #[test]
    fn test_constraint_sign() {
        let (mut model, _) = two_step();
        let problem = Problem::new()
            .parameter("a.x")
            .constraint("upper", "b.y <= 10")
            .unwrap()
            .constraint("lower", "b.y >= 10")
            .unwrap();
        for mode in [Mode::Direct, Mode::Adjoint] {
            let mut analytic = analytic(problem.clone(), mode);
            analytic.calc_gradient(&mut model).unwrap();
            assert_relative_eq!(analytic.derivative("upper", "a.x").unwrap(), 6.0);
            assert_relative_eq!(analytic.derivative("lower", "a.x").unwrap(), -6.0);
        }
    }

    #[test]
    fn test_lookup_errors() {
        let (mut model, problem) = two_step();
        let mut analytic = analytic(problem, Mode::Direct);
        assert!(matches!(analytic.gradient("f"), Err(DerivativeError::NoGradient)));

        analytic.calc_gradient(&mut model).unwrap();
        assert!(matches!(
            analytic.gradient("missing"),
            Err(DerivativeError::NotFound { kind: LookupKind::Function, .. })
        ));
        assert!(matches!(
            analytic.derivative("f", "b.x"),
            Err(DerivativeError::NotFound { kind: LookupKind::Parameter, .. })
        ));
        assert_eq!(analytic.gradient("f").unwrap(), vec![6.0]);
        let rows: Vec<Vec<f64>> = analytic.gradient_into().unwrap();
        assert_eq!(rows, vec![vec![6.0]]);
    }

    struct Counting {
        inner: ExprComponent,
        calls: Rc<Cell<usize>>,
    }

    impl Component for Counting {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn inputs(&self) -> &[Variable] {
            self.inner.inputs()
        }

        fn outputs(&self) -> &[Variable] {
            self.inner.outputs()
        }

        fn value(&self, name: &str) -> Option<f64> {
            self.inner.value(name)
        }

        fn first_derivatives(&mut self) -> Result<LocalDerivatives, DerivativeError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.first_derivatives()
        }
    }

    #[test]
    fn test_local_derivatives_once_per_pass() {
        for mode in [Mode::Direct, Mode::Adjoint] {
            let calls = Rc::new(Cell::new(0));
            let counting = Counting {
                inner: ExprComponent::new("a").input("x", 1.0).output("y", "2*x").unwrap(),
                calls: Rc::clone(&calls),
            };
            let mut model = Assembly::new("top")
                .with(Node::component(counting))
                .with(ExprComponent::new("b").input("x", 0.0).output("y", "3*x").unwrap())
                .with(ExprComponent::new("c").input("x", 0.0).output("y", "x").unwrap())
                .connected("a.y", "b.x")
                .unwrap()
                .connected("a.y", "c.x")
                .unwrap();
            let problem = Problem::new()
                .parameter("a.x")
                .objective("f", "b.y + c.y")
                .unwrap();
            let mut analytic = analytic(problem, mode);
            analytic.calc_gradient(&mut model).unwrap();
            assert_eq!(calls.get(), 1);
            analytic.calc_gradient(&mut model).unwrap();
            assert_eq!(calls.get(), 2);
            assert_eq!(analytic.cache().len(), 1);
            assert_relative_eq!(analytic.derivative("f", "a.x").unwrap(), 8.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_unsupported_driver_fails_and_clears() {
        let (mut model, problem) = two_step();
        let mut analytic = analytic(problem, Mode::Direct);
        analytic.calc_gradient(&mut model).unwrap();

        model.add(Driver::iterative("doe", "doe"));
        let err = analytic.calc_gradient(&mut model).unwrap_err();
        assert!(err.is_structural());
        assert!(analytic.linear_system().is_none());
        assert!(matches!(analytic.gradient_matrix(), Err(DerivativeError::NoGradient)));
    }

    #[test]
    fn test_sub_model_chain() {
        for mode in [Mode::Direct, Mode::Adjoint] {
            let sub = Assembly::new("sub")
                .input("x", 0.0)
                .output("y")
                .with(ExprComponent::new("inner").input("x", 0.0).output("y", "5*x").unwrap())
                .connected("x", "inner.x")
                .unwrap()
                .connected("inner.y", "y")
                .unwrap();
            let mut model = Assembly::new("top")
                .with(ExprComponent::new("a").input("x", 1.0).output("y", "2*x").unwrap())
                .with(sub)
                .with(ExprComponent::new("b").input("x", 0.0).output("y", "3*x").unwrap())
                .connected("a.y", "sub.x")
                .unwrap()
                .connected("sub.y", "b.x")
                .unwrap();
            let problem = Problem::new().parameter("a.x").objective("f", "b.y").unwrap();
            let mut analytic = analytic(problem, mode);
            analytic.calc_gradient(&mut model).unwrap();
            assert_relative_eq!(analytic.derivative("f", "a.x").unwrap(), 30.0, epsilon = 1e-12);
            assert_eq!(analytic.variable_list().unwrap().len(), 5);
        }
    }

    #[test]
    fn test_sub_model_edit_refreshes_setup() {
        for mode in [Mode::Direct, Mode::Adjoint] {
            let sub = Assembly::new("sub")
                .input("x", 0.0)
                .output("y")
                .with(ExprComponent::new("five").input("x", 0.0).output("y", "5*x").unwrap())
                .with(ExprComponent::new("seven").input("x", 0.0).output("y", "7*x").unwrap())
                .connected("x", "five.x")
                .unwrap()
                .connected("x", "seven.x")
                .unwrap()
                .connected("five.y", "y")
                .unwrap();
            let mut model = Assembly::new("top")
                .with(ExprComponent::new("a").input("x", 1.0).output("y", "2*x").unwrap())
                .with(sub)
                .connected("a.y", "sub.x")
                .unwrap();
            let problem = Problem::new().parameter("a.x").objective("f", "sub.y").unwrap();
            let mut analytic = analytic(problem, mode);
            analytic.calc_gradient(&mut model).unwrap();
            assert_relative_eq!(analytic.derivative("f", "a.x").unwrap(), 10.0, epsilon = 1e-12);

            model
                .sub_model_mut("sub")
                .unwrap()
                .connect("seven.y", "y")
                .unwrap();
            analytic.calc_gradient(&mut model).unwrap();
            assert_relative_eq!(analytic.derivative("f", "a.x").unwrap(), 14.0, epsilon = 1e-12);
            assert_eq!(analytic.cache().len(), 1);
        }
    }

    #[test]
    fn test_parameter_on_sub_model_boundary() {
        for mode in [Mode::Direct, Mode::Adjoint] {
            let sub = Assembly::new("sub")
                .input("x", 0.0)
                .with(ExprComponent::new("inner").input("x", 0.0).output("y", "5*x").unwrap())
                .connected("x", "inner.x")
                .unwrap();
            let mut model = Assembly::new("top").with(sub);
            let problem = Problem::new()
                .parameter("sub.x")
                .objective("f", "sub.inner.y")
                .unwrap();
            let mut analytic = analytic(problem, mode);
            analytic.calc_gradient(&mut model).unwrap();
            assert_relative_eq!(analytic.derivative("f", "sub.x").unwrap(), 5.0, epsilon = 1e-12);
        }
    }

    /// The solver drives `s.x` so that `s.x` equals `t.y`, the end of the top-level chain
    /// `p.x -> p.y = 4 * p.x -> t.x -> t.y = t.x`. With `s.y = 2 * s.x`, the derivative of
    /// `s.y` with respect to `p.x` is 2 * 4.
    fn solver_model(solver_name: &str) -> (Assembly, Problem) {
        let spec = SolverSpec::new()
            .parameter("s.x")
            .constraint("t.y = s.x")
            .unwrap();
        let solver = Driver::solver(solver_name, spec)
            .with(ExprComponent::new("t").input("x", 0.0).output("y", "x").unwrap())
            .with(ExprComponent::new("s").input("x", 0.0).output("y", "2*x").unwrap());
        let model = Assembly::new("top")
            .with(ExprComponent::new("p").input("x", 1.0).output("y", "4*x").unwrap())
            .with(solver)
            .connected("p.y", "t.x")
            .unwrap();
        let problem = Problem::new().parameter("p.x").objective("f", "s.y").unwrap();
        (model, problem)
    }

    #[test]
    fn test_solver_coupling() {
        for mode in [Mode::Direct, Mode::Adjoint] {
            let (mut model, problem) = solver_model("solver");
            let mut analytic = analytic(problem, mode);
            analytic.calc_gradient(&mut model).unwrap();
            assert_relative_eq!(analytic.derivative("f", "p.x").unwrap(), 8.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_solver_named_like_top_driver() {
        // The top-level driver of an assembly is called "driver" by default.
        for mode in [Mode::Direct, Mode::Adjoint] {
            let (mut model, problem) = solver_model("driver");
            assert_eq!(model.driver().name(), "driver");
            let mut analytic = analytic(problem, mode);
            analytic.calc_gradient(&mut model).unwrap();
            assert_relative_eq!(analytic.derivative("f", "p.x").unwrap(), 8.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_singular_feedback_loop() {
        let mut model = Assembly::new("top")
            .with(ExprComponent::new("a").input("x", 1.0).input("w", 0.0).output("y", "x + w").unwrap())
            .with(ExprComponent::new("b").input("x", 0.0).output("y", "x").unwrap())
            .connected("a.y", "b.x")
            .unwrap()
            .connected("b.y", "a.w")
            .unwrap();
        let problem = Problem::new().parameter("a.x").objective("f", "b.y").unwrap();
        let mut analytic = analytic(problem, Mode::Direct);
        let err = analytic.calc_gradient(&mut model).unwrap_err();
        assert!(matches!(err, DerivativeError::SingularSystem { .. }));
        assert!(!err.is_structural());
    }

    #[test]
    fn test_report_lists_functions() {
        let (mut model, problem) = two_step();
        let mut analytic = analytic(problem, Mode::Adjoint);
        assert!(analytic.to_string().contains("no gradient computed"));
        analytic.calc_gradient(&mut model).unwrap();
        let report = analytic.to_string();
        assert!(report.contains("adjoint"));
        assert!(report.contains('6'));
    }
}
