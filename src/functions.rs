//! Rows of the objective and constraint functions.
//!
//! The partial derivatives of every function are taken once, at setup, with respect to the
//! unknowns, the parameters and whatever the function reads. A partial with respect to a
//! parameter lands in `EQS_zero`, one with respect to an unknown in `EQS`. In direct mode
//! a partial with respect to a connected input that is not an unknown is routed through
//! the connection to its source. In adjoint mode a partial with respect to a component
//! output is kept aside and chained through the component's local derivatives on every
//! pass, since those change between passes. A top-level boundary output is followed
//! through the connection that drives it, at setup in direct mode and on every pass in
//! adjoint mode.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use nalgebra::DMatrix;

use crate::assembler::{Assembler, LinearSystem, LocalMap, Row};
use crate::config::Mode;
use crate::errors::DerivativeError;
use crate::model::{Assembly, Direction, Function, Problem};
use crate::path::VarPath;
use crate::units::UnitConverter;
use crate::variables::Topology;

/// A function partial with respect to a component output or a top-level boundary output,
/// chained on every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainedPartial {
    pub function: usize,
    pub output: String,
    pub partial: f64,
}

impl ChainedPartial {
    /// `true` for a boundary output of the top-level assembly.
    fn is_boundary(&self) -> bool {
        VarPath::parse(&self.output).len() == 1
    }
}

/// The static part of the function matrices.
#[derive(Debug, Clone)]
pub struct FunctionRows {
    pub eqs: DMatrix<f64>,
    pub eqs_zero: DMatrix<f64>,
    pub chained: Vec<ChainedPartial>,
}

/// Builds the function rows of `problem` on the current values of `model`.
pub fn function_rows(
    model: &Assembly,
    problem: &Problem,
    topology: &Topology,
    params: &HashMap<String, usize>,
    converter: &dyn UnitConverter,
) -> Result<FunctionRows, DerivativeError> {
    let variables = &topology.variables;
    let locals = LocalMap::new();
    let system = LinearSystem::zeros(variables.len(), params.len(), problem.n_functions());
    let mut assembler = Assembler::new(topology, params, &locals, converter, system);
    let mut chained = Vec::new();

    for (f, function) in problem.functions().iter().enumerate() {
        let wrt: Vec<String> = variables
            .iter()
            .map(str::to_string)
            .chain(problem.parameters().iter().cloned())
            .chain(function.variables())
            .unique()
            .collect();
        let partials = match function {
            Function::Objective(expression) => expression.gradient(&wrt, model)?,
            Function::Constraint(constraint) => constraint.gradient(&wrt, model)?.combined(),
        };
        let partials: BTreeMap<String, f64> = partials.into_iter().collect();

        for (name, partial) in partials {
            let row = Row::Function(f);
            if params.contains_key(&name) || variables.contains(&name) {
                assembler.term(row, model, &VarPath::root(), &name, partial, &name)?;
                continue;
            }
            let path = VarPath::parse(&name);
            match (topology.mode, model.lookup(&path)) {
                (Mode::Direct, Some((_, Direction::Output))) if path.len() == 1 => {
                    assembler.resolve_input(
                        row,
                        model,
                        &VarPath::root(),
                        &name,
                        partial,
                        &topology.all_couplings,
                    )?;
                }
                (Mode::Adjoint, Some((_, Direction::Output))) if path.len() == 1 => {
                    chained.push(ChainedPartial {
                        function: f,
                        output: name,
                        partial,
                    });
                }
                (Mode::Direct, Some((_, Direction::Input))) => {
                    let (scope, prefix, local) = model.locate(&path);
                    assembler.resolve_input(
                        row,
                        scope,
                        &prefix,
                        &local.dotted(),
                        partial,
                        &topology.all_couplings,
                    )?;
                }
                (Mode::Adjoint, Some((_, Direction::Output))) => {
                    if path.parent().is_some_and(|parent| topology.component_edges.contains_key(&parent.dotted())) {
                        chained.push(ChainedPartial {
                            function: f,
                            output: name,
                            partial,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    let system = assembler.into_system();
    Ok(FunctionRows {
        eqs: system.eqs,
        eqs_zero: system.eqs_zero,
        chained,
    })
}

/// Assembles the full system of one pass from the cached function rows.
pub fn assemble_pass(
    model: &Assembly,
    topology: &Topology,
    params: &HashMap<String, usize>,
    rows: &FunctionRows,
    locals: &LocalMap,
    converter: &dyn UnitConverter,
) -> Result<LinearSystem, DerivativeError> {
    let n_var = topology.variables.len();
    let mut system = LinearSystem::zeros(n_var, params.len(), rows.eqs.nrows());
    system.eqs.copy_from(&rows.eqs);
    system.eqs_zero.copy_from(&rows.eqs_zero);

    let mut assembler = Assembler::new(topology, params, locals, converter, system);
    assembler.assemble(model)?;
    let root = VarPath::root();
    for chained in &rows.chained {
        let row = Row::Function(chained.function);
        if chained.is_boundary() {
            assembler.resolve_input(
                row,
                model,
                &root,
                &chained.output,
                chained.partial,
                &topology.all_couplings,
            )?;
        } else {
            assembler.term(row, model, &root, &chained.output, chained.partial, &chained.output)?;
        }
    }
    Ok(assembler.into_system())
}
