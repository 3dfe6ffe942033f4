//! The numeric core: flat variable layout plus the model handed to the
//! damped Gauss-Newton loop.

use faer::Mat;
use indexmap::IndexMap;

use crate::entities::SolverVariable;
use crate::relations::Relation;
use crate::system::System;

mod newton;

/// Index of a variable in the flat solver space. Doubles as the variable's
/// column in the Jacobian.
pub(crate) type VarIx = usize;

/// Solver configuration. The defaults match the documented engine contract
/// (iteration cap 100, tolerance 1e-3).
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Hard cap on Gauss-Newton iterations before the solve is declared
    /// non-converging.
    pub max_iterations: usize,
    /// Satisfaction tolerance on each relation's geometric error.
    pub tolerance: f64,
    /// Step-size threshold below which the solve is treated as settled at a
    /// local minimum.
    pub step_tolerance: f64,
    /// Initial Levenberg-Marquardt damping.
    pub lambda_initial: f64,
    /// Factor the damping grows or shrinks by between attempts.
    pub lambda_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: crate::EPSILON,
            step_tolerance: 1e-12,
            lambda_initial: 1e-3,
            lambda_factor: 10.0,
        }
    }
}

/// The flat variable space for one solve: every entity variable, in entity
/// insertion order, keyed by its global `"{entity_id}_{local}"` name.
pub(crate) struct Layout {
    vars: IndexMap<String, SolverVariable>,
}

impl Layout {
    pub fn new(system: &System) -> Self {
        let mut vars = IndexMap::new();
        for (entity_id, entity) in &system.entities {
            for (name, variable) in &entity.variables {
                vars.insert(format!("{entity_id}_{name}"), *variable);
            }
        }
        Self { vars }
    }

    /// Column index of a global variable name.
    pub fn index_of(&self, global: &str) -> Option<VarIx> {
        self.vars.get_index_of(global)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn vars(&self) -> impl Iterator<Item = (&String, &SolverVariable)> {
        self.vars.iter()
    }

    pub fn initial_values(&self) -> Vec<f64> {
        self.vars.values().map(|v| v.value).collect()
    }

    /// Pair the layout's variable names with a value vector.
    pub fn result_map(&self, values: &[f64]) -> IndexMap<String, f64> {
        self.vars
            .keys()
            .zip(values.iter())
            .map(|(name, value)| (name.clone(), *value))
            .collect()
    }
}

/// One priority band's worth of relations, ready to iterate on.
pub(crate) struct Model<'r> {
    relations: Vec<&'r Relation>,
    num_vars: usize,
    tolerance: f64,
}

impl<'r> Model<'r> {
    pub fn new(relations: Vec<&'r Relation>, num_vars: usize, config: Config) -> Self {
        Self {
            relations,
            num_vars,
            tolerance: config.tolerance,
        }
    }

    pub fn num_relations(&self) -> usize {
        self.relations.len()
    }

    /// Evaluate every relation's residual into `out`.
    fn residuals_into(&self, values: &[f64], out: &mut [f64]) {
        for (row, relation) in self.relations.iter().enumerate() {
            out[row] = relation.kind.residual(values);
        }
    }

    /// Assemble the dense Jacobian: one row per relation, one column per
    /// variable. Partial derivatives accumulate, since a variable can
    /// appear on both sides of a relation.
    fn jacobian(&self, values: &[f64]) -> Mat<f64> {
        let mut jac = Mat::zeros(self.relations.len(), self.num_vars);
        let mut row_scratch = Vec::with_capacity(8);
        for (row, relation) in self.relations.iter().enumerate() {
            relation.kind.jacobian(values, &mut row_scratch);
            for &(col, partial) in &row_scratch {
                jac[(row, col)] += partial;
            }
        }
        jac
    }

    /// Is every relation within tolerance of holding?
    pub fn all_satisfied(&self, values: &[f64]) -> bool {
        self.relations
            .iter()
            .all(|r| r.kind.error(values) < self.tolerance)
    }

    /// Indices (within this model) of relations that don't hold.
    pub fn unsatisfied(&self, values: &[f64]) -> Vec<usize> {
        self.relations
            .iter()
            .enumerate()
            .filter(|(_, r)| r.kind.error(values) >= self.tolerance)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn relation(&self, index: usize) -> &Relation {
        self.relations[index]
    }
}

/// What one priority band's solve produced.
pub(crate) struct BandOutcome {
    /// Final value per layout column.
    pub values: Vec<f64>,
    /// Gauss-Newton iterations used.
    pub iterations: usize,
    /// Constraint indices (into `System::constraints`) with at least one
    /// unsatisfied relation, deduplicated, in input order.
    pub unsatisfied: Vec<usize>,
    /// True when an unsatisfied relation sits in the required band.
    pub any_required_unsatisfied: bool,
}

/// Solve a subset of relations from the layout's initial values.
pub(crate) fn solve_band(
    layout: &Layout,
    relations: Vec<&Relation>,
    config: Config,
) -> Result<BandOutcome, crate::SolveError> {
    let mut values = layout.initial_values();
    let model = Model::new(relations, layout.len(), config);
    let iterations = model.solve_damped_newton(&mut values, config)?;

    let mut unsatisfied = Vec::new();
    let mut any_required_unsatisfied = false;
    for index in model.unsatisfied(&values) {
        let relation = model.relation(index);
        if relation.priority == 0 {
            any_required_unsatisfied = true;
        }
        if let Some(constraint_index) = relation.constraint_index
            && !unsatisfied.contains(&constraint_index)
        {
            unsatisfied.push(constraint_index);
        }
    }
    unsatisfied.sort_unstable();

    Ok(BandOutcome {
        values,
        iterations,
        unsatisfied,
        any_required_unsatisfied,
    })
}
