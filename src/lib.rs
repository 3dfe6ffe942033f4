#![doc = include_str!("../README.md")]

use std::collections::HashSet;

use tracing::debug;

pub use crate::constraints::{Constraint, ConstraintType, ParamValue, Strength};
pub use crate::diagnostics::{
    ConflictPair, ConflictReport, Degeneracy, Diagnostics, DofAnalysis, DofIssue, FailureReason,
    Severity, SolverFailure,
};
pub use crate::document::{
    ConstraintRecord, Document, DocumentError, DocumentMetadata, EntityRecord, FORMAT_VERSION,
    NamedParameter,
};
pub use crate::entities::{Entity, EntityId, EntityKind, RawGeometry, SolverVariable};
pub use crate::error::SolveError;
pub use crate::outcome::SolverResult;
pub use crate::solver::Config;
pub use crate::system::System;
pub use crate::warnings::{Warning, WarningContent};

use crate::relations::Relation;
use crate::solver::{BandOutcome, Layout};

/// Each kind of constraint we support.
mod constraints;
/// Diagnostics over the system description: DOF accounting, conflict and
/// degeneracy scans, the failure classifier.
mod diagnostics;
/// The serialized JSON document format.
mod document;
/// Geometric entities and their scalar variables.
mod entities;
mod error;
mod outcome;
/// Lowering constraints into scalar relations.
mod relations;
/// Numeric solver over dense matrices.
mod solver;
mod system;
mod vector;
mod warnings;

/// Satisfaction tolerance: a relation holds when its geometric error is
/// under this.
pub(crate) const EPSILON: f64 = 1e-3;

/// Solve a system with the default configuration.
///
/// The result is always structured data; malformed input, unsatisfiable
/// constraints and non-convergence all come back as `success == false`
/// with an explanatory `error`, never as a panic. The input system is not
/// mutated; solved values land in the result's variable map, keyed by
/// `"{entity_id}_{local_name}"`.
///
/// ```
/// use planesolve::{solve, Constraint, ConstraintType, Entity, RawGeometry, System};
///
/// let mut system = System::new();
/// system.add_entity(Entity::from_geometry("p", RawGeometry::Point { x: 0.0, y: 0.0 }));
/// system.add_entity(Entity::from_geometry("q", RawGeometry::Point { x: 30.0, y: 40.0 }));
/// system.add_constraint(Constraint::new("pin", ConstraintType::Fix, &["p"]));
/// system.add_constraint(
///     Constraint::new("reach", ConstraintType::Distance, &["p", "q"]).with_value(50.0),
/// );
///
/// let result = solve(&system);
/// assert!(result.success);
/// ```
pub fn solve(system: &System) -> SolverResult {
    solve_with_config(system, Config::default())
}

/// Like [`solve`], with an explicit [`Config`].
pub fn solve_with_config(system: &System, config: Config) -> SolverResult {
    // Malformed systems fail fast, before any lowering.
    if let Some((constraint, entity_id)) = system.first_unknown_reference() {
        return SolverResult::malformed(
            SolveError::UnknownEntity {
                constraint_id: constraint.id.clone(),
                entity_id: entity_id.clone(),
            }
            .to_string(),
        );
    }

    let layout = Layout::new(system);
    let lowered = match relations::lower_system(system, &layout) {
        Ok(lowered) => lowered,
        Err(e) => return SolverResult::malformed(e.to_string()),
    };
    debug!(
        entities = system.entities.len(),
        constraints = system.constraints.len(),
        variables = layout.len(),
        relations = lowered.relations.len(),
        "solving system"
    );

    // Nothing to do: the initial values are the answer.
    if lowered.relations.is_empty() {
        return SolverResult {
            success: true,
            variables: layout.result_map(&layout.initial_values()),
            error: None,
            iterations: 0,
            warnings: lowered.warnings,
        };
    }

    match solve_by_priority(&layout, &lowered.relations, config) {
        Ok(band) => {
            let success = !band.any_required_unsatisfied;
            let error = if success {
                None
            } else {
                let ids: Vec<&str> = band
                    .unsatisfied
                    .iter()
                    .map(|&i| system.constraints[i].id.as_str())
                    .collect();
                if ids.is_empty() {
                    Some("anchored variables could not be held".to_owned())
                } else {
                    Some(format!("unsatisfiable constraints: {}", ids.join(", ")))
                }
            };
            debug!(iterations = band.iterations, success, "solve finished");
            SolverResult {
                success,
                variables: layout.result_map(&band.values),
                error,
                iterations: band.iterations,
                warnings: lowered.warnings,
            }
        }
        Err(e) => SolverResult {
            success: false,
            variables: layout.result_map(&layout.initial_values()),
            error: Some(e.to_string()),
            iterations: config.max_iterations,
            warnings: lowered.warnings,
        },
    }
}

/// Solve with only the highest-priority band of relations, then keep
/// re-solving with the next band added, until every band is in or a band
/// fails to hold. A band that can't be satisfied (or doesn't converge) is
/// dropped along with everything weaker, and the last fully-held solution
/// wins.
fn solve_by_priority(
    layout: &Layout,
    relations: &[Relation],
    config: Config,
) -> Result<BandOutcome, SolveError> {
    let bands: HashSet<u32> = relations.iter().map(|r| r.priority).collect();
    let mut bands: Vec<u32> = bands.into_iter().collect();
    bands.sort_unstable();

    let mut best: Option<BandOutcome> = None;
    for band in bands {
        let subset: Vec<&Relation> = relations.iter().filter(|r| r.priority <= band).collect();
        match solver::solve_band(layout, subset, config) {
            Ok(outcome) => {
                // If relations were left unsatisfied at this band, adding
                // weaker bands can't help.
                if outcome.any_required_unsatisfied || !outcome.unsatisfied.is_empty() {
                    return Ok(best.unwrap_or(outcome));
                }
                best = Some(outcome);
            }
            Err(e) => return best.ok_or(e),
        }
    }
    Ok(best.expect("relations is non-empty, so at least one band ran"))
}
