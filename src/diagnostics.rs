//! Failure analysis that runs on the system description alone.
//!
//! Nothing here touches the numeric engine: every detector is a pure
//! function of the input system, reports in constraint input order, and is
//! safe to call from multiple threads.

use indexmap::IndexMap;
use serde::Serialize;

use crate::constraints::{Constraint, ConstraintType};
use crate::entities::EntityKind;
use crate::outcome::SolverResult;
use crate::system::System;
use crate::vector::V;

/// Tolerance for comparing two dimensional targets in the conflict scan.
const VALUE_TOLERANCE: f64 = 1e-3;

/// Length below which a line counts as zero-length.
const ZERO_LENGTH: f64 = 1e-3;

/// How bad a diagnostic finding is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The sketch cannot solve as described.
    Error,
    /// Worth telling the user about, but not fatal.
    Warning,
}

/// Degree-of-freedom bookkeeping for a system.
#[derive(Clone, Debug, PartialEq)]
pub struct DofAnalysis {
    /// Free variables across all entities.
    pub expected: usize,
    /// DOF removed by the active constraints, per the closed table.
    pub removed: usize,
    /// `expected - removed`. Deliberately unclamped: a negative delta is
    /// what the over-constraint detector keys on.
    pub delta: i64,
    /// The finding, if the counts look wrong.
    pub issue: Option<DofIssue>,
}

/// What the DOF counts imply.
#[derive(Clone, Debug, PartialEq)]
pub enum DofIssue {
    /// More DOF removed than the sketch has.
    OverConstrained {
        /// Constraints the redundancy heuristic points at. A hint, not a
        /// claim: entities with few variables over-report.
        candidates: Vec<String>,
    },
    /// Most of the sketch is still free to move.
    UnderConstrained,
}

impl DofIssue {
    /// Over-constraint is an error; under-constraint only a warning.
    pub fn severity(&self) -> Severity {
        match self {
            DofIssue::OverConstrained { .. } => Severity::Error,
            DofIssue::UnderConstrained => Severity::Warning,
        }
    }
}

/// A pair of constraints that cannot both hold.
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictPair {
    /// Id of the earlier constraint.
    pub first: String,
    /// Id of the later constraint.
    pub second: String,
    /// Why they conflict.
    pub reason: String,
}

/// Everything the pairwise conflict scan found.
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictReport {
    /// Conflicting pairs, in input order of the earlier member.
    pub conflicts: Vec<ConflictPair>,
    /// Ids of every constraint involved, deduplicated, in input order.
    pub problematic_ids: Vec<String>,
}

/// One degenerate piece of geometry or one degenerate dimension parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Degeneracy {
    /// Set when an entity's geometry is degenerate.
    pub entity_id: Option<String>,
    /// Set when a constraint's parameter is degenerate.
    pub constraint_id: Option<String>,
    /// What's wrong.
    pub reason: String,
}

/// Why a solve failed, for the failure record handed to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The DOF accounting shows more constraints than freedom.
    OverConstrained,
    /// Two constraints demand incompatible things.
    Conflicting,
    /// Some geometry or dimension parameter is degenerate.
    Degenerate,
    /// The numeric engine itself gave up (iteration limit).
    NumericalInstability,
    /// None of the detectors fired.
    Unknown,
}

/// The structured explanation returned to the caller after an
/// unsatisfiable solve.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SolverFailure {
    /// Classification of the failure.
    pub reason: FailureReason,
    /// Ids of the constraints most likely at fault.
    pub problematic_constraints: Vec<String>,
    /// A human-actionable next step.
    pub suggestion: String,
    /// Always true: the caller holds the last-good state and may revert.
    pub can_revert: bool,
    /// Extra detail, when a detector had more to say.
    pub details: Option<String>,
}

/// The diagnostic detectors. All associated functions; the struct carries
/// no state.
pub struct Diagnostics;

impl Diagnostics {
    /// Count degrees of freedom: free variables minus DOF removed by the
    /// active constraints.
    pub fn dof_analysis(system: &System) -> DofAnalysis {
        let expected: usize = system
            .entities
            .values()
            .map(|e| e.free_variable_count())
            .sum();
        let removed: usize = system
            .active_constraints()
            .map(|c| dof_removed(c.constraint_type))
            .sum();
        let delta = expected as i64 - removed as i64;

        let issue = if delta < 0 {
            Some(DofIssue::OverConstrained {
                candidates: Self::redundant_candidates(system),
            })
        } else if delta > (expected / 2) as i64 {
            Some(DofIssue::UnderConstrained)
        } else {
            None
        };
        DofAnalysis {
            expected,
            removed,
            delta,
            issue,
        }
    }

    /// Scan every pair of active constraints over the same entity set for
    /// demands that cannot both hold.
    pub fn detect_conflicts(system: &System) -> Option<ConflictReport> {
        let active: Vec<&Constraint> = system.active_constraints().collect();
        let mut conflicts = Vec::new();
        for i in 0..active.len() {
            for j in (i + 1)..active.len() {
                if let Some(reason) = conflict_between(active[i], active[j]) {
                    conflicts.push(ConflictPair {
                        first: active[i].id.clone(),
                        second: active[j].id.clone(),
                        reason,
                    });
                }
            }
        }
        if conflicts.is_empty() {
            return None;
        }
        let mut problematic_ids: Vec<String> = Vec::new();
        for pair in &conflicts {
            for id in [&pair.first, &pair.second] {
                if !problematic_ids.contains(id) {
                    problematic_ids.push(id.clone());
                }
            }
        }
        Some(ConflictReport {
            conflicts,
            problematic_ids,
        })
    }

    /// Scan entities and constraint parameters for degenerate geometry.
    pub fn detect_degenerate(system: &System) -> Vec<Degeneracy> {
        let mut found = Vec::new();
        for (id, entity) in &system.entities {
            match entity.kind {
                EntityKind::Circle | EntityKind::Arc => {
                    if entity.value("radius").unwrap_or(0.0) <= 0.0 {
                        found.push(Degeneracy {
                            entity_id: Some(id.clone()),
                            constraint_id: None,
                            reason: "zero or negative radius".to_owned(),
                        });
                    }
                }
                EntityKind::Line => {
                    let start = V::new(
                        entity.value("start_x").unwrap_or(0.0),
                        entity.value("start_y").unwrap_or(0.0),
                    );
                    let end = V::new(
                        entity.value("end_x").unwrap_or(0.0),
                        entity.value("end_y").unwrap_or(0.0),
                    );
                    if start.euclidean_distance(end) < ZERO_LENGTH {
                        found.push(Degeneracy {
                            entity_id: Some(id.clone()),
                            constraint_id: None,
                            reason: "zero length".to_owned(),
                        });
                    }
                }
                _ => {}
            }
            for (name, variable) in &entity.variables {
                if name.contains("length") && variable.value < 0.0 {
                    found.push(Degeneracy {
                        entity_id: Some(id.clone()),
                        constraint_id: None,
                        reason: format!("negative length ({name})"),
                    });
                }
            }
        }
        for constraint in system.active_constraints() {
            let Ok(Some(value)) = constraint.scalar_target() else {
                continue;
            };
            match constraint.constraint_type {
                ConstraintType::Radius | ConstraintType::Diameter if value <= 0.0 => {
                    found.push(Degeneracy {
                        entity_id: None,
                        constraint_id: Some(constraint.id.clone()),
                        reason: format!(
                            "{:?} must be positive, got {value}",
                            constraint.constraint_type
                        ),
                    });
                }
                ConstraintType::Distance if value < 0.0 => {
                    found.push(Degeneracy {
                        entity_id: None,
                        constraint_id: Some(constraint.id.clone()),
                        reason: format!("distance must be non-negative, got {value}"),
                    });
                }
                _ => {}
            }
        }
        found
    }

    /// Heuristic list of constraints likely to be redundant: everything
    /// touching an entity referenced more often than 1.5x its variable
    /// count. Treat the output as a hint; a point (two variables) trips
    /// this at three constraints, which is often legitimate.
    pub fn redundant_candidates(system: &System) -> Vec<String> {
        let mut reference_counts: IndexMap<&String, usize> =
            system.entities.keys().map(|id| (id, 0)).collect();
        for constraint in system.active_constraints() {
            for entity_id in &constraint.entity_ids {
                if let Some(count) = reference_counts.get_mut(entity_id) {
                    *count += 1;
                }
            }
        }
        let crowded: Vec<&String> = reference_counts
            .iter()
            .filter(|&(id, &count)| {
                let Some(entity) = system.entities.get(id.as_str()) else {
                    return false;
                };
                let threshold = (1.5 * entity.variables.len() as f64).floor() as usize;
                count > threshold
            })
            .map(|(id, _)| *id)
            .collect();

        let mut candidates = Vec::new();
        for constraint in system.active_constraints() {
            let touches_crowded = constraint
                .entity_ids
                .iter()
                .any(|id| crowded.contains(&id));
            if touches_crowded && !candidates.contains(&constraint.id) {
                candidates.push(constraint.id.clone());
            }
        }
        candidates
    }

    /// Find the first cycle in the constraint dependency graph (constraints
    /// are adjacent when they share an entity). Cycles are a warning, not
    /// an error: any valid closed shape is cyclic here, e.g. a square's
    /// four endpoint coincidences.
    pub fn detect_circular_dependencies(system: &System) -> Option<Vec<String>> {
        let active: Vec<&Constraint> = system.active_constraints().collect();
        let n = active.len();

        // Adjacency by shared entity, deduplicated, neighbors in input order.
        let mut by_entity: IndexMap<&String, Vec<usize>> = IndexMap::new();
        for (index, constraint) in active.iter().enumerate() {
            for entity_id in &constraint.entity_ids {
                by_entity.entry(entity_id).or_default().push(index);
            }
        }
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for members in by_entity.values() {
            for &a in members {
                for &b in members {
                    if a != b && !adjacency[a].contains(&b) {
                        adjacency[a].push(b);
                    }
                }
            }
        }
        for neighbors in &mut adjacency {
            neighbors.sort_unstable();
        }

        let mut visited = vec![false; n];
        let mut stack = Vec::new();
        for start in 0..n {
            if !visited[start]
                && let Some(cycle) = dfs_cycle(start, None, &adjacency, &mut visited, &mut stack)
            {
                return Some(cycle.into_iter().map(|i| active[i].id.clone()).collect());
            }
        }
        None
    }

    /// Classify a failed solve into an actionable record. Consults the
    /// detectors in a fixed order and reports the first that fires, so the
    /// same input always produces the same record.
    pub fn analyze_solver_failure(result: &SolverResult, system: &System) -> SolverFailure {
        if let Some(error) = &result.error
            && error.contains("iteration limit")
        {
            return SolverFailure {
                reason: FailureReason::NumericalInstability,
                problematic_constraints: Vec::new(),
                suggestion:
                    "The solver ran out of iterations. Simplify the sketch or move geometry closer to where the constraints want it, then try again."
                        .to_owned(),
                can_revert: true,
                details: Some(error.clone()),
            };
        }

        let dof = Self::dof_analysis(system);
        if let Some(DofIssue::OverConstrained { candidates }) = dof.issue {
            return SolverFailure {
                reason: FailureReason::OverConstrained,
                problematic_constraints: candidates,
                suggestion:
                    "The sketch has more constraints than degrees of freedom. Remove or suppress one of the listed constraints."
                        .to_owned(),
                can_revert: true,
                details: Some(format!(
                    "{} degrees of freedom, {} removed by constraints",
                    dof.expected, dof.removed
                )),
            };
        }

        if let Some(report) = Self::detect_conflicts(system) {
            let details = report
                .conflicts
                .iter()
                .map(|pair| format!("{} vs {}: {}", pair.first, pair.second, pair.reason))
                .collect::<Vec<_>>()
                .join("; ");
            return SolverFailure {
                reason: FailureReason::Conflicting,
                problematic_constraints: report.problematic_ids,
                suggestion:
                    "Two constraints demand incompatible positions. Delete or edit one of them."
                        .to_owned(),
                can_revert: true,
                details: Some(details),
            };
        }

        let degenerate = Self::detect_degenerate(system);
        if !degenerate.is_empty() {
            let problematic_constraints: Vec<String> = degenerate
                .iter()
                .filter_map(|d| d.constraint_id.clone())
                .collect();
            let details = degenerate
                .iter()
                .map(|d| {
                    let subject = d
                        .entity_id
                        .as_deref()
                        .or(d.constraint_id.as_deref())
                        .unwrap_or("?");
                    format!("{subject}: {}", d.reason)
                })
                .collect::<Vec<_>>()
                .join("; ");
            return SolverFailure {
                reason: FailureReason::Degenerate,
                problematic_constraints,
                suggestion: "Some geometry is degenerate (zero-length or non-positive size). Fix the flagged items."
                    .to_owned(),
                can_revert: true,
                details: Some(details),
            };
        }

        SolverFailure {
            reason: FailureReason::Unknown,
            problematic_constraints: Vec::new(),
            suggestion: "The solver could not satisfy the sketch and no detector identified why. Undo the last change."
                .to_owned(),
            can_revert: true,
            details: result.error.clone(),
        }
    }
}

/// DOF removed per constraint type. A closed table: symmetric counts 2
/// because it lowers to two scalar relations.
fn dof_removed(constraint_type: ConstraintType) -> usize {
    match constraint_type {
        ConstraintType::Coincident
        | ConstraintType::Concentric
        | ConstraintType::Midpoint
        | ConstraintType::Symmetric => 2,
        ConstraintType::Fix => 3,
        ConstraintType::Horizontal
        | ConstraintType::Vertical
        | ConstraintType::Parallel
        | ConstraintType::Perpendicular
        | ConstraintType::Tangent
        | ConstraintType::Equal
        | ConstraintType::Distance
        | ConstraintType::Radius
        | ConstraintType::Diameter
        | ConstraintType::Angle => 1,
    }
}

/// Do these two constraints, over the same entity set, demand incompatible
/// things?
fn conflict_between(a: &Constraint, b: &Constraint) -> Option<String> {
    if !same_entity_set(a, b) {
        return None;
    }
    use ConstraintType::*;
    match (a.constraint_type, b.constraint_type) {
        (Horizontal, Vertical) | (Vertical, Horizontal) => {
            Some("a line cannot be both horizontal and vertical".to_owned())
        }
        (Distance, Distance) => {
            let (Ok(Some(va)), Ok(Some(vb))) = (a.scalar_target(), b.scalar_target()) else {
                return None;
            };
            ((va - vb).abs() > VALUE_TOLERANCE)
                .then(|| format!("incompatible distance targets ({va} vs {vb})"))
        }
        (Radius | Diameter, Radius | Diameter) => {
            let (Ok(Some(va)), Ok(Some(vb))) = (a.scalar_target(), b.scalar_target()) else {
                return None;
            };
            // Normalize to radii before comparing.
            let ra = if a.constraint_type == Diameter { va / 2.0 } else { va };
            let rb = if b.constraint_type == Diameter { vb / 2.0 } else { vb };
            ((ra - rb).abs() > VALUE_TOLERANCE)
                .then(|| format!("incompatible radius targets ({ra} vs {rb})"))
        }
        _ => None,
    }
}

fn same_entity_set(a: &Constraint, b: &Constraint) -> bool {
    let set_a: std::collections::BTreeSet<&String> = a.entity_ids.iter().collect();
    let set_b: std::collections::BTreeSet<&String> = b.entity_ids.iter().collect();
    set_a == set_b
}

/// Depth-first search for a back-edge to a node still on the stack; the
/// stack suffix from that node is the cycle.
fn dfs_cycle(
    node: usize,
    parent: Option<usize>,
    adjacency: &[Vec<usize>],
    visited: &mut [bool],
    stack: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited[node] = true;
    stack.push(node);
    for &next in &adjacency[node] {
        if Some(next) == parent {
            continue;
        }
        if let Some(position) = stack.iter().position(|&s| s == next) {
            return Some(stack[position..].to_vec());
        }
        if !visited[next]
            && let Some(cycle) = dfs_cycle(next, Some(node), adjacency, visited, stack)
        {
            return Some(cycle);
        }
    }
    stack.pop();
    None
}
