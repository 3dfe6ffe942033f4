/// Errors raised while lowering a system into scalar relations or while
/// running the numeric core.
///
/// These never cross the public [`solve`](crate::solve) boundary as a panic
/// or an `Err`; they are rendered into the structured result's `error` field.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum SolveError {
    /// A constraint names an entity id that the system does not contain.
    #[error("constraint {constraint_id} references unknown entity \"{entity_id}\"")]
    UnknownEntity {
        /// Id of the offending constraint.
        constraint_id: String,
        /// The id that failed to resolve.
        entity_id: String,
    },
    /// A constraint that needs a scalar parameter didn't provide one.
    #[error("constraint {constraint_id} is missing required parameter \"{key}\"")]
    MissingParameter {
        /// Id of the offending constraint.
        constraint_id: String,
        /// The parameter key that was expected.
        key: &'static str,
    },
    /// A parameter was present but held the wrong kind of value
    /// (e.g. text where a number is required).
    #[error("constraint {constraint_id}: parameter \"{key}\" must be numeric")]
    NonNumericParameter {
        /// Id of the offending constraint.
        constraint_id: String,
        /// The parameter key with the bad value.
        key: String,
    },
    /// A constraint references the wrong number of entities for its type.
    #[error("constraint {constraint_id} expects {expected} entities but references {actual}")]
    WrongOperandCount {
        /// Id of the offending constraint.
        constraint_id: String,
        /// How many operand entities this constraint type takes.
        expected: usize,
        /// How many were actually given.
        actual: usize,
    },
    /// A point selector (`point1`/`point2`) named an anchor the entity
    /// doesn't have, e.g. `"center"` on a line.
    #[error("constraint {constraint_id}: entity \"{entity_id}\" has no \"{anchor}\" anchor")]
    InvalidAnchor {
        /// Id of the offending constraint.
        constraint_id: String,
        /// The entity that was being anchored.
        entity_id: String,
        /// The selector that failed to resolve.
        anchor: String,
    },
    /// The solver hit its iteration cap while residuals were still improving.
    #[error("iteration limit reached without convergence")]
    IterationLimit,
}
