//! The structured result of a solve.

use indexmap::IndexMap;

use crate::warnings::Warning;

/// What a solve produced. Failure is data, not a panic or an `Err`: every
/// path through the solver ends in one of these.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// True when every required-strength constraint holds within tolerance.
    pub success: bool,
    /// Solved value for every variable, keyed by global name
    /// (`"{entity_id}_{local}"`). Empty when the input was malformed.
    pub variables: IndexMap<String, f64>,
    /// Present on failure: the first diagnostic message the engine produced.
    pub error: Option<String>,
    /// Gauss-Newton iterations used by the accepted solution.
    pub iterations: usize,
    /// Constraints that were skipped or otherwise suspicious.
    pub warnings: Vec<Warning>,
}

impl SolverResult {
    /// A failure before any solving could happen (malformed input).
    pub(crate) fn malformed(error: String) -> Self {
        Self {
            success: false,
            variables: IndexMap::new(),
            error: Some(error),
            iterations: 0,
            warnings: Vec::new(),
        }
    }

    /// Solved value of one entity variable.
    pub fn value(&self, entity_id: &str, local: &str) -> Option<f64> {
        self.variables.get(&format!("{entity_id}_{local}")).copied()
    }
}
