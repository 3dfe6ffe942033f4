use crate::constraints::ConstraintType;

/// Something suboptimal about the problem definition which didn't stop the
/// solve from running.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq))]
pub struct Warning {
    /// Which constraint the warning is about, if any.
    pub constraint_id: Option<String>,
    /// What the warning is.
    pub content: WarningContent,
}

/// Each kind of warning the solver can emit.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq))]
#[non_exhaustive]
pub enum WarningContent {
    /// The constraint type has no lowering yet, so it was skipped.
    Unsupported(ConstraintType),
    /// The constraint's operand entities don't have the shape the
    /// constraint needs (e.g. `equal` between a line and a circle),
    /// so it was skipped.
    MismatchedOperands {
        /// What was wrong with the operands.
        detail: String,
    },
}

impl std::fmt::Display for WarningContent {
    #[mutants::skip]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarningContent::Unsupported(constraint_type) => write!(
                f,
                "{constraint_type:?} constraints are not supported yet and were skipped"
            ),
            WarningContent::MismatchedOperands { detail } => {
                write!(f, "constraint skipped: {detail}")
            }
        }
    }
}
