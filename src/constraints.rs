//! Constraint descriptors: what the user asked for, before lowering.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::entities::EntityId;

/// Each geometric or dimensional constraint type we recognize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ConstraintType {
    /// Two points (or selected endpoints) must coincide.
    Coincident,
    /// A line's endpoints share a y value.
    Horizontal,
    /// A line's endpoints share an x value.
    Vertical,
    /// Two lines have parallel directions.
    Parallel,
    /// Two lines have perpendicular directions.
    Perpendicular,
    /// A line touches a circle's perimeter in exactly one place.
    Tangent,
    /// Two lines have equal length, or two circles equal radius.
    Equal,
    /// Two circles share a center.
    Concentric,
    /// Two points mirror each other across an axis line.
    Symmetric,
    /// Every variable of the entity is anchored at its current value.
    Fix,
    /// A point sits at the midpoint of a line.
    Midpoint,
    /// Two points are a given distance apart.
    Distance,
    /// A circle has a given radius.
    Radius,
    /// A circle has a given diameter.
    Diameter,
    /// Two lines meet at a given angle. Not lowered yet; skipped with a
    /// warning.
    Angle,
}

/// Priority band for a constraint. `Required` must hold exactly; the rest
/// are best-effort, in order. When a lower band cannot be satisfied
/// alongside a higher one, the lower band's constraints are dropped.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    /// Must hold within tolerance for the solve to count as a success.
    #[default]
    Required,
    /// Dominates medium and weak.
    Strong,
    /// Dominates weak.
    Medium,
    /// Lowest priority; dropped first.
    Weak,
}

impl Strength {
    /// The solver's priority band. 0 is highest priority.
    pub(crate) fn priority(self) -> u32 {
        match self {
            Strength::Required => 0,
            Strength::Strong => 1,
            Strength::Medium => 2,
            Strength::Weak => 3,
        }
    }
}

/// A constraint parameter: a scalar target or a textual selector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A numeric parameter, e.g. a distance target.
    Number(f64),
    /// A textual parameter, e.g. an endpoint selector like `"start"`.
    Text(String),
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_owned())
    }
}

/// A tagged constraint descriptor. The relation builder lowers this into
/// one or more scalar relations.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    /// Caller-chosen id, used in diagnostics reports.
    pub id: String,
    /// What kind of constraint this is.
    pub constraint_type: ConstraintType,
    /// The entities this constraint relates, in the order the type expects.
    pub entity_ids: Vec<EntityId>,
    /// Extra data: `value` (scalar target), `point1`/`point2` (endpoint
    /// selectors for coincident and distance).
    pub parameters: IndexMap<String, ParamValue>,
    /// Priority band.
    pub strength: Strength,
    /// Suppressed constraints stay in the system but are inert for both
    /// solving and diagnostics.
    pub suppressed: bool,
    /// Set for constraints proposed by an auto-constraint subsystem;
    /// these always solve at weak strength.
    pub is_auto: bool,
}

impl Constraint {
    /// A required-strength constraint over the given entities.
    pub fn new(id: impl Into<String>, constraint_type: ConstraintType, entity_ids: &[&str]) -> Self {
        Self {
            id: id.into(),
            constraint_type,
            entity_ids: entity_ids.iter().map(|&e| e.to_owned()).collect(),
            parameters: IndexMap::new(),
            strength: Strength::default(),
            suppressed: false,
            is_auto: false,
        }
    }

    /// Set the scalar target under the `value` key.
    pub fn with_value(self, value: f64) -> Self {
        self.with_param("value", value)
    }

    /// Set an arbitrary parameter.
    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.to_owned(), value.into());
        self
    }

    /// Set the priority band.
    pub fn with_strength(mut self, strength: Strength) -> Self {
        self.strength = strength;
        self
    }

    /// Mark this constraint suppressed.
    pub fn suppress(mut self) -> Self {
        self.suppressed = true;
        self
    }

    /// Mark this constraint as auto-proposed (and therefore weak).
    pub fn auto(mut self) -> Self {
        self.is_auto = true;
        self
    }

    /// The strength the solver actually applies. Auto constraints are
    /// always recorded at weak strength, whatever their descriptor says.
    pub fn effective_strength(&self) -> Strength {
        if self.is_auto {
            Strength::Weak
        } else {
            self.strength
        }
    }

    /// Look up a numeric parameter. `Ok(None)` when absent,
    /// `Err` when present but textual.
    pub(crate) fn numeric_param(&self, key: &str) -> Result<Option<f64>, crate::SolveError> {
        match self.parameters.get(key) {
            None => Ok(None),
            Some(ParamValue::Number(n)) => Ok(Some(*n)),
            Some(ParamValue::Text(_)) => Err(crate::SolveError::NonNumericParameter {
                constraint_id: self.id.clone(),
                key: key.to_owned(),
            }),
        }
    }

    /// Look up a textual parameter; numeric values are ignored.
    pub(crate) fn text_param(&self, key: &str) -> Option<&str> {
        match self.parameters.get(key) {
            Some(ParamValue::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    /// The scalar target of a dimensional constraint. `distance` constraints
    /// historically arrive with either a `value` or a `distance` key, so both
    /// are accepted.
    pub(crate) fn scalar_target(&self) -> Result<Option<f64>, crate::SolveError> {
        if let Some(v) = self.numeric_param("value")? {
            return Ok(Some(v));
        }
        self.numeric_param("distance")
    }
}
