//! Geometric entities and their scalar variables.
//!
//! Every entity owns a small set of named scalar variables (`x`, `start_y`,
//! `radius`, ...). The solver works over the flat union of these, keyed by
//! the global name `"{entity_id}_{local_name}"`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Opaque identifier for an entity. Uniqueness is the caller's business.
pub type EntityId = String;

/// Every kind of planar entity we can sketch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A single point.
    Point,
    /// A line segment between two endpoints.
    Line,
    /// A full circle.
    Circle,
    /// A circular arc.
    Arc,
    /// An axis-aligned-then-rotated ellipse.
    Ellipse,
    /// A straight slot (two endpoints plus a width).
    Slot,
    /// A regular polygon (center, circumradius, rotation).
    Polygon,
    /// A spline through a run of control points.
    Spline,
}

impl EntityKind {
    /// The fixed variable table for this kind, in declaration order.
    /// Splines have a dynamic table (`cp_0_x`, `cp_0_y`, ...) and return
    /// an empty slice here.
    pub fn variable_names(self) -> &'static [&'static str] {
        match self {
            EntityKind::Point => &["x", "y"],
            EntityKind::Line => &["start_x", "start_y", "end_x", "end_y"],
            EntityKind::Circle => &["center_x", "center_y", "radius"],
            EntityKind::Arc => &["center_x", "center_y", "radius", "start_angle", "end_angle"],
            EntityKind::Ellipse => &["center_x", "center_y", "major", "minor", "rotation"],
            EntityKind::Slot => &["start_x", "start_y", "end_x", "end_y", "width"],
            EntityKind::Polygon => &["center_x", "center_y", "radius", "rotation"],
            EntityKind::Spline => &[],
        }
    }
}

/// One scalar the solver may adjust.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverVariable {
    /// Current value; used as the solver's starting guess.
    pub value: f64,
    /// Anchored variables keep their value through a solve.
    pub fixed: bool,
}

impl SolverVariable {
    /// A free variable at the given value.
    pub fn free(value: f64) -> Self {
        Self {
            value,
            fixed: false,
        }
    }
}

/// Per-kind geometry used to construct an entity's variable map.
#[derive(Clone, Debug, PartialEq)]
pub enum RawGeometry {
    /// A point at (x, y).
    Point {
        /// X coordinate.
        x: f64,
        /// Y coordinate.
        y: f64,
    },
    /// A line segment.
    Line {
        /// Start point.
        start: [f64; 2],
        /// End point.
        end: [f64; 2],
    },
    /// A circle.
    Circle {
        /// Center point.
        center: [f64; 2],
        /// Radius, which should be positive.
        radius: f64,
    },
    /// A circular arc, angles in radians.
    Arc {
        /// Center point.
        center: [f64; 2],
        /// Radius, which should be positive.
        radius: f64,
        /// Where the arc starts.
        start_angle: f64,
        /// Where the arc ends.
        end_angle: f64,
    },
    /// An ellipse, rotation in radians.
    Ellipse {
        /// Center point.
        center: [f64; 2],
        /// Semi-major axis length.
        major: f64,
        /// Semi-minor axis length.
        minor: f64,
        /// Rotation of the major axis from horizontal.
        rotation: f64,
    },
    /// A straight slot.
    Slot {
        /// Start of the slot's spine.
        start: [f64; 2],
        /// End of the slot's spine.
        end: [f64; 2],
        /// Full width of the slot.
        width: f64,
    },
    /// A regular polygon.
    Polygon {
        /// Center point.
        center: [f64; 2],
        /// Circumradius.
        radius: f64,
        /// Rotation in radians.
        rotation: f64,
    },
    /// A spline through control points.
    Spline {
        /// The control points, in order.
        control_points: Vec<[f64; 2]>,
    },
}

impl RawGeometry {
    fn kind(&self) -> EntityKind {
        match self {
            RawGeometry::Point { .. } => EntityKind::Point,
            RawGeometry::Line { .. } => EntityKind::Line,
            RawGeometry::Circle { .. } => EntityKind::Circle,
            RawGeometry::Arc { .. } => EntityKind::Arc,
            RawGeometry::Ellipse { .. } => EntityKind::Ellipse,
            RawGeometry::Slot { .. } => EntityKind::Slot,
            RawGeometry::Polygon { .. } => EntityKind::Polygon,
            RawGeometry::Spline { .. } => EntityKind::Spline,
        }
    }

    fn values(&self) -> Vec<(String, f64)> {
        match self {
            RawGeometry::Point { x, y } => vec![("x".to_owned(), *x), ("y".to_owned(), *y)],
            RawGeometry::Line { start, end } | RawGeometry::Slot { start, end, .. } => {
                let mut vals = vec![
                    ("start_x".to_owned(), start[0]),
                    ("start_y".to_owned(), start[1]),
                    ("end_x".to_owned(), end[0]),
                    ("end_y".to_owned(), end[1]),
                ];
                if let RawGeometry::Slot { width, .. } = self {
                    vals.push(("width".to_owned(), *width));
                }
                vals
            }
            RawGeometry::Circle { center, radius } => vec![
                ("center_x".to_owned(), center[0]),
                ("center_y".to_owned(), center[1]),
                ("radius".to_owned(), *radius),
            ],
            RawGeometry::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => vec![
                ("center_x".to_owned(), center[0]),
                ("center_y".to_owned(), center[1]),
                ("radius".to_owned(), *radius),
                ("start_angle".to_owned(), *start_angle),
                ("end_angle".to_owned(), *end_angle),
            ],
            RawGeometry::Ellipse {
                center,
                major,
                minor,
                rotation,
            } => vec![
                ("center_x".to_owned(), center[0]),
                ("center_y".to_owned(), center[1]),
                ("major".to_owned(), *major),
                ("minor".to_owned(), *minor),
                ("rotation".to_owned(), *rotation),
            ],
            RawGeometry::Polygon {
                center,
                radius,
                rotation,
            } => vec![
                ("center_x".to_owned(), center[0]),
                ("center_y".to_owned(), center[1]),
                ("radius".to_owned(), *radius),
                ("rotation".to_owned(), *rotation),
            ],
            RawGeometry::Spline { control_points } => {
                let mut vals = Vec::with_capacity(control_points.len() * 2);
                for (i, cp) in control_points.iter().enumerate() {
                    vals.push((format!("cp_{i}_x"), cp[0]));
                    vals.push((format!("cp_{i}_y"), cp[1]));
                }
                vals
            }
        }
    }
}

/// A sketch entity: a kind plus its named scalar variables.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    /// The entity's id, which keys it in a [`System`](crate::System).
    pub id: EntityId,
    /// What kind of geometry this is.
    pub kind: EntityKind,
    /// Variables in kind-table order.
    pub variables: IndexMap<String, SolverVariable>,
}

impl Entity {
    /// Build an entity's variable map from its raw geometry.
    pub fn from_geometry(id: impl Into<EntityId>, geometry: RawGeometry) -> Self {
        let kind = geometry.kind();
        let variables = geometry
            .values()
            .into_iter()
            .map(|(name, value)| (name, SolverVariable::free(value)))
            .collect();
        Self {
            id: id.into(),
            kind,
            variables,
        }
    }

    /// Build an entity from a flat `name -> value` map, e.g. the `geometry`
    /// object of a serialized document. Variables are normalized into
    /// kind-table order; names the kind doesn't define are ignored, and
    /// names the map doesn't supply default to zero.
    pub fn from_variables(
        id: impl Into<EntityId>,
        kind: EntityKind,
        values: &IndexMap<String, f64>,
    ) -> Self {
        let mut variables = IndexMap::new();
        if kind == EntityKind::Spline {
            // Control point count is however far the cp_{i}_{x,y} keys reach.
            let count = values
                .keys()
                .filter_map(|k| parse_control_point_index(k))
                .map(|i| i + 1)
                .max()
                .unwrap_or(0);
            for i in 0..count {
                for axis in ["x", "y"] {
                    let name = format!("cp_{i}_{axis}");
                    let value = values.get(&name).copied().unwrap_or(0.0);
                    variables.insert(name, SolverVariable::free(value));
                }
            }
        } else {
            for &name in kind.variable_names() {
                let value = values.get(name).copied().unwrap_or(0.0);
                variables.insert(name.to_owned(), SolverVariable::free(value));
            }
        }
        Self {
            id: id.into(),
            kind,
            variables,
        }
    }

    /// The globally-scoped name of one of this entity's variables.
    pub fn global_id(&self, local: &str) -> String {
        format!("{}_{local}", self.id)
    }

    /// Current value of a variable, if the entity has it.
    pub fn value(&self, local: &str) -> Option<f64> {
        self.variables.get(local).map(|v| v.value)
    }

    /// Mark every variable of this entity as anchored (or free again).
    pub fn set_fixed(&mut self, fixed: bool) {
        for variable in self.variables.values_mut() {
            variable.fixed = fixed;
        }
    }

    /// Write solved values back onto this entity. The result map is keyed by
    /// global variable name; variables with no entry are left unchanged.
    /// This cannot fail.
    pub fn apply_solved(&mut self, results: &IndexMap<String, f64>) {
        let id = &self.id;
        for (name, variable) in &mut self.variables {
            if let Some(value) = results.get(&format!("{id}_{name}")) {
                variable.value = *value;
            }
        }
    }

    /// How many of this entity's variables the solver is free to choose.
    pub fn free_variable_count(&self) -> usize {
        self.variables.values().filter(|v| !v.fixed).count()
    }
}

fn parse_control_point_index(name: &str) -> Option<usize> {
    let rest = name.strip_prefix("cp_")?;
    let rest = rest
        .strip_suffix("_x")
        .or_else(|| rest.strip_suffix("_y"))?;
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_variables_in_table_order() {
        let line = Entity::from_geometry(
            "l1",
            RawGeometry::Line {
                start: [0.0, 1.0],
                end: [2.0, 3.0],
            },
        );
        let names: Vec<_> = line.variables.keys().cloned().collect();
        assert_eq!(names, vec!["start_x", "start_y", "end_x", "end_y"]);
        assert_eq!(line.value("end_y"), Some(3.0));
        assert_eq!(line.global_id("end_y"), "l1_end_y");
    }

    #[test]
    fn spline_variables_per_control_point() {
        let spline = Entity::from_geometry(
            "s",
            RawGeometry::Spline {
                control_points: vec![[0.0, 0.0], [1.0, 2.0], [3.0, 4.0]],
            },
        );
        assert_eq!(spline.variables.len(), 6);
        assert_eq!(spline.value("cp_2_y"), Some(4.0));
    }

    #[test]
    fn apply_solved_leaves_missing_values_alone() {
        let mut point = Entity::from_geometry("p", RawGeometry::Point { x: 1.0, y: 2.0 });
        let mut results = IndexMap::new();
        results.insert("p_x".to_owned(), 9.0);
        point.apply_solved(&results);
        assert_eq!(point.value("x"), Some(9.0));
        assert_eq!(point.value("y"), Some(2.0));
    }

    #[test]
    fn fixed_variables_do_not_count_as_free() {
        let mut circle = Entity::from_geometry(
            "c",
            RawGeometry::Circle {
                center: [0.0, 0.0],
                radius: 5.0,
            },
        );
        assert_eq!(circle.free_variable_count(), 3);
        circle.variables["radius"].fixed = true;
        assert_eq!(circle.free_variable_count(), 2);
        circle.set_fixed(true);
        assert_eq!(circle.free_variable_count(), 0);
    }

    #[test]
    fn from_variables_normalizes_order_and_fills_gaps() {
        let mut values = IndexMap::new();
        values.insert("end_x".to_owned(), 4.0);
        values.insert("start_x".to_owned(), 1.0);
        let line = Entity::from_variables("l", EntityKind::Line, &values);
        let names: Vec<_> = line.variables.keys().cloned().collect();
        assert_eq!(names, vec!["start_x", "start_y", "end_x", "end_y"]);
        assert_eq!(line.value("start_y"), Some(0.0));
        assert_eq!(line.value("end_x"), Some(4.0));
    }
}
