//! Lowers constraint descriptors into scalar relations over the flat
//! variable space.
//!
//! Each relation is one row of the system the numeric core solves: it can
//! report its residual, its analytic Jacobian row, and a geometric error
//! used for the satisfaction check. Distance-like relations keep their
//! residuals in squared form (simpler derivatives, no sqrt singularity at
//! zero) but measure satisfaction on the un-squared geometric quantity, so
//! tolerances behave at large coordinate scales.

use tracing::warn;

use crate::constraints::{Constraint, ConstraintType, Strength};
use crate::entities::Entity;
use crate::error::SolveError;
use crate::solver::{Layout, VarIx};
use crate::system::System;
use crate::vector::V;
use crate::warnings::{Warning, WarningContent};

/// Guard against dividing by the length of a degenerate segment.
const TINY: f64 = 1e-12;

/// One scalar relation row.
#[derive(Clone, Debug)]
pub(crate) struct Relation {
    /// Index of the originating constraint in `System::constraints`, or
    /// `None` for anchors emitted from `fixed` variables.
    pub constraint_index: Option<usize>,
    /// Priority band; 0 is highest.
    pub priority: u32,
    pub kind: RelKind,
}

/// The shape of a relation's residual.
#[derive(Clone, Debug)]
pub(crate) enum RelKind {
    /// `v[a] - v[b] = 0`
    Equate { a: VarIx, b: VarIx },
    /// `v[x] - target = 0`
    Anchor { x: VarIx, target: f64 },
    /// `v[p] - (v[s] + v[e])/2 = 0`
    Midpoint { p: VarIx, s: VarIx, e: VarIx },
    /// `(qx-px)^2 + (qy-py)^2 - d^2 = 0`
    DistanceSquared {
        px: VarIx,
        py: VarIx,
        qx: VarIx,
        qy: VarIx,
        d: f64,
    },
    /// `cross(dir0, dir1) = 0`; lines as `[sx, sy, ex, ey]`.
    Parallel { line0: [VarIx; 4], line1: [VarIx; 4] },
    /// `dot(dir0, dir1) = 0`
    Perpendicular { line0: [VarIx; 4], line1: [VarIx; 4] },
    /// `len^2(line0) - len^2(line1) = 0`
    EqualLengthSquared { line0: [VarIx; 4], line1: [VarIx; 4] },
    /// `cross(dir, center - start)^2 - r^2 * len^2 = 0`, i.e. the squared
    /// center-to-line distance equals the squared radius.
    TangentLineCircle {
        line: [VarIx; 4],
        cx: VarIx,
        cy: VarIx,
        r: VarIx,
    },
    /// The midpoint of `ab` lies on the axis line.
    SymmetricMid {
        ax: VarIx,
        ay: VarIx,
        bx: VarIx,
        by: VarIx,
        axis: [VarIx; 4],
    },
    /// `ab` is perpendicular to the axis line.
    SymmetricPerp {
        ax: VarIx,
        ay: VarIx,
        bx: VarIx,
        by: VarIx,
        axis: [VarIx; 4],
    },
}

#[inline]
fn dir(values: &[f64], line: &[VarIx; 4]) -> V {
    V::new(
        values[line[2]] - values[line[0]],
        values[line[3]] - values[line[1]],
    )
}

impl RelKind {
    /// The residual the numeric core drives to zero.
    pub fn residual(&self, values: &[f64]) -> f64 {
        match self {
            RelKind::Equate { a, b } => values[*a] - values[*b],
            RelKind::Anchor { x, target } => values[*x] - target,
            RelKind::Midpoint { p, s, e } => values[*p] - (values[*s] + values[*e]) / 2.0,
            RelKind::DistanceSquared { px, py, qx, qy, d } => {
                let dx = values[*qx] - values[*px];
                let dy = values[*qy] - values[*py];
                dx * dx + dy * dy - d * d
            }
            RelKind::Parallel { line0, line1 } => {
                dir(values, line0).cross_2d(&dir(values, line1))
            }
            RelKind::Perpendicular { line0, line1 } => {
                dir(values, line0).dot(&dir(values, line1))
            }
            RelKind::EqualLengthSquared { line0, line1 } => {
                let d0 = dir(values, line0);
                let d1 = dir(values, line1);
                d0.dot(&d0) - d1.dot(&d1)
            }
            RelKind::TangentLineCircle { line, cx, cy, r } => {
                let d = dir(values, line);
                let w = V::new(
                    values[*cx] - values[line[0]],
                    values[*cy] - values[line[1]],
                );
                let cross = d.cross_2d(&w);
                let radius = values[*r];
                cross * cross - radius * radius * d.dot(&d)
            }
            RelKind::SymmetricMid { ax, ay, bx, by, axis } => {
                let d = dir(values, axis);
                let mx = (values[*ax] + values[*bx]) / 2.0 - values[axis[0]];
                let my = (values[*ay] + values[*by]) / 2.0 - values[axis[1]];
                mx * d.y - my * d.x
            }
            RelKind::SymmetricPerp { ax, ay, bx, by, axis } => {
                let d = dir(values, axis);
                (values[*bx] - values[*ax]) * d.x + (values[*by] - values[*ay]) * d.y
            }
        }
    }

    /// The geometric error of this relation, used for the satisfaction
    /// check. Like the residual but normalized back to position/length
    /// units, so the tolerance stays meaningful at large scales.
    pub fn error(&self, values: &[f64]) -> f64 {
        match self {
            RelKind::Equate { .. } | RelKind::Anchor { .. } | RelKind::Midpoint { .. } => {
                self.residual(values).abs()
            }
            RelKind::DistanceSquared { px, py, qx, qy, d } => {
                let dx = values[*qx] - values[*px];
                let dy = values[*qy] - values[*py];
                (libm::hypot(dx, dy) - d).abs()
            }
            RelKind::Parallel { line0, line1 } | RelKind::Perpendicular { line0, line1 } => {
                let m0 = dir(values, line0).magnitude();
                let m1 = dir(values, line1).magnitude();
                if m0 < TINY || m1 < TINY {
                    // Degenerate line; nothing meaningful to measure.
                    return 0.0;
                }
                self.residual(values).abs() / (m0 * m1)
            }
            RelKind::EqualLengthSquared { line0, line1 } => {
                (dir(values, line0).magnitude() - dir(values, line1).magnitude()).abs()
            }
            RelKind::TangentLineCircle { line, cx, cy, r } => {
                let d = dir(values, line);
                let len = d.magnitude();
                if len < TINY {
                    return 0.0;
                }
                let w = V::new(
                    values[*cx] - values[line[0]],
                    values[*cy] - values[line[1]],
                );
                (d.cross_2d(&w).abs() / len - values[*r].abs()).abs()
            }
            RelKind::SymmetricMid { axis, .. } | RelKind::SymmetricPerp { axis, .. } => {
                let len = dir(values, axis).magnitude();
                if len < TINY {
                    return 0.0;
                }
                self.residual(values).abs() / len
            }
        }
    }

    /// The analytic Jacobian row: partial derivatives of the residual with
    /// respect to each participating variable. A variable may appear more
    /// than once (e.g. a distance from an entity to itself); callers must
    /// accumulate.
    pub fn jacobian(&self, values: &[f64], out: &mut Vec<(VarIx, f64)>) {
        out.clear();
        match self {
            RelKind::Equate { a, b } => {
                out.push((*a, 1.0));
                out.push((*b, -1.0));
            }
            RelKind::Anchor { x, .. } => out.push((*x, 1.0)),
            RelKind::Midpoint { p, s, e } => {
                out.push((*p, 1.0));
                out.push((*s, -0.5));
                out.push((*e, -0.5));
            }
            RelKind::DistanceSquared { px, py, qx, qy, .. } => {
                let dx = values[*qx] - values[*px];
                let dy = values[*qy] - values[*py];
                out.push((*px, -2.0 * dx));
                out.push((*py, -2.0 * dy));
                out.push((*qx, 2.0 * dx));
                out.push((*qy, 2.0 * dy));
            }
            RelKind::Parallel { line0, line1 } => {
                let d0 = dir(values, line0);
                let d1 = dir(values, line1);
                out.push((line0[0], -d1.y));
                out.push((line0[2], d1.y));
                out.push((line0[1], d1.x));
                out.push((line0[3], -d1.x));
                out.push((line1[0], d0.y));
                out.push((line1[2], -d0.y));
                out.push((line1[1], -d0.x));
                out.push((line1[3], d0.x));
            }
            RelKind::Perpendicular { line0, line1 } => {
                let d0 = dir(values, line0);
                let d1 = dir(values, line1);
                out.push((line0[0], -d1.x));
                out.push((line0[2], d1.x));
                out.push((line0[1], -d1.y));
                out.push((line0[3], d1.y));
                out.push((line1[0], -d0.x));
                out.push((line1[2], d0.x));
                out.push((line1[1], -d0.y));
                out.push((line1[3], d0.y));
            }
            RelKind::EqualLengthSquared { line0, line1 } => {
                let d0 = dir(values, line0);
                let d1 = dir(values, line1);
                out.push((line0[0], -2.0 * d0.x));
                out.push((line0[2], 2.0 * d0.x));
                out.push((line0[1], -2.0 * d0.y));
                out.push((line0[3], 2.0 * d0.y));
                out.push((line1[0], 2.0 * d1.x));
                out.push((line1[2], -2.0 * d1.x));
                out.push((line1[1], 2.0 * d1.y));
                out.push((line1[3], -2.0 * d1.y));
            }
            RelKind::TangentLineCircle { line, cx, cy, r } => {
                let d = dir(values, line);
                let w = V::new(
                    values[*cx] - values[line[0]],
                    values[*cy] - values[line[1]],
                );
                let cross = d.cross_2d(&w);
                let radius = values[*r];
                let r_sq = radius * radius;
                // d(cross)/dv and d(len^2)/dv terms, combined as
                // dR/dv = 2*cross*dcross - r^2 * dlen2.
                out.push((line[0], 2.0 * cross * (d.y - w.y) - r_sq * (-2.0 * d.x)));
                out.push((line[1], 2.0 * cross * (w.x - d.x) - r_sq * (-2.0 * d.y)));
                out.push((line[2], 2.0 * cross * w.y - r_sq * (2.0 * d.x)));
                out.push((line[3], 2.0 * cross * (-w.x) - r_sq * (2.0 * d.y)));
                out.push((*cx, 2.0 * cross * (-d.y)));
                out.push((*cy, 2.0 * cross * d.x));
                out.push((*r, -2.0 * radius * d.dot(&d)));
            }
            RelKind::SymmetricMid { ax, ay, bx, by, axis } => {
                let d = dir(values, axis);
                let mx = (values[*ax] + values[*bx]) / 2.0 - values[axis[0]];
                let my = (values[*ay] + values[*by]) / 2.0 - values[axis[1]];
                out.push((*ax, d.y / 2.0));
                out.push((*bx, d.y / 2.0));
                out.push((*ay, -d.x / 2.0));
                out.push((*by, -d.x / 2.0));
                out.push((axis[0], my - d.y));
                out.push((axis[1], d.x - mx));
                out.push((axis[2], -my));
                out.push((axis[3], mx));
            }
            RelKind::SymmetricPerp { ax, ay, bx, by, axis } => {
                let d = dir(values, axis);
                let abx = values[*bx] - values[*ax];
                let aby = values[*by] - values[*ay];
                out.push((*ax, -d.x));
                out.push((*bx, d.x));
                out.push((*ay, -d.y));
                out.push((*by, d.y));
                out.push((axis[0], -abx));
                out.push((axis[2], abx));
                out.push((axis[1], -aby));
                out.push((axis[3], aby));
            }
        }
    }
}

/// Everything the numeric core needs, plus warnings gathered while lowering.
pub(crate) struct Lowered {
    pub relations: Vec<Relation>,
    pub warnings: Vec<Warning>,
}

struct LowerCtx<'s> {
    system: &'s System,
    layout: &'s Layout,
    relations: Vec<Relation>,
    warnings: Vec<Warning>,
}

/// Translate every active constraint (and every anchored variable) into
/// scalar relations.
pub(crate) fn lower_system(system: &System, layout: &Layout) -> Result<Lowered, SolveError> {
    let mut ctx = LowerCtx {
        system,
        layout,
        relations: Vec::new(),
        warnings: Vec::new(),
    };

    // Variables marked fixed on their entity are hard anchors.
    for (ix, (_, variable)) in layout.vars().enumerate() {
        if variable.fixed {
            ctx.relations.push(Relation {
                constraint_index: None,
                priority: Strength::Required.priority(),
                kind: RelKind::Anchor {
                    x: ix,
                    target: variable.value,
                },
            });
        }
    }

    for (index, constraint) in system.constraints.iter().enumerate() {
        if constraint.suppressed {
            continue;
        }
        ctx.lower_constraint(index, constraint)?;
    }

    Ok(Lowered {
        relations: ctx.relations,
        warnings: ctx.warnings,
    })
}

impl<'s> LowerCtx<'s> {
    fn push(&mut self, index: usize, constraint: &Constraint, kind: RelKind) {
        self.relations.push(Relation {
            constraint_index: Some(index),
            priority: constraint.effective_strength().priority(),
            kind,
        });
    }

    fn skip(&mut self, constraint: &Constraint, detail: String) {
        warn!(constraint = %constraint.id, "skipping constraint: {detail}");
        self.warnings.push(Warning {
            constraint_id: Some(constraint.id.clone()),
            content: WarningContent::MismatchedOperands { detail },
        });
    }

    // The returned reference borrows the system, not the context, so the
    // caller can keep pushing relations while operands are alive.
    fn operand(&self, constraint: &Constraint, index: usize) -> Result<&'s Entity, SolveError> {
        let entity_id =
            constraint
                .entity_ids
                .get(index)
                .ok_or_else(|| SolveError::WrongOperandCount {
                    constraint_id: constraint.id.clone(),
                    expected: index + 1,
                    actual: constraint.entity_ids.len(),
                })?;
        self.system
            .entity(entity_id)
            .ok_or_else(|| SolveError::UnknownEntity {
                constraint_id: constraint.id.clone(),
                entity_id: entity_id.clone(),
            })
    }

    fn expect_operands(&self, constraint: &Constraint, expected: usize) -> Result<(), SolveError> {
        let actual = constraint.entity_ids.len();
        if actual == expected {
            Ok(())
        } else {
            Err(SolveError::WrongOperandCount {
                constraint_id: constraint.id.clone(),
                expected,
                actual,
            })
        }
    }

    fn var_ix(&self, entity: &Entity, local: &str) -> Option<VarIx> {
        if !entity.variables.contains_key(local) {
            return None;
        }
        self.layout.index_of(&entity.global_id(local))
    }

    /// Resolve the (x, y) variable pair a constraint means when it points at
    /// this entity. `selector` comes from the `point1`/`point2` parameters
    /// and picks an endpoint of a line; entities with a single natural
    /// anchor (points, circle centers) don't need one.
    fn point_anchor(
        &self,
        constraint: &Constraint,
        entity: &Entity,
        selector: Option<&str>,
    ) -> Result<Option<(VarIx, VarIx)>, SolveError> {
        let pair = |x: &str, y: &str| match (self.var_ix(entity, x), self.var_ix(entity, y)) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        };
        if let Some(selector) = selector {
            let resolved = match selector {
                "start" => pair("start_x", "start_y"),
                "end" => pair("end_x", "end_y"),
                "center" => pair("center_x", "center_y"),
                _ => None,
            };
            return resolved.map(Some).ok_or_else(|| SolveError::InvalidAnchor {
                constraint_id: constraint.id.clone(),
                entity_id: entity.id.clone(),
                anchor: selector.to_owned(),
            });
        }
        Ok(pair("x", "y")
            .or_else(|| pair("center_x", "center_y"))
            .or_else(|| pair("start_x", "start_y")))
    }

    fn line_vars(&self, entity: &Entity) -> Option<[VarIx; 4]> {
        Some([
            self.var_ix(entity, "start_x")?,
            self.var_ix(entity, "start_y")?,
            self.var_ix(entity, "end_x")?,
            self.var_ix(entity, "end_y")?,
        ])
    }

    fn scalar_target(&self, constraint: &Constraint) -> Result<f64, SolveError> {
        constraint
            .scalar_target()?
            .ok_or_else(|| SolveError::MissingParameter {
                constraint_id: constraint.id.clone(),
                key: "value",
            })
    }

    fn lower_constraint(&mut self, index: usize, c: &Constraint) -> Result<(), SolveError> {
        match c.constraint_type {
            ConstraintType::Coincident => {
                self.expect_operands(c, 2)?;
                let e0 = self.operand(c, 0)?;
                let e1 = self.operand(c, 1)?;
                let a = self.point_anchor(c, e0, c.text_param("point1"))?;
                let b = self.point_anchor(c, e1, c.text_param("point2"))?;
                match (a, b) {
                    (Some((ax, ay)), Some((bx, by))) => {
                        self.push(index, c, RelKind::Equate { a: ax, b: bx });
                        self.push(index, c, RelKind::Equate { a: ay, b: by });
                    }
                    _ => self.skip(c, "coincident needs two point-like operands".to_owned()),
                }
            }
            ConstraintType::Horizontal | ConstraintType::Vertical => {
                self.expect_operands(c, 1)?;
                let entity = self.operand(c, 0)?;
                let (first, second) = if c.constraint_type == ConstraintType::Horizontal {
                    ("start_y", "end_y")
                } else {
                    ("start_x", "end_x")
                };
                match (self.var_ix(entity, first), self.var_ix(entity, second)) {
                    (Some(a), Some(b)) => self.push(index, c, RelKind::Equate { a, b }),
                    _ => self.skip(
                        c,
                        format!(
                            "{:?} needs an entity with start/end points, got a {:?}",
                            c.constraint_type, entity.kind
                        ),
                    ),
                }
            }
            ConstraintType::Parallel | ConstraintType::Perpendicular => {
                self.expect_operands(c, 2)?;
                let e0 = self.operand(c, 0)?;
                let e1 = self.operand(c, 1)?;
                match (self.line_vars(e0), self.line_vars(e1)) {
                    (Some(line0), Some(line1)) => {
                        let kind = if c.constraint_type == ConstraintType::Parallel {
                            RelKind::Parallel { line0, line1 }
                        } else {
                            RelKind::Perpendicular { line0, line1 }
                        };
                        self.push(index, c, kind);
                    }
                    _ => self.skip(
                        c,
                        format!("{:?} needs two lines", c.constraint_type),
                    ),
                }
            }
            ConstraintType::Distance => {
                self.expect_operands(c, 2)?;
                let d = self.scalar_target(c)?;
                let e0 = self.operand(c, 0)?;
                let e1 = self.operand(c, 1)?;
                let a = self.point_anchor(c, e0, c.text_param("point1"))?;
                let b = self.point_anchor(c, e1, c.text_param("point2"))?;
                match (a, b) {
                    (Some((px, py)), Some((qx, qy))) => {
                        self.push(index, c, RelKind::DistanceSquared { px, py, qx, qy, d });
                    }
                    _ => self.skip(c, "distance needs two point-like operands".to_owned()),
                }
            }
            ConstraintType::Radius | ConstraintType::Diameter => {
                self.expect_operands(c, 1)?;
                let value = self.scalar_target(c)?;
                let target = if c.constraint_type == ConstraintType::Diameter {
                    value / 2.0
                } else {
                    value
                };
                let entity = self.operand(c, 0)?;
                match self.var_ix(entity, "radius") {
                    Some(x) => self.push(index, c, RelKind::Anchor { x, target }),
                    None => self.skip(
                        c,
                        format!(
                            "{:?} needs an entity with a radius, got a {:?}",
                            c.constraint_type, entity.kind
                        ),
                    ),
                }
            }
            ConstraintType::Equal => {
                self.expect_operands(c, 2)?;
                let e0 = self.operand(c, 0)?;
                let e1 = self.operand(c, 1)?;
                let radii = (self.var_ix(e0, "radius"), self.var_ix(e1, "radius"));
                if let (Some(a), Some(b)) = radii {
                    self.push(index, c, RelKind::Equate { a, b });
                } else if let (Some(line0), Some(line1)) =
                    (self.line_vars(e0), self.line_vars(e1))
                {
                    self.push(index, c, RelKind::EqualLengthSquared { line0, line1 });
                } else {
                    self.skip(
                        c,
                        "equal needs two lines or two circle-like entities".to_owned(),
                    );
                }
            }
            ConstraintType::Concentric => {
                self.expect_operands(c, 2)?;
                let e0 = self.operand(c, 0)?;
                let e1 = self.operand(c, 1)?;
                let c0 = (self.var_ix(e0, "center_x"), self.var_ix(e0, "center_y"));
                let c1 = (self.var_ix(e1, "center_x"), self.var_ix(e1, "center_y"));
                match (c0, c1) {
                    ((Some(x0), Some(y0)), (Some(x1), Some(y1))) => {
                        self.push(index, c, RelKind::Equate { a: x0, b: x1 });
                        self.push(index, c, RelKind::Equate { a: y0, b: y1 });
                    }
                    _ => self.skip(c, "concentric needs two entities with centers".to_owned()),
                }
            }
            ConstraintType::Tangent => {
                self.expect_operands(c, 2)?;
                let e0 = self.operand(c, 0)?;
                let e1 = self.operand(c, 1)?;
                // Accept (circle, line) in either order.
                let circle_line = |circle: &Entity, line: &Entity| {
                    let cx = self.var_ix(circle, "center_x")?;
                    let cy = self.var_ix(circle, "center_y")?;
                    let r = self.var_ix(circle, "radius")?;
                    let line = self.line_vars(line)?;
                    Some(RelKind::TangentLineCircle { line, cx, cy, r })
                };
                match circle_line(e0, e1).or_else(|| circle_line(e1, e0)) {
                    Some(kind) => self.push(index, c, kind),
                    None => self.skip(c, "tangent needs a circle and a line".to_owned()),
                }
            }
            ConstraintType::Fix => {
                self.expect_operands(c, 1)?;
                let entity = self.operand(c, 0)?;
                // Anchor every variable at its value as of this solve,
                // at strong strength.
                let anchors: Vec<(VarIx, f64)> = entity
                    .variables
                    .iter()
                    .filter_map(|(name, variable)| {
                        self.var_ix(entity, name).map(|ix| (ix, variable.value))
                    })
                    .collect();
                for (x, target) in anchors {
                    self.relations.push(Relation {
                        constraint_index: Some(index),
                        priority: Strength::Strong.priority(),
                        kind: RelKind::Anchor { x, target },
                    });
                }
            }
            ConstraintType::Midpoint => {
                self.expect_operands(c, 2)?;
                let e0 = self.operand(c, 0)?;
                let e1 = self.operand(c, 1)?;
                // Spelled midpoint(point, line), but tolerate the swapped
                // argument order.
                let (point, line) = if self.line_vars(e0).is_some() && self.line_vars(e1).is_none()
                {
                    (e1, e0)
                } else {
                    (e0, e1)
                };
                let anchor = self.point_anchor(c, point, None)?;
                match (anchor, self.line_vars(line)) {
                    (Some((px, py)), Some(l)) => {
                        self.push(index, c, RelKind::Midpoint { p: px, s: l[0], e: l[2] });
                        self.push(index, c, RelKind::Midpoint { p: py, s: l[1], e: l[3] });
                    }
                    _ => self.skip(c, "midpoint needs a point and a line".to_owned()),
                }
            }
            ConstraintType::Symmetric => {
                self.expect_operands(c, 3)?;
                let e0 = self.operand(c, 0)?;
                let e1 = self.operand(c, 1)?;
                let axis_entity = self.operand(c, 2)?;
                let a = self.point_anchor(c, e0, c.text_param("point1"))?;
                let b = self.point_anchor(c, e1, c.text_param("point2"))?;
                match (a, b, self.line_vars(axis_entity)) {
                    (Some((ax, ay)), Some((bx, by)), Some(axis)) => {
                        self.push(index, c, RelKind::SymmetricMid { ax, ay, bx, by, axis });
                        self.push(index, c, RelKind::SymmetricPerp { ax, ay, bx, by, axis });
                    }
                    _ => self.skip(
                        c,
                        "symmetric needs two point-like operands and an axis line".to_owned(),
                    ),
                }
            }
            ConstraintType::Angle => {
                // TODO: lower angle constraints once the direction-vector
                // formulation settles; for now they're skipped.
                warn!(constraint = %c.id, "angle constraints are not supported yet; skipping");
                self.warnings.push(Warning {
                    constraint_id: Some(c.id.clone()),
                    content: WarningContent::Unsupported(ConstraintType::Angle),
                });
            }
        }
        Ok(())
    }
}
