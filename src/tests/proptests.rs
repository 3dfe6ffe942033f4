use proptest::prelude::*;

use crate::entities::RawGeometry;
use crate::*;

fn anchored_point(id: &str, x: f64, y: f64) -> Entity {
    let mut point = Entity::from_geometry(id, RawGeometry::Point { x, y });
    point.set_fixed(true);
    point
}

proptest! {
    /// Fully fixed sketches solve to exactly their initial values.
    #[test]
    fn fixed_sketches_stay_put(
        px in -10000i32..10000,
        py in -10000i32..10000,
        qx in -10000i32..10000,
        qy in -10000i32..10000,
    ) {
        let mut system = System::new();
        system.add_entity(Entity::from_geometry("p", RawGeometry::Point { x: px.into(), y: py.into() }));
        system.add_entity(Entity::from_geometry("q", RawGeometry::Point { x: qx.into(), y: qy.into() }));
        system.add_constraint(Constraint::new("fp", ConstraintType::Fix, &["p"]));
        system.add_constraint(Constraint::new("fq", ConstraintType::Fix, &["q"]));

        let result = solve(&system);
        prop_assert!(result.success);
        prop_assert_eq!(result.value("p", "x"), Some(f64::from(px)));
        prop_assert_eq!(result.value("p", "y"), Some(f64::from(py)));
        prop_assert_eq!(result.value("q", "x"), Some(f64::from(qx)));
        prop_assert_eq!(result.value("q", "y"), Some(f64::from(qy)));
    }

    /// A required distance from an anchored point is hit within tolerance,
    /// whatever the starting gap.
    #[test]
    fn distance_identity(
        px in -100i32..100,
        py in -100i32..100,
        dx in 1i32..100,
        dy in 0i32..100,
        d in 1i32..1000,
    ) {
        let mut system = System::new();
        system.add_entity(anchored_point("p", px.into(), py.into()));
        system.add_entity(Entity::from_geometry("q", RawGeometry::Point {
            x: (px + dx).into(),
            y: (py + dy).into(),
        }));
        system.add_constraint(
            Constraint::new("d", ConstraintType::Distance, &["p", "q"]).with_value(d.into()),
        );

        let result = solve(&system);
        prop_assert!(result.success, "{:?}", result.error);
        let gap_x = result.value("q", "x").unwrap() - result.value("p", "x").unwrap();
        let gap_y = result.value("q", "y").unwrap() - result.value("p", "y").unwrap();
        let actual = libm::hypot(gap_x, gap_y);
        prop_assert!((actual - f64::from(d)).abs() < 1e-3, "distance was {actual}");
    }

    /// Adding a constraint never raises the reported DOF delta.
    #[test]
    fn dof_delta_is_monotone(seed in 0usize..6) {
        let mut system = System::new();
        system.add_entity(Entity::from_geometry("l", RawGeometry::Line {
            start: [0.0, 0.0],
            end: [10.0, 2.0],
        }));
        system.add_entity(Entity::from_geometry("c", RawGeometry::Circle {
            center: [0.0, 0.0],
            radius: 5.0,
        }));
        let pool = [
            Constraint::new("a", ConstraintType::Horizontal, &["l"]),
            Constraint::new("b", ConstraintType::Vertical, &["l"]),
            Constraint::new("c1", ConstraintType::Radius, &["c"]).with_value(5.0),
            Constraint::new("d", ConstraintType::Tangent, &["c", "l"]),
            Constraint::new("e", ConstraintType::Fix, &["c"]),
            Constraint::new("f", ConstraintType::Fix, &["l"]),
        ];
        let mut last = Diagnostics::dof_analysis(&system).delta;
        for constraint in pool.into_iter().cycle().skip(seed).take(6) {
            system.add_constraint(constraint);
            let delta = Diagnostics::dof_analysis(&system).delta;
            prop_assert!(delta <= last);
            last = delta;
        }
    }

    /// Serialize, reparse, rebuild: the system survives unchanged.
    #[test]
    fn document_round_trip(
        x in -10000i32..10000,
        y in -10000i32..10000,
        r in 1i32..500,
        target in 1i32..500,
    ) {
        let mut system = System::new();
        system.add_entity(Entity::from_geometry("p", RawGeometry::Point { x: x.into(), y: y.into() }));
        system.add_entity(Entity::from_geometry("c", RawGeometry::Circle {
            center: [x.into(), y.into()],
            radius: r.into(),
        }));
        system.add_constraint(
            Constraint::new("rad", ConstraintType::Radius, &["c"]).with_value(target.into()),
        );
        system.add_constraint(
            Constraint::new("pin", ConstraintType::Fix, &["p"]).with_strength(Strength::Strong),
        );

        let document = Document::from_system(&system, DocumentMetadata::new("t0", "t1"));
        let reparsed = Document::from_json(&document.to_json().unwrap()).unwrap();
        prop_assert_eq!(reparsed.clone(), document);
        prop_assert_eq!(reparsed.into_system(), system);
    }
}
