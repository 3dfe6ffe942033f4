//! The input record for a solve: entities plus constraints.

use indexmap::IndexMap;

use crate::constraints::Constraint;
use crate::entities::{Entity, EntityId};

/// A sketch's worth of entities and the constraints between them.
///
/// Entity iteration order is insertion order. Constraint order is preserved
/// and used as the tie-break in diagnostics reports, so failure reports are
/// stable across runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct System {
    /// Entities keyed by id. The key always equals `entity.id`.
    pub entities: IndexMap<EntityId, Entity>,
    /// Constraints in insertion order.
    pub constraints: Vec<Constraint>,
}

impl System {
    /// An empty system.
    #[mutants::skip]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity, keyed by its own id. Returns the id.
    pub fn add_entity(&mut self, entity: Entity) -> EntityId {
        let id = entity.id.clone();
        self.entities.insert(id.clone(), entity);
        id
    }

    /// Append a constraint.
    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    /// Look up an entity.
    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// The constraints that are live for solving and diagnostics.
    pub fn active_constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| !c.suppressed)
    }

    /// Flip a constraint's suppression state. Returns false if no
    /// constraint has that id.
    pub fn set_constraint_suppression(&mut self, constraint_id: &str, suppressed: bool) -> bool {
        match self.constraints.iter_mut().find(|c| c.id == constraint_id) {
            Some(c) => {
                c.suppressed = suppressed;
                true
            }
            None => false,
        }
    }

    /// The first constraint (in input order) that references an entity id
    /// missing from the system, if any. Suppressed constraints are exempt.
    pub(crate) fn first_unknown_reference(&self) -> Option<(&Constraint, &EntityId)> {
        for constraint in self.active_constraints() {
            for entity_id in &constraint.entity_ids {
                if !self.entities.contains_key(entity_id) {
                    return Some((constraint, entity_id));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintType;
    use crate::entities::RawGeometry;

    #[test]
    fn suppression_toggles_by_id() {
        let mut system = System::new();
        system.add_entity(Entity::from_geometry("p", RawGeometry::Point { x: 0.0, y: 0.0 }));
        system.add_constraint(Constraint::new("c1", ConstraintType::Fix, &["p"]));
        assert_eq!(system.active_constraints().count(), 1);

        assert!(system.set_constraint_suppression("c1", true));
        assert_eq!(system.active_constraints().count(), 0);
        assert!(!system.set_constraint_suppression("no-such", true));
    }

    #[test]
    fn unknown_references_are_found_in_input_order() {
        let mut system = System::new();
        system.add_entity(Entity::from_geometry("p", RawGeometry::Point { x: 0.0, y: 0.0 }));
        system.add_constraint(Constraint::new("c1", ConstraintType::Fix, &["p"]));
        system.add_constraint(Constraint::new("c2", ConstraintType::Fix, &["ghost"]));
        let (constraint, entity_id) = system.first_unknown_reference().unwrap();
        assert_eq!(constraint.id, "c2");
        assert_eq!(entity_id, "ghost");

        // Suppressed constraints may dangle.
        system.constraints[1].suppressed = true;
        assert!(system.first_unknown_reference().is_none());
    }
}
