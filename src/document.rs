//! The v1.0 JSON document format for sketches.
//!
//! Structural problems (missing `version`, a constraint without
//! `entity_ids`, ...) are rejected by deserialization itself; semantic
//! problems (a constraint referencing an unknown entity) by
//! [`Document::validate`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::constraints::{Constraint, ConstraintType, ParamValue, Strength};
use crate::entities::{Entity, EntityKind};
use crate::system::System;

/// The document format version this crate writes.
pub const FORMAT_VERSION: &str = "1.0";

/// Problems that make a document unusable.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum DocumentError {
    /// The JSON was structurally invalid: bad syntax, or a required field
    /// (`version`, `entities`, `constraints`, an entity's `id`/`type`/
    /// `geometry`, a constraint's `id`/`type`/`entity_ids`) was missing or
    /// of the wrong shape.
    #[error("could not parse document: {0}")]
    Parse(#[from] serde_json::Error),
    /// A constraint references an entity the document doesn't define.
    #[error("constraint {constraint_id} references unknown entity \"{entity_id}\"")]
    UnknownEntity {
        /// Id of the offending constraint.
        constraint_id: String,
        /// The unresolvable entity id.
        entity_id: String,
    },
    /// Two entities share an id.
    #[error("duplicate entity id \"{0}\"")]
    DuplicateEntity(String),
}

/// A serialized sketch: version, provenance metadata, entities,
/// constraints, and optional named parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Format version, e.g. `"1.0"`.
    pub version: String,
    /// Provenance of the document.
    pub metadata: DocumentMetadata,
    /// Entity records, in order.
    pub entities: Vec<EntityRecord>,
    /// Constraint records, in order.
    pub constraints: Vec<ConstraintRecord>,
    /// Optional named driving parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<NamedParameter>>,
}

/// Who made the document, when, and with what.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Creation timestamp, caller-formatted.
    pub created_at: String,
    /// Last-modified timestamp, caller-formatted.
    pub modified_at: String,
    /// Version of the solver that wrote the document.
    pub solver_version: String,
    /// Optional sketch name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DocumentMetadata {
    /// Metadata stamped with this crate's version. Timestamps are the
    /// caller's business; the library takes no clock dependency.
    pub fn new(created_at: impl Into<String>, modified_at: impl Into<String>) -> Self {
        Self {
            created_at: created_at.into(),
            modified_at: modified_at.into(),
            solver_version: env!("CARGO_PKG_VERSION").to_owned(),
            name: None,
            author: None,
            description: None,
        }
    }
}

/// One serialized entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity id.
    pub id: String,
    /// Entity kind.
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Flat `variable name -> value` map.
    pub geometry: IndexMap<String, f64>,
}

/// One serialized constraint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRecord {
    /// Constraint id.
    pub id: String,
    /// Constraint type.
    #[serde(rename = "type")]
    pub constraint_type: ConstraintType,
    /// The entities this constraint relates.
    pub entity_ids: Vec<String>,
    /// Scalar targets and selectors.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, ParamValue>,
    /// Priority band; absent means required.
    #[serde(default)]
    pub strength: Strength,
    /// Inert-but-recorded flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub suppressed: bool,
    /// Set for auto-proposed constraints.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_auto: bool,
}

/// A named driving parameter (e.g. `thickness = 3 mm`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedParameter {
    /// Parameter name.
    pub name: String,
    /// Current numeric value.
    pub value: f64,
    /// Unit label.
    pub unit: String,
    /// Optional driving expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Document {
    /// Parse and validate a document.
    pub fn from_json(text: &str) -> Result<Self, DocumentError> {
        let document: Self = serde_json::from_str(text)?;
        document.validate()?;
        Ok(document)
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check cross-references: every constraint's entity ids must resolve,
    /// and entity ids must be unique.
    pub fn validate(&self) -> Result<(), DocumentError> {
        let mut seen = std::collections::BTreeSet::new();
        for entity in &self.entities {
            if !seen.insert(&entity.id) {
                return Err(DocumentError::DuplicateEntity(entity.id.clone()));
            }
        }
        for constraint in &self.constraints {
            for entity_id in &constraint.entity_ids {
                if !seen.contains(entity_id) {
                    return Err(DocumentError::UnknownEntity {
                        constraint_id: constraint.id.clone(),
                        entity_id: entity_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Serialize a system.
    pub fn from_system(system: &System, metadata: DocumentMetadata) -> Self {
        let entities = system
            .entities
            .values()
            .map(|entity| EntityRecord {
                id: entity.id.clone(),
                kind: entity.kind,
                geometry: entity
                    .variables
                    .iter()
                    .map(|(name, variable)| (name.clone(), variable.value))
                    .collect(),
            })
            .collect();
        let constraints = system
            .constraints
            .iter()
            .map(|constraint| ConstraintRecord {
                id: constraint.id.clone(),
                constraint_type: constraint.constraint_type,
                entity_ids: constraint.entity_ids.clone(),
                parameters: constraint.parameters.clone(),
                strength: constraint.strength,
                suppressed: constraint.suppressed,
                is_auto: constraint.is_auto,
            })
            .collect();
        Self {
            version: FORMAT_VERSION.to_owned(),
            metadata,
            entities,
            constraints,
            parameters: None,
        }
    }

    /// Rebuild the in-memory system this document describes.
    pub fn into_system(self) -> System {
        let mut system = System::new();
        for record in self.entities {
            system.add_entity(Entity::from_variables(record.id, record.kind, &record.geometry));
        }
        for record in self.constraints {
            system.add_constraint(Constraint {
                id: record.id,
                constraint_type: record.constraint_type,
                entity_ids: record.entity_ids,
                parameters: record.parameters,
                strength: record.strength,
                suppressed: record.suppressed,
                is_auto: record.is_auto,
            });
        }
        system
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_version() {
        let text = r#"{ "metadata": { "created_at": "", "modified_at": "", "solver_version": "" }, "entities": [], "constraints": [] }"#;
        assert!(Document::from_json(text).is_err());
    }

    #[test]
    fn rejects_non_array_constraints() {
        let text = r#"{ "version": "1.0", "metadata": { "created_at": "", "modified_at": "", "solver_version": "" }, "entities": [], "constraints": {} }"#;
        assert!(Document::from_json(text).is_err());
    }

    #[test]
    fn rejects_entity_missing_geometry() {
        let text = r#"{
            "version": "1.0",
            "metadata": { "created_at": "", "modified_at": "", "solver_version": "" },
            "entities": [{ "id": "p1", "type": "point" }],
            "constraints": []
        }"#;
        assert!(Document::from_json(text).is_err());
    }

    #[test]
    fn rejects_unknown_entity_reference() {
        let text = r#"{
            "version": "1.0",
            "metadata": { "created_at": "", "modified_at": "", "solver_version": "" },
            "entities": [{ "id": "p1", "type": "point", "geometry": { "x": 0.0, "y": 0.0 } }],
            "constraints": [{ "id": "c1", "type": "fix", "entity_ids": ["ghost"] }]
        }"#;
        let err = Document::from_json(text).unwrap_err();
        assert!(err.to_string().contains("ghost"), "{err}");
    }

    #[test]
    fn accepts_minimal_document() {
        let text = r#"{
            "version": "1.0",
            "metadata": { "created_at": "2026-01-01", "modified_at": "2026-01-02", "solver_version": "0.1.0" },
            "entities": [
                { "id": "l1", "type": "line", "geometry": { "start_x": 0.0, "start_y": 0.0, "end_x": 10.0, "end_y": 2.0 } }
            ],
            "constraints": [
                { "id": "c1", "type": "horizontal", "entity_ids": ["l1"], "strength": "strong" }
            ]
        }"#;
        let document = Document::from_json(text).unwrap();
        assert_eq!(document.constraints[0].strength, Strength::Strong);
        let system = document.into_system();
        assert_eq!(system.entities.len(), 1);
        assert_eq!(system.constraints.len(), 1);
    }
}
