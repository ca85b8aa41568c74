// Entity Models
//
// Each entity has:
// - Stable identity (registry identifier) that NEVER changes
// - Values that may arrive from several sources and get merged
// - Typed edges to other identities

pub mod entity;
pub mod relationship;

pub use entity::{Entity, EntityKind, Terminus};
pub use relationship::{Relationship, RelationshipKind};
