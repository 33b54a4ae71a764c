//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

use stratagem_types::context::OntologyEntityKind;

pub mod pool;
pub mod probe;
pub mod session;

/// Table backing each entity kind. All four share the same shape.
pub(crate) const fn entity_table(kind: OntologyEntityKind) -> &'static str {
    match kind {
        OntologyEntityKind::Task => "tasks",
        OntologyEntityKind::Plan => "plans",
        OntologyEntityKind::Goal => "goals",
        OntologyEntityKind::Document => "documents",
    }
}
