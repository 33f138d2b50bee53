//! Repository layer: entity-scoped database operations.

mod visit;

pub use visit::*;
