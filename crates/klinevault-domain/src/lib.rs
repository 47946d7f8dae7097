//! Domain layer (hexagon core) for klinevault.

pub mod repositories;
pub mod sync;
pub mod value_objects;
