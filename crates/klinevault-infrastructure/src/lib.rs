//! Infrastructure adapters for klinevault.

pub mod persistence;
pub mod source;
