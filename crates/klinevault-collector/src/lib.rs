//! The collector: per-symbol sync engine and the scheduling loop driving it.

pub mod config;
pub mod obs;
pub mod schedule;
pub mod sync;
