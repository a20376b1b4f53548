// src/tables/mod.rs
pub mod builders;
pub mod classify;
pub mod columns;
pub mod patches;
pub mod raw;

pub use classify::TableKind;
pub use raw::RawTable;
