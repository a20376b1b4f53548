// src/phac/mod.rs
pub mod client;
pub mod dashboard;
pub mod models;
