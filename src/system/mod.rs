// src/system/mod.rs

pub mod executor;
pub mod glob;
