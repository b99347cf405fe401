// src/core/mod.rs

pub mod context;
pub mod evaluator;
pub mod loaders;
pub mod paths;
pub mod processors;
pub mod project_service;
pub mod repository;
