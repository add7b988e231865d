// src/matching/mod.rs

pub mod producer;
pub mod scoring;
