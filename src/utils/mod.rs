// src/utils/mod.rs

pub mod hash;
pub mod jwt;
pub mod session;
