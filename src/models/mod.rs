// src/models/mod.rs

pub mod answer;
pub mod exam_result;
pub mod package;
pub mod question;
pub mod session;
pub mod user;
