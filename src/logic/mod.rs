//! Logic modules: translates a user request into concrete components.
//!
//! # Modules
//!
//! - `resolver`: selection validation, dependency closure and apply ordering

pub mod resolver;
