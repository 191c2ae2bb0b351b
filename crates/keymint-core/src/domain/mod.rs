//! Domain layer
//!
//! - `signing`: signing key registry, entities and repositories

pub mod signing;
