pub mod entities;
pub mod repositories;
pub mod services;
pub mod value_objects;

/// Tolerance used when comparing position sizes and prices.
pub const EPSILON: f64 = 1e-9;
