// Core data types (observations, features, model results)
pub mod types;

// Numeric helpers
pub mod math;

// Elo rating arithmetic and rating table
pub mod rating;

// Regression trees
pub mod tree;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
