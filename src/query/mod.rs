//! Query engine for temporal queries

pub mod executor;
pub mod predicate;

pub use executor::*;
pub use predicate::*;
