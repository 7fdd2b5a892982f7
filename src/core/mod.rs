//! Core data types and models

pub mod chain;
pub mod clock;
pub mod mutation;
pub mod record;
pub mod temporal;

pub use chain::*;
pub use clock::*;
pub use mutation::*;
pub use record::*;
pub use temporal::*;
