//! Command-line interface

pub mod commands;
pub mod run;

pub use commands::*;
pub use run::run;
