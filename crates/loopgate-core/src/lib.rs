pub mod checkpoint;
pub mod checks;
pub mod coderabbit;
pub mod config;
pub mod controller;
pub mod error;
pub mod io;
pub mod loop_state;
pub mod paths;
pub mod rate_limit;
pub mod reviewer;
pub mod runner;
pub mod secrets;
pub mod ship;
pub mod tokens;
pub mod vcs;

pub use error::{LoopgateError, Result};
