pub mod conditional;
pub mod config;
pub mod devices;
pub mod error;
pub mod executor;
pub mod planner;
pub mod shell;
pub mod steps;
pub mod util;
pub mod workspace;

pub use error::{Error, Result};
