pub mod catalog;
pub mod cli;
pub mod config;
pub mod connect;
pub mod describe;
pub mod error;
pub mod extract;
pub mod generate;
pub mod git;
pub mod infer;
pub mod log;
pub mod shape;
pub mod write;

pub use crate::cli::Args;
pub use crate::config::{Defaults, Options, PartialOptions};
pub use crate::generate::{generate, GenerateReport, Generator};
pub use crate::log::init;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
pub mod test_helpers;
