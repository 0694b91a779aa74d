#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod compiler;
pub mod data;
pub mod dependency;
pub mod engine;
mod error;
pub mod eval;
#[cfg(feature = "logging")]
pub mod logging;
pub mod output;
pub mod source;
pub mod template;
pub mod utils;

use std::sync::Arc;

pub use crate::compiler::{
    Compiler, CompilerOptions, CompilerOptionsBuilder, CompilerResults, CompilerStatistics,
    DeprecationLevel,
};
pub use crate::dependency::DependencyChecker;
pub use crate::error::*;

/// Shared immutable string used for names, keys and string values.
pub type ArcStr = Arc<str>;
