//! Configuration values and the paths that address them.

mod element;
mod path;
mod term;

pub use element::{Dict, Element};
pub use path::{Path, PathKind, escape};
pub use term::{MAX_INDEX, Term};
