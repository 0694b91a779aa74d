//! Execution of templates against an object's configuration tree.

mod builtins;
mod context;
mod exec;
mod final_flags;
mod holder;
mod iterators;
mod locals;
mod types;

pub use context::{Context, Definitions, Dependencies, Function};
pub use final_flags::FinalFlags;
pub use holder::{SelfHolder, SelfTarget};
pub use iterators::{IteratorMap, ResourceIterator};
pub use locals::LocalVariableMap;
pub use types::{Binding, Builtin, TypeDef, TypeMap};
