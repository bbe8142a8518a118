mod error;
mod execution;
mod interface;

pub use error::ToolError;
pub use execution::{BatchItem, execute_batch};
pub use interface::{EntityLookup, EventKind, StaticEntityLookup, ToolRegistry};
