//! Workspace operations used by the action nodes. Paths are resolved by the caller.

pub mod fs;
pub mod grep;
pub mod tree;
