//! Tree-to-tree rewrites over the kernel IR.

pub mod structure_exits;

pub use structure_exits::{structure_exits, structure_exits_in};
