//! The backend of the compiler turns canonical MIR into x86-64 assembly in
//! Intel syntax, one function at a time:
//! 1. Tile every statement into instructions over virtual registers.
//! 2. Allocate registers, spilling to stack slots where needed.
//! 3. Wrap the body in a frame that respects the System V calling
//!    convention.
//!
//! Strings live in the data section as a length word followed by one word
//! per character.

use serde::{Deserialize, Serialize};

pub mod abi;
pub mod asm;
pub mod liveness;
pub mod pretty_print;
pub mod register_allocation;
pub mod targets;
pub mod tiling;

pub use self::register_allocation::RegisterAllocatorKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodegenOptions {
    pub register_allocator: RegisterAllocatorKind,
    /// Keep each MIR statement as a comment above its instructions
    pub emit_comments: bool,
}
