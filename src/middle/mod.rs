//! Modules are type checked here and lowered through HIR to MIR, where the
//! optimizations run before the backend turns functions into assembly.

pub mod allocator;
pub mod hir;
pub mod mir;
pub mod optimization;
pub mod type_checking;
