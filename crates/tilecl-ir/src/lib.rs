//! Intermediate representation of warp-group kernels.
//!
//! A kernel body is a flat list of [instructions](Instruction) recorded in a [Scope]. Registers
//! are SSA [variables](Variable), memory is addressed through strided [memory references](MemRef).

mod item;
mod memory;
mod memref;
mod non_semantic;
mod operation;
mod operator;
mod plane;
mod scope;
mod variable;

pub use item::*;
pub use memory::*;
pub use memref::*;
pub use non_semantic::*;
pub use operation::*;
pub use operator::*;
pub use plane::*;
pub use scope::*;
pub use variable::*;

/// Number of threads cooperating on a warp-group matrix tile.
pub const WARPGROUP_SIZE: usize = 128;

/// Number of threads in a warp.
pub const WARP_SIZE: usize = 32;
