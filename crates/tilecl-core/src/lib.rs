//! Kernel generation for warp-group matrix kernels.
//!
//! A [kernel builder](kernel::KernelBuilder) lays out shared memory, runs a body callback over a
//! [launch context](launch::LaunchContext) and assembles a
//! [kernel module](tilecl_runtime::kernel::KernelModule). The body issues bulk asynchronous
//! copies through tensor descriptors and computes on [fragmented arrays](fragment::FragmentedArray).

#[macro_use]
extern crate derive_new;

/// Error types.
pub mod error;
/// Register fragments distributed over a warp-group.
pub mod fragment;
/// Slice parsing for async copies.
pub mod indexing;
/// Kernel definition and assembly.
pub mod kernel;
/// Launch context, barriers and async copies.
pub mod launch;
/// On-device region profiler.
pub mod profiler;
/// Reference transforms applied on both sides of a copy.
pub mod transform;

pub use error::*;
pub use kernel::*;

pub use tilecl_ir as ir;
pub use tilecl_runtime as runtime;
