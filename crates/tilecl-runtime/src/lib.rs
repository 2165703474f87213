//! Runtime support shared by tilecl compilers: configuration, kernel modules, scratch memory
//! and tensor memory accelerator descriptors.

#[macro_use]
extern crate derive_new;

/// Configuration module.
pub mod config;
/// Kernel module definitions.
pub mod kernel;
/// Host functions declared by kernel modules.
pub mod runtime_fn;
/// Scratch buffer layout.
pub mod scratch;
/// TMA-related runtime types.
pub mod tma;

mod compiler;
mod error;

pub use compiler::*;
pub use error::*;
pub use runtime_fn::init;
