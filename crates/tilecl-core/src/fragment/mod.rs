//! Matrices distributed over the registers of a warp-group.

mod array;
mod layout;
mod registers;
mod store;

pub use array::*;
pub use layout::*;
pub use registers::Registers;
