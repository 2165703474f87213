use thiserror::Error;
use tilecl_ir::{Elem, Item, MemRefError};
use tilecl_runtime::tma::TmaError;

/// Errors raised while executing a kernel module.
///
/// Most of them are undefined behavior on real hardware, the interpreter reports them instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("Expected {expected} input buffers, got {actual}")]
    InputCount { expected: usize, actual: usize },
    #[error("Input {index} should be {expected_elem} of shape {expected_shape:?}, got {elem} of shape {shape:?}")]
    InputMismatch {
        index: usize,
        expected_elem: Elem,
        expected_shape: Vec<usize>,
        elem: Elem,
        shape: Vec<usize>,
    },
    #[error("Host buffer of {bytes} bytes doesn't hold {elems} elements of {elem}")]
    BufferSize {
        bytes: usize,
        elems: usize,
        elem: Elem,
    },
    #[error("Thread {thread} reads register %{id} before it is written")]
    UndefinedRegister { thread: usize, id: u32 },
    #[error("Access out of bounds: {0}")]
    OutOfBounds(MemRefError),
    #[error("Access of {bytes} bytes at {address} is outside of the {size} bytes of {buffer}")]
    BufferOverflow {
        buffer: &'static str,
        address: usize,
        bytes: usize,
        size: usize,
    },
    #[error("Operation `{op}` isn't defined for {item}")]
    Unsupported { op: &'static str, item: Item },
    #[error("Integer division by zero")]
    DivisionByZero,
    #[error("Block {block:?} waits on barrier {barrier} for parity {parity}, but the phase can't complete: {pending} arrivals and {tx_bytes} bytes pending")]
    BarrierHang {
        block: [u32; 3],
        barrier: String,
        parity: u32,
        pending: u32,
        tx_bytes: i64,
    },
    #[error("Barrier {0} is used before being initialized")]
    UninitializedBarrier(String),
    #[error("Block-wide synchronization reached by {active} of {threads} threads")]
    DivergentSync { active: usize, threads: usize },
    #[error("Invalid tensor descriptor: {0}")]
    Descriptor(TmaError),
    #[error("Bulk copy of {copy_bytes} bytes doesn't match the {smem_bytes} bytes of {memref}")]
    CopySize {
        memref: String,
        copy_bytes: usize,
        smem_bytes: usize,
    },
}

impl From<MemRefError> for InterpError {
    fn from(value: MemRefError) -> Self {
        InterpError::OutOfBounds(value)
    }
}

impl From<TmaError> for InterpError {
    fn from(value: TmaError) -> Self {
        InterpError::Descriptor(value)
    }
}
