//! Global scratch memory.
//!
//! The scratch buffer holds data initialized on the host and copied to the device right before
//! the launch, tensor descriptors for the most part. Its size is only known once the whole
//! kernel body has been generated, so allocation happens in two phases: a [ScratchBuilder]
//! collects requests while the body runs and is then sealed into an immutable [ScratchLayout].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    runtime_fn::init_tma_desc,
    tma::{TensorDescriptor, TMA_DESCRIPTOR_BYTES},
};

/// Errors raised by scratch allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScratchError {
    /// The running offset isn't aligned to the request, padding isn't supported.
    #[error("Scratch offset {offset} is not aligned to {alignment} bytes, padding is not supported")]
    Misaligned { offset: usize, alignment: usize },
    #[error("Scratch alignment must be a non-zero power of two, got {0}")]
    InvalidAlignment(usize),
    #[error("Initializer of {init_bytes} bytes doesn't fit a {size} bytes allocation")]
    InitTooLarge { init_bytes: usize, size: usize },
}

/// Host side initializer of a scratch allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScratchInit {
    Zeroed,
    Bytes(Vec<u8>),
    TensorDescriptor(TensorDescriptor),
}

impl ScratchInit {
    fn len(&self) -> usize {
        match self {
            ScratchInit::Zeroed => 0,
            ScratchInit::Bytes(bytes) => bytes.len(),
            ScratchInit::TensorDescriptor(_) => TMA_DESCRIPTOR_BYTES,
        }
    }

    fn write(&self, dst: &mut [u8]) {
        match self {
            ScratchInit::Zeroed => dst.fill(0),
            ScratchInit::Bytes(bytes) => dst[..bytes.len()].copy_from_slice(bytes),
            ScratchInit::TensorDescriptor(descriptor) => init_tma_desc(dst, descriptor),
        }
    }
}

/// A region of the scratch buffer.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScratchAllocation {
    /// Offset in bytes from the start of the scratch buffer.
    pub offset: usize,
    pub size: usize,
    pub init: ScratchInit,
}

/// Collects scratch allocations while a kernel body is generated.
#[derive(Debug, Default)]
pub struct ScratchBuilder {
    next_offset: usize,
    allocations: Vec<ScratchAllocation>,
}

impl ScratchBuilder {
    /// Allocates `size` bytes at the running offset.
    ///
    /// The alignment defaults to the size. No padding is ever inserted: the request fails when
    /// the running offset isn't already aligned.
    pub fn alloc(
        &mut self,
        size: usize,
        alignment: Option<usize>,
        init: ScratchInit,
    ) -> Result<usize, ScratchError> {
        let alignment = alignment.unwrap_or(size);
        if !alignment.is_power_of_two() {
            return Err(ScratchError::InvalidAlignment(alignment));
        }
        if self.next_offset % alignment != 0 {
            return Err(ScratchError::Misaligned {
                offset: self.next_offset,
                alignment,
            });
        }
        if init.len() > size {
            return Err(ScratchError::InitTooLarge {
                init_bytes: init.len(),
                size,
            });
        }

        let offset = self.next_offset;
        self.next_offset += size;
        self.allocations
            .push(ScratchAllocation::new(offset, size, init));

        Ok(offset)
    }

    /// The running offset, which is also the number of bytes allocated so far.
    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    pub fn seal(self) -> ScratchLayout {
        ScratchLayout {
            bytes: self.next_offset,
            allocations: self.allocations,
        }
    }
}

/// Final content of the scratch buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScratchLayout {
    pub bytes: usize,
    pub allocations: Vec<ScratchAllocation>,
}

impl ScratchLayout {
    /// Runs every host initializer, producing the bytes copied to the device before the launch.
    pub fn materialize(&self) -> Vec<u8> {
        let mut host = vec![0u8; self.bytes];
        for allocation in self.allocations.iter() {
            let dst = &mut host[allocation.offset..allocation.offset + allocation.size];
            allocation.init.write(dst);
        }
        host
    }
}
