//! Tensor memory accelerator descriptors.
//!
//! A descriptor tells the bulk copy engine how to walk a global tensor: element width, the
//! sizes and strides of every dimension, the box copied by one instruction and the shared memory
//! swizzle applied on arrival. Descriptors are written on the host into the scratch buffer and
//! read by the kernel through a pointer into it.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tilecl_ir::Id;

/// Size of an encoded descriptor in bytes.
pub const TMA_DESCRIPTOR_BYTES: usize = 128;
/// Required alignment of an encoded descriptor in the scratch buffer.
pub const TMA_DESCRIPTOR_ALIGNMENT: usize = 64;
/// Maximum number of dimensions of a descriptor.
pub const TMA_MAX_RANK: usize = 5;

const MAGIC: u32 = u32::from_le_bytes(*b"TMAP");

/// Memory representation of an encoded descriptor.
#[repr(C)]
#[derive(Clone, Copy, Zeroable, Pod)]
struct RawDescriptor {
    magic: u32,
    argument: u32,
    offset: u64,
    elem_size: u32,
    rank: u32,
    /// Swizzle span in bytes, 0 without swizzle.
    swizzle: u32,
    _padding: u32,
    shape: [u32; TMA_MAX_RANK],
    box_shape: [u32; TMA_MAX_RANK],
    strides: [u64; TMA_MAX_RANK],
    _reserved: [u8; 16],
}

const _: () = assert!(core::mem::size_of::<RawDescriptor>() == TMA_DESCRIPTOR_BYTES);

/// Errors raised when building or reading a descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TmaError {
    #[error("Swizzle of {0} bytes is not supported, expected 32, 64 or 128")]
    UnsupportedSwizzle(u32),
    #[error("Descriptors support at most 5 dimensions, got {0}")]
    RankTooLarge(usize),
    #[error("Descriptor box {box_shape:?} doesn't match the tensor rank {rank}")]
    BoxRankMismatch { box_shape: Vec<usize>, rank: usize },
    #[error("Invalid encoded descriptor: {0}")]
    InvalidEncoding(&'static str),
}

/// Swizzle mode of the shared memory side of a bulk copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TensorMapSwizzle {
    /// No swizzling
    #[default]
    None,
    /// Swizzle 16B chunks within 32B span
    B32,
    /// Swizzle 16B chunks within 64B span
    B64,
    /// Swizzle 16B chunks within 128B span
    B128,
}

impl TensorMapSwizzle {
    /// Parses a swizzle given as its span in bytes.
    pub fn from_bytes(swizzle: Option<u32>) -> Result<Self, TmaError> {
        match swizzle {
            None => Ok(Self::None),
            Some(32) => Ok(Self::B32),
            Some(64) => Ok(Self::B64),
            Some(128) => Ok(Self::B128),
            Some(other) => Err(TmaError::UnsupportedSwizzle(other)),
        }
    }

    /// The swizzle span in bytes, `None` when no swizzle is applied.
    pub fn bytes(&self) -> Option<u32> {
        match self {
            Self::None => None,
            Self::B32 => Some(32),
            Self::B64 => Some(64),
            Self::B128 => Some(128),
        }
    }

    /// Applies the swizzle to a byte offset relative to a 1024-byte aligned base.
    ///
    /// The 16-byte chunk index within each span is XORed with the row index, where a row is 128
    /// bytes.
    pub fn apply(&self, offset: usize) -> usize {
        match self.bytes() {
            None => offset,
            Some(span) => {
                let chunks = span as usize / 16;
                offset ^ (((offset >> 7) & (chunks - 1)) << 4)
            }
        }
    }
}

/// Value written to shared memory for elements of the box outside of the tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OobFill {
    #[default]
    Zero,
}

/// Host side view of a tensor descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDescriptor {
    /// Position of the root buffer in the kernel argument list.
    pub argument: Id,
    /// Element offset of the tensor from the start of the root buffer.
    pub offset: u64,
    pub elem_size: u32,
    /// Sizes of the tensor, outermost dimension first.
    pub shape: Vec<u32>,
    /// Strides of the tensor in elements, outermost dimension first.
    pub strides: Vec<u64>,
    /// Box copied by a single instruction, outermost dimension first.
    pub box_shape: Vec<u32>,
    pub swizzle: TensorMapSwizzle,
    pub oob_fill: OobFill,
}

impl TensorDescriptor {
    pub fn new(
        argument: Id,
        offset: usize,
        elem_size: usize,
        shape: &[usize],
        strides: &[usize],
        box_shape: &[usize],
        swizzle: TensorMapSwizzle,
    ) -> Result<Self, TmaError> {
        let rank = shape.len();
        if rank > TMA_MAX_RANK {
            return Err(TmaError::RankTooLarge(rank));
        }
        if box_shape.len() != rank || strides.len() != rank {
            return Err(TmaError::BoxRankMismatch {
                box_shape: box_shape.to_vec(),
                rank,
            });
        }

        Ok(Self {
            argument,
            offset: offset as u64,
            elem_size: elem_size as u32,
            shape: shape.iter().map(|s| *s as u32).collect(),
            strides: strides.iter().map(|s| *s as u64).collect(),
            box_shape: box_shape.iter().map(|s| *s as u32).collect(),
            swizzle,
            oob_fill: OobFill::Zero,
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of bytes moved by a single copy of the box.
    pub fn box_bytes(&self) -> usize {
        self.box_shape.iter().map(|s| *s as usize).product::<usize>() * self.elem_size as usize
    }

    /// Encodes the descriptor into the layout of `RawDescriptor`, in host byte order.
    pub fn encode(&self) -> [u8; TMA_DESCRIPTOR_BYTES] {
        let mut raw = RawDescriptor {
            magic: MAGIC,
            argument: self.argument,
            offset: self.offset,
            elem_size: self.elem_size,
            rank: self.rank() as u32,
            swizzle: self.swizzle.bytes().unwrap_or(0),
            ..Zeroable::zeroed()
        };
        let rank = self.rank();
        raw.shape[..rank].copy_from_slice(&self.shape);
        raw.box_shape[..rank].copy_from_slice(&self.box_shape);
        raw.strides[..rank].copy_from_slice(&self.strides);

        let mut bytes = [0u8; TMA_DESCRIPTOR_BYTES];
        bytes.copy_from_slice(bytemuck::bytes_of(&raw));
        bytes
    }

    /// Decodes a descriptor written by [encode](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, TmaError> {
        if bytes.len() < TMA_DESCRIPTOR_BYTES {
            return Err(TmaError::InvalidEncoding("truncated descriptor"));
        }
        // Scratch offsets are only 64-byte aligned relative to the buffer start.
        let raw: RawDescriptor = bytemuck::pod_read_unaligned(&bytes[..TMA_DESCRIPTOR_BYTES]);

        if raw.magic != MAGIC {
            return Err(TmaError::InvalidEncoding("missing magic"));
        }
        let rank = raw.rank as usize;
        if rank > TMA_MAX_RANK {
            return Err(TmaError::RankTooLarge(rank));
        }
        let swizzle = match raw.swizzle {
            0 => TensorMapSwizzle::None,
            span => TensorMapSwizzle::from_bytes(Some(span))?,
        };

        Ok(Self {
            argument: raw.argument,
            offset: raw.offset,
            elem_size: raw.elem_size,
            shape: raw.shape[..rank].to_vec(),
            box_shape: raw.box_shape[..rank].to_vec(),
            strides: raw.strides[..rank].to_vec(),
            swizzle,
            oob_fill: OobFill::Zero,
        })
    }
}
