use core::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::Variable;

/// Warp level (plane) operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Plane {
    /// Butterfly shuffle: reads `value` from the lane `lane_id ^ offset`.
    ShuffleXor {
        value: Variable,
        offset: u32,
        mask: u32,
        clamp: u32,
    },
}

/// All synchronization types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Synchronization {
    /// Synchronizes every thread of the block.
    SyncBlock,
}

impl Display for Plane {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Plane::ShuffleXor {
                value,
                offset,
                mask,
                clamp,
            } => write!(
                f,
                "shfl.bfly({value}, offset: {offset}, mask: {mask:#x}, clamp: {clamp:#x})"
            ),
        }
    }
}

impl Display for Synchronization {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Synchronization::SyncBlock => write!(f, "sync_block()"),
        }
    }
}
