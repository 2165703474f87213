use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::tma::{TensorDescriptor, TMA_DESCRIPTOR_BYTES};

/// Host functions a kernel module may call before its launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeFunction {
    /// Encodes a tensor descriptor into the host copy of the scratch buffer.
    InitTmaDesc,
    /// Copies the host scratch buffer to the device, asynchronously with respect to the host.
    MemcpyAsyncH2D,
}

impl RuntimeFunction {
    pub const ALL: [RuntimeFunction; 2] = [Self::InitTmaDesc, Self::MemcpyAsyncH2D];

    /// Symbol name of the function.
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeFunction::InitTmaDesc => "tilecl_init_tma_desc",
            RuntimeFunction::MemcpyAsyncH2D => "tilecl_memcpy_async_h2d",
        }
    }

    /// C signature of the function, as declared in the module.
    pub fn signature(&self) -> &'static str {
        match self {
            RuntimeFunction::InitTmaDesc => {
                "void(ptr host, ptr base, i64 elem_bytes, i64 rank, ptr sizes, ptr strides, i64 swizzle, ptr box)"
            }
            RuntimeFunction::MemcpyAsyncH2D => "void(ptr dst, ptr src, i64 bytes, ptr stream)",
        }
    }
}

static RUNTIME_FUNCTIONS: spin::Once<HashMap<&'static str, RuntimeFunction>> = spin::Once::new();

/// Registers the runtime functions.
///
/// Compilers call it before looking up the functions declared by a module. Calling it more than
/// once is a no-op.
pub fn init() {
    RUNTIME_FUNCTIONS.call_once(|| {
        log::debug!("Registering tilecl runtime functions");
        RuntimeFunction::ALL
            .into_iter()
            .map(|function| (function.name(), function))
            .collect()
    });
}

/// Whether [init] has been called.
pub fn is_initialized() -> bool {
    RUNTIME_FUNCTIONS.is_completed()
}

/// Finds a registered runtime function by its symbol name.
pub fn lookup(name: &str) -> Option<RuntimeFunction> {
    RUNTIME_FUNCTIONS
        .get()
        .and_then(|functions| functions.get(name).copied())
}

/// Host implementation of [RuntimeFunction::InitTmaDesc].
pub fn init_tma_desc(host: &mut [u8], descriptor: &TensorDescriptor) {
    host[..TMA_DESCRIPTOR_BYTES].copy_from_slice(&descriptor.encode());
}

/// Host implementation of [RuntimeFunction::MemcpyAsyncH2D].
pub fn memcpy_async_h2d(device: &mut [u8], host: &[u8]) {
    device[..host.len()].copy_from_slice(host);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();

        assert!(is_initialized());
        assert_eq!(
            lookup("tilecl_init_tma_desc"),
            Some(RuntimeFunction::InitTmaDesc)
        );
        assert_eq!(lookup("tilecl_launch"), None);
    }
}
