use hashbrown::HashMap;
use tilecl_ir::{Buffer, Elem, Item, MemRef, Scope, UIntKind, Variable, VariableKind};
use tilecl_runtime::{
    scratch::{ScratchBuilder, ScratchInit, ScratchLayout},
    tma::{TensorDescriptor, TensorMapSwizzle, TMA_DESCRIPTOR_ALIGNMENT, TMA_DESCRIPTOR_BYTES},
};

use crate::{
    error::{KernelError, ProtocolViolation},
    profiler::OnDeviceProfiler,
    transform::{MemRefTransform, Transform},
};

/// Identity of a tensor descriptor.
///
/// Two copies with equal keys share the descriptor and its scratch allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TmaDescriptorKey {
    pub memref: MemRef,
    pub slice_shape: Vec<usize>,
    pub swizzle: TensorMapSwizzle,
    pub transforms: Vec<MemRefTransform>,
}

/// Per launch code generation state: the kernel body scope, scratch allocations, tensor
/// descriptors and the optional profiler.
///
/// A context is owned by a single kernel build and dropped when the build ends.
#[derive(Debug)]
pub struct LaunchContext {
    pub(crate) scope: Scope,
    scratch: ScratchBuilder,
    tma_descriptors: HashMap<TmaDescriptorKey, Variable>,
    profiler: Option<OnDeviceProfiler>,
}

impl LaunchContext {
    pub(crate) fn new(scope: Scope, profiler: Option<OnDeviceProfiler>) -> Self {
        Self {
            scope,
            scratch: ScratchBuilder::default(),
            tma_descriptors: HashMap::new(),
            profiler,
        }
    }

    /// The scope the kernel body is recorded into.
    pub fn scope(&mut self) -> &mut Scope {
        &mut self.scope
    }

    /// Number of scratch bytes allocated so far.
    pub fn scratch_bytes(&self) -> usize {
        self.scratch.next_offset()
    }

    /// Number of distinct tensor descriptors created so far.
    pub fn num_tma_descriptors(&self) -> usize {
        self.tma_descriptors.len()
    }

    /// Allocates a region of the global scratch buffer, initialized on the host right before
    /// the launch.
    ///
    /// The alignment defaults to the size. The running offset is never padded, a misaligned
    /// request is rejected.
    pub fn alloc_scratch(
        &mut self,
        size: usize,
        alignment: Option<usize>,
        init: ScratchInit,
    ) -> Result<Variable, KernelError> {
        let offset = self.scratch.alloc(size, alignment, init)?;
        log::debug!("Allocated {size} scratch bytes at offset {offset}");

        Ok(Variable::new(
            VariableKind::ScratchPointer { offset },
            Item::new(Elem::UInt(UIntKind::U64)),
        ))
    }

    /// Runs `func` inside a profiled region when a profiler is attached.
    pub fn named_region<R>(
        &mut self,
        name: &str,
        func: impl FnOnce(&mut Self) -> Result<R, KernelError>,
    ) -> Result<R, KernelError> {
        let region = match self.profiler.as_mut() {
            Some(profiler) => Some(profiler.start(&mut self.scope, name)?),
            None => None,
        };

        let output = func(self)?;

        if let (Some(profiler), Some(region)) = (self.profiler.as_mut(), region) {
            profiler.end(&mut self.scope, region);
        }

        Ok(output)
    }

    pub(crate) fn cached_tma_descriptor(&self, key: &TmaDescriptorKey) -> Option<Variable> {
        self.tma_descriptors.get(key).copied()
    }

    /// Builds the descriptor for `key` without allocating it.
    pub(crate) fn tma_descriptor(key: &TmaDescriptorKey) -> Result<TensorDescriptor, KernelError> {
        let Buffer::Argument(argument) = key.memref.buffer else {
            return Err(ProtocolViolation::NotKernelArgument(key.memref.to_string()).into());
        };
        let mut memref = key.memref.clone();
        for transform in key.transforms.iter() {
            memref = transform.apply(&memref)?;
        }

        Ok(TensorDescriptor::new(
            argument,
            memref.offset(),
            memref.elem.size(),
            memref.shape(),
            memref.strides(),
            &key.slice_shape,
            key.swizzle,
        )?)
    }

    /// Allocates a descriptor built by [tma_descriptor](Self::tma_descriptor).
    pub(crate) fn insert_tma_descriptor(
        &mut self,
        key: TmaDescriptorKey,
        descriptor: TensorDescriptor,
    ) -> Result<Variable, KernelError> {
        let pointer = self.alloc_scratch(
            TMA_DESCRIPTOR_BYTES,
            Some(TMA_DESCRIPTOR_ALIGNMENT),
            ScratchInit::TensorDescriptor(descriptor),
        )?;
        log::debug!(
            "Created tensor descriptor {} for {} with box {:?}",
            self.tma_descriptors.len(),
            key.memref,
            key.slice_shape
        );
        self.tma_descriptors.insert(key, pointer);

        Ok(pointer)
    }

    /// Ends the launch, finalizing the profiler and sealing the scratch layout.
    pub(crate) fn finish(mut self, grid: [u32; 3]) -> (Scope, ScratchLayout, Vec<String>) {
        let regions = match self.profiler.take() {
            Some(profiler) => profiler.finalize(&mut self.scope, grid),
            None => Vec::new(),
        };

        (self.scope, self.scratch.seal(), regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Unimplemented;
    use pretty_assertions::assert_eq;
    use tilecl_runtime::scratch::ScratchError;

    #[test]
    fn scratch_offsets_are_sequential() {
        let mut context = LaunchContext::new(Scope::root(), None);

        let first = context.alloc_scratch(128, Some(64), ScratchInit::Zeroed).unwrap();
        let second = context.alloc_scratch(128, Some(64), ScratchInit::Zeroed).unwrap();

        assert_eq!(first.kind, VariableKind::ScratchPointer { offset: 0 });
        assert_eq!(second.kind, VariableKind::ScratchPointer { offset: 128 });
    }

    #[test]
    fn misaligned_scratch_is_unimplemented() {
        let mut context = LaunchContext::new(Scope::root(), None);
        context.alloc_scratch(128, Some(64), ScratchInit::Zeroed).unwrap();
        context.alloc_scratch(128, Some(64), ScratchInit::Zeroed).unwrap();
        context.alloc_scratch(4, None, ScratchInit::Zeroed).unwrap();

        assert_eq!(
            context.alloc_scratch(128, Some(64), ScratchInit::Zeroed),
            Err(KernelError::Unimplemented(Unimplemented::Scratch(
                ScratchError::Misaligned {
                    offset: 260,
                    alignment: 64
                }
            )))
        );
        assert_eq!(context.scratch_bytes(), 260);
    }

    #[test]
    fn named_region_without_profiler_runs_body() {
        let mut context = LaunchContext::new(Scope::root(), None);

        let value = context
            .named_region("body", |context| {
                context.scope().sync_block();
                Ok(3)
            })
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(context.scope().to_string(), "sync_block()\n");
    }
}
