use tilecl_ir::{MemRef, MemorySpace, Scope, TmaOps};
use tilecl_runtime::tma::TensorMapSwizzle;

use super::{once, Barrier, LaunchContext, TmaDescriptorKey};
use crate::{
    error::{ContractViolation, KernelError, ProtocolViolation, Unimplemented},
    indexing::{parse_indices, DimSlice},
    transform::{MemRefTransform, Transform},
};

/// A bulk copy between a slice of a global kernel argument and a shared memory reference.
///
/// The direction is given by the memory spaces of the source and the destination.
#[derive(Debug, Clone)]
pub struct AsyncCopy {
    pub src: MemRef,
    pub dst: MemRef,
    /// Slice of the global reference, missing trailing dimensions are taken whole.
    pub gmem_slice: Vec<DimSlice>,
    /// Transforms applied in order to the global reference.
    pub gmem_transform: Vec<MemRefTransform>,
    /// Barrier signaled when a load lands, required for loads and forbidden for stores.
    pub barrier: Option<Barrier>,
    /// Swizzle span in bytes.
    pub swizzle: Option<u32>,
    /// Whether a load arms the barrier with its byte count, defaults to `true` for loads.
    pub arrive: Option<bool>,
    /// Whether a single thread per warp-group issues the copy.
    pub uniform: bool,
}

impl AsyncCopy {
    pub fn new(src: &MemRef, dst: &MemRef) -> Self {
        Self {
            src: src.clone(),
            dst: dst.clone(),
            gmem_slice: Vec::new(),
            gmem_transform: Vec::new(),
            barrier: None,
            swizzle: None,
            arrive: None,
            uniform: true,
        }
    }

    pub fn with_slice(mut self, slice: impl IntoIterator<Item = DimSlice>) -> Self {
        self.gmem_slice = slice.into_iter().collect();
        self
    }

    pub fn with_transform(mut self, transform: impl Into<MemRefTransform>) -> Self {
        self.gmem_transform.push(transform.into());
        self
    }

    pub fn with_barrier(mut self, barrier: Barrier) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn with_swizzle(mut self, swizzle: u32) -> Self {
        self.swizzle = Some(swizzle);
        self
    }

    pub fn with_arrive(mut self, arrive: bool) -> Self {
        self.arrive = Some(arrive);
        self
    }

    pub fn with_uniform(mut self, uniform: bool) -> Self {
        self.uniform = uniform;
        self
    }
}

enum Direction {
    Load { barrier: Barrier, arrive: bool },
    Store,
}

impl LaunchContext {
    /// Issues a bulk copy between global and shared memory.
    ///
    /// Every precondition is checked before any instruction is recorded: the element types
    /// match, exactly one side lives in shared memory, the barrier and `arrive` usage fits the
    /// direction, the global side is a kernel argument and the transformed slice has the shape of
    /// the shared memory reference.
    pub fn async_copy(&mut self, copy: AsyncCopy) -> Result<(), KernelError> {
        let AsyncCopy {
            src,
            dst,
            gmem_slice,
            gmem_transform,
            barrier,
            swizzle,
            arrive,
            uniform,
        } = copy;

        if src.elem != dst.elem {
            return Err(ContractViolation::ElemMismatch {
                lhs: src.elem,
                rhs: dst.elem,
            }
            .into());
        }

        let (gmem, smem, direction) = match (src.memory_space(), dst.memory_space()) {
            (MemorySpace::Global, MemorySpace::Shared) => {
                let barrier = barrier.ok_or(ProtocolViolation::MissingBarrier)?;
                let arrive = arrive.unwrap_or(true);
                (src, dst, Direction::Load { barrier, arrive })
            }
            (MemorySpace::Shared, MemorySpace::Global) => {
                if barrier.is_some() {
                    return Err(ProtocolViolation::UnexpectedBarrier.into());
                }
                if arrive.is_some() {
                    return Err(ProtocolViolation::UnexpectedArrive.into());
                }
                (dst, src, Direction::Store)
            }
            (src, dst) => return Err(ProtocolViolation::CopyDirection { src, dst }.into()),
        };

        if !gmem.is_kernel_argument() {
            return Err(ProtocolViolation::NotKernelArgument(gmem.to_string()).into());
        }
        let swizzle = TensorMapSwizzle::from_bytes(swizzle)
            .map_err(|_| Unimplemented::Swizzle(swizzle))?;

        let slice = parse_indices(&gmem_slice, gmem.shape())?;
        let mut slice_shape = slice.shape.clone();
        for transform in gmem_transform.iter() {
            slice_shape = transform.transform_shape(&slice_shape)?;
        }

        let mut smem = smem;
        for (dim, squeezed) in slice.squeezed.iter().enumerate() {
            if *squeezed {
                smem = smem.unsqueeze(dim)?;
            }
        }
        if smem.shape() != slice_shape.as_slice() {
            return Err(ContractViolation::ShapeMismatch {
                expected: slice_shape,
                actual: smem.shape().to_vec(),
            }
            .into());
        }
        if !smem.is_contiguous() {
            return Err(ContractViolation::NonContiguousSmem(smem.to_string()).into());
        }

        let key = TmaDescriptorKey {
            memref: gmem,
            slice_shape,
            swizzle,
            transforms: gmem_transform,
        };
        let descriptor = match self.cached_tma_descriptor(&key) {
            Some(descriptor) => {
                log::trace!("Reusing tensor descriptor for {}", key.memref);
                descriptor
            }
            None => {
                let descriptor = Self::tma_descriptor(&key)?;
                self.insert_tma_descriptor(key.clone(), descriptor)?
            }
        };

        let mut base = slice.base;
        for transform in key.transforms.iter() {
            base = transform.transform_index(&mut self.scope, &base)?;
        }
        // The copy engine takes the innermost dimension first.
        let coordinates = base.into_iter().rev().collect::<Vec<_>>();

        let issue = |scope: &mut Scope| match direction {
            Direction::Load { barrier, arrive } => {
                if arrive {
                    let bytes = key.slice_shape.iter().product::<usize>() * smem.elem.size();
                    barrier.arrive_expect_tx(scope, bytes);
                }
                scope.register(TmaOps::Load {
                    destination: smem,
                    barrier: barrier.reference(),
                    descriptor,
                    coordinates,
                });
            }
            Direction::Store => {
                scope.register(TmaOps::Store {
                    source: smem,
                    descriptor,
                    coordinates,
                });
                scope.register(TmaOps::CommitGroup);
            }
        };

        match uniform {
            true => once(&mut self.scope, issue),
            false => issue(&mut self.scope),
        }

        Ok(())
    }

    /// Waits until at most `allow_groups` committed bulk copy groups are still pending, then
    /// synchronizes the block so that every thread observes the completed copies.
    pub fn await_async_copy(&mut self, allow_groups: u32, await_read_only: bool) {
        self.scope.register(TmaOps::WaitGroup {
            max_pending: allow_groups,
            read: await_read_only,
        });
        self.scope.sync_block();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        launch::BarrierArray,
        transform::{TileTransform, TransposeTransform},
    };
    use pretty_assertions::assert_eq;
    use tilecl_ir::{Elem, FloatKind, Operation, UIntKind};

    const F16: Elem = Elem::Float(FloatKind::F16);

    fn barrier() -> Barrier {
        let array = MemRef::shared(8192, Elem::UInt(UIntKind::U64), vec![2]);
        BarrierArray::new(array).get(0).unwrap()
    }

    fn context() -> LaunchContext {
        LaunchContext::new(Scope::root(), None)
    }

    #[test]
    fn smem_to_smem_is_rejected_before_issuing() {
        let mut context = context();
        let a = MemRef::shared(0, F16, vec![64, 64]);
        let b = MemRef::shared(8192, F16, vec![64, 64]);

        let result = context.async_copy(AsyncCopy::new(&a, &b).with_barrier(barrier()));

        assert_eq!(
            result,
            Err(ProtocolViolation::CopyDirection {
                src: MemorySpace::Shared,
                dst: MemorySpace::Shared
            }
            .into())
        );
        assert!(context.scope().instructions.is_empty());
        assert_eq!(context.scratch_bytes(), 0);
    }

    #[test]
    fn gmem_to_gmem_is_rejected() {
        let mut context = context();
        let a = MemRef::argument(0, F16, vec![64]);
        let b = MemRef::argument(1, F16, vec![64]);

        assert!(matches!(
            context.async_copy(AsyncCopy::new(&a, &b)),
            Err(KernelError::Protocol(ProtocolViolation::CopyDirection { .. }))
        ));
    }

    #[test]
    fn barrier_protocol_is_enforced() {
        let mut context = context();
        let gmem = MemRef::argument(0, F16, vec![64, 64]);
        let smem = MemRef::shared(0, F16, vec![64, 64]);

        assert_eq!(
            context.async_copy(AsyncCopy::new(&gmem, &smem)),
            Err(ProtocolViolation::MissingBarrier.into())
        );
        assert_eq!(
            context.async_copy(AsyncCopy::new(&smem, &gmem).with_barrier(barrier())),
            Err(ProtocolViolation::UnexpectedBarrier.into())
        );
        assert_eq!(
            context.async_copy(AsyncCopy::new(&smem, &gmem).with_arrive(true)),
            Err(ProtocolViolation::UnexpectedArrive.into())
        );
        assert!(context.scope().instructions.is_empty());
    }

    #[test]
    fn derived_gmem_reference_is_rejected() {
        let mut context = context();
        let gmem = MemRef::argument(0, F16, vec![128, 64]).unfold(0, 64).unwrap();
        let smem = MemRef::shared(0, F16, vec![2, 64, 64]);

        assert!(matches!(
            context.async_copy(AsyncCopy::new(&gmem, &smem).with_barrier(barrier())),
            Err(KernelError::Protocol(ProtocolViolation::NotKernelArgument(_)))
        ));
    }

    #[test]
    fn element_types_must_match() {
        let mut context = context();
        let gmem = MemRef::argument(0, Elem::Float(FloatKind::F32), vec![64]);
        let smem = MemRef::shared(0, F16, vec![64]);

        assert!(matches!(
            context.async_copy(AsyncCopy::new(&gmem, &smem).with_barrier(barrier())),
            Err(KernelError::Contract(ContractViolation::ElemMismatch { .. }))
        ));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut context = context();
        let gmem = MemRef::argument(0, F16, vec![128, 64]);
        let smem = MemRef::shared(0, F16, vec![64, 64]);

        let result = context.async_copy(AsyncCopy::new(&gmem, &smem).with_barrier(barrier()));

        assert_eq!(
            result,
            Err(ContractViolation::ShapeMismatch {
                expected: vec![128, 64],
                actual: vec![64, 64]
            }
            .into())
        );
    }

    #[test]
    fn unsupported_swizzle_is_unimplemented() {
        let mut context = context();
        let gmem = MemRef::argument(0, F16, vec![64, 64]);
        let smem = MemRef::shared(0, F16, vec![64, 64]);

        let copy = AsyncCopy::new(&gmem, &smem)
            .with_barrier(barrier())
            .with_swizzle(16);

        assert_eq!(
            context.async_copy(copy),
            Err(Unimplemented::Swizzle(Some(16)).into())
        );
    }

    #[test]
    fn load_arms_barrier_then_issues_once() {
        let mut context = context();
        let gmem = MemRef::argument(0, F16, vec![4, 64, 64]);
        let smem = MemRef::shared(0, F16, vec![64, 64]);

        context
            .async_copy(
                AsyncCopy::new(&gmem, &smem)
                    .with_slice([DimSlice::Index(2)])
                    .with_barrier(barrier())
                    .with_swizzle(128),
            )
            .unwrap();

        let scope = context.scope();
        assert_eq!(scope.instructions.len(), 3);
        let body = match &scope.instructions[2].operation {
            Operation::Branch(tilecl_ir::Branch::If { body, .. }) => body,
            other => panic!("Expected a uniform branch, got {other}"),
        };
        assert_eq!(body.len(), 2);
        assert_eq!(
            body[0].to_string(),
            format!(
                "mbarrier_arrive_expect_tx({}[0u32], bytes: 8192u32)",
                MemRef::shared(8192, Elem::UInt(UIntKind::U64), vec![2])
            )
        );
        match &body[1].operation {
            Operation::Tma(TmaOps::Load {
                destination,
                coordinates,
                ..
            }) => {
                assert_eq!(destination.shape(), &[1, 64, 64]);
                let coordinates = coordinates
                    .iter()
                    .map(|c| c.as_usize().unwrap())
                    .collect::<Vec<_>>();
                assert_eq!(coordinates, vec![0, 0, 2]);
            }
            other => panic!("Expected a TMA load, got {other}"),
        }
    }

    #[test]
    fn store_commits_group() {
        let mut context = context();
        let gmem = MemRef::argument(1, F16, vec![128, 128]);
        let smem = MemRef::shared(0, F16, vec![64, 128]);

        context
            .async_copy(
                AsyncCopy::new(&smem, &gmem)
                    .with_slice([DimSlice::from(64..128)])
                    .with_uniform(false),
            )
            .unwrap();

        let scope = context.scope();
        assert_eq!(scope.instructions.len(), 2);
        assert!(matches!(
            scope.instructions[0].operation,
            Operation::Tma(TmaOps::Store { .. })
        ));
        assert_eq!(
            scope.instructions[1].operation,
            Operation::Tma(TmaOps::CommitGroup)
        );
    }

    #[test]
    fn descriptors_are_cached_per_key() {
        let mut context = context();
        let gmem = MemRef::argument(0, F16, vec![128, 128]);
        let smem = MemRef::shared(0, F16, vec![1, 2, 64, 64]);
        let copy = |swizzle: u32, row: usize| {
            AsyncCopy::new(&gmem, &smem)
                .with_slice([DimSlice::from(row..row + 64)])
                .with_transform(TileTransform::new(vec![64, 64]))
                .with_barrier(barrier())
                .with_swizzle(swizzle)
        };

        context.async_copy(copy(128, 0)).unwrap();
        context.async_copy(copy(128, 64)).unwrap();
        assert_eq!(context.num_tma_descriptors(), 1);
        assert_eq!(context.scratch_bytes(), 128);

        context.async_copy(copy(64, 0)).unwrap();
        assert_eq!(context.num_tma_descriptors(), 2);
        assert_eq!(context.scratch_bytes(), 256);
    }

    #[test]
    fn transforms_are_part_of_the_key() {
        let mut context = context();
        let gmem = MemRef::argument(0, F16, vec![64, 64]);
        let smem = MemRef::shared(0, F16, vec![64, 64]);

        context
            .async_copy(AsyncCopy::new(&gmem, &smem).with_barrier(barrier()))
            .unwrap();
        context
            .async_copy(
                AsyncCopy::new(&gmem, &smem)
                    .with_transform(TransposeTransform::new(vec![1, 0]).unwrap())
                    .with_barrier(barrier()),
            )
            .unwrap();

        assert_eq!(context.num_tma_descriptors(), 2);
    }

    #[test]
    fn await_waits_then_syncs() {
        let mut context = context();
        context.await_async_copy(0, true);

        assert_eq!(
            context.scope().to_string(),
            "bulk_wait_group(0, read: true)\nsync_block()\n"
        );
    }
}
