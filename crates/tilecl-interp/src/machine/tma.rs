use tilecl_ir::{Buffer, MemRef, TmaOps, Variable};
use tilecl_runtime::tma::{TensorDescriptor, TMA_DESCRIPTOR_BYTES};

use super::BlockMachine;
use crate::error::InterpError;

/// One element moved by a bulk copy.
struct Transfer {
    /// Byte address in the global buffer, `None` when the element is outside of the tensor.
    global: Option<usize>,
    /// Swizzled byte address in shared memory.
    shared: usize,
}

impl BlockMachine<'_> {
    pub(super) fn visit_tma(&mut self, thread: usize, op: &TmaOps) -> Result<(), InterpError> {
        match op {
            TmaOps::Load {
                destination,
                barrier,
                descriptor,
                coordinates,
            } => {
                let descriptor = self.descriptor(thread, descriptor)?;
                let transfers = self.transfers(thread, &descriptor, destination, coordinates)?;
                let argument = Buffer::Argument(descriptor.argument);
                let size = descriptor.elem_size as usize;

                for transfer in transfers {
                    let element = match transfer.global {
                        Some(address) => self.bytes(argument, address, size)?.to_vec(),
                        None => vec![0; size],
                    };
                    self.bytes_mut(destination.buffer, transfer.shared, size)?
                        .copy_from_slice(&element);
                }
                log::trace!(
                    "Bulk load of {} bytes into {destination}",
                    descriptor.box_bytes()
                );

                self.barrier(thread, barrier)?
                    .complete_tx(descriptor.box_bytes());
            }
            TmaOps::Store {
                source,
                descriptor,
                coordinates,
            } => {
                let descriptor = self.descriptor(thread, descriptor)?;
                let transfers = self.transfers(thread, &descriptor, source, coordinates)?;
                let argument = Buffer::Argument(descriptor.argument);
                let size = descriptor.elem_size as usize;

                for transfer in transfers {
                    let Some(address) = transfer.global else {
                        continue;
                    };
                    let element = self.bytes(source.buffer, transfer.shared, size)?.to_vec();
                    self.bytes_mut(argument, address, size)?
                        .copy_from_slice(&element);
                }
            }
            TmaOps::CommitGroup => self.bulk_groups += 1,
            // Bulk copies complete when issued, nothing is ever pending.
            TmaOps::WaitGroup { .. } => {}
        }

        Ok(())
    }

    fn descriptor(
        &self,
        thread: usize,
        pointer: &Variable,
    ) -> Result<TensorDescriptor, InterpError> {
        let offset = self.read(thread, pointer)?.first().as_u64() as usize;
        let bytes = self.bytes(Buffer::Scratch, offset, TMA_DESCRIPTOR_BYTES)?;

        Ok(TensorDescriptor::decode(bytes)?)
    }

    /// Walks the box at `coordinates` in row-major order.
    fn transfers(
        &self,
        thread: usize,
        descriptor: &TensorDescriptor,
        smem: &MemRef,
        coordinates: &[Variable],
    ) -> Result<Vec<Transfer>, InterpError> {
        let copy_bytes = descriptor.box_bytes();
        if smem.size_bytes() != copy_bytes || coordinates.len() != descriptor.rank() {
            return Err(InterpError::CopySize {
                memref: smem.to_string(),
                copy_bytes,
                smem_bytes: smem.size_bytes(),
            });
        }

        // Coordinates are given innermost dimension first.
        let mut origin = self.read_indices(thread, coordinates)?;
        origin.reverse();

        let size = descriptor.elem_size as usize;
        let smem_base = match smem.buffer {
            Buffer::Shared { offset } => offset + smem.offset() * size,
            Buffer::Argument(_) | Buffer::Scratch => smem.offset() * size,
        };
        let box_shape = descriptor
            .box_shape
            .iter()
            .map(|dim| *dim as usize)
            .collect::<Vec<_>>();

        let transfers = ndindex(&box_shape)
            .enumerate()
            .map(|(linear, index)| {
                let mut global = Some(descriptor.offset as usize);
                for (dim, position) in index.iter().enumerate() {
                    let position = origin[dim] + position;
                    global = match position < descriptor.shape[dim] as usize {
                        true => global.map(|g| g + position * descriptor.strides[dim] as usize),
                        false => None,
                    };
                }

                Transfer {
                    global: global.map(|element| element * size),
                    shared: descriptor.swizzle.apply(smem_base + linear * size),
                }
            })
            .collect();

        Ok(transfers)
    }
}

/// Row-major iteration over every index of `shape`.
fn ndindex(shape: &[usize]) -> impl Iterator<Item = Vec<usize>> + '_ {
    let total = shape.iter().product::<usize>();
    (0..total).map(move |mut linear| {
        let mut index = vec![0; shape.len()];
        for (dim, extent) in shape.iter().enumerate().rev() {
            index[dim] = linear % extent;
            linear /= extent;
        }
        index
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ndindex_is_row_major() {
        let indices = ndindex(&[2, 3]).collect::<Vec<_>>();

        assert_eq!(
            indices,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2]
            ]
        );
    }
}
