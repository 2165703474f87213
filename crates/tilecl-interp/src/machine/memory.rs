use tilecl_ir::{Buffer, Item, MemRef, Memory};

use super::BlockMachine;
use crate::{error::InterpError, value::Value};

impl BlockMachine<'_> {
    pub(super) fn visit_memory(
        &mut self,
        thread: usize,
        memory: &Memory,
        item: Item,
    ) -> Result<Option<Value>, InterpError> {
        match memory {
            Memory::Load { memref, indices } => {
                let index = self.read_indices(thread, indices)?;
                let bytes = self.gather(memref, &index, item.lanes())?;
                Ok(Some(Value::from_bytes(item.with_elem(memref.elem), &bytes)?))
            }
            Memory::Store {
                memref,
                indices,
                value,
            } => {
                let index = self.read_indices(thread, indices)?;
                let value = self.read(thread, value)?;
                let value = Value::new(value.item.with_elem(memref.elem), value.lanes);
                self.scatter(memref, &index, &value.to_bytes())?;
                Ok(None)
            }
        }
    }

    /// Reads `lanes` consecutive elements along the innermost dimension.
    fn gather(
        &self,
        memref: &MemRef,
        index: &[usize],
        lanes: usize,
    ) -> Result<Vec<u8>, InterpError> {
        let size = memref.elem.size();
        let mut out = Vec::with_capacity(lanes * size);
        for lane in 0..lanes {
            let address = element_address(memref, index, lane)?;
            out.extend_from_slice(self.bytes(memref.buffer, address, size)?);
        }
        Ok(out)
    }

    fn scatter(&mut self, memref: &MemRef, index: &[usize], bytes: &[u8]) -> Result<(), InterpError> {
        let size = memref.elem.size();
        for (lane, chunk) in bytes.chunks(size).enumerate() {
            let address = element_address(memref, index, lane)?;
            self.bytes_mut(memref.buffer, address, size)?
                .copy_from_slice(chunk);
        }
        Ok(())
    }

    pub(super) fn bytes(
        &self,
        buffer: Buffer,
        address: usize,
        len: usize,
    ) -> Result<&[u8], InterpError> {
        let (name, storage) = match buffer {
            Buffer::Argument(id) => ("argument", self.argument(id)?),
            Buffer::Scratch => ("scratch", self.memory.scratch.as_slice()),
            Buffer::Shared { .. } => ("shared memory", self.smem.as_slice()),
        };
        storage
            .get(address..address + len)
            .ok_or(InterpError::BufferOverflow {
                buffer: name,
                address,
                bytes: len,
                size: storage.len(),
            })
    }

    pub(super) fn bytes_mut(
        &mut self,
        buffer: Buffer,
        address: usize,
        len: usize,
    ) -> Result<&mut [u8], InterpError> {
        let (name, storage) = match buffer {
            Buffer::Argument(id) => {
                let count = self.memory.arguments.len();
                let storage = self
                    .memory
                    .arguments
                    .get_mut(id as usize)
                    .ok_or(InterpError::BufferOverflow {
                        buffer: "argument",
                        address: id as usize,
                        bytes: 0,
                        size: count,
                    })?;
                ("argument", storage)
            }
            Buffer::Scratch => ("scratch", &mut self.memory.scratch),
            Buffer::Shared { .. } => ("shared memory", &mut self.smem),
        };
        let size = storage.len();
        storage
            .get_mut(address..address + len)
            .ok_or(InterpError::BufferOverflow {
                buffer: name,
                address,
                bytes: len,
                size,
            })
    }

    fn argument(&self, id: u32) -> Result<&[u8], InterpError> {
        self.memory
            .arguments
            .get(id as usize)
            .map(Vec::as_slice)
            .ok_or(InterpError::BufferOverflow {
                buffer: "argument",
                address: id as usize,
                bytes: 0,
                size: self.memory.arguments.len(),
            })
    }
}

/// Byte address of lane `lane` of the access at `index`, within the root buffer of `memref`.
pub(super) fn element_address(
    memref: &MemRef,
    index: &[usize],
    lane: usize,
) -> Result<usize, InterpError> {
    let mut index = index.to_vec();
    if let Some(last) = index.last_mut() {
        *last += lane;
    }
    let offset = memref.element_offset(&index)? * memref.elem.size();

    Ok(match memref.buffer {
        Buffer::Shared { offset: base } => base + offset,
        Buffer::Argument(_) | Buffer::Scratch => offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tilecl_ir::{Elem, FloatKind, MemRefError};

    #[test]
    fn shared_addresses_include_the_base() {
        let memref = MemRef::shared(64, Elem::Float(FloatKind::F16), vec![4, 8]);

        assert_eq!(element_address(&memref, &[1, 2], 0), Ok(64 + 2 * 10));
        assert_eq!(element_address(&memref, &[1, 2], 3), Ok(64 + 2 * 13));
    }

    #[test]
    fn lanes_stay_in_bounds() {
        let memref = MemRef::argument(0, Elem::Float(FloatKind::F32), vec![2, 4]);

        assert_eq!(
            element_address(&memref, &[0, 2], 2),
            Err(InterpError::OutOfBounds(MemRefError::IndexOutOfBounds {
                index: vec![0, 4],
                shape: vec![2, 4]
            }))
        );
    }
}
