//! On-device profiler.
//!
//! Every named region records two `u32` global timer stamps, taken by the first thread of each
//! warp-group, into a shared memory staging area. When the kernel body is done the stamps are
//! copied to an extra `u32` output holding `entries_per_block` entries per block. Region names
//! are known at code generation time and are used to decode the buffer on the host.

use serde::{Deserialize, Serialize};
use tilecl_ir::{Builtin, Elem, MemRef, Scope, UIntKind, Variable, WARPGROUP_SIZE};

use crate::{
    error::{ContractViolation, KernelError},
    kernel::TensorSpec,
    launch::once,
};

const ENTRY_ELEM: Elem = Elem::UInt(UIntKind::U32);
const ENTRIES_PER_REGION: usize = 2;

#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfilerSpec {
    pub entries_per_block: usize,
}

impl ProfilerSpec {
    /// Maximum number of named regions a block can record.
    pub fn capacity(&self) -> usize {
        self.entries_per_block / ENTRIES_PER_REGION
    }

    /// Shared memory used to stage the stamps of one block.
    pub fn smem_bytes(&self) -> usize {
        self.entries_per_block * ENTRY_ELEM.size()
    }

    /// The profile output appended to the kernel outputs.
    pub fn buffer_spec(&self, grid: [u32; 3]) -> TensorSpec {
        let blocks = grid.iter().map(|g| *g as usize).product::<usize>();
        TensorSpec::new(vec![blocks * self.entries_per_block], ENTRY_ELEM)
    }

    /// Decodes the profile output of a launch.
    pub fn decode(
        &self,
        buffer: &[u32],
        grid: [u32; 3],
        regions: &[String],
    ) -> Result<Vec<BlockProfile>, KernelError> {
        let expected = self.buffer_spec(grid).shape;
        if buffer.len() != expected[0] || regions.len() > self.capacity() {
            return Err(ContractViolation::ShapeMismatch {
                expected,
                actual: vec![buffer.len()],
            }
            .into());
        }

        let profiles = buffer
            .chunks(self.entries_per_block.max(1))
            .enumerate()
            .map(|(block, entries)| BlockProfile {
                block,
                regions: regions
                    .iter()
                    .enumerate()
                    .map(|(i, name)| RegionTiming {
                        name: name.clone(),
                        start: entries[ENTRIES_PER_REGION * i],
                        end: entries[ENTRIES_PER_REGION * i + 1],
                    })
                    .collect(),
            })
            .collect();

        Ok(profiles)
    }
}

/// Timings of every region recorded by one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockProfile {
    /// Linear block index, `x` varying fastest.
    pub block: usize,
    pub regions: Vec<RegionTiming>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTiming {
    pub name: String,
    pub start: u32,
    pub end: u32,
}

impl RegionTiming {
    /// Elapsed timer ticks, the timer wraps around.
    pub fn duration(&self) -> u32 {
        self.end.wrapping_sub(self.start)
    }
}

/// Records named regions while a kernel body is generated.
#[derive(Debug)]
pub struct OnDeviceProfiler {
    spec: ProfilerSpec,
    smem: MemRef,
    output: MemRef,
    regions: Vec<String>,
}

impl OnDeviceProfiler {
    pub(crate) fn new(spec: ProfilerSpec, smem: MemRef, output: MemRef) -> Self {
        Self {
            spec,
            smem,
            output,
            regions: Vec::new(),
        }
    }

    /// Stamps the start of a region, returning its slot.
    pub(crate) fn start(&mut self, scope: &mut Scope, name: &str) -> Result<usize, KernelError> {
        if self.regions.len() >= self.spec.capacity() {
            return Err(ContractViolation::ProfilerCapacity {
                capacity: self.spec.capacity(),
                region: name.to_string(),
            }
            .into());
        }
        let region = self.regions.len();
        self.regions.push(name.to_string());
        self.stamp(scope, ENTRIES_PER_REGION * region);

        Ok(region)
    }

    pub(crate) fn end(&mut self, scope: &mut Scope, region: usize) {
        self.stamp(scope, ENTRIES_PER_REGION * region + 1);
    }

    fn stamp(&self, scope: &mut Scope, entry: usize) {
        let smem = &self.smem;
        once(scope, |scope| {
            let time = scope.global_timer();
            scope.store(smem, vec![Variable::index(entry)], time);
        });
    }

    /// Copies the staged stamps of the block to the profile output and returns the names of the
    /// recorded regions.
    pub(crate) fn finalize(self, scope: &mut Scope, grid: [u32; 3]) -> Vec<String> {
        let used = self.regions.len() * ENTRIES_PER_REGION;
        if used == 0 {
            return self.regions;
        }
        scope.comment("profiler: copy stamps to the output");
        scope.sync_block();

        let block_x = Variable::builtin(Builtin::BlockIdxX);
        let block_y = Variable::builtin(Builtin::BlockIdxY);
        let block_z = Variable::builtin(Builtin::BlockIdxZ);
        let linear = scope.mul(block_z, Variable::index(grid[1] as usize));
        let linear = scope.add(linear, block_y);
        let linear = scope.mul(linear, Variable::index(grid[0] as usize));
        let linear = scope.add(linear, block_x);
        let base = scope.mul(linear, Variable::index(self.spec.entries_per_block));

        let tid = scope.thread_idx();
        for chunk in 0..used.div_ceil(WARPGROUP_SIZE) {
            let entry = scope.add(tid, Variable::index(chunk * WARPGROUP_SIZE));
            let in_range = scope.cmp_lt(entry, Variable::index(used));
            scope.if_then(in_range, |scope| {
                let value = scope.load(&self.smem, vec![entry], 1);
                let offset = scope.add(base, entry);
                scope.store(&self.output, vec![offset], value);
            });
        }

        self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn buffer_holds_every_block() {
        let spec = ProfilerSpec::new(8);

        assert_eq!(spec.capacity(), 4);
        assert_eq!(spec.smem_bytes(), 32);
        assert_eq!(spec.buffer_spec([2, 3, 1]).shape, vec![48]);
    }

    #[test]
    fn decode_maps_regions() {
        let spec = ProfilerSpec::new(4);
        let regions = vec!["load".to_string(), "store".to_string()];
        let buffer = [10, 20, 25, 40, 100, 110, 120, 125];

        let profiles = spec.decode(&buffer, [2, 1, 1], &regions).unwrap();

        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[1].block, 1);
        assert_eq!(
            profiles[1].regions[1],
            RegionTiming {
                name: "store".into(),
                start: 120,
                end: 125
            }
        );
        assert_eq!(profiles[0].regions[0].duration(), 10);
    }

    #[test]
    fn capacity_is_enforced() {
        let spec = ProfilerSpec::new(2);
        let smem = MemRef::shared(0, ENTRY_ELEM, vec![2]);
        let output = MemRef::argument(0, ENTRY_ELEM, vec![2]);
        let mut profiler = OnDeviceProfiler::new(spec, smem, output);
        let mut scope = Scope::root();

        let region = profiler.start(&mut scope, "first").unwrap();
        profiler.end(&mut scope, region);

        assert_eq!(
            profiler.start(&mut scope, "second"),
            Err(ContractViolation::ProfilerCapacity {
                capacity: 1,
                region: "second".into()
            }
            .into())
        );
        assert_eq!(profiler.finalize(&mut scope, [1, 1, 1]), vec!["first"]);
    }
}
