use pretty_assertions::assert_eq;
use tilecl_core::{
    fragment::{FragmentedArray, FragmentedLayout, ReduceOp, Registers},
    indexing::DimSlice,
    launch::{once, AsyncCopy},
    profiler::ProfilerSpec,
    transform::TileTransform,
    KernelBuilder, SmemSpec, TensorSpec,
};
use tilecl_interp::{HostBuffer, InterpError, Interpreter};
use tilecl_ir::{Builtin, CastKind, Elem, FloatKind, IntKind, UIntKind, Variable};

const F16: Elem = Elem::Float(FloatKind::F16);
const F32: Elem = Elem::Float(FloatKind::F32);
const I16: Elem = Elem::Int(IntKind::I16);
const I32: Elem = Elem::Int(IntKind::I32);
const U32: Elem = Elem::UInt(UIntKind::U32);

fn ramp(len: usize) -> Vec<f64> {
    // Small integers are exact in f16.
    (0..len).map(|i| (i % 1000) as f64).collect()
}

fn tile_and_barrier(elem: Elem, shape: Vec<usize>) -> SmemSpec {
    SmemSpec::Tuple(vec![
        SmemSpec::Array(TensorSpec::new(shape, elem)),
        SmemSpec::Barriers(1),
    ])
}

#[test_log::test]
fn tma_load_then_strided_store_copies_the_tile() {
    let kernel = KernelBuilder::new("copy", [1, 1, 1], [128, 1, 1])
        .input(TensorSpec::new(vec![64, 64], F16))
        .output(TensorSpec::new(vec![64, 64], F16))
        .smem(tile_and_barrier(F16, vec![64, 64]))
        .compile(&mut Interpreter, |ctx, inputs, outputs, smem| {
            let tile = smem.get(0)?.array()?;
            let barrier = smem.get(1)?.barriers()?.get(0)?;

            ctx.async_copy(AsyncCopy::new(&inputs[0], tile).with_barrier(barrier.clone()))?;
            barrier.wait(ctx.scope(), Variable::index(0));
            let array = FragmentedArray::load_strided(ctx.scope(), tile)?;
            array.store_untiled(ctx.scope(), &outputs[0])
        })
        .unwrap();
    let input = HostBuffer::from_f64(F16, vec![64, 64], &ramp(4096)).unwrap();

    let outputs = kernel.executable.launch(&[input.clone()]).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0], input);
}

#[test_log::test]
fn swizzled_round_trip_restores_the_tensor() {
    let kernel = KernelBuilder::new("swizzled_copy", [1, 1, 1], [128, 1, 1])
        .input(TensorSpec::new(vec![64, 64], F16))
        .output(TensorSpec::new(vec![64, 64], F16))
        .smem(tile_and_barrier(F16, vec![1, 1, 64, 64]))
        .compile(&mut Interpreter, |ctx, inputs, outputs, smem| {
            let tile = smem.get(0)?.array()?;
            let barrier = smem.get(1)?.barriers()?.get(0)?;

            ctx.async_copy(
                AsyncCopy::new(&inputs[0], tile)
                    .with_transform(TileTransform::new(vec![64, 64]))
                    .with_swizzle(128)
                    .with_barrier(barrier.clone()),
            )?;
            barrier.wait(ctx.scope(), Variable::index(0));
            ctx.async_copy(
                AsyncCopy::new(tile, &outputs[0])
                    .with_transform(TileTransform::new(vec![64, 64]))
                    .with_swizzle(128),
            )?;
            ctx.await_async_copy(0, true);
            Ok(())
        })
        .unwrap();
    let input = HostBuffer::from_f64(F16, vec![64, 64], &ramp(4096)).unwrap();

    let outputs = kernel.executable.launch(&[input.clone()]).unwrap();

    assert_eq!(outputs[0], input);
    assert_eq!(kernel.scratch_bytes, 256);
}

#[test_log::test]
fn tiled_accumulator_store_matches_the_logical_layout() {
    let kernel = KernelBuilder::new("store_tiled", [1, 1, 1], [128, 1, 1])
        .output(TensorSpec::new(vec![64, 32], F32))
        .smem(SmemSpec::Array(TensorSpec::new(vec![1, 1, 64, 32], F32)))
        .compile(&mut Interpreter, |ctx, _inputs, outputs, smem| {
            let tile = smem.array()?;
            let scope = ctx.scope();

            // Every element holds its row-major position in the matrix.
            let tid = scope.thread_idx();
            let lane = scope.rem(tid, Variable::index(32));
            let warp = scope.div(tid, Variable::index(32));
            let quad_row = scope.div(lane, Variable::index(4));
            let warp_row = scope.mul(warp, Variable::index(16));
            let row_base = scope.add(quad_row, warp_row);
            let quad_col = scope.rem(lane, Variable::index(4));
            let col_base = scope.mul(quad_col, Variable::index(2));

            let mut values = Vec::new();
            for col_tile in 0..4 {
                for row_idx in 0..2 {
                    let row = scope.add(row_base, Variable::index(row_idx * 8));
                    let row_offset = scope.mul(row, Variable::index(32));
                    let mut lanes = Vec::new();
                    for col_idx in 0..2 {
                        let col = scope.add(col_base, Variable::index(col_tile * 8 + col_idx));
                        let linear = scope.add(row_offset, col);
                        lanes.push(scope.cast(linear, F32, CastKind::IToFP));
                    }
                    values.push(scope.init_vector(lanes));
                }
            }
            let accumulator = FragmentedArray::new(
                Registers::new(vec![1, 4, 2, 1], values)?,
                FragmentedLayout::Wgmma,
            )?;

            accumulator.store_tiled(scope, tile, Some(128))?;
            scope.sync_block();
            ctx.async_copy(
                AsyncCopy::new(tile, &outputs[0])
                    .with_transform(TileTransform::new(vec![64, 32]))
                    .with_swizzle(128),
            )?;
            ctx.await_async_copy(0, true);
            Ok(())
        })
        .unwrap();

    let outputs = kernel.executable.launch(&[]).unwrap();

    let expected = (0..64 * 32).map(|i| i as f64).collect::<Vec<_>>();
    assert_eq!(outputs[0].to_f64(), expected);
}

#[test_log::test]
fn tiled_half_store_matches_the_logical_layout() {
    let kernel = KernelBuilder::new("store_tiled_f16", [1, 1, 1], [128, 1, 1])
        .output(TensorSpec::new(vec![64, 128], F16))
        .smem(SmemSpec::Array(TensorSpec::new(vec![1, 2, 64, 64], F16)))
        .compile(&mut Interpreter, |ctx, _inputs, outputs, smem| {
            let tile = smem.array()?;
            let scope = ctx.scope();

            let tid = scope.thread_idx();
            let lane = scope.rem(tid, Variable::index(32));
            let warp = scope.div(tid, Variable::index(32));
            let quad_row = scope.div(lane, Variable::index(4));
            let warp_row = scope.mul(warp, Variable::index(16));
            let row_base = scope.add(quad_row, warp_row);
            let quad_col = scope.rem(lane, Variable::index(4));
            let col_base = scope.mul(quad_col, Variable::index(2));

            // Positions wrap at 2048 to stay exact in f16.
            let mut values = Vec::new();
            for col_tile in 0..16 {
                for row_idx in 0..2 {
                    let row = scope.add(row_base, Variable::index(row_idx * 8));
                    let row_offset = scope.mul(row, Variable::index(128));
                    let mut lanes = Vec::new();
                    for col_idx in 0..2 {
                        let col = scope.add(col_base, Variable::index(col_tile * 8 + col_idx));
                        let linear = scope.add(row_offset, col);
                        let wrapped = scope.rem(linear, Variable::index(2048));
                        lanes.push(scope.cast(wrapped, F16, CastKind::IToFP));
                    }
                    values.push(scope.init_vector(lanes));
                }
            }
            let accumulator = FragmentedArray::new(
                Registers::new(vec![1, 16, 2, 1], values)?,
                FragmentedLayout::Wgmma,
            )?;

            accumulator.store_tiled(scope, tile, Some(128))?;
            scope.sync_block();
            ctx.async_copy(
                AsyncCopy::new(tile, &outputs[0])
                    .with_transform(TileTransform::new(vec![64, 64]))
                    .with_swizzle(128),
            )?;
            ctx.await_async_copy(0, true);
            Ok(())
        })
        .unwrap();

    let outputs = kernel.executable.launch(&[]).unwrap();

    let expected = (0..64 * 128).map(|i| (i % 2048) as f64).collect::<Vec<_>>();
    assert_eq!(outputs[0].to_f64(), expected);
}

#[test_log::test]
fn integer_add_then_sub_restores_the_input() {
    let kernel = KernelBuilder::new("add_sub", [1, 1, 1], [128, 1, 1])
        .input(TensorSpec::new(vec![1024], I32))
        .input(TensorSpec::new(vec![1024], I32))
        .output(TensorSpec::new(vec![1024], I32))
        .compile(&mut Interpreter, |ctx, inputs, outputs, _smem| {
            let scope = ctx.scope();
            let lhs = FragmentedArray::load_strided(scope, &inputs[0])?;
            let rhs = FragmentedArray::load_strided(scope, &inputs[1])?;

            let sum = lhs.add(scope, &rhs)?;
            let restored = sum.sub(scope, &rhs)?;
            restored.store_untiled(scope, &outputs[0])
        })
        .unwrap();
    // Sums overflow for most elements.
    let lhs = (0..1024)
        .map(|i: i32| i.wrapping_mul(4_194_301))
        .collect::<Vec<_>>();
    let rhs = (0..1024).map(|i: i32| i32::MAX - i).collect::<Vec<_>>();
    let inputs = [
        HostBuffer::new(I32, vec![1024], &lhs).unwrap(),
        HostBuffer::new(I32, vec![1024], &rhs).unwrap(),
    ];

    let outputs = kernel.executable.launch(&inputs).unwrap();

    assert_eq!(outputs[0].to_vec::<i32>(), lhs);
}

#[test_log::test]
fn widening_then_narrowing_integers_is_lossless() {
    let kernel = KernelBuilder::new("astype_int", [1, 1, 1], [128, 1, 1])
        .input(TensorSpec::new(vec![512], I16))
        .output(TensorSpec::new(vec![512], I16))
        .compile(&mut Interpreter, |ctx, inputs, outputs, _smem| {
            let scope = ctx.scope();
            let array = FragmentedArray::load_strided(scope, &inputs[0])?;

            let wide = array.astype(scope, I32)?;
            assert_eq!(wide.elem(), I32);
            wide.astype(scope, I16)?.store_untiled(scope, &outputs[0])
        })
        .unwrap();
    let values = (0..512)
        .map(|i: i32| (i * 61 - 15_000) as i16)
        .collect::<Vec<_>>();
    let input = HostBuffer::new(I16, vec![512], &values).unwrap();

    let outputs = kernel.executable.launch(&[input]).unwrap();

    assert_eq!(outputs[0].to_vec::<i16>(), values);
}

#[test_log::test]
fn narrowing_floats_rounds_to_half_precision() {
    let kernel = KernelBuilder::new("astype_float", [1, 1, 1], [128, 1, 1])
        .input(TensorSpec::new(vec![256], F32))
        .output(TensorSpec::new(vec![256], F32))
        .compile(&mut Interpreter, |ctx, inputs, outputs, _smem| {
            let scope = ctx.scope();
            let array = FragmentedArray::load_strided(scope, &inputs[0])?;

            let narrow = array.astype(scope, F16)?;
            narrow.astype(scope, F32)?.store_untiled(scope, &outputs[0])
        })
        .unwrap();
    // Exact in f32, finer than the f16 spacing of 2^-10 around 1.
    let values = (0..256)
        .map(|i| 1.0 + (i % 16) as f64 / 4096.0)
        .collect::<Vec<_>>();
    let input = HostBuffer::from_f64(F32, vec![256], &values).unwrap();

    let outputs = kernel.executable.launch(&[input]).unwrap();

    let expected = values
        .iter()
        .map(|value| half::f16::from_f64(*value).to_f64())
        .collect::<Vec<_>>();
    assert_eq!(outputs[0].to_f64(), expected);
    assert_ne!(expected, values);
}

#[test_log::test]
fn row_reduction_of_a_splat_is_broadcast_back() {
    let kernel = KernelBuilder::new("reduce", [1, 1, 1], [128, 1, 1])
        .output(TensorSpec::new(vec![64, 32], F32))
        .compile(&mut Interpreter, |ctx, _inputs, outputs, _smem| {
            let scope = ctx.scope();
            let value = F32.constant_from_f64(1.5);
            let array = FragmentedArray::splat(scope, value, &[64, 32], FragmentedLayout::Wgmma)?;

            let sums = array.reduce(scope, ReduceOp::Add, 1)?;
            let broadcast = sums.broadcast_minor(scope, 32)?;
            broadcast.store_untiled(scope, &outputs[0])
        })
        .unwrap();

    let outputs = kernel.executable.launch(&[]).unwrap();

    assert_eq!(outputs[0].to_f64(), vec![1.5 * 32.0; 64 * 32]);
}

#[test_log::test]
fn blocks_copy_their_own_slice() {
    let kernel = KernelBuilder::new("sliced_copy", [2, 1, 1], [128, 1, 1])
        .input(TensorSpec::new(vec![128, 64], F16))
        .output(TensorSpec::new(vec![128, 64], F16))
        .smem(tile_and_barrier(F16, vec![64, 64]))
        .compile(&mut Interpreter, |ctx, inputs, outputs, smem| {
            let tile = smem.get(0)?.array()?;
            let barrier = smem.get(1)?.barriers()?.get(0)?;
            let block = Variable::builtin(Builtin::BlockIdxX);
            let start = ctx.scope().mul(block, Variable::index(64));
            let slice = [DimSlice::dynamic(start, 64), DimSlice::Full];

            ctx.async_copy(
                AsyncCopy::new(&inputs[0], tile)
                    .with_slice(slice)
                    .with_barrier(barrier.clone()),
            )?;
            barrier.wait(ctx.scope(), Variable::index(0));
            ctx.async_copy(AsyncCopy::new(tile, &outputs[0]).with_slice(slice))?;
            ctx.await_async_copy(0, true);
            Ok(())
        })
        .unwrap();
    let input = HostBuffer::from_f64(F16, vec![128, 64], &ramp(128 * 64)).unwrap();

    let outputs = kernel.executable.launch(&[input.clone()]).unwrap();

    assert_eq!(outputs[0], input);
}

#[test_log::test]
fn waiting_without_arrival_is_reported() {
    let kernel = KernelBuilder::new("hang", [1, 1, 1], [128, 1, 1])
        .smem(SmemSpec::Barriers(1))
        .compile(&mut Interpreter, |ctx, _inputs, _outputs, smem| {
            let barrier = smem.barriers()?.get(0)?;
            barrier.wait(ctx.scope(), Variable::index(0));
            Ok(())
        })
        .unwrap();

    let result = kernel.executable.launch(&[]);

    assert!(matches!(
        result,
        Err(InterpError::BarrierHang {
            block: [0, 0, 0],
            parity: 0,
            pending: 1,
            tx_bytes: 0,
            ..
        })
    ));
}

#[test_log::test]
fn parity_follows_completed_phases() {
    let kernel = KernelBuilder::new("phases", [1, 1, 1], [128, 1, 1])
        .smem(SmemSpec::Barriers(1))
        .compile(&mut Interpreter, |ctx, _inputs, _outputs, smem| {
            let barrier = smem.barriers()?.get(0)?;
            once(ctx.scope(), |scope| barrier.arrive(scope));
            barrier.wait(ctx.scope(), Variable::index(0));
            // Nobody arrives on the second phase.
            barrier.wait(ctx.scope(), Variable::index(1));
            Ok(())
        })
        .unwrap();

    let result = kernel.executable.launch(&[]);

    assert!(matches!(
        result,
        Err(InterpError::BarrierHang {
            parity: 1,
            pending: 1,
            ..
        })
    ));
}

#[test_log::test]
fn profiler_records_every_block() {
    let kernel = KernelBuilder::new("profiled", [2, 1, 1], [128, 1, 1])
        .output(TensorSpec::new(vec![128], U32))
        .profiler(ProfilerSpec::new(4))
        .compile(&mut Interpreter, |ctx, _inputs, outputs, _smem| {
            ctx.named_region("work", |ctx| {
                let scope = ctx.scope();
                let tid = scope.thread_idx();
                let value = scope.mul(tid, Variable::index(3));
                scope.store(&outputs[0], vec![tid], value);
                Ok(())
            })
        })
        .unwrap();

    let outputs = kernel.executable.launch(&[]).unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(
        outputs[0].to_vec::<u32>(),
        (0..128).map(|t| t * 3).collect::<Vec<u32>>()
    );
    let profiles = kernel
        .decode_profile(&outputs[1].to_vec::<u32>())
        .unwrap()
        .unwrap();
    assert_eq!(profiles.len(), 2);
    for profile in profiles {
        assert_eq!(profile.regions.len(), 1);
        assert_eq!(profile.regions[0].name, "work");
        assert!(profile.regions[0].end > profile.regions[0].start);
    }
}

#[test_log::test]
fn inputs_are_checked_before_launch() {
    let kernel = KernelBuilder::new("checked", [1, 1, 1], [128, 1, 1])
        .input(TensorSpec::new(vec![64], F32))
        .compile(&mut Interpreter, |_ctx, _inputs, _outputs, _smem| Ok(()))
        .unwrap();

    assert_eq!(
        kernel.executable.launch(&[]),
        Err(InterpError::InputCount {
            expected: 1,
            actual: 0
        })
    );
    assert!(matches!(
        kernel.executable.launch(&[HostBuffer::zeros(F16, vec![64])]),
        Err(InterpError::InputMismatch { index: 0, .. })
    ));
}
