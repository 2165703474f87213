use tilecl_runtime::{
    kernel::KernelModule,
    runtime_fn::{self, memcpy_async_h2d},
    CompilationError, Compiler,
};

use crate::{
    buffer::HostBuffer,
    error::InterpError,
    machine::{BlockMachine, DeviceMemory},
};

/// Compiler producing kernels executed on the host by a reference interpreter.
///
/// Useful to test kernels without a device: data movement, barriers and shuffles are checked
/// against their specified semantics, and protocol errors that would hang a device are reported.
#[derive(Debug, Default)]
pub struct Interpreter;

impl Compiler for Interpreter {
    type Executable = InterpKernel;

    fn compile(&mut self, module: KernelModule) -> Result<InterpKernel, CompilationError> {
        runtime_fn::init();
        for function in module.runtime_functions.iter() {
            if runtime_fn::lookup(function.name()).is_none() {
                return Err(CompilationError::MissingRuntimeFunction(
                    function.name().to_string(),
                ));
            }
        }
        module.verify()?;
        log::debug!(
            "Compiled kernel {} for the interpreter, {} blocks of {} threads",
            module.name,
            module.num_blocks(),
            module.num_threads()
        );

        Ok(InterpKernel { module })
    }

    fn name(&self) -> &'static str {
        "interpreter"
    }
}

/// A kernel module ready to be launched on host buffers.
#[derive(Debug, Clone)]
pub struct InterpKernel {
    module: KernelModule,
}

impl InterpKernel {
    pub fn module(&self) -> &KernelModule {
        &self.module
    }

    /// Runs every block of the grid and returns the outputs, the profile buffer included.
    ///
    /// Outputs start zeroed. Blocks run one after the other in row-major grid order.
    pub fn launch(&self, inputs: &[HostBuffer]) -> Result<Vec<HostBuffer>, InterpError> {
        let module = &self.module;
        let expected = module.inputs();
        if inputs.len() != expected.len() {
            return Err(InterpError::InputCount {
                expected: expected.len(),
                actual: inputs.len(),
            });
        }
        for (index, (input, argument)) in inputs.iter().zip(expected.iter()).enumerate() {
            if input.elem != argument.elem || input.shape != argument.shape {
                return Err(InterpError::InputMismatch {
                    index,
                    expected_elem: argument.elem,
                    expected_shape: argument.shape.clone(),
                    elem: input.elem,
                    shape: input.shape.clone(),
                });
            }
        }

        let arguments = inputs
            .iter()
            .map(|input| input.bytes.clone())
            .chain(
                module
                    .outputs()
                    .iter()
                    .map(|output| vec![0; output.size_bytes()]),
            )
            .collect();
        let host_scratch = module.scratch.materialize();
        let mut scratch = vec![0; host_scratch.len()];
        memcpy_async_h2d(&mut scratch, &host_scratch);
        let mut memory = DeviceMemory::new(arguments, scratch);

        let [grid_x, grid_y, grid_z] = module.grid;
        for z in 0..grid_z {
            for y in 0..grid_y {
                for x in 0..grid_x {
                    BlockMachine::new(module, [x, y, z], &mut memory).run()?;
                }
            }
        }
        log::debug!("Launched {} over {} blocks", module.name, module.num_blocks());

        let outputs = memory
            .arguments
            .split_off(module.num_inputs)
            .into_iter()
            .zip(module.outputs().iter())
            .map(|(bytes, output)| HostBuffer {
                elem: output.elem,
                shape: output.shape.clone(),
                bytes,
            })
            .collect();

        Ok(outputs)
    }
}
