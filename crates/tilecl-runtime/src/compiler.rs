use crate::{error::CompilationError, kernel::KernelModule};

/// Compiles a [kernel module](KernelModule) into an executable form.
///
/// Implementations must call [init](crate::init) before resolving the
/// [runtime functions](crate::runtime_fn::RuntimeFunction) declared by the module.
pub trait Compiler: core::fmt::Debug {
    /// The compiled kernel, ready to be launched.
    type Executable;

    /// Compiles a verified module.
    fn compile(&mut self, module: KernelModule) -> Result<Self::Executable, CompilationError>;

    /// A short name for the compiler, used in logs.
    fn name(&self) -> &'static str;
}
