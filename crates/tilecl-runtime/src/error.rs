use thiserror::Error;

/// Errors raised while verifying or compiling a [kernel module](crate::kernel::KernelModule).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompilationError {
    #[error("Module verification failed\nCaused by:\n  {0}")]
    Verification(#[from] VerificationError),
    #[error("Runtime function `{0}` is not registered, `tilecl_runtime::init()` must be called first")]
    MissingRuntimeFunction(String),
    #[error("The compiler doesn't support the module\nCaused by:\n  {0}")]
    Unsupported(String),
}

/// Structural problems found in a kernel module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Variable {variable} is used before being defined")]
    UndefinedVariable { variable: String },
    #[error("Variable {variable} is defined more than once")]
    Redefinition { variable: String },
    #[error("Shared memory reference {memref} ends at byte {end}, past the {smem_bytes} bytes allocated")]
    SharedOutOfBounds {
        memref: String,
        end: usize,
        smem_bytes: usize,
    },
    #[error("Reference {memref} points to argument {id}, but the kernel only has {count}")]
    UnknownArgument {
        memref: String,
        id: u32,
        count: usize,
    },
    #[error("Scratch access at byte {offset} is outside of the {bytes} bytes scratch buffer")]
    ScratchOutOfBounds { offset: usize, bytes: usize },
    #[error("Barrier {barrier} is initialized with an arrival count of 0")]
    InvalidArrivalCount { barrier: String },
}
