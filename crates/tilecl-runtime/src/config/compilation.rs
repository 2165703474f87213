use super::logger::{BinaryLogLevel, LoggerConfig};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CompilationConfig {
    #[serde(default)]
    pub logger: LoggerConfig<CompilationLogLevel>,

    /// Whether built modules are verified before being handed to a compiler.
    #[serde(default = "verify_default")]
    pub verify: bool,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            logger: LoggerConfig::default(),
            verify: verify_default(),
        }
    }
}

fn verify_default() -> bool {
    true
}

pub type CompilationLogLevel = BinaryLogLevel;
