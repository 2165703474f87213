use super::compilation::{CompilationConfig, CompilationLogLevel};
use std::sync::Arc;

/// Static mutex holding the global configuration, initialized as `None`.
static TILECL_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// Represents the global configuration for tilecl.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Configuration for compilation settings.
    #[serde(default)]
    pub compilation: CompilationConfig,
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the current directory if not set.
    ///
    /// If no configuration is set, it attempts to load one from `tilecl.toml` or `TileCL.toml` in
    /// the current directory or its parents. If no file is found, a default configuration is used.
    ///
    /// # Notes
    ///
    /// Calling this function is somewhat expensive, because of a global static lock.
    pub fn get() -> Arc<Self> {
        let mut state = TILECL_GLOBAL_CONFIG.lock();

        match state.as_ref() {
            Some(config) => config.clone(),
            None => {
                let config = Arc::new(Self::from_current_dir().override_from_env());
                *state = Some(config.clone());
                config
            }
        }
    }

    /// Save the current configuration to the provided file path.
    pub fn save_default<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<()> {
        let config = Self::get();
        let content = toml::to_string_pretty(config.as_ref())
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(path, content)
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it cannot be overridden.
    ///
    /// # Warning
    /// This method must be called at the start of the program, before any calls to `get`.
    pub fn set(config: Self) {
        let mut state = TILECL_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    /// Overrides configuration fields based on environment variables.
    pub fn override_from_env(self) -> Self {
        self.override_from(|key| std::env::var(key).ok())
    }

    fn override_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = var("TILECL_DEBUG_LOG") {
            self.compilation.logger.level = CompilationLogLevel::Full;

            match val.as_str() {
                "stdout" => {
                    self.compilation.logger.stdout = true;
                }
                "stderr" => {
                    self.compilation.logger.stderr = true;
                }
                "1" | "true" => {
                    self.compilation.logger.file = Some("/tmp/tilecl.log".into());
                }
                "0" | "false" => {
                    self.compilation.logger.level = CompilationLogLevel::Disabled;
                }
                file_path => {
                    self.compilation.logger.file = Some(file_path.into());
                }
            }
        };

        if let Some("debug") = var("TILECL_DEBUG_OPTION").as_deref() {
            self.compilation.logger.level = CompilationLogLevel::Full;
        };

        self
    }

    // Loads configuration from `tilecl.toml` or `TileCL.toml` in the current directory or its
    // parents.
    fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };

        loop {
            for name in ["tilecl.toml", "TileCL.toml"] {
                let path = dir.join(name);
                if !path.is_file() {
                    continue;
                }
                match Self::from_file_path(&path) {
                    Ok(config) => return config,
                    Err(err) => log::warn!("Ignoring config file {}: {err}", path.display()),
                }
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }

    // Loads configuration from a specified file path.
    fn from_file_path<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogCrateLevel;

    fn env<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn default_config_verifies_without_logging() {
        let config = GlobalConfig::default();

        assert!(config.compilation.verify);
        assert!(matches!(
            config.compilation.logger.level,
            CompilationLogLevel::Disabled
        ));
    }

    #[test]
    fn debug_log_stdout_enables_full_logging() {
        let config = GlobalConfig::default().override_from(env(&[("TILECL_DEBUG_LOG", "stdout")]));

        assert!(config.compilation.logger.stdout);
        assert!(matches!(
            config.compilation.logger.level,
            CompilationLogLevel::Full
        ));
    }

    #[test]
    fn debug_log_false_disables_logging() {
        let config = GlobalConfig::default().override_from(env(&[("TILECL_DEBUG_LOG", "false")]));

        assert!(matches!(
            config.compilation.logger.level,
            CompilationLogLevel::Disabled
        ));
    }

    #[test]
    fn debug_option_is_applied_after_debug_log() {
        let config = GlobalConfig::default().override_from(env(&[
            ("TILECL_DEBUG_OPTION", "debug"),
            ("TILECL_DEBUG_LOG", "0"),
        ]));

        assert!(matches!(
            config.compilation.logger.level,
            CompilationLogLevel::Full
        ));
    }

    #[test]
    fn debug_log_path_logs_to_file() {
        let config =
            GlobalConfig::default().override_from(env(&[("TILECL_DEBUG_LOG", "/tmp/kernels.log")]));

        assert_eq!(
            config.compilation.logger.file,
            Some(std::path::PathBuf::from("/tmp/kernels.log"))
        );
    }

    #[test]
    fn parses_toml_sections() {
        let config: GlobalConfig = toml::from_str(
            r#"
            [compilation]
            verify = false

            [compilation.logger]
            level = "full"
            log = "debug"
            "#,
        )
        .unwrap();

        assert!(!config.compilation.verify);
        assert_eq!(config.compilation.logger.log, Some(LogCrateLevel::Debug));
        assert!(matches!(
            config.compilation.logger.level,
            CompilationLogLevel::Full
        ));
    }
}
