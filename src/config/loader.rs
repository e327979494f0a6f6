//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::WasConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Parse and validate a TOML document.
pub fn parse_config(content: &str) -> Result<WasConfig, ConfigError> {
    let config: WasConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<WasConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
            [buffers]
            control_capacity = 4096

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.buffers.control_capacity, 4096);
        assert_eq!(config.buffers.data_chunk_size, 16384);
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.timeouts.control_secs, 120);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[application]\nhandler = \"hello\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.application.handler, "hello");
    }

    #[test]
    fn error_kinds() {
        assert!(matches!(parse_config("buffers = 3"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            parse_config("[timeouts]\noutput_secs = 0"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            load_config(Path::new("/nonexistent/was.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn validation_message_lists_fields() {
        let err = parse_config("[buffers]\ndata_chunk_size = 0\nbody_queue_depth = 0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: buffers.data_chunk_size: must be greater than 0, \
             buffers.body_queue_depth: must be greater than 0"
        );
    }
}
