use config::{Config, ConfigError, Environment, File};
use hp4195_dump::{ConnectionConfig, ConverterConfig, DEFAULT_RESOURCE, Resource, SinkConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub instrument: InstrumentConfig,
    pub output: OutputConfig,
    pub converter: ConverterSection,
    pub console: ConsoleConfig,
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.instrument.validate()?;

        if self.converter.enabled && self.converter.program.trim().is_empty() {
            return Err(ConfigError::Message(
                "converter.program must be set when conversion is enabled".to_string(),
            ));
        }

        Ok(())
    }

    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            directory: self.output.directory.clone(),
            detect_format: self.output.detect_format,
        }
    }

    pub fn converter_config(&self) -> Option<ConverterConfig> {
        self.converter.enabled.then(|| ConverterConfig {
            program: self.converter.program.clone(),
            args: self.converter.args.clone(),
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct InstrumentConfig {
    /// VISA resource string, e.g. `GPIB0::17::INSTR` or
    /// `TCPIP::192.168.1.40::1234::SOCKET`
    pub resource: String,
    pub connect_timeout_ms: u64,
    /// Wait for the first byte of a response. Plot generation is slow.
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Silence that ends a raw block on socket links
    pub idle_timeout_ms: u64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        let timeouts = ConnectionConfig::default();
        Self {
            resource: DEFAULT_RESOURCE.to_string(),
            connect_timeout_ms: timeouts.connect_timeout.as_millis() as u64,
            read_timeout_ms: timeouts.read_timeout.as_millis() as u64,
            write_timeout_ms: timeouts.write_timeout.as_millis() as u64,
            idle_timeout_ms: timeouts.idle_timeout.as_millis() as u64,
        }
    }
}

impl InstrumentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Resource::parse(&self.resource)
            .map_err(|e| ConfigError::Message(format!("instrument.resource: {e}")))?;

        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Message(format!(
                    "instrument.{name} must be greater than zero"
                )));
            }
        }

        Ok(())
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Name files after the detected format (.ps/.pcx/.plt) instead of
    /// always .plt
    pub detect_format: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let sink = SinkConfig::default();
        Self {
            directory: sink.directory,
            detect_format: sink.detect_format,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConverterSection {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ConverterSection {
    fn default() -> Self {
        let converter = ConverterConfig::default();
        Self {
            enabled: true,
            program: converter.program,
            args: converter.args,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConsoleConfig {
    pub verbosity: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            verbosity: "info".to_string(),
        }
    }
}

/// Config file picked up from the working directory when `--config` is not
/// given.
pub const DEFAULT_CONFIG_FILE: &str = "hp4195.toml";

/// Load configuration: defaults, then a TOML file, then `HP4195__*`
/// environment overrides.
///
/// A config file that exists but does not parse or validate is an error even
/// when it was picked up implicitly. Falling back to defaults would quietly
/// swap the configured instrument for `GPIB0::17::INSTR`.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    load_config_from(config_path, Path::new(DEFAULT_CONFIG_FILE))
}

fn load_config_from(config_path: Option<&Path>, implicit: &Path) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else if implicit.exists() {
        builder = builder.add_source(File::from(implicit));
    }

    // e.g. HP4195__INSTRUMENT__RESOURCE
    builder = builder.add_source(
        Environment::with_prefix("HP4195")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let app_config = builder.build()?.try_deserialize::<AppConfig>()?;
    app_config.validate()?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.instrument.resource, "GPIB0::17::INSTR");
        assert_eq!(config.converter_config(), Some(ConverterConfig::default()));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[instrument]
resource = "TCPIP::10.0.0.7::1234::SOCKET"
read_timeout_ms = 30000

[output]
detect_format = false

[converter]
enabled = false
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.instrument.resource, "TCPIP::10.0.0.7::1234::SOCKET");
        assert_eq!(
            config.instrument.connection().read_timeout,
            Duration::from_secs(30)
        );
        // untouched keys keep their defaults
        assert_eq!(config.instrument.write_timeout_ms, 5000);
        assert!(!config.sink_config().detect_format);
        assert_eq!(config.converter_config(), None);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = load_config(Some(Path::new("/nonexistent/hp4195.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_implicit_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(None, &dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config.instrument.resource, DEFAULT_RESOURCE);
    }

    #[test]
    fn test_broken_implicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let implicit = dir.path().join(DEFAULT_CONFIG_FILE);

        std::fs::write(&implicit, "[instrument\nresource = ").unwrap();
        assert!(load_config_from(None, &implicit).is_err());

        // parses, but names a resource that cannot be opened
        std::fs::write(&implicit, "[instrument]\nresource = \"COM3\"\n").unwrap();
        let err = load_config_from(None, &implicit).unwrap_err();
        assert!(err.to_string().contains("instrument.resource"));
    }

    #[test]
    fn test_implicit_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let implicit = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &implicit,
            "[instrument]\nresource = \"TCPIP::10.0.0.7::1234::SOCKET\"\n",
        )
        .unwrap();

        let config = load_config_from(None, &implicit).unwrap();
        assert_eq!(config.instrument.resource, "TCPIP::10.0.0.7::1234::SOCKET");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.instrument.resource = "COM3".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.instrument.idle_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.converter.program = " ".to_string();
        assert!(config.validate().is_err());
    }
}
