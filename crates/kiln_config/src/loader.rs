//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::path::Path;

/// File name looked up in a project directory.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Loads and validates `kiln.toml` from a project directory.
///
/// A missing file is not an error: the defaults are returned instead.
pub fn load_config(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    let content = match std::fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(KilnConfig::default()),
        Err(e) => return Err(e.into()),
    };
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that names are present and settings are consistent.
fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    let sim = &config.sim;
    if sim.clock.is_empty() {
        return Err(ConfigError::MissingField("sim.clock".to_string()));
    }
    if sim.reset.is_empty() {
        return Err(ConfigError::MissingField("sim.reset".to_string()));
    }
    if sim.clock == sim.reset {
        return Err(ConfigError::ValidationError(format!(
            "clock and reset inputs are both named '{}'",
            sim.clock
        )));
    }
    validate_timescale(&sim.trace.timescale)?;
    Ok(())
}

/// Checks a VCD timescale of the form `<1|10|100> <s|ms|us|ns|ps|fs>`.
fn validate_timescale(timescale: &str) -> Result<(), ConfigError> {
    let compact: String = timescale.split_whitespace().collect();
    let split = compact
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(compact.len());
    let (magnitude, unit) = compact.split_at(split);
    let magnitude_ok = matches!(magnitude, "1" | "10" | "100");
    let unit_ok = matches!(unit, "s" | "ms" | "us" | "ns" | "ps" | "fs");
    if magnitude_ok && unit_ok {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "invalid timescale '{timescale}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TraceFormat;

    #[test]
    fn empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, KilnConfig::default());
        assert!(config.compile.dead_code_elimination);
        assert_eq!(config.sim.clock, "clk");
        assert_eq!(config.sim.reset, "reset");
        assert_eq!(config.sim.reset_cycles, 1);
        assert_eq!(config.sim.trace.format, TraceFormat::Vcd);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[compile]
dead_code_elimination = true
elide_identity_proxies = false
check_combinational_loops = true
check_undefined = false

[sim]
cycles = 20
reset_cycles = 2
clock = "sys_clk"
reset = "rst"

[sim.trace]
format = "text"
path = "out/trace.txt"
timescale = "10 ps"
signals = ["count"]
"#;
        let config = load_config_from_str(toml).unwrap();
        assert!(!config.compile.elide_identity_proxies);
        assert!(!config.compile.check_undefined);
        assert_eq!(config.sim.cycles, 20);
        assert_eq!(config.sim.reset_cycles, 2);
        assert_eq!(config.sim.clock, "sys_clk");
        assert_eq!(config.sim.trace.format, TraceFormat::Text);
        assert_eq!(config.sim.trace.path.as_deref(), Some("out/trace.txt"));
        assert_eq!(config.sim.trace.timescale, "10 ps");
    }

    #[test]
    fn empty_clock_errors() {
        let err = load_config_from_str("[sim]\nclock = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn clock_equal_to_reset_errors() {
        let err = load_config_from_str("[sim]\nclock = \"x\"\nreset = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn bad_timescale_errors() {
        let err = load_config_from_str("[sim.trace]\ntimescale = \"3 ns\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(load_config_from_str("[sim.trace]\ntimescale = \"100ps\"\n").is_ok());
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn unknown_trace_format_errors() {
        let err = load_config_from_str("[sim.trace]\nformat = \"fst\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config, KilnConfig::default());
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[sim]\ncycles = 7\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.sim.cycles, 7);
    }
}
