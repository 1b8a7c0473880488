//! Configuration types deserialized from `kiln.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// The top-level configuration parsed from `kiln.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Compiler pass switches.
    #[serde(default)]
    pub compile: CompileConfig,
    /// Simulator and tracer settings.
    #[serde(default)]
    pub sim: SimConfig,
}

/// Switches for the passes run by the graph compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Remove nodes that are not reachable from an observable root.
    pub dead_code_elimination: bool,
    /// Bypass proxies that copy a single same-width source unchanged.
    pub elide_identity_proxies: bool,
    /// Reject graphs with a combinational cycle.
    pub check_combinational_loops: bool,
    /// Reject graphs where an undefined placeholder reaches a root.
    pub check_undefined: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            dead_code_elimination: true,
            elide_identity_proxies: true,
            check_combinational_loops: true,
            check_undefined: true,
        }
    }
}

/// Settings for the cycle-based simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of clock cycles run by `Simulator::run_configured`.
    pub cycles: u64,
    /// Cycles during which the reset input is held high by `Simulator::reset`.
    pub reset_cycles: u32,
    /// Name of the implicit clock input.
    pub clock: String,
    /// Name of the implicit reset input.
    pub reset: String,
    /// Waveform output settings.
    pub trace: TraceConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cycles: 0,
            reset_cycles: 1,
            clock: "clk".to_string(),
            reset: "reset".to_string(),
            trace: TraceConfig::default(),
        }
    }
}

/// Waveform tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Output format for recorded traces.
    pub format: TraceFormat,
    /// Path the tracer writes to, if any.
    pub path: Option<String>,
    /// VCD timescale (e.g., `"1 ns"`).
    pub timescale: String,
    /// Signals to record.
    ///
    /// Accepts either a single string or a list of strings. An empty list or
    /// the single entry `"all"` records every input, output and tap.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub signals: Vec<String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            format: TraceFormat::Vcd,
            path: None,
            timescale: "1 ns".to_string(),
            signals: Vec::new(),
        }
    }
}

impl TraceConfig {
    /// Returns true if the named signal should be recorded.
    pub fn records(&self, name: &str) -> bool {
        self.signals.is_empty()
            || self.signals.iter().any(|s| s == "all" || s == name)
    }
}

/// Deserializes a field that can be either a single string or a list of strings.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}

/// Waveform output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    /// Value Change Dump (IEEE 1364, default).
    #[default]
    Vcd,
    /// Plain-text table, one row per step.
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    #[test]
    fn trace_format_all_variants() {
        for (input, expected) in [("vcd", TraceFormat::Vcd), ("text", TraceFormat::Text)] {
            let toml = format!("[sim.trace]\nformat = \"{input}\"\n");
            let config = load_config_from_str(&toml).unwrap();
            assert_eq!(config.sim.trace.format, expected);
        }
    }

    #[test]
    fn signals_single_string() {
        let config = load_config_from_str("[sim.trace]\nsignals = \"sum\"\n").unwrap();
        assert_eq!(config.sim.trace.signals, vec!["sum"]);
        assert!(config.sim.trace.records("sum"));
        assert!(!config.sim.trace.records("cout"));
    }

    #[test]
    fn signals_list() {
        let config =
            load_config_from_str("[sim.trace]\nsignals = [\"sum\", \"cout\"]\n").unwrap();
        assert_eq!(config.sim.trace.signals, vec!["sum", "cout"]);
    }

    #[test]
    fn signals_all_records_everything() {
        let config = load_config_from_str("[sim.trace]\nsignals = \"all\"\n").unwrap();
        assert!(config.sim.trace.records("anything"));
        assert!(TraceConfig::default().records("anything"));
    }

    #[test]
    fn partial_compile_table_keeps_other_defaults() {
        let config = load_config_from_str("[compile]\ndead_code_elimination = false\n").unwrap();
        assert!(!config.compile.dead_code_elimination);
        assert!(config.compile.elide_identity_proxies);
        assert!(config.compile.check_combinational_loops);
    }
}
