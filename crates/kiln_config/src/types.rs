//! Configuration types deserialized from `kiln.toml`.

use kiln_common::{ContentHash, TOOL_VERSION};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// File name of the project descriptor.
pub const CONFIG_FILE: &str = "kiln.toml";

/// The top-level project configuration parsed from `kiln.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Core project metadata.
    pub project: ProjectMeta,
    /// The root set of Input Units.
    pub inputs: InputsConfig,
    /// Output and build-state settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Watch-mode timing.
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Core project metadata required in every `kiln.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// The project version string.
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// The root set: every Input Unit reachable from these paths is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InputsConfig {
    /// Root unit paths, relative to the project directory.
    ///
    /// Accepts either a single string or a list of strings.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub roots: Vec<String>,
}

/// Output and build-state settings.
///
/// Every field here contributes to the option fingerprint: changing any of
/// them invalidates the persisted snapshot and forces a full rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BuildConfig {
    /// Output directory, relative to the project directory.
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
    /// Build-state file name, relative to the output directory.
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Whether to emit a line map alongside every output.
    #[serde(default)]
    pub source_map: bool,
    /// Extension given to emitted outputs.
    #[serde(default = "default_out_extension")]
    pub out_extension: String,
}

fn default_out_dir() -> String {
    "out".to_string()
}

fn default_state_file() -> String {
    "kiln.buildinfo".to_string()
}

fn default_out_extension() -> String {
    "out".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            out_dir: default_out_dir(),
            state_file: default_state_file(),
            source_map: false,
            out_extension: default_out_extension(),
        }
    }
}

/// Watch-mode timing settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Quiet period after the last file-system event before a cycle starts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Interval between file-system polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ProjectConfig {
    /// Fingerprint of everything that affects emitted bytes besides sources.
    ///
    /// Combines the tool version with the serialized `[build]` section.
    pub fn options_fingerprint(&self) -> ContentHash {
        let build = toml::to_string(&self.build).unwrap_or_default();
        ContentHash::combine([TOOL_VERSION.as_bytes(), build.as_bytes()])
    }
}

/// Deserializes a field that can be either a single string or a list of strings.
///
/// Allows `roots = "main.kl"` as well as `roots = ["a.kl", "b.kl"]`.
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
