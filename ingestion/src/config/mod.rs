//! Pipeline configuration.
//!
//! A configuration file lists pipelines to run in order. Each entry names a
//! source `module` and its `cfg`, made of a `source` table (module-specific
//! keys) and an optional `sink` table.
//!
//! ```toml
//! [[pipeline]]
//! module = "covid19data"
//!
//! [pipeline.cfg.source]
//! filename = "COVID_AU_state.csv"
//!
//! [pipeline.cfg.sink]
//! type = "csv"
//! name = "data/covid_au_data"
//! mode = "replace"
//! ```
//!
//! JSON and YAML files use the same shape, or a bare array of entries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};

/// Environment variable read for the database URL when none is configured.
pub const DEFAULT_URI_ENV: &str = "POSTGRESQL";

// =============================================================================
// Source options
// =============================================================================

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(ConfigError::InvalidValue {
                        field: $field.to_string(),
                        message: format!(
                            "'{}' is not one of: {}",
                            other,
                            [$($text),+].join(", ")
                        ),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Files published in the M3IT COVID-19_Data repository.
    Covid19File, "filename" {
        State => "COVID_AU_state.csv",
        Deaths => "COVID_AU_deaths.csv",
    }
}

string_enum! {
    /// NSW datastore resources.
    NswResource, "resource_type" {
        TestsByLocation => "tests_by_location",
        CasesByLocation => "cases_by_location",
        CasesByAgeRange => "cases_by_age_range",
    }
}

string_enum! {
    /// health.gov.au resource collections.
    VaxCollection, "collection" {
        VaccinationData => "covid-19-vaccination-vaccination-data",
        LgaRates => "covid-19-vaccination-geographic-vaccination-rates-lga",
    }
}

/// Validated source configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Covid19Data { filename: Covid19File },
    NswGovernment { resource_type: NswResource },
    Vaccinations { collection: VaxCollection },
}

impl SourceConfig {
    /// Module names accepted in configuration files.
    pub const MODULES: [&'static str; 3] = ["covid19data", "nsw_government", "vaccinations"];

    /// Validate the raw `source` table for `module`. Unknown keys are ignored.
    pub fn from_module(module: &str, raw: &Map<String, Value>) -> ConfigResult<Self> {
        match module {
            "covid19data" => Ok(Self::Covid19Data {
                filename: required(raw, "filename")?.parse()?,
            }),
            "nsw_government" => Ok(Self::NswGovernment {
                resource_type: required(raw, "resource_type")?.parse()?,
            }),
            "vaccinations" => Ok(Self::Vaccinations {
                collection: required(raw, "collection")?.parse()?,
            }),
            other => Err(ConfigError::UnknownModule(other.to_string())),
        }
    }

    pub fn module(&self) -> &'static str {
        match self {
            Self::Covid19Data { .. } => "covid19data",
            Self::NswGovernment { .. } => "nsw_government",
            Self::Vaccinations { .. } => "vaccinations",
        }
    }
}

fn required<'a>(raw: &'a Map<String, Value>, field: &str) -> ConfigResult<&'a str> {
    match raw.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a string, got {}", other),
        }),
        None => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "required".to_string(),
        }),
    }
}

// =============================================================================
// Sink options
// =============================================================================

/// Sink backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Csv,
    #[serde(alias = "sql")]
    Postgres,
}

/// What to do when the target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkMode {
    #[default]
    Fail,
    Replace,
    Append,
}

/// Where and how a table is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(rename = "type")]
    pub kind: SinkKind,
    pub name: String,
    #[serde(default)]
    pub mode: SinkMode,
    #[serde(default)]
    pub chunksize: Option<usize>,
    #[serde(default = "default_uri_env")]
    pub uri_env: String,
}

fn default_uri_env() -> String {
    DEFAULT_URI_ENV.to_string()
}

impl SinkConfig {
    /// CSV sink that replaces its target.
    pub fn csv(name: impl Into<String>) -> Self {
        Self {
            kind: SinkKind::Csv,
            name: name.into(),
            mode: SinkMode::Replace,
            chunksize: None,
            uri_env: default_uri_env(),
        }
    }

    /// Same sink, different target name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    fn check(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sink.name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.chunksize == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "sink.chunksize".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Database URL from the configured environment variable (`.env` honoured).
    pub fn database_url(&self) -> ConfigResult<String> {
        let _ = dotenvy::dotenv();
        std::env::var(&self.uri_env).map_err(|_| ConfigError::MissingEnv(self.uri_env.clone()))
    }
}

// =============================================================================
// Entries
// =============================================================================

/// One validated pipeline: a source and where to save it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub sink: Option<SinkConfig>,
}

impl IngestConfig {
    pub fn sink_name(&self) -> Option<&str> {
        self.sink.as_ref().map(|s| s.name.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    module: String,
    cfg: RawIngest,
}

#[derive(Debug, Deserialize)]
struct RawIngest {
    #[serde(default)]
    source: Map<String, Value>,
    #[serde(default)]
    sink: Option<SinkConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFile {
    Table { pipeline: Vec<RawEntry> },
    List(Vec<RawEntry>),
}

impl RawFile {
    fn into_entries(self) -> Vec<RawEntry> {
        match self {
            RawFile::Table { pipeline } => pipeline,
            RawFile::List(entries) => entries,
        }
    }
}

fn validate_entries(entries: Vec<RawEntry>) -> ConfigResult<Vec<IngestConfig>> {
    entries
        .into_iter()
        .map(|e| {
            let source = SourceConfig::from_module(&e.module, &e.cfg.source)?;
            if let Some(ref sink) = e.cfg.sink {
                sink.check()?;
            }
            Ok(IngestConfig {
                source,
                sink: e.cfg.sink,
            })
        })
        .collect()
}

/// Parse TOML configuration text.
pub fn parse_toml(text: &str) -> ConfigResult<Vec<IngestConfig>> {
    let raw: RawFile = toml::from_str(text)?;
    validate_entries(raw.into_entries())
}

/// Parse JSON configuration text.
pub fn parse_json(text: &str) -> ConfigResult<Vec<IngestConfig>> {
    let raw: RawFile = serde_json::from_str(text)?;
    validate_entries(raw.into_entries())
}

/// Parse YAML configuration text.
pub fn parse_yaml(text: &str) -> ConfigResult<Vec<IngestConfig>> {
    let raw: RawFile = serde_yaml::from_str(text)?;
    validate_entries(raw.into_entries())
}

/// Load and validate a configuration file; the format follows the extension.
pub fn load_configuration(path: &Path) -> ConfigResult<Vec<IngestConfig>> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => parse_toml(&text),
        Some("json") => parse_json(&text),
        Some("yaml") | Some("yml") => parse_yaml(&text),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}
