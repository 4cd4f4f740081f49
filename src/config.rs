// Server configuration loaded from the JSON configuration file.
// Each entry of the top-level array describes one hosted server.

use mime::Mime;
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use std::path::Path;
use tracing::{debug, warn};

/// Configuration of one hosted server. Immutable after loading.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    // Port the server listens on.
    pub port: u16,
    // Address the server binds to. "*" means all interfaces.
    pub host: String,
    // Root directory that path-verified parameter values must be located in.
    pub path_restrict: String,
    // Command template, one token per argument.
    pub command: Vec<String>,
    // Expected form fields, in declaration order.
    #[serde(default, deserialize_with = "deserialize_lenient_vec")]
    pub parameters: Vec<ParameterSpec>,
    // Whether the standard output is relayed as text or raw bytes.
    pub output_type: OutputType,
    // Filename template of the response attachment.
    pub output_filename: String,
    // Content type of the response.
    #[serde(deserialize_with = "deserialize_mime")]
    pub output_content_type: Mime,
    // Domain name, only used for nginx configuration.
    pub server_name: String,
    // Location path, only used for nginx configuration.
    pub server_location: String,
}

/// One expected form field and how it is turned into a process argument.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    // Field name in the submitted form.
    pub form: String,
    // Flag emitted before the value. None emits nothing and requires `stdin`.
    #[serde(default)]
    pub process: Option<String>,
    #[serde(default)]
    pub value_prefix: Option<String>,
    #[serde(default)]
    pub value_suffix: Option<String>,
    // Treat the value as a path that must exist inside `path_restrict`.
    #[serde(default)]
    pub verify_path: bool,
    // Skip the field entirely when its value is empty.
    #[serde(default)]
    pub optional: bool,
    // Send the value to standard input instead of the command line.
    #[serde(default)]
    pub stdin: bool,
    #[serde(
        default,
        rename = "outputOverride",
        alias = "overrides",
        deserialize_with = "deserialize_lenient_vec"
    )]
    pub output_override: Vec<OutputOverride>,
}

/// Replaces the output filename when the submitted value matches.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputOverride {
    #[serde(alias = "matchValue")]
    pub value: String,
    pub output_filename: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    String,
    Binary,
}

impl ServerConfig {
    // First parameter declared for the given form field name
    pub fn find_parameter(&self, form: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|parameter| parameter.form == form)
    }

    fn validate(&self) -> Result<(), String> {
        if self.command.is_empty() {
            return Err("command must contain at least one token".to_string());
        }
        if self.command[0].is_empty() {
            return Err("command executable must not be empty".to_string());
        }
        Ok(())
    }
}

/// Errors that prevent reading the configuration file as a whole.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    NotAnArray,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "Failed to read configuration file: {}", err),
            Self::Json(err) => write!(f, "Failed to parse configuration file: {}", err),
            Self::NotAnArray => write!(f, "Configuration file must contain a JSON array"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::NotAnArray => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

/// Reads and parses the configuration file at `path`.
pub fn load_server_configs(path: impl AsRef<Path>) -> Result<Vec<ServerConfig>, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_server_configs(&text)
}

/// Parses a JSON array of server entries.
///
/// Entries that are malformed or incomplete are logged and skipped, the remaining
/// ones are returned in file order.
pub fn parse_server_configs(text: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let entries = match serde_json::from_str::<serde_json::Value>(text)? {
        serde_json::Value::Array(entries) => entries,
        _ => return Err(ConfigError::NotAnArray),
    };

    let configs = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let config = match serde_json::from_value::<ServerConfig>(entry) {
                Ok(config) => config,
                Err(err) => {
                    warn!("Skipping server entry #{}: {}", index, err);
                    return None;
                }
            };
            if let Err(reason) = config.validate() {
                warn!("Skipping server entry #{}: {}", index, reason);
                return None;
            }
            debug!(
                "Loaded server entry #{} ({}:{}, {} parameter(s))",
                index,
                config.host,
                config.port,
                config.parameters.len()
            );
            Some(config)
        })
        .collect();

    Ok(configs)
}

// Deserializes a list, dropping the elements that fail to deserialize.
fn deserialize_lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let values: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!("Skipping malformed list entry: {}", err);
                None
            }
        })
        .collect())
}

fn deserialize_mime<'de, D>(deserializer: D) -> Result<Mime, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.parse::<Mime>().map_err(|err| {
        serde::de::Error::custom(format!("invalid content type '{}': {}", value, err))
    })
}
