// Turns a multipart submission into process arguments according to the
// parameter schema of a server.

use crate::{
    config::{ParameterSpec, ServerConfig},
    error::GatewayError,
    process::StdinInput,
    size_limit::{MAX_PART_SIZE_BYTES, SizeLimitedStream},
};
use axum::extract::Multipart;
use std::path::Path;
use tracing::debug;

// Replaced in an override filename with the name of the first uploaded file
pub const ORIGINAL_FILENAME_PLACEHOLDER: &str = "$originalFilename$";
// Replaced in the server's output filename with the active override
pub const OUTPUT_FILENAME_PLACEHOLDER: &str = "$outputFilename$";
// Used for the original filename when no file was uploaded
pub const DEFAULT_ORIGINAL_FILENAME: &str = "file";

/// Everything one submission contributes to a process invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolvedParameters {
    // Command line arguments as (flag, value), in arrival order with unique flags
    pub arguments: Vec<(String, String)>,
    pub stdin: StdinInput,
    // Output filename template selected by a matching override
    pub output_override: Option<String>,
    // Name of the first uploaded file, without extension
    pub original_filename: Option<String>,
}

impl ResolvedParameters {
    /// Computes the attachment filename from the server's `output_filename` template.
    pub fn output_filename(&self, template: &str) -> String {
        let override_filename = self
            .output_override
            .as_deref()
            .unwrap_or("")
            .replace(
                ORIGINAL_FILENAME_PLACEHOLDER,
                self.original_filename
                    .as_deref()
                    .unwrap_or(DEFAULT_ORIGINAL_FILENAME),
            );
        template.replace(OUTPUT_FILENAME_PLACEHOLDER, &override_filename)
    }

    // Keeps the position of an existing flag and replaces its value
    fn insert_argument(&mut self, key: String, value: String) {
        match self.arguments.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, existing_value)) => *existing_value = value,
            None => self.arguments.push((key, value)),
        }
    }
}

/// Value of one submitted part that matched a parameter.
#[derive(Debug, Clone)]
pub struct SubmittedPart {
    pub data: Vec<u8>,
    // Present for file parts
    pub file_name: Option<String>,
}

impl SubmittedPart {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Reads all parts of `multipart` and resolves them against `config`.
///
/// Fails as a whole on the first invalid part.
pub async fn resolve_parameters(
    mut multipart: Multipart,
    config: &ServerConfig,
) -> Result<ResolvedParameters, GatewayError> {
    let mut resolver = ParameterResolver::new(config);

    while let Some(field) = multipart.next_field().await? {
        let Some(parameter) = field.name().and_then(|name| config.find_parameter(name)) else {
            debug!("Ignoring multipart field: {:?}", field.name());
            continue;
        };

        let file_name = field.file_name().map(str::to_string);
        let data = SizeLimitedStream::new(std::pin::pin!(field), MAX_PART_SIZE_BYTES)
            .read_to_end()
            .await?;

        resolver
            .accept(parameter, SubmittedPart { data, file_name })
            .await?;
    }

    Ok(resolver.finish())
}

/// Accumulates submitted parts of one request.
pub struct ParameterResolver<'a> {
    config: &'a ServerConfig,
    resolved: ResolvedParameters,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(config: &'a ServerConfig) -> Self {
        Self {
            config,
            resolved: ResolvedParameters::default(),
        }
    }

    /// Applies one submitted part for `parameter`.
    pub async fn accept(
        &mut self,
        parameter: &ParameterSpec,
        part: SubmittedPart,
    ) -> Result<(), GatewayError> {
        if self.resolved.original_filename.is_none() {
            self.resolved.original_filename = part.file_name.as_deref().map(name_without_extension);
        }

        let value = part.text();
        if parameter.optional && value.is_empty() {
            debug!("Skipping empty optional parameter '{}'", parameter.form);
            return Ok(());
        }

        let prefix = parameter.value_prefix.as_deref().unwrap_or("");
        let suffix = parameter.value_suffix.as_deref().unwrap_or("");
        let updated_value = format!("{}{}{}", prefix, value, suffix);

        if parameter.verify_path {
            verify_path(&updated_value, &self.config.path_restrict).await?;
        }

        if let Some(output_override) = parameter
            .output_override
            .iter()
            .find(|output_override| output_override.value == value)
        {
            self.resolved.output_override = Some(output_override.output_filename.clone());
        }

        if parameter.stdin {
            // Only the first standard input value is used
            if self.resolved.stdin == StdinInput::NoValue {
                self.resolved.stdin = if part.file_name.is_some() {
                    let mut bytes =
                        Vec::with_capacity(prefix.len() + part.data.len() + suffix.len());
                    bytes.extend_from_slice(prefix.as_bytes());
                    bytes.extend_from_slice(&part.data);
                    bytes.extend_from_slice(suffix.as_bytes());
                    StdinInput::Bytes(bytes)
                } else {
                    StdinInput::Text(updated_value)
                };
            }
            return Ok(());
        }

        let key = parameter.process.clone().ok_or_else(|| {
            GatewayError::Validation(format!(
                "Parameter '{}' has neither a process flag nor standard input enabled",
                parameter.form
            ))
        })?;
        self.resolved.insert_argument(key, updated_value);
        Ok(())
    }

    pub fn finish(self) -> ResolvedParameters {
        self.resolved
    }
}

// File name without directories and without its last extension
fn name_without_extension(file_name: &str) -> String {
    let name = Path::new(file_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.rfind('.') {
        Some(index) => name[..index].to_string(),
        None => name,
    }
}

/// Fails unless `value` is an existing path located inside the existing `restrict` directory.
///
/// Both paths are canonicalized, so `..` segments and symlinks pointing outside are rejected.
/// Containment is checked per path component, so `/data2` is not inside `/data`.
pub async fn verify_path(value: &str, restrict: &str) -> Result<(), GatewayError> {
    let restrict_path = tokio::fs::canonicalize(restrict).await.map_err(|e| {
        GatewayError::Validation(format!("Restrict path '{}' is not available: {}", restrict, e))
    })?;
    let path = tokio::fs::canonicalize(value).await.map_err(|e| {
        GatewayError::Validation(format!("Path '{}' is not available: {}", value, e))
    })?;

    if !path.starts_with(&restrict_path) {
        return Err(GatewayError::Validation(format!(
            "Path '{}' is not located in '{}'",
            path.display(),
            restrict_path.display()
        )));
    }
    Ok(())
}
