//! Declarative source definitions
//!
//! A YAML document describing one upstream API: where its partitions come
//! from and how each stream is fetched. Only static headers are supported;
//! credentials are expected to be templated in by the host.
//!
//! ```yaml
//! name: github
//! base_url: https://api.github.com
//! headers:
//!   Accept: application/vnd.github+json
//! partitions:
//!   type: list
//!   values: [acme/api, acme/web]
//! streams:
//!   - kind: paginated
//!     name: issues
//!     request:
//!       path: /repos/{{ partition }}/issues
//!       params: { state: all, sort: updated, direction: desc }
//!     since_param: since
//!     order: descending
//!     cursor: { param: page, path: next_page }
//!     records: { path: items, id_path: id, time_path: updated_at }
//! ```

use super::template::extract_variables;
use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use crate::types::RecordOrder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

// ============================================================================
// Source Definition
// ============================================================================

/// Top-level source definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Source name
    pub name: String,
    /// Base URL for all requests
    pub base_url: String,
    /// Headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Upstream rate limit; overrides the settings file
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Statuses meaning "change token no longer valid"
    #[serde(default = "default_token_expired_statuses")]
    pub token_expired_statuses: Vec<u16>,
    /// Where partitions come from
    pub partitions: PartitionsDefinition,
    /// Streams of this source
    pub streams: Vec<StreamDefinition>,
}

fn default_token_expired_statuses() -> Vec<u16> {
    vec![410]
}

/// Partition source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionsDefinition {
    /// Static list
    List { values: Vec<String> },
    /// HTTP listing
    Endpoint {
        path: String,
        #[serde(default)]
        params: HashMap<String, String>,
        /// Path to the record array; empty for a root array
        #[serde(default)]
        records_path: String,
        /// Fields joined into the key
        key_fields: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
        #[serde(default)]
        cursor: Option<CursorDefinition>,
    },
}

fn default_separator() -> String {
    "/".to_string()
}

// ============================================================================
// Building Blocks
// ============================================================================

/// One HTTP request template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDefinition {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestDefinition {
    /// GET request for `path`
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            path: path.into(),
            params: HashMap::new(),
            body: None,
        }
    }

    fn templates(&self) -> Vec<String> {
        let mut vars = extract_variables(&self.path);
        for value in self.params.values() {
            vars.extend(extract_variables(value));
        }
        if let Some(ref body) = self.body {
            vars.extend(extract_variables(&body.to_string()));
        }
        vars
    }
}

/// Body cursor: read at `path`, sent back as query `param`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorDefinition {
    pub param: String,
    pub path: String,
}

/// How to turn a response into change records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsDefinition {
    /// Path to the record array; empty for a root array
    #[serde(default)]
    pub path: String,
    /// Path to the entity id inside a record
    pub id_path: String,
    /// Path to the effective time inside a record
    #[serde(default)]
    pub time_path: Option<String>,
    /// Marker identifying tombstones
    #[serde(default)]
    pub deleted: Option<DeletedMarker>,
}

/// Tombstone marker; without `value` any `true` at `path` marks a delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedMarker {
    pub path: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Change-feed token location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDefinition {
    /// Query parameter carrying the token
    pub param: String,
    /// Path of the next token in the response
    pub path: String,
    /// Boolean path signalling another batch
    #[serde(default)]
    pub has_more_path: Option<String>,
}

/// Mapping of upstream job statuses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusDefinition {
    /// Path of the status field
    pub path: String,
    /// Values meaning the results are ready
    pub completed: Vec<String>,
    /// Values meaning the job failed
    #[serde(default)]
    pub failed: Vec<String>,
    /// Values meaning the job has not started; anything unlisted is processing
    #[serde(default)]
    pub created: Vec<String>,
    /// Path of the failure reason
    #[serde(default)]
    pub error_path: Option<String>,
}

// ============================================================================
// Streams
// ============================================================================

/// Stream definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamDefinition {
    Paginated(PaginatedStreamDefinition),
    Delta(DeltaStreamDefinition),
    ExportJob(ExportJobStreamDefinition),
}

impl StreamDefinition {
    /// Stream name
    pub fn name(&self) -> &str {
        match self {
            Self::Paginated(s) => &s.name,
            Self::Delta(s) => &s.name,
            Self::ExportJob(s) => &s.name,
        }
    }
}

/// Listing endpoint, optionally filtered by a cutoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedStreamDefinition {
    pub name: String,
    pub request: RequestDefinition,
    pub records: RecordsDefinition,
    #[serde(default)]
    pub cursor: Option<CursorDefinition>,
    /// Query parameter receiving the cutoff on incremental runs
    #[serde(default)]
    pub since_param: Option<String>,
    #[serde(default)]
    pub order: RecordOrder,
}

/// Change feed seeded by a full listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaStreamDefinition {
    pub name: String,
    pub request: RequestDefinition,
    pub records: RecordsDefinition,
    /// Cursor of the full listing
    #[serde(default)]
    pub cursor: Option<CursorDefinition>,
    pub token: TokenDefinition,
}

/// Server-side export jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJobStreamDefinition {
    pub name: String,
    pub create: RequestDefinition,
    /// Path of the job id in create and poll responses
    pub job_id_path: String,
    pub poll: RequestDefinition,
    pub status: JobStatusDefinition,
    pub download: RequestDefinition,
    #[serde(default)]
    pub download_cursor: Option<CursorDefinition>,
    pub records: RecordsDefinition,
}

// ============================================================================
// Loading
// ============================================================================

/// Load a source definition from a YAML file
pub fn load_source(path: impl AsRef<Path>) -> Result<SourceDefinition> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "Failed to read source file '{}': {e}",
            path.display()
        ))
    })?;
    load_source_from_str(&content)
}

/// Load a source definition from a YAML string
pub fn load_source_from_str(yaml: &str) -> Result<SourceDefinition> {
    let def: SourceDefinition = serde_yaml::from_str(yaml)
        .map_err(|e| Error::config(format!("Failed to parse source YAML: {e}")))?;

    validate_source(&def)?;
    Ok(def)
}

/// Validate a source definition
pub fn validate_source(def: &SourceDefinition) -> Result<()> {
    if def.name.is_empty() {
        return Err(Error::config("Source name cannot be empty"));
    }

    url::Url::parse(&def.base_url)
        .map_err(|e| Error::config(format!("Invalid base_url '{}': {e}", def.base_url)))?;

    if def.streams.is_empty() {
        return Err(Error::config("Source must have at least one stream"));
    }

    let names: HashSet<_> = def.streams.iter().map(StreamDefinition::name).collect();
    if names.len() != def.streams.len() {
        return Err(Error::config("Duplicate stream names found"));
    }

    if let Some(status) = def
        .token_expired_statuses
        .iter()
        .find(|s| !(400..500).contains(*s))
    {
        return Err(Error::invalid_value(
            "token_expired_statuses",
            format!("{status} is not a client error status"),
        ));
    }

    match &def.partitions {
        PartitionsDefinition::List { values } if values.is_empty() => {
            return Err(Error::config("Partition list cannot be empty"));
        }
        PartitionsDefinition::Endpoint { key_fields, .. } if key_fields.is_empty() => {
            return Err(Error::config("Partition endpoint needs at least one key field"));
        }
        _ => {}
    }

    for stream in &def.streams {
        validate_stream(stream)?;
    }

    Ok(())
}

fn validate_stream(stream: &StreamDefinition) -> Result<()> {
    let name = stream.name();
    if name.is_empty() {
        return Err(Error::config("Stream name cannot be empty"));
    }

    match stream {
        StreamDefinition::Paginated(s) => {
            validate_request(name, &s.request, &["since"])?;
            validate_records(name, &s.records)?;
        }
        StreamDefinition::Delta(s) => {
            validate_request(name, &s.request, &[])?;
            validate_records(name, &s.records)?;
            if s.token.param.is_empty() || s.token.path.is_empty() {
                return Err(Error::config(format!(
                    "Stream '{name}' token needs both param and path"
                )));
            }
        }
        StreamDefinition::ExportJob(s) => {
            validate_request(name, &s.create, &["window.start", "window.end"])?;
            validate_request(name, &s.poll, &["job_id"])?;
            validate_request(name, &s.download, &["job_id"])?;
            validate_records(name, &s.records)?;
            if s.job_id_path.is_empty() {
                return Err(Error::config(format!("Stream '{name}' job_id_path cannot be empty")));
            }
            if s.status.completed.is_empty() {
                return Err(Error::config(format!(
                    "Stream '{name}' must list at least one completed status"
                )));
            }
        }
    }

    Ok(())
}

fn validate_request(stream: &str, request: &RequestDefinition, extra_vars: &[&str]) -> Result<()> {
    if request.path.is_empty() {
        return Err(Error::config(format!("Stream '{stream}' path cannot be empty")));
    }

    let valid_methods = ["GET", "POST", "PUT", "PATCH", "DELETE"];
    if !valid_methods.contains(&request.method.to_uppercase().as_str()) {
        return Err(Error::config(format!(
            "Stream '{stream}' has invalid HTTP method: {}",
            request.method
        )));
    }

    for var in request.templates() {
        let known = var == "partition"
            || var.starts_with("partition.")
            || extra_vars.contains(&var.as_str());
        if !known {
            return Err(Error::config(format!(
                "Stream '{stream}' uses unknown template variable '{var}'"
            )));
        }
    }

    Ok(())
}

fn validate_records(stream: &str, records: &RecordsDefinition) -> Result<()> {
    if records.id_path.is_empty() {
        return Err(Error::config(format!("Stream '{stream}' records.id_path cannot be empty")));
    }
    Ok(())
}
