//! Template interpolation for source definitions
//!
//! Handles `{{ variable }}` interpolation in paths, query parameters and
//! request bodies. Available variables:
//!
//! - `partition` - the full partition key; `partition.0`, `partition.1`, ...
//!   address its `/`-separated segments
//! - `since` - incremental cutoff (RFC 3339)
//! - `window.start`, `window.end` - export job window (RFC 3339)
//! - `job_id` - export job id

use crate::error::{Error, Result};
use crate::types::{PartitionKey, Timestamp};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Regex for matching template variables: {{ variable.path }}
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z0-9_]+)*)\s*\}\}")
        .expect("template pattern is valid")
});

/// Variables visible to a template
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Context for one partition
    pub fn for_partition(partition: &PartitionKey) -> Self {
        let mut ctx = Self::default();
        ctx.vars
            .insert("partition".to_string(), partition.as_str().to_string());
        for (i, segment) in partition.as_str().split('/').enumerate() {
            ctx.vars.insert(format!("partition.{i}"), segment.to_string());
        }
        ctx
    }

    /// Set a variable
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Set a timestamp variable
    #[must_use]
    pub fn with_time(self, name: impl Into<String>, value: Timestamp) -> Self {
        self.with(name, format_time(value))
    }

    /// Get a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Format a timestamp the way upstream APIs expect it
pub fn format_time(value: Timestamp) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Render a template string with the given context
pub fn render(template: &str, ctx: &TemplateContext) -> Result<String> {
    let mut missing = Vec::new();
    let rendered = TEMPLATE_REGEX.replace_all(template, |cap: &regex::Captures<'_>| {
        match ctx.get(&cap[1]) {
            Some(value) => value.to_string(),
            None => {
                missing.push(cap[1].to_string());
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(Error::config(format!(
            "Undefined template variable(s): {}",
            missing.join(", ")
        )))
    }
}

/// Check if a string contains template variables
pub fn has_templates(s: &str) -> bool {
    TEMPLATE_REGEX.is_match(s)
}

/// Extract all variable names from a template
pub fn extract_variables(template: &str) -> Vec<String> {
    TEMPLATE_REGEX
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Render all string values in a JSON value
pub fn render_value(value: &Value, ctx: &TemplateContext) -> Result<Value> {
    match value {
        Value::String(s) if has_templates(s) => Ok(Value::String(render(s, ctx)?)),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::new();
            for (k, v) in map {
                rendered.insert(k.clone(), render_value(v, ctx)?);
            }
            Ok(Value::Object(rendered))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| render_value(v, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        _ => Ok(value.clone()),
    }
}
