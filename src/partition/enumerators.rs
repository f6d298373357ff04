//! Partition enumerator implementations

use super::types::{dedupe, PartitionEnumerator};
use crate::error::{Error, Result};
use crate::http::{HttpClient, Request, RetryPolicy};
use crate::source::path::{extract_array, extract_string};
use crate::types::PartitionKey;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// List Enumerator
// ============================================================================

/// Static list of partition keys
#[derive(Debug, Clone)]
pub struct ListEnumerator {
    values: Vec<String>,
}

impl ListEnumerator {
    /// Create a new list enumerator
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PartitionEnumerator for ListEnumerator {
    async fn partitions(&self) -> Result<Vec<PartitionKey>> {
        Ok(dedupe(self.values.iter().cloned()))
    }
}

/// Join `key_fields` of `record` with `separator`
///
/// `owner.login` + `name` gives `acme/api`; records missing any field yield
/// no key.
fn key_of(record: &Value, key_fields: &[String], separator: &str) -> Option<String> {
    let parts = key_fields
        .iter()
        .map(|field| extract_string(record, field))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join(separator))
}

// ============================================================================
// Endpoint Enumerator
// ============================================================================

/// Lists partitions from an HTTP endpoint, following a body cursor
#[derive(Debug, Clone)]
pub struct EndpointEnumerator {
    client: HttpClient,
    policy: RetryPolicy,
    path: String,
    params: HashMap<String, String>,
    records_path: String,
    key_fields: Vec<String>,
    separator: String,
    cursor: Option<(String, String)>,
}

impl EndpointEnumerator {
    /// Create an enumerator reading records at `records_path` of `path`
    pub fn new(
        client: HttpClient,
        policy: RetryPolicy,
        path: impl Into<String>,
        records_path: impl Into<String>,
        key_fields: Vec<String>,
    ) -> Self {
        Self {
            client,
            policy,
            path: path.into(),
            params: HashMap::new(),
            records_path: records_path.into(),
            key_fields,
            separator: "/".to_string(),
            cursor: None,
        }
    }

    /// Add a static query parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Join key fields with `separator`
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Follow the cursor found at `path`, sent back as query `param`
    #[must_use]
    pub fn with_cursor(mut self, param: impl Into<String>, path: impl Into<String>) -> Self {
        self.cursor = Some((param.into(), path.into()));
        self
    }
}

#[async_trait]
impl PartitionEnumerator for EndpointEnumerator {
    async fn partitions(&self) -> Result<Vec<PartitionKey>> {
        let mut keys = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let mut request = Request::get(&self.path);
            for (k, v) in &self.params {
                request = request.query(k, v);
            }
            if let (Some((param, _)), Some(cursor)) = (&self.cursor, &next) {
                request = request.query(param, cursor);
            }

            let body = self
                .policy
                .run("enumerate_partitions", || self.client.json(&request))
                .await?;

            let records = extract_array(&body, &self.records_path).ok_or_else(|| {
                Error::malformed(format!(
                    "partition listing {} has no array at '{}'",
                    self.path, self.records_path
                ))
            })?;
            keys.extend(
                records
                    .iter()
                    .filter_map(|r| key_of(r, &self.key_fields, &self.separator)),
            );

            let cursor = match &self.cursor {
                Some((_, path)) => extract_string(&body, path).filter(|c| !c.is_empty()),
                None => None,
            };
            debug!(path = %self.path, records = records.len(), has_more = cursor.is_some(), "listed partitions");

            match cursor {
                Some(c) if next.as_deref() != Some(c.as_str()) => next = Some(c),
                _ => break,
            }
        }

        Ok(dedupe(keys))
    }
}
