//! HTTP-backed source built from a [`SourceDefinition`]
//!
//! All streams of one source share one [`HttpClient`] and therefore one rate
//! limiter. Requests are sent once; retrying is left to the caller's
//! [`RetryPolicy`] so every collaborator call is retried the same way.

use super::definition::{
    CursorDefinition, DeltaStreamDefinition, ExportJobStreamDefinition, JobStatusDefinition,
    PaginatedStreamDefinition, PartitionsDefinition, RecordsDefinition, RequestDefinition,
    SourceDefinition, StreamDefinition,
};
use super::path::{extract, extract_string, extract_timestamp};
use super::template::{format_time, render, render_value, TemplateContext};
use super::traits::{DeltaPage, DeltaSource, ExportJobSource, PageSource, SyncStream};
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig, Request, RetryPolicy};
use crate::jobs::{AsyncJob, JobState, JobWindow};
use crate::partition::{EndpointEnumerator, ListEnumerator, PartitionEnumerator};
use crate::types::{ChangeRecord, FetchMode, Page, PartitionKey, RecordOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

/// Runtime view of a source definition
#[derive(Debug, Clone)]
pub struct HttpSource {
    definition: Arc<SourceDefinition>,
    client: HttpClient,
    policy: RetryPolicy,
}

impl HttpSource {
    /// Build the client described by `definition` and `settings`
    pub fn new(definition: SourceDefinition, settings: &SyncSettings) -> Result<Self> {
        let timeout = settings
            .retry
            .request_timeout
            .to_std()
            .map_err(|e| Error::invalid_value("retry.request_timeout", e.to_string()))?;
        let rate_limit = definition
            .rate_limit
            .clone()
            .or_else(|| settings.rate_limit.clone());

        let mut config = HttpClientConfig::new(&definition.base_url)?
            .with_timeout(timeout)
            .with_rate_limit(rate_limit);
        for (k, v) in &definition.headers {
            config = config.with_header(k, v);
        }

        Ok(Self {
            client: HttpClient::new(config)?,
            policy: settings.retry.policy(),
            definition: Arc::new(definition),
        })
    }

    /// Source name
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The shared client
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Partition enumerator of this source
    pub fn partitions(&self) -> Arc<dyn PartitionEnumerator> {
        match &self.definition.partitions {
            PartitionsDefinition::List { values } => Arc::new(ListEnumerator::new(values.clone())),
            PartitionsDefinition::Endpoint {
                path,
                params,
                records_path,
                key_fields,
                separator,
                cursor,
            } => {
                let mut enumerator = EndpointEnumerator::new(
                    self.client.clone(),
                    self.policy.clone(),
                    path.clone(),
                    records_path.clone(),
                    key_fields.clone(),
                )
                .with_separator(separator.clone());
                for (k, v) in params {
                    enumerator = enumerator.with_param(k, v);
                }
                if let Some(c) = cursor {
                    enumerator = enumerator.with_cursor(&c.param, &c.path);
                }
                Arc::new(enumerator)
            }
        }
    }

    /// Streams of this source, optionally restricted to `only`
    pub fn streams(&self, only: Option<&[String]>) -> Result<Vec<SyncStream>> {
        if let Some(names) = only {
            if let Some(missing) = names
                .iter()
                .find(|n| !self.definition.streams.iter().any(|s| s.name() == n.as_str()))
            {
                return Err(Error::StreamNotFound {
                    stream: missing.clone(),
                });
            }
        }

        Ok(self
            .definition
            .streams
            .iter()
            .filter(|s| only.map_or(true, |names| names.iter().any(|n| n == s.name())))
            .map(|s| self.stream(s))
            .collect())
    }

    fn stream(&self, def: &StreamDefinition) -> SyncStream {
        let client = self.client.clone();
        let expired = self.definition.token_expired_statuses.clone();
        match def {
            StreamDefinition::Paginated(d) => SyncStream::paginated(
                d.name.clone(),
                Arc::new(HttpPageStream {
                    client,
                    def: d.clone(),
                }),
            ),
            StreamDefinition::Delta(d) => SyncStream::delta(
                d.name.clone(),
                Arc::new(HttpDeltaStream {
                    client,
                    def: d.clone(),
                    expired,
                }),
            ),
            StreamDefinition::ExportJob(d) => SyncStream::export_job(
                d.name.clone(),
                Arc::new(HttpExportStream {
                    client,
                    def: d.clone(),
                }),
            ),
        }
    }
}

// ============================================================================
// Request Helpers
// ============================================================================

async fn send(
    client: &HttpClient,
    request: &RequestDefinition,
    ctx: &TemplateContext,
    extra: &[(&str, &str)],
) -> Result<Value> {
    let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
        .map_err(|e| Error::config(format!("Invalid HTTP method {}: {e}", request.method)))?;
    let path = render(&request.path, ctx)?;

    let mut req = Request::new(method, path);
    for (k, v) in &request.params {
        let value = render(v, ctx)?;
        if !value.is_empty() {
            req = req.query(k, value);
        }
    }
    for (k, v) in extra {
        req = req.query(*k, *v);
    }
    if let Some(ref body) = request.body {
        req = req.json(render_value(body, ctx)?);
    }

    client.json(&req).await
}

fn next_cursor(body: &Value, cursor: Option<&CursorDefinition>) -> Option<String> {
    cursor
        .and_then(|c| extract_string(body, &c.path))
        .filter(|c| !c.is_empty())
}

fn cursor_param<'a>(cursor: Option<&'a CursorDefinition>, value: Option<&'a str>) -> Vec<(&'a str, &'a str)> {
    match (cursor, value) {
        (Some(c), Some(v)) => vec![(c.param.as_str(), v)],
        _ => Vec::new(),
    }
}

/// Decode the records of one response
///
/// A missing record array is malformed; an explicit `null` is an empty page.
pub fn decode_records(body: &Value, def: &RecordsDefinition) -> Result<Vec<ChangeRecord>> {
    let items = match extract(body, &def.path) {
        Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) | None => {
            return Err(Error::malformed(format!(
                "response has no record array at '{}'",
                def.path
            )))
        }
    };

    items
        .iter()
        .map(|item| {
            let id = extract_string(item, &def.id_path).ok_or_else(|| {
                Error::malformed(format!("record is missing its id at '{}'", def.id_path))
            })?;
            let time = def
                .time_path
                .as_deref()
                .and_then(|p| extract_timestamp(item, p));

            let deleted = def.deleted.as_ref().is_some_and(|m| match (&m.value, extract(item, &m.path)) {
                (Some(expected), Some(actual)) => expected == actual,
                (None, Some(actual)) => actual.as_bool() == Some(true),
                (_, None) => false,
            });

            Ok(if deleted {
                ChangeRecord::delete(id, time)
            } else {
                ChangeRecord::upsert(id, time, item.clone())
            })
        })
        .collect()
}

// ============================================================================
// Paginated Stream
// ============================================================================

struct HttpPageStream {
    client: HttpClient,
    def: PaginatedStreamDefinition,
}

#[async_trait]
impl PageSource for HttpPageStream {
    async fn fetch_page(
        &self,
        partition: &PartitionKey,
        cursor: Option<&str>,
        mode: &FetchMode,
    ) -> Result<Page> {
        let since = match mode {
            FetchMode::Since(cutoff) => format_time(*cutoff),
            FetchMode::Full => String::new(),
        };
        let ctx = TemplateContext::for_partition(partition).with("since", since.as_str());
        let mut extra = cursor_param(self.def.cursor.as_ref(), cursor);
        if let (Some(param), false) = (&self.def.since_param, since.is_empty()) {
            extra.push((param.as_str(), since.as_str()));
        }

        let body = send(&self.client, &self.def.request, &ctx, &extra).await?;
        let items = decode_records(&body, &self.def.records)?;
        Ok(Page::new(items, next_cursor(&body, self.def.cursor.as_ref())))
    }

    fn order(&self) -> RecordOrder {
        self.def.order
    }
}

// ============================================================================
// Delta Stream
// ============================================================================

struct HttpDeltaStream {
    client: HttpClient,
    def: DeltaStreamDefinition,
    expired: Vec<u16>,
}

#[async_trait]
impl DeltaSource for HttpDeltaStream {
    async fn fetch_snapshot(&self, partition: &PartitionKey, cursor: Option<&str>) -> Result<Page> {
        let ctx = TemplateContext::for_partition(partition);
        let extra = cursor_param(self.def.cursor.as_ref(), cursor);

        let body = send(&self.client, &self.def.request, &ctx, &extra).await?;
        let items = decode_records(&body, &self.def.records)?;
        let mut page = Page::new(items, next_cursor(&body, self.def.cursor.as_ref()));
        if !page.has_more() {
            page.sync_token = extract_string(&body, &self.def.token.path);
        }
        Ok(page)
    }

    async fn fetch_delta(&self, partition: &PartitionKey, token: &str) -> Result<DeltaPage> {
        let ctx = TemplateContext::for_partition(partition);
        let extra = [(self.def.token.param.as_str(), token)];

        let body = match send(&self.client, &self.def.request, &ctx, &extra).await {
            Err(Error::HttpStatus { status, .. }) if self.expired.contains(&status) => {
                return Err(Error::token_expired(partition.as_str()));
            }
            other => other?,
        };

        Ok(DeltaPage {
            changes: decode_records(&body, &self.def.records)?,
            next_token: extract_string(&body, &self.def.token.path),
            has_more: self
                .def
                .token
                .has_more_path
                .as_deref()
                .and_then(|p| extract(&body, p))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

// ============================================================================
// Export Job Stream
// ============================================================================

struct HttpExportStream {
    client: HttpClient,
    def: ExportJobStreamDefinition,
}

impl HttpExportStream {
    fn parse_job(
        &self,
        body: &Value,
        window: JobWindow,
        known_id: Option<&str>,
        default_state: Option<JobState>,
    ) -> Result<AsyncJob> {
        let id = match extract_string(body, &self.def.job_id_path) {
            Some(id) => id,
            None => known_id.map(ToString::to_string).ok_or_else(|| {
                Error::malformed(format!(
                    "export job response has no id at '{}'",
                    self.def.job_id_path
                ))
            })?,
        };
        let state = match (job_state(body, &self.def.status), default_state) {
            (Some(state), _) | (None, Some(state)) => state,
            (None, None) => {
                return Err(Error::malformed(format!(
                    "export job response has no status at '{}'",
                    self.def.status.path
                )))
            }
        };
        let error_reason = match state {
            JobState::Failed => self
                .def
                .status
                .error_path
                .as_deref()
                .and_then(|p| extract_string(body, p)),
            _ => None,
        };

        Ok(AsyncJob {
            id,
            window,
            state,
            error_reason,
        })
    }
}

/// Map the upstream status string; `None` when the field is absent
fn job_state(body: &Value, status: &JobStatusDefinition) -> Option<JobState> {
    let value = extract_string(body, &status.path)?;
    let matches = |values: &[String]| values.iter().any(|v| v.eq_ignore_ascii_case(&value));

    Some(if matches(&status.completed) {
        JobState::Completed
    } else if matches(&status.failed) {
        JobState::Failed
    } else if matches(&status.created) {
        JobState::Created
    } else {
        JobState::Processing
    })
}

#[async_trait]
impl ExportJobSource for HttpExportStream {
    async fn create_export_job(&self, partition: &PartitionKey, window: JobWindow) -> Result<AsyncJob> {
        let ctx = TemplateContext::for_partition(partition)
            .with_time("window.start", window.start)
            .with_time("window.end", window.end);

        let body = send(&self.client, &self.def.create, &ctx, &[]).await?;
        self.parse_job(&body, window, None, Some(JobState::Created))
    }

    async fn get_export_job(&self, partition: &PartitionKey, job_id: &str) -> Result<AsyncJob> {
        let ctx = TemplateContext::for_partition(partition).with("job_id", job_id);
        let body = send(&self.client, &self.def.poll, &ctx, &[]).await?;
        // window is restored by the poller
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        self.parse_job(&body, JobWindow::new(epoch, epoch), Some(job_id), None)
    }

    async fn fetch_job_results(
        &self,
        partition: &PartitionKey,
        job: &AsyncJob,
        cursor: Option<&str>,
    ) -> Result<Page> {
        let ctx = TemplateContext::for_partition(partition)
            .with("job_id", job.id.as_str())
            .with_time("window.start", job.window.start)
            .with_time("window.end", job.window.end);
        let extra = cursor_param(self.def.download_cursor.as_ref(), cursor);

        let body = send(&self.client, &self.def.download, &ctx, &extra).await?;
        let items = decode_records(&body, &self.def.records)?;
        Ok(Page::new(items, next_cursor(&body, self.def.download_cursor.as_ref())))
    }
}
