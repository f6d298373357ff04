//! End-to-end tests: YAML source, HTTP collaborators, engine and state file

use pretty_assertions::assert_eq;
use serde_json::json;
use solidafy_sync::engine::{CollectingSink, PartitionOutcome, SyncEngine};
use solidafy_sync::{load_source_from_str, HttpSource, PartitionKey, SyncSettings, WatermarkStore};
use std::path::Path;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source_yaml(base_url: &str) -> String {
    format!(
        r#"
name: calendar
base_url: {base_url}
partitions:
  type: list
  values: [acme/api, acme/private]
streams:
  - kind: paginated
    name: issues
    request:
      path: /repos/{{{{ partition }}}}/issues
    since_param: since
    order: descending
    cursor: {{ param: page, path: next_page }}
    records: {{ path: items, id_path: id, time_path: updated_at }}
  - kind: delta
    name: events
    request:
      path: /calendars/{{{{ partition }}}}/events
    cursor: {{ param: pageToken, path: nextPageToken }}
    token: {{ param: syncToken, path: nextSyncToken }}
    records:
      path: items
      id_path: id
      time_path: updated
      deleted: {{ path: status, value: cancelled }}
"#
    )
}

async fn mount_first_run(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/issues"))
        .and(query_param_is_missing("since"))
        .and(query_param_is_missing("page"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": 3, "updated_at": "2024-05-03T10:00:00Z"},
                {"id": 2, "updated_at": "2024-05-02T10:00:00Z"}
            ],
            "next_page": 2
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/api/issues"))
        .and(query_param_is_missing("since"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": 1, "updated_at": "2024-05-01T10:00:00Z"}],
            "next_page": null
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendars/acme/api/events"))
        .and(query_param_is_missing("syncToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "e1", "updated": "2024-05-01T09:00:00Z", "status": "confirmed"}],
            "nextSyncToken": "s1"
        })))
        .mount(server)
        .await;
}

async fn mount_second_run(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/issues"))
        .and(query_param("since", "2024-05-03T10:00:00Z"))
        .and(query_param_is_missing("page"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": 4, "updated_at": "2024-05-04T10:00:00Z"},
                {"id": 3, "updated_at": "2024-05-03T10:00:00Z"}
            ],
            "next_page": 2
        })))
        .mount(server)
        .await;

    // descending stream reached the cutoff on page 1
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/issues"))
        .and(query_param("since", "2024-05-03T10:00:00Z"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(0)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendars/acme/api/events"))
        .and(query_param("syncToken", "s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "e1", "status": "cancelled"}],
            "nextSyncToken": "s2"
        })))
        .mount(server)
        .await;
}

async fn mount_forbidden(server: &MockServer) {
    for p in ["/repos/acme/private/issues", "/calendars/acme/private/events"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(server)
            .await;
    }
}

async fn run_once(server: &MockServer, state_file: &Path) -> (CollectingSink, solidafy_sync::SyncReport) {
    let settings = SyncSettings::new();
    let definition = load_source_from_str(&source_yaml(&server.uri())).unwrap();
    let source = HttpSource::new(definition, &settings).unwrap();
    let streams = source.streams(None).unwrap();

    let engine = SyncEngine::new(settings, WatermarkStore::from_file(state_file).unwrap());
    let sink = CollectingSink::new();
    let report = engine
        .run(source.partitions().as_ref(), &streams, &sink)
        .await
        .unwrap();
    (sink, report)
}

#[tokio::test]
async fn test_two_runs_resume_from_state_file() {
    let server = MockServer::start().await;
    mount_first_run(&server).await;
    mount_second_run(&server).await;
    mount_forbidden(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let api = PartitionKey::new("acme/api");

    // First run: full fetches
    let (sink, report) = run_once(&server, &state_file).await;
    assert!(report.is_success());
    assert_eq!(sink.records_for("issues", "acme/api").await.len(), 3);
    assert_eq!(sink.records_for("events", "acme/api").await.len(), 1);
    assert_eq!(
        report.get("issues", "acme/api"),
        Some(&PartitionOutcome::Synced {
            strategy: "full_fetch".to_string(),
            records: 3
        })
    );
    assert!(matches!(
        report.get("issues", "acme/private"),
        Some(PartitionOutcome::Skipped { .. })
    ));

    let store = WatermarkStore::from_file(&state_file).unwrap();
    let cutoff = store.get("issues", &api).await.unwrap().as_cutoff().unwrap();
    assert_eq!(cutoff.to_rfc3339(), "2024-05-03T10:00:00+00:00");
    let token = store.get("events", &api).await.unwrap();
    assert_eq!(token.as_change_token(), Some("s1"));
    assert!(store.get("issues", &PartitionKey::new("acme/private")).await.is_none());

    // Second run: resumes from the persisted watermarks
    let (sink, report) = run_once(&server, &state_file).await;
    assert!(report.is_success());

    let issues = sink.records_for("issues", "acme/api").await;
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].entity_id, "4");
    assert_eq!(
        report.get("issues", "acme/api"),
        Some(&PartitionOutcome::Synced {
            strategy: "incremental_fetch".to_string(),
            records: 1
        })
    );

    let events = sink.records_for("events", "acme/api").await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_delete());

    let store = WatermarkStore::from_file(&state_file).unwrap();
    let cutoff = store.get("issues", &api).await.unwrap().as_cutoff().unwrap();
    assert_eq!(cutoff.to_rfc3339(), "2024-05-04T10:00:00+00:00");
    assert_eq!(
        store.get("events", &api).await.unwrap().as_change_token(),
        Some("s2")
    );
}

#[tokio::test]
async fn test_single_stream_filter() {
    let server = MockServer::start().await;
    mount_first_run(&server).await;
    mount_forbidden(&server).await;

    let settings = SyncSettings::new();
    let definition = load_source_from_str(&source_yaml(&server.uri())).unwrap();
    let source = HttpSource::new(definition, &settings).unwrap();
    let streams = source.streams(Some(&["events".to_string()])).unwrap();

    let engine = SyncEngine::new(settings, WatermarkStore::in_memory());
    let sink = CollectingSink::new();
    let report = engine
        .run(source.partitions().as_ref(), &streams, &sink)
        .await
        .unwrap();

    assert!(sink.records_for("issues", "acme/api").await.is_empty());
    assert_eq!(sink.records_for("events", "acme/api").await.len(), 1);
    assert_eq!(report.partitions.len(), 2);
    assert_eq!(report.stats.partitions_skipped, 1);
}
