//! End-to-end tests: the `emx` binary, the SQLite store, the partner API
//! and holiday feed against in-process mock servers, and the HTTP API.

use axum::{
    extract::Query,
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use ems_metrics::config::{CacheConfig, Config};
use ems_metrics::holidays::HolidayFeed;
use ems_metrics::loader::Loader;
use ems_metrics::partner_api::{self, PartnerApiClient, PartnerCategory};
use ems_metrics::server::run_server_with_loader;
use ems_metrics::sqlite_store::SqliteDocumentStore;
use ems_metrics::{db, migrate};
use ems_metrics_core::coordinator::Coordinator;
use ems_metrics_core::filter::{Filter, Query as DocQuery};
use ems_metrics_core::models::Request;
use ems_metrics_core::normalize::{FINDINGS_COLLECTION, INDEX_COLLECTION, RESULTS_COLLECTION};
use ems_metrics_core::registry::{CategoryRegistry, Normalizer};
use ems_metrics_core::store::memory::InMemoryStore;
use ems_metrics_core::store::DocumentStore;
use ems_metrics_core::temporal::HolidayCalendar;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ─── Helpers ────────────────────────────────────────────────────────

fn emx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("emx");
    path
}

fn config_text(root: &Path, port: u16) -> String {
    format!(
        r#"[db]
path = "{}/data/emx.sqlite"

[query]
default_limit = 1000

[holidays]
url = "http://127.0.0.1:9/feiertage"
timeout_secs = 2

[server]
bind = "127.0.0.1:{}"
"#,
        root.display(),
        port
    )
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("emx.toml");
    fs::write(&config_path, config_text(&root, 7341)).unwrap();

    let exports = root.join("exports");
    fs::create_dir_all(&exports).unwrap();
    fs::write(
        exports.join("findings.jsonl"),
        concat!(
            r#"{"protocolId": "p1", "data": [{"description": "GCS", "valueInteger": 15, "type": "initial"}]}"#,
            "\n",
            r#"{"protocolId": "p2", "data": [{"description": "Schmerzen", "valueInteger": 7}]}"#,
            "\n"
        ),
    )
    .unwrap();

    (tmp, config_path)
}

fn test_config(tmp: &TempDir) -> Config {
    toml::from_str(&config_text(tmp.path(), 0)).unwrap()
}

fn run_emx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = emx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("EMX_PARTNER_API_URL")
        .env_remove("EMX_PARTNER_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run emx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Serve `app` on an ephemeral port; returns its base URL.
async fn spawn_mock(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

// ─── Mock partner API ───────────────────────────────────────────────

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Api-Key secret")
}

async fn mock_transports(
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let body = match q.get("page").map(String::as_str) {
        None | Some("1") => json!({
            "count": 3,
            "next": "http://upstream.invalid/api/transports/?page=2",
            "results": [
                {"id": 1, "krankenbeforderungsfahrt_kategorie": "KTW", "agreed_transport_datetime": "2024-10-04T09:00:00Z"},
                {"id": 2, "krankenbeforderungsfahrt_kategorie": "KTW", "created_at": "2024-10-03T08:00:00Z"}
            ]
        }),
        _ => json!({
            "count": 3,
            "next": null,
            "results": [{"id": 3, "krankenbeforderungsfahrt_kategorie": "Taxi", "extra_field": true}]
        }),
    };
    Ok(Json(body))
}

async fn mock_history(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(json!([
        {"id": 1, "transport_id": 1, "new_status": "offen", "changed_at": "2024-01-01T10:00:00Z"},
        {"id": 2, "transport_id": 1, "new_status": "angenommen", "changed_at": "2024-01-01T10:05:00Z"},
        {"id": 3, "transport_id": 1, "new_status": "disponiert", "changed_at": "2024-01-01T10:30:00Z"},
        {"id": 4, "transport_id": 1, "new_status": "abgeschlossen", "changed_at": "2024-01-01T12:00:00Z"}
    ])))
}

async fn spawn_partner_api() -> String {
    let app = Router::new()
        .route("/api/transports/", get(mock_transports))
        .route("/api/transport-status-history/", get(mock_history));
    format!("{}/api", spawn_mock(app).await)
}

fn partner_client(base: &str, key: &str) -> Arc<PartnerApiClient> {
    Arc::new(
        PartnerApiClient::new(
            Some(base.to_string()),
            Some(key.to_string()),
            Duration::from_secs(5),
        )
        .unwrap(),
    )
}

// ─── CLI ────────────────────────────────────────────────────────────

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_emx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, again) = run_emx(&config_path, &["init"]);
    assert!(again, "Second init failed (not idempotent)");
}

#[test]
fn test_import_then_load() {
    let (tmp, config_path) = setup_test_env();
    let export = tmp.path().join("exports/findings.jsonl");

    run_emx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_emx(
        &config_path,
        &["import", "protocols_findings", export.to_str().unwrap()],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("inserted documents: 2"));

    let (stdout, stderr, success) = run_emx(&config_path, &["load", "GCS", "--format", "json"]);
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    let rows: Vec<Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["protocolId"], json!("p1"));
    assert_eq!(rows[0]["value_num"], json!(15.0));
}

#[test]
fn test_import_replace() {
    let (tmp, config_path) = setup_test_env();
    let export = tmp.path().join("exports/findings.jsonl");
    let export = export.to_str().unwrap();

    run_emx(&config_path, &["import", "protocols_findings", export]);
    let (stdout, _, success) = run_emx(
        &config_path,
        &["import", "protocols_findings", export, "--replace"],
    );
    assert!(success);
    assert!(stdout.contains("removed documents: 2"));
}

#[test]
fn test_unknown_category_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_emx(&config_path, &["load", "Blutgruppe"]);
    assert!(!success);
    assert!(stderr.contains("unknown category"));
}

#[test]
fn test_categories_lists_all_sources() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_emx(&config_path, &["categories"]);
    assert!(success, "categories failed: {}", stderr);
    assert!(stdout.contains("Transports"));
    assert!(stdout.contains("Feiertage"));
    assert!(stdout.contains("30 categories"));
}

#[test]
fn test_classify_text_without_config() {
    let (stdout, _, success) = run_emx(
        Path::new("/nonexistent/emx.toml"),
        &["classify", "Es ist keine medizinische Betreuung notwendig geworden."],
    );
    assert!(success);
    let out: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(out["keyword"]["medical_care"], json!("not_needed"));
}

#[test]
fn test_missing_config_fails() {
    let (_, stderr, success) = run_emx(Path::new("/nonexistent/emx.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

// ─── SQLite store ───────────────────────────────────────────────────

#[tokio::test]
async fn test_sqlite_store_queries() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    migrate::run_migrations(&cfg).await.unwrap();
    let store = SqliteDocumentStore::new(db::connect(&cfg).await.unwrap());

    store
        .insert_many(
            INDEX_COLLECTION,
            &[
                json!({"protocolId": "a", "missionDate": "2022-06-01T12:00:00"}),
                json!({"protocolId": "b", "missionDate": "2023-03-01T00:00:00"}),
                json!({"protocolId": "c", "missionDate": {"$date": "2023-09-01T00:00:00Z"}}),
            ],
        )
        .await
        .unwrap();
    store
        .insert_many("vitals_hf", &[json!({"protocolId": "a", "value": 80})])
        .await
        .unwrap();

    assert_eq!(
        store.collection_names().await.unwrap(),
        vec!["nida_index", "vitals_hf"]
    );
    assert!(store.has_collection("vitals_hf").await.unwrap());
    assert!(!store.has_collection("vitals_temp").await.unwrap());

    let query = DocQuery::new(Filter::range(
        "missionDate",
        Some(json!("2023-01-01T00:00:00")),
        Some(json!("2023-12-31T23:59:59")),
    ))
    .sort_desc("missionDate");
    let docs = store.find(INDEX_COLLECTION, &query).await.unwrap();
    let ids: Vec<&str> = docs.iter().map(|d| d["protocolId"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["c", "b"]);

    let limited = DocQuery::default().limit(1);
    assert_eq!(store.find(INDEX_COLLECTION, &limited).await.unwrap().len(), 1);
    assert!(store.find("missing", &DocQuery::default()).await.unwrap().is_empty());

    assert_eq!(store.clear_collection("vitals_hf").await.unwrap(), 1);
    assert_eq!(store.collection_counts().await.unwrap(), vec![("nida_index".to_string(), 3)]);
}

#[tokio::test]
async fn test_replace_collection_is_atomic() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    migrate::run_migrations(&cfg).await.unwrap();
    let store = SqliteDocumentStore::new(db::connect(&cfg).await.unwrap());
    store
        .insert_many(FINDINGS_COLLECTION, &[json!({"protocolId": "old"})])
        .await
        .unwrap();

    sqlx::query(
        "CREATE TRIGGER reject_marked BEFORE INSERT ON documents \
         WHEN NEW.body LIKE '%reject-me%' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let docs = [json!({"protocolId": "new"}), json!({"protocolId": "reject-me"})];
    assert!(store.replace_collection(FINDINGS_COLLECTION, &docs).await.is_err());

    let kept = store.find(FINDINGS_COLLECTION, &DocQuery::default()).await.unwrap();
    assert_eq!(kept, vec![json!({"protocolId": "old"})]);

    let (removed, inserted) = store
        .replace_collection(FINDINGS_COLLECTION, &docs[..1])
        .await
        .unwrap();
    assert_eq!((removed, inserted), (1, 1));
}

#[tokio::test]
async fn test_malformed_document_becomes_empty_table() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    sqlx::query("INSERT INTO documents (collection, body, imported_at) VALUES (?, ?, 0)")
        .bind(FINDINGS_COLLECTION)
        .bind("{not json")
        .execute(&pool)
        .await
        .unwrap();
    let store = SqliteDocumentStore::new(pool);

    let registry = CategoryRegistry::with_builtins("Schleswig-Flensburg");
    let gcs = registry.find("GCS").unwrap();
    assert!(gcs.fetch(&store, &Request::default()).await.is_err());
    let table = gcs.load(&store, &Request::default()).await.unwrap();
    assert!(table.is_empty());
    assert_eq!(table.columns, gcs.columns());
}

// ─── Partner API ────────────────────────────────────────────────────

#[tokio::test]
async fn test_partner_api_follows_pagination() {
    let base = spawn_partner_api().await;
    let transports = PartnerCategory::transports(partner_client(&base, "secret"));

    let table = transports
        .fetch(&InMemoryStore::new(), &Request::default())
        .await
        .unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.columns.len(), 37);
    assert_eq!(table.rows[2]["krankenbeforderungsfahrt_kategorie"], json!("Taxi"));
    assert!(!table.rows[2].contains_key("extra_field"));

    let crosstab = ems_metrics_core::analytics::category_weekday_crosstab(
        &table,
        &HolidayCalendar::default(),
    );
    assert_eq!(crosstab.get("KTW", "Fr"), Some(1));
    assert_eq!(crosstab.get("KTW", "Mo-Do"), Some(1));
}

#[tokio::test]
async fn test_partner_api_bare_array() {
    let base = spawn_partner_api().await;
    let history = PartnerCategory::status_history(partner_client(&base, "secret"));
    let table = history
        .fetch(&InMemoryStore::new(), &Request::default())
        .await
        .unwrap();
    assert_eq!(table.len(), 4);

    let report = ems_metrics_core::analytics::process_flow_report(
        &table,
        &ems_metrics_core::temporal::StatusFlow::default(),
    );
    assert_eq!(report.complete, 1);
    assert_eq!(report.total_minutes.map(|s| s.mean), Some(120.0));
}

#[tokio::test]
async fn test_partner_api_rejected_key_falls_back() {
    let base = spawn_partner_api().await;
    for normalizer in partner_api::normalizers(partner_client(&base, "wrong")) {
        let err = normalizer
            .fetch(&InMemoryStore::new(), &Request::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));

        let table = normalizer
            .load(&InMemoryStore::new(), &Request::default())
            .await
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns, normalizer.columns());
    }
}

// ─── Holiday feed ───────────────────────────────────────────────────

#[tokio::test]
async fn test_holiday_feed() {
    let app = Router::new().route(
        "/feiertage",
        get(|| async {
            Json(json!({
                "status": "success",
                "feiertage": [
                    {"date": "2024-10-03", "fname": "Tag der Deutschen Einheit"},
                    {"date": "2024-10-31", "fname": "Reformationstag"}
                ]
            }))
        }),
    );
    let url = format!("{}/feiertage", spawn_mock(app).await);
    let feed = HolidayFeed::new(url, Duration::from_secs(5)).unwrap();

    let table = feed
        .fetch(&InMemoryStore::new(), &Request::default())
        .await
        .unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.rows[1]["weekday"], json!("Thursday"));

    let calendar = HolidayCalendar::from_table(&table);
    let reformation = chrono::NaiveDate::from_ymd_opt(2024, 10, 31).unwrap();
    assert_eq!(calendar.name(reformation), Some("Reformationstag"));
}

// ─── HTTP API ───────────────────────────────────────────────────────

fn api_fixture() -> InMemoryStore {
    InMemoryStore::with_collections([
        (
            INDEX_COLLECTION,
            vec![
                json!({"protocolId": "a", "missionDate": "2023-02-01T10:00:00", "targetDestination": "UKSH Kiel"}),
                json!({"protocolId": "b", "missionDate": "2024-05-01T10:00:00"}),
                json!({"protocolId": "b", "missionDate": "2024-05-02T10:00:00"}),
            ],
        ),
        (
            FINDINGS_COLLECTION,
            vec![
                json!({"protocolId": "a", "data": [{"description": "GCS", "valueInteger": 15}]}),
                json!({"protocolId": "b", "data": [{"description": "GCS", "valueInteger": 8}]}),
            ],
        ),
        (
            RESULTS_COLLECTION,
            vec![json!({"protocolId": "b", "data": [{"value_1": "NACA", "value_2": "6"}]})],
        ),
    ])
}

#[tokio::test]
async fn test_http_api() {
    let port = find_free_port();
    let coordinator = Coordinator::new(
        Arc::new(api_fixture()),
        Arc::new(CategoryRegistry::with_builtins("Schleswig-Flensburg")),
    );
    let loader = Arc::new(Loader::new(coordinator, CacheConfig::default(), 1000));
    let bind = format!("127.0.0.1:{}", port);
    tokio::spawn(async move {
        run_server_with_loader(&bind, loader).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let body: Value = client
        .get(format!("{base}/categories"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["categories"].as_array().unwrap().len(), 27);

    let resp = client
        .get(format!("{base}/data/GCS?start_year=2023&end_year=2023"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["category"], json!("GCS"));
    assert_eq!(body["rows"][0]["protocolId"], json!("a"));

    let resp = client.get(format!("{base}/data/Blutgruppe")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!("unknown_category"));

    let resp = client
        .get(format!("{base}/data/GCS?start_year=2024&end_year=2023"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{base}/data/Reanimation_mit_targetDestination"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!("ambiguous_join"));

    let body: Value = client
        .post(format!("{base}/cache/clear"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["cleared"], json!(1));
}

#[tokio::test]
async fn test_loader_from_config_uses_sqlite() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let loader = Loader::from_config(&cfg).await.unwrap();
    assert_eq!(loader.registry().len(), 30);

    let table = loader.load("RTM_Vorhaltung", &Request::default()).await.unwrap();
    assert!(table.is_empty());
    assert_eq!(table.columns.len(), 8);

    assert!(loader.holidays().await.is_empty());
}
