use chrono::{Duration, Utc};
use paper_feed::config::parse_config;
use paper_feed::models::{Author, NewPaper, PaperSource};
use paper_feed::papers::{self, UpsertOutcome};
use paper_feed::server::{router, AppState};
use paper_feed::{db, migrate};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;

struct TestApp {
    base_url: String,
    pool: SqlitePool,
    tmp: TempDir,
}

async fn spawn_app() -> TestApp {
    spawn_app_with("").await
}

async fn spawn_app_with(enrichment: &str) -> TestApp {
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let config = parse_config(&format!(
        r#"[db]
path = "{root}/pfeed.sqlite"

[ranking]
final_limit = 20

[enrichment]
artifacts_dir = "{root}/artifacts"
{enrichment}

[server]
bind = "127.0.0.1:0"
"#,
        root = tmp.path().display(),
    ))
    .expect("Failed to parse config");

    let pool = db::connect(&config).await.expect("Failed to open database");
    migrate::apply(&pool).await.expect("Failed to migrate");

    let app = router(AppState::new(config, pool.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base_url: format!("http://{}", addr),
        pool,
        tmp,
    }
}

fn client() -> Client {
    Client::new()
}

async fn insert_paper(pool: &SqlitePool, source_id: &str, title: &str, days_ago: i64) -> String {
    let ts = Utc::now() - Duration::days(days_ago);
    let paper = NewPaper {
        source: PaperSource::Arxiv,
        source_id: source_id.to_string(),
        title: title.to_string(),
        abstract_text: format!("Abstract of {}", title),
        authors: vec![Author {
            name: "Grace Hopper".to_string(),
            affiliation: None,
        }],
        categories: vec!["cs.CL".to_string()],
        primary_category: Some("cs.CL".to_string()),
        venue: None,
        url: None,
        pdf_url: None,
        published_at: ts,
        updated_at: ts,
    };
    match papers::upsert_paper(pool, &paper).await.unwrap() {
        UpsertOutcome::Inserted(id) => id,
        other => panic!("expected insert, got {:?}", other),
    }
}

async fn create_user(base_url: &str, name: &str) -> Value {
    let resp = client()
        .post(format!("{}/users", base_url))
        .json(&json!({ "name": name, "categories": ["cs.CL"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = spawn_app().await;

    let resp = client()
        .get(format!("{}/health", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn list_papers_newest_first() {
    let app = spawn_app().await;
    insert_paper(&app.pool, "2410.00001", "Older Paper", 5).await;
    insert_paper(&app.pool, "2410.00002", "Newer Paper", 1).await;

    let body: Value = client()
        .get(format!("{}/papers?limit=10", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let papers = body["papers"].as_array().unwrap();
    assert_eq!(papers.len(), 2);
    assert_eq!(papers[0]["title"], "Newer Paper");
    assert_eq!(papers[0]["abstract"], "Abstract of Newer Paper");
}

#[tokio::test]
async fn get_paper_includes_artifacts() {
    let app = spawn_app().await;
    let id = insert_paper(&app.pool, "2410.00001", "Sparse Attention", 1).await;

    let resp = client()
        .get(format!("{}/papers/{}", app.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["authors"][0]["name"], "Grace Hopper");
    assert!(body["artifacts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_paper_returns_error_envelope() {
    let app = spawn_app().await;

    let resp = client()
        .get(format!("{}/papers/does-not-exist", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn create_user_rejects_duplicates_and_empty_names() {
    let app = spawn_app().await;

    let user = create_user(&app.base_url, "ada").await;
    assert_eq!(user["name"], "ada");
    assert_eq!(user["language"], "en");
    assert_eq!(user["categories"][0], "cs.CL");

    let resp = client()
        .post(format!("{}/users", app.base_url))
        .json(&json!({ "name": "ada" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client()
        .post(format!("{}/users", app.base_url))
        .json(&json!({ "name": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn cold_start_recommendations_by_name() {
    let app = spawn_app().await;
    insert_paper(&app.pool, "2410.00001", "Older Paper", 5).await;
    let newer = insert_paper(&app.pool, "2410.00002", "Newer Paper", 1).await;
    create_user(&app.base_url, "ada").await;

    let resp = client()
        .get(format!("{}/users/ada/recommendations", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["offset"], 0);
    assert_eq!(body["limit"], 20);
    let recs = body["recommendations"].as_array().unwrap();
    assert_eq!(recs.len(), 2);
    assert_eq!(recs[0]["rank"], 1);
    assert_eq!(recs[0]["strategy"], "cold_start");
    assert_eq!(recs[0]["paper"]["id"], newer.as_str());
}

#[tokio::test]
async fn recommendations_paging_and_limits() {
    let app = spawn_app().await;
    for i in 0..5 {
        insert_paper(&app.pool, &format!("2410.0000{}", i), &format!("Paper {}", i), i + 1).await;
    }
    create_user(&app.base_url, "ada").await;

    let body: Value = client()
        .get(format!("{}/users/ada/recommendations?offset=2&limit=2", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let recs = body["recommendations"].as_array().unwrap();
    assert_eq!(recs.len(), 2);
    assert_eq!(recs[0]["rank"], 3);
    assert_eq!(recs[0]["paper"]["title"], "Paper 2");

    let resp = client()
        .get(format!("{}/users/ada/recommendations?limit=0", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client()
        .get(format!("{}/users/ada/recommendations?limit=21", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client()
        .get(format!("{}/users/nobody/recommendations", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn interactions_shape_feed_and_library() {
    let app = spawn_app().await;
    let a = insert_paper(&app.pool, "2410.00001", "Liked Paper", 2).await;
    let b = insert_paper(&app.pool, "2410.00002", "Other Paper", 1).await;
    let user = create_user(&app.base_url, "ada").await;
    let user_id = user["id"].as_str().unwrap();

    let resp = client()
        .post(format!("{}/users/{}/interactions", app.base_url, user_id))
        .json(&json!({ "paper_id": a, "kind": "bookmark" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "bookmark");
    assert_eq!(body["paper_id"], a.as_str());

    let library: Value = client()
        .get(format!("{}/users/{}/library", app.base_url, user_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let papers = library["papers"].as_array().unwrap();
    assert_eq!(papers.len(), 1);
    assert_eq!(papers[0]["id"], a.as_str());

    // Bookmarked papers leave the feed
    let feed: Value = client()
        .get(format!("{}/users/{}/recommendations", app.base_url, user_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let recs = feed["recommendations"].as_array().unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0]["paper"]["id"], b.as_str());
}

#[tokio::test]
async fn invalid_interaction_kind_is_bad_request() {
    let app = spawn_app().await;
    let a = insert_paper(&app.pool, "2410.00001", "Some Paper", 2).await;
    create_user(&app.base_url, "ada").await;

    let resp = client()
        .post(format!("{}/users/ada/interactions", app.base_url))
        .json(&json!({ "paper_id": a, "kind": "share" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client()
        .post(format!("{}/users/ada/interactions", app.base_url))
        .json(&json!({ "paper_id": "missing", "kind": "like" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn similar_requires_embeddings() {
    let app = spawn_app().await;
    let a = insert_paper(&app.pool, "2410.00001", "Some Paper", 2).await;

    let resp = client()
        .get(format!("{}/papers/{}/similar", app.base_url, a))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "embeddings_disabled");
}

#[tokio::test]
async fn content_request_requires_enrichment() {
    let app = spawn_app().await;
    let a = insert_paper(&app.pool, "2410.00001", "Some Paper", 2).await;

    let resp = client()
        .post(format!("{}/papers/{}/content", app.base_url, a))
        .json(&json!({ "kind": "translation", "language": "ja" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "enrichment_disabled");
}

#[tokio::test]
async fn content_request_is_queued_once() {
    let app = spawn_app_with("provider = \"openai\"").await;
    let a = insert_paper(&app.pool, "2410.00001", "Some Paper", 2).await;

    let first = client()
        .post(format!("{}/papers/{}/content", app.base_url, a))
        .json(&json!({ "kind": "interpretation", "language": "ja" }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["status"], "pending");
    assert_eq!(first["kind"], "interpretation");

    let second: Value = client()
        .post(format!("{}/papers/{}/content", app.base_url, a))
        .json(&json!({ "kind": "interpretation", "language": "ja" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["id"], first["id"]);

    let paper: Value = client()
        .get(format!("{}/papers/{}", app.base_url, a))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(paper["artifacts"].as_array().unwrap().len(), 1);

    let resp = client()
        .post(format!("{}/papers/{}/content", app.base_url, a))
        .json(&json!({ "kind": "poem" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn artifacts_are_served_as_files() {
    let app = spawn_app().await;
    let dir = app.tmp.path().join("artifacts").join("infographic");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("abc-en.html"), "<html>chart</html>").unwrap();

    let resp = client()
        .get(format!("{}/artifacts/infographic/abc-en.html", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "<html>chart</html>");
}
