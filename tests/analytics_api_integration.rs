//! Analytics API integration tests
//!
//! Clicks go through the real redirect route; the recorder is flushed before
//! every read so the view and the persisted buckets agree.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use chrono::{Duration, Utc};
use linkhop::analytics::{BucketKey, ClickDimensions, ClickEvent, Utm};
use linkhop::app::App;
use linkhop::config::Config;
use linkhop::models::{NewLink, RedirectType};
use linkhop::storage::{SqliteStorage, Storage};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X)";
const GOOGLEBOT_UA: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

async fn create_test_app() -> App {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    App::build(&Config::default(), Arc::new(storage)).await.unwrap()
}

async fn send(app: &App, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn api_get(app: &App, uri: &str) -> Response {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_link(app: &App, shortcode: &str) {
    let response = send(
        app,
        Request::builder()
            .method("POST")
            .uri("/api/links")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"shortcode": shortcode, "url": "https://example.com/landing"}).to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

async fn click(app: &App, path: &str, user_agent: &str, referrer: Option<&str>) {
    let mut builder = Request::builder()
        .uri(path)
        .header(header::USER_AGENT, user_agent)
        .header("cf-ipcountry", "de");
    if let Some(referrer) = referrer {
        builder = builder.header(header::REFERER, referrer);
    }
    let response = send(app, builder.body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FOUND, "click on {}", path);
}

/// Two human clicks from a campaign, one direct human click and one crawler hit
async fn seed_clicks(app: &App) {
    create_link(app, "promo").await;
    create_link(app, "other").await;
    click(app, "/promo?utm_source=twitter&utm_medium=social", IPHONE_UA, Some("https://t.co/abc")).await;
    click(app, "/promo?utm_source=twitter", IPHONE_UA, None).await;
    click(app, "/other", IPHONE_UA, None).await;
    click(app, "/promo", GOOGLEBOT_UA, None).await;
    app.flush().await.unwrap();
}

fn entries(body: &Value) -> Vec<(String, u64)> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|e| {
            (
                e["key"].as_str().unwrap().to_string(),
                e["clicks"].as_u64().unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_overview_counts_humans_and_reports_bots() {
    let app = create_test_app().await;
    seed_clicks(&app).await;

    let response = api_get(&app, "/api/analytics/overview").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["totalClicks"], 3);
    assert_eq!(body["todayClicks"], 3);
    assert_eq!(body["recentClicks"], 3);
    assert_eq!(body["botClicks"], 1);
    assert_eq!(body["totalLinks"], 2);

    let with_bots = body_json(api_get(&app, "/api/analytics/overview?includeBots=true").await).await;
    assert_eq!(with_bots["totalClicks"], 4);

    let scoped = body_json(api_get(&app, "/api/analytics/overview?shortcode=promo").await).await;
    assert_eq!(scoped["totalClicks"], 2);
    assert_eq!(scoped["totalLinks"], 1);
}

#[tokio::test]
async fn test_breakdowns() {
    let app = create_test_app().await;
    seed_clicks(&app).await;

    let utm = body_json(api_get(&app, "/api/analytics/breakdown?dimension=utm_source").await).await;
    assert_eq!(
        entries(&utm),
        vec![("twitter".to_string(), 2), ("Direct".to_string(), 1)]
    );

    let referrers = body_json(
        api_get(&app, "/api/analytics/breakdown?dimension=referrer&includeBots=true").await,
    )
    .await;
    assert_eq!(
        entries(&referrers),
        vec![("Direct".to_string(), 3), ("t.co".to_string(), 1)]
    );

    let devices = body_json(api_get(&app, "/api/analytics/breakdown?dimension=device").await).await;
    assert_eq!(entries(&devices)[0].1, 3);

    let countries = body_json(api_get(&app, "/api/analytics/breakdown?dimension=country").await).await;
    assert_eq!(entries(&countries), vec![("DE".to_string(), 3)]);

    let by_link = body_json(
        api_get(&app, "/api/analytics/breakdown?dimension=shortcode&limit=1").await,
    )
    .await;
    assert_eq!(entries(&by_link), vec![("promo".to_string(), 2)]);

    let scoped = body_json(
        api_get(
            &app,
            "/api/analytics/breakdown?dimension=utm_medium&scope=shortcode&shortcode=promo",
        )
        .await,
    )
    .await;
    assert_eq!(
        entries(&scoped),
        vec![("Direct".to_string(), 1), ("social".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_timeseries_is_gap_free() {
    let app = create_test_app().await;
    seed_clicks(&app).await;

    let default_range = body_json(api_get(&app, "/api/analytics/timeseries").await).await;
    let points = default_range.as_array().unwrap();
    assert_eq!(points.len(), 30);
    let today = Utc::now().date_naive().to_string();
    assert_eq!(points.last().unwrap()["date"], today.as_str());
    assert_eq!(points.last().unwrap()["clicks"], 3);
    let total: u64 = points.iter().map(|p| p["clicks"].as_u64().unwrap()).sum();
    assert_eq!(total, 3);

    let past = body_json(
        api_get(&app, "/api/analytics/timeseries?from=2024-02-27&to=2024-03-02").await,
    )
    .await;
    let dates: Vec<&str> = past
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["date"].as_str().unwrap())
        .collect();
    assert_eq!(
        dates,
        vec!["2024-02-27", "2024-02-28", "2024-02-29", "2024-03-01", "2024-03-02"]
    );
    assert!(past
        .as_array()
        .unwrap()
        .iter()
        .all(|p| p["clicks"] == 0));
}

#[tokio::test]
async fn test_heatmap_shape() {
    let app = create_test_app().await;
    seed_clicks(&app).await;

    let cells = body_json(api_get(&app, "/api/analytics/heatmap").await).await;
    let cells = cells.as_array().unwrap();
    assert_eq!(cells.len(), 7 * 24);
    let total: u64 = cells.iter().map(|c| c["clicks"].as_u64().unwrap()).sum();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn test_query_validation() {
    let app = create_test_app().await;
    create_link(&app, "promo").await;

    let bad = [
        "/api/analytics/timeseries?from=2024-03-10&to=2024-03-01",
        "/api/analytics/timeseries?from=2024-03-01",
        "/api/analytics/timeseries?to=2024-03-01",
        "/api/analytics/timeseries?from=2022-01-01&to=2024-01-01",
        "/api/analytics/timeseries?from=yesterday&to=today",
        "/api/analytics/breakdown",
        "/api/analytics/breakdown?dimension=planet",
        "/api/analytics/overview?scope=everything",
        "/api/analytics/overview?scope=shortcode",
    ];
    for uri in bad {
        let response = api_get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body_json(response).await["code"], "validation_error");
    }

    let unknown = api_get(&app, "/api/analytics/overview?shortcode=ghost").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let alias = api_get(&app, "/api/analytics/breakdown?dimension=user_agent").await;
    assert_eq!(alias.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_delete_purges_analytics() {
    let app = create_test_app().await;
    seed_clicks(&app).await;

    let response = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri("/api/links/promo")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    app.flush().await.unwrap();

    let overview = body_json(api_get(&app, "/api/analytics/overview?includeBots=true").await).await;
    assert_eq!(overview["totalClicks"], 1);
    assert_eq!(overview["totalLinks"], 1);

    let remaining = app.storage.load_click_buckets().await.unwrap();
    assert!(remaining.iter().all(|(key, _)| key.shortcode == "other"));
    assert!(!remaining.is_empty());
}

#[tokio::test]
async fn test_click_recorded_after_delete_leaves_no_buckets() {
    let app = create_test_app().await;
    create_link(&app, "late").await;

    let response = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri("/api/links/late")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // A redirect that resolved the link before the delete reports its click afterwards
    app.recorder.record(ClickEvent {
        shortcode: "late".to_string(),
        timestamp: Utc::now(),
        is_bot: false,
        utm: Utm::default(),
        referrer: None,
        country: None,
        user_agent: None,
        device: None,
        browser: None,
    });
    app.flush().await.unwrap();

    let buckets = app.storage.load_click_buckets().await.unwrap();
    assert!(buckets.iter().all(|(key, _)| key.shortcode != "late"));

    // Recreating the shortcode starts from zero
    create_link(&app, "late").await;
    let overview = body_json(
        api_get(&app, "/api/analytics/overview?includeBots=true&shortcode=late").await,
    )
    .await;
    assert_eq!(overview["totalClicks"], 0);
}

#[tokio::test]
async fn test_view_is_rebuilt_from_persisted_buckets() {
    let storage = Arc::new(SqliteStorage::new("sqlite::memory:", 1).await.unwrap());
    storage.init().await.unwrap();

    storage
        .create(&NewLink {
            shortcode: "legacy".to_string(),
            url: "https://example.com/".to_string(),
            title: None,
            description: None,
            tags: vec![],
            password_hash: None,
            activates_at: None,
            expires_at: None,
            redirect_type: RedirectType::Found,
            archived: false,
            created_by: None,
            created: Utc::now() - Duration::days(2),
        })
        .await
        .unwrap();

    let hour = (Utc::now() - Duration::days(1)).timestamp() / 3600 * 3600;
    let dims = ClickDimensions {
        utm_source: Some("newsletter".to_string()),
        ..Default::default()
    };
    storage
        .upsert_click_buckets(&[(
            BucketKey {
                shortcode: "legacy".to_string(),
                hour,
                dims,
            },
            7,
        )])
        .await
        .unwrap();

    let app = App::build(&Config::default(), storage).await.unwrap();

    let overview = body_json(api_get(&app, "/api/analytics/overview").await).await;
    assert_eq!(overview["totalClicks"], 7);
    assert_eq!(overview["todayClicks"], 0);
    assert_eq!(overview["recentClicks"], 7);

    let utm = body_json(api_get(&app, "/api/analytics/breakdown?dimension=utm_source").await).await;
    assert_eq!(entries(&utm), vec![("newsletter".to_string(), 7)]);
}
