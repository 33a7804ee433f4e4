//! Integration tests for the fetch pipeline
//!
//! Runs the Fetcher against a mock recipe endpoint and image host, and checks
//! what the presentation layer would observe.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::ImageFormat;
use recipes::{EnsureOutcome, Fetcher, FetcherConfig, ImageCache, MalformedPolicy, RecipeClient};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn jpeg_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([250, 200, 0]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg)
        .expect("Encoding should succeed");
    out.into_inner()
}

fn recipe_json(uuid: &str, name: &str, photo: Option<String>) -> Value {
    json!({
        "cuisine": "Italian",
        "name": name,
        "photo_url_large": null,
        "photo_url_small": photo,
        "uuid": uuid,
        "source_url": null,
        "youtube_url": null
    })
}

fn fetcher_for(server: &MockServer, temp_dir: &TempDir, policy: MalformedPolicy) -> Fetcher {
    let client = RecipeClient::new().with_endpoint(format!("{}/recipes.json", server.uri()));
    let images = Arc::new(ImageCache::with_dir(temp_dir.path().to_path_buf()));
    Fetcher::new(client, images).with_config(FetcherConfig {
        malformed_policy: policy,
        ..Default::default()
    })
}

async fn mount_recipes(server: &MockServer, body: Value, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/recipes.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body));
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

async fn mount_status(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/recipes.json"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_single_recipe_is_listed_and_its_image_cached() {
    let server = MockServer::start().await;
    let body = jpeg_bytes();
    Mock::given(method("GET"))
        .and(path("/img.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;
    let photo = format!("{}/img.jpg", server.uri());
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("abc-1", "Pasta", Some(photo))] }),
        None,
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    let state = fetcher.fetch().await;

    assert_eq!(state.recipes.len(), 1);
    assert_eq!(state.recipes[0].name, "Pasta");
    assert!(state.error_message.is_none());
    assert!(state.last_refresh.is_some());
    assert_eq!(state.images.downloaded, 1);

    let image = fetcher.image("abc-1").expect("Image should be cached");
    assert_eq!(image.bytes, body);
    assert_eq!(image.format, ImageFormat::Jpeg);
}

#[tokio::test]
async fn test_success_returns_every_record_and_clears_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/recipes.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_recipes(
        &server,
        json!({ "recipes": [
            recipe_json("a", "Pasta", None),
            recipe_json("b", "Pizza", None),
            recipe_json("c", "Risotto", None),
        ] }),
        None,
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    let failed = fetcher.fetch().await;
    assert!(failed.error_message.unwrap().contains("503"));

    let state = fetcher.fetch().await;
    assert_eq!(state.recipes.len(), 3);
    assert!(state.error_message.is_none());
    assert_eq!(state.images.no_image, 3);
}

#[tokio::test]
async fn test_server_error_keeps_previous_list() {
    let server = MockServer::start().await;
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("a", "Pasta", None), recipe_json("b", "Pizza", None)] }),
        Some(1),
    )
    .await;
    mount_status(&server, 500).await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    let first = fetcher.fetch().await;
    let second = fetcher.fetch().await;

    assert_eq!(second.recipes, first.recipes);
    assert_eq!(second.recipes.len(), 2);
    assert_eq!(second.last_refresh, first.last_refresh);
    let message = second.error_message.expect("Error message should be set");
    assert!(message.contains("500"));
}

#[tokio::test]
async fn test_schema_mismatch_keeps_previous_list() {
    let server = MockServer::start().await;
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("a", "Pasta", None)] }),
        Some(1),
    )
    .await;
    mount_recipes(&server, json!({ "recipes": "not a list" }), None).await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    fetcher.fetch().await;
    let state = fetcher.fetch().await;

    assert_eq!(state.recipes.len(), 1);
    assert_eq!(
        state.error_message.as_deref(),
        Some("Recipe data was malformed and could not be read")
    );
}

#[tokio::test]
async fn test_empty_name_is_filtered_under_filter_policy() {
    let server = MockServer::start().await;
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("a", "Pasta", None), recipe_json("b", "", None)] }),
        None,
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    let state = fetcher.fetch().await;

    assert!(state.error_message.is_none());
    assert_eq!(state.recipes.len(), 1);
    assert_eq!(state.recipes[0].uuid, "a");
}

#[tokio::test]
async fn test_empty_name_fails_batch_under_reject_policy() {
    let server = MockServer::start().await;
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("a", "Pasta", None)] }),
        Some(1),
    )
    .await;
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("a", "Pasta", None), recipe_json("b", "", None)] }),
        None,
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Reject);

    fetcher.fetch().await;
    let state = fetcher.fetch().await;

    assert_eq!(state.recipes.len(), 1);
    assert_eq!(
        state.error_message.as_deref(),
        Some("Recipe data contained 1 malformed entries")
    );
}

#[tokio::test]
async fn test_failed_image_download_does_not_fail_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_bytes()))
        .mount(&server)
        .await;
    mount_recipes(
        &server,
        json!({ "recipes": [
            recipe_json("a", "Pasta", Some(format!("{}/gone.jpg", server.uri()))),
            recipe_json("b", "Pizza", Some(format!("{}/ok.jpg", server.uri()))),
            recipe_json("c", "Risotto", Some("::not a url::".to_string())),
        ] }),
        None,
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    let state = fetcher.fetch().await;

    assert!(state.error_message.is_none());
    assert_eq!(state.recipes.len(), 3);
    assert_eq!(state.images.failed, 1);
    assert_eq!(state.images.downloaded, 1);
    assert_eq!(state.images.no_image, 1);
    assert_eq!(state.failed_images, vec!["a".to_string()]);
    assert!(!state.image_failed("c"));
    assert!(fetcher.image("a").is_none());
    assert!(fetcher.image("b").is_some());
}

#[tokio::test]
async fn test_refetch_does_not_download_cached_images_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_bytes()))
        .expect(1)
        .mount(&server)
        .await;
    let photo = format!("{}/img.jpg", server.uri());
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("abc-1", "Pasta", Some(photo))] }),
        None,
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    fetcher.fetch().await;
    let state = fetcher.fetch().await;

    assert_eq!(state.images.downloaded, 0);
    assert_eq!(state.images.already_cached, 1);
}

#[tokio::test]
async fn test_cancelled_fetch_keeps_last_known_good_state() {
    let server = MockServer::start().await;
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("a", "Pasta", None)] }),
        Some(1),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/recipes.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "recipes": [] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    let before = fetcher.fetch().await;
    let cancelled = tokio::time::timeout(Duration::from_millis(200), fetcher.fetch()).await;

    assert!(cancelled.is_err(), "Slow fetch should have been cancelled");
    let after = fetcher.state();
    assert_eq!(after.recipes, before.recipes);
    assert!(after.error_message.is_none());
}

#[tokio::test]
async fn test_fetch_cancelled_during_image_phase_publishes_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(jpeg_bytes())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    let photo = format!("{}/slow.jpg", server.uri());
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("abc-1", "Pasta", Some(photo.clone()))] }),
        None,
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    let cancelled = tokio::time::timeout(Duration::from_millis(200), fetcher.fetch()).await;

    assert!(cancelled.is_err(), "Fetch should still be downloading images");
    let state = fetcher.state();
    assert_eq!(state.recipes.len(), 1);
    assert!(state.error_message.is_none());
    assert!(state.last_refresh.is_some());

    let removed = tokio::time::timeout(Duration::from_secs(5), fetcher.images().purge_all())
        .await
        .expect("Purge should not hang after a cancelled fetch")
        .unwrap();
    assert_eq!(removed, 1);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        fetcher.images().ensure("abc-1", Some(&photo)),
    )
    .await
    .expect("Ensure should not hang after a cancelled fetch")
    .unwrap();
    assert_eq!(outcome, EnsureOutcome::Downloaded(ImageFormat::Jpeg));
}

#[tokio::test]
async fn test_request_timeout_sets_timeout_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/recipes.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "recipes": [] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let temp_dir = TempDir::new().unwrap();
    let client = RecipeClient::new()
        .with_client(http)
        .with_endpoint(format!("{}/recipes.json", server.uri()));
    let fetcher = Fetcher::new(
        client,
        Arc::new(ImageCache::with_dir(temp_dir.path().to_path_buf())),
    );

    let state = fetcher.fetch().await;

    assert_eq!(
        state.error_message.as_deref(),
        Some("The recipe server took too long to respond")
    );
}

#[tokio::test]
async fn test_invalid_endpoint_sets_message() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = Fetcher::new(
        RecipeClient::new().with_endpoint("not a url"),
        Arc::new(ImageCache::with_dir(temp_dir.path().to_path_buf())),
    );

    let state = fetcher.fetch().await;

    assert!(state.recipes.is_empty());
    assert_eq!(
        state.error_message.as_deref(),
        Some("Invalid recipe endpoint configured")
    );
}

#[tokio::test]
async fn test_purge_after_fetch_clears_images() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_bytes()))
        .mount(&server)
        .await;
    let photo = format!("{}/img.jpg", server.uri());
    mount_recipes(
        &server,
        json!({ "recipes": [recipe_json("abc-1", "Pasta", Some(photo))] }),
        None,
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let fetcher = fetcher_for(&server, &temp_dir, MalformedPolicy::Filter);

    fetcher.fetch().await;
    assert!(fetcher.image("abc-1").is_some());

    let removed = fetcher.images().purge_all().await.unwrap();

    assert_eq!(removed, 1);
    assert!(fetcher.image("abc-1").is_none());
    assert_eq!(fetcher.recipes().len(), 1);
}
