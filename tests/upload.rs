//! Integration tests for the upload engine against a mock platform and a
//! mock signed-storage backend on the same server.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use stratus_sdk::upload::UploadDestination;
use stratus_sdk::{Client, ClientConfig, Credentials, Error, RetryConfig, UploadConfig};
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request as MockRequest, ResponseTemplate};

async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

fn client(server: &MockServer, upload: UploadConfig) -> Client {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ClientConfig::new(server.uri())
        .with_retry(RetryConfig {
            max_retries: 3,
            backoff_factor: 0.0,
            jitter: false,
            ..RetryConfig::default()
        })
        .with_upload(upload);
    Client::new(config, Credentials::client("cid", "csecret")).expect("client")
}

/// Tiny bounds so tests exercise the multipart flow with a few bytes.
fn small_parts(part_size: u64, threshold: u64) -> UploadConfig {
    UploadConfig {
        part_size,
        multipart_threshold: threshold,
        min_part_size: 1,
        max_part_size: 1024,
        concurrency: 2,
        ..UploadConfig::default()
    }
}

fn destination() -> UploadDestination {
    UploadDestination {
        init_upload_path: "dm/init-upload".into(),
        complete_upload_path: "dm/complete-upload".into(),
        init_multipart_path: "dm/create-multipart-upload".into(),
        part_url_path: "dm/get-upload-part-url".into(),
        complete_multipart_path: "dm/complete-multipart-upload".into(),
        abort_multipart_path: Some("dm/abort-multipart-upload".into()),
        fields: json!({"dataset": "d1", "component": "raster"}),
    }
}

fn temp_file(content: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content).expect("write");
    file.flush().expect("flush");
    file
}

async fn requests_to(server: &MockServer, to: &str) -> Vec<MockRequest> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path() == to)
        .collect()
}

#[tokio::test]
async fn small_file_goes_single_shot() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/dm/init-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": format!("{}/store/whole", server.uri()),
            "headers": {"x-storage-class": "standard"},
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/store/whole"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/complete-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let file = temp_file(b"hello world");
    let client = client(&server, small_parts(8, 16));
    client.upload(file.path(), &destination()).await.expect("upload");

    let init = requests_to(&server, "/dm/init-upload").await;
    let init_body: Value = init[0].body_json().unwrap();
    assert_eq!(init_body["dataset"], json!("d1"));
    assert_eq!(init_body["total_size"], json!(11));
    assert!(init_body["filename"].is_string());

    let puts = requests_to(&server, "/store/whole").await;
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].body, b"hello world");
    assert_eq!(
        puts[0].headers.get("x-storage-class").unwrap().to_str().unwrap(),
        "standard"
    );
    // Signed storage is external; no bearer token may leak there.
    assert!(puts[0].headers.get("authorization").is_none());

    assert_eq!(requests_to(&server, "/dm/complete-upload").await.len(), 1);
    assert!(requests_to(&server, "/dm/create-multipart-upload").await.is_empty());
}

#[tokio::test]
async fn zero_byte_file_uploads_one_empty_body() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/dm/init-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": format!("{}/store/whole", server.uri()),
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/store/whole"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/complete-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let file = temp_file(b"");
    let client = client(&server, small_parts(8, 16));
    client.upload(file.path(), &destination()).await.expect("upload");

    let puts = requests_to(&server, "/store/whole").await;
    assert_eq!(puts.len(), 1);
    assert!(puts[0].body.is_empty());
}

#[tokio::test]
async fn multipart_splits_retries_a_part_and_commits_in_order() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/dm/create-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"upload_id": "u1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/get-upload-part-url"))
        .respond_with({
            let base = server.uri();
            move |request: &MockRequest| {
                let body: Value = request.body_json().unwrap();
                let part_number = body["part_number"].as_u64().unwrap();
                ResponseTemplate::new(200)
                    .set_body_json(json!({"url": format!("{base}/store/part/{part_number}")}))
            }
        })
        .mount(&server)
        .await;

    let put_calls = Arc::new(AtomicUsize::new(0));
    let put_calls_in_mock = put_calls.clone();
    Mock::given(method("PUT"))
        .and(path_regex(r"^/store/part/\d+$"))
        .respond_with(move |request: &MockRequest| {
            // The very first PUT fails once; the retry must succeed.
            if put_calls_in_mock.fetch_add(1, Ordering::SeqCst) == 0 {
                return ResponseTemplate::new(503);
            }
            let part_number = request.url.path().rsplit('/').next().unwrap();
            ResponseTemplate::new(200).insert_header("ETag", format!("\"etag-{part_number}\""))
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/complete-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let content = b"abcdefghijklmnopqrst"; // 20 bytes -> parts of 8, 8, 4
    let file = temp_file(content);
    let client = client(&server, small_parts(8, 8));
    client.upload(file.path(), &destination()).await.expect("upload");

    let init: Value =
        requests_to(&server, "/dm/create-multipart-upload").await[0].body_json().unwrap();
    assert_eq!(init["chunk_size"], json!(8));
    assert_eq!(init["total_size"], json!(20));

    // Three parts plus the one retried attempt.
    assert_eq!(put_calls.load(Ordering::SeqCst), 4);

    // Every byte landed on the right part, whatever the transfer order.
    let requests = server.received_requests().await.unwrap();
    let mut put_bodies: Vec<(u64, Vec<u8>)> = requests
        .iter()
        .filter(|r| r.method.as_str() == "PUT" && r.url.path().starts_with("/store/part/"))
        .map(|r| {
            let n: u64 = r.url.path().rsplit('/').next().unwrap().parse().unwrap();
            (n, r.body.clone())
        })
        .collect();
    put_bodies.sort_by_key(|(n, _)| *n);
    put_bodies.dedup_by_key(|(n, _)| *n);
    let reassembled: Vec<u8> = put_bodies.into_iter().flat_map(|(_, body)| body).collect();
    assert_eq!(reassembled, content);

    let commit: Value =
        requests_to(&server, "/dm/complete-multipart-upload").await[0].body_json().unwrap();
    assert_eq!(commit["upload_id"], json!("u1"));
    assert_eq!(
        commit["parts"],
        json!([
            {"index": 1, "etag": "etag-1"},
            {"index": 2, "etag": "etag-2"},
            {"index": 3, "etag": "etag-3"},
        ])
    );
}

#[tokio::test]
async fn pre_issued_part_urls_skip_the_part_url_endpoint() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/dm/create-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upload_id": "u2",
            "parts": [
                {"index": 1, "url": format!("{}/store/part/1", server.uri())},
                {"index": 2, "url": format!("{}/store/part/2", server.uri())},
            ],
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/store/part/\d+$"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"e\""))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/complete-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let file = temp_file(b"0123456789abcdef"); // 16 bytes -> 2 parts of 8
    let client = client(&server, small_parts(8, 8));
    client.upload(file.path(), &destination()).await.expect("upload");

    assert!(requests_to(&server, "/dm/get-upload-part-url").await.is_empty());
}

#[tokio::test]
async fn stale_session_aborts_without_retrying() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/dm/create-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"upload_id": "u3"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/get-upload-part-url"))
        .respond_with({
            let base = server.uri();
            move |_: &MockRequest| {
                ResponseTemplate::new(200).set_body_json(json!({"url": format!("{base}/store/part/x")}))
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/store/part/x"))
        .respond_with(ResponseTemplate::new(409).set_body_string("NoSuchUpload"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/abort-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let file = temp_file(b"0123456789abcdef");
    let client = client(&server, small_parts(8, 8));
    let err = client
        .upload(file.path(), &destination())
        .await
        .expect_err("stale session must fail the upload");

    assert!(matches!(err, Error::UploadAborted(_)), "got {err:?}");

    let aborts = requests_to(&server, "/dm/abort-multipart-upload").await;
    assert_eq!(aborts.len(), 1);
    let abort_body: Value = aborts[0].body_json().unwrap();
    assert_eq!(abort_body["upload_id"], json!("u3"));
}

#[tokio::test]
async fn part_exhausting_the_retry_budget_aborts_the_session() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/dm/create-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upload_id": "u5",
            "parts": [{"index": 1, "url": format!("{}/store/part/1", server.uri())}],
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/store/part/1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend down"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/abort-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    // One part, so the attempt count is deterministic.
    let file = temp_file(b"0123456789");
    let client = client(&server, small_parts(16, 8));
    let err = client
        .upload(file.path(), &destination())
        .await
        .expect_err("exhausted part must fail the upload");

    assert!(matches!(err, Error::UploadAborted(_)), "got {err:?}");
    // max_retries = 3: exactly three attempts on the part, then abort.
    assert_eq!(requests_to(&server, "/store/part/1").await.len(), 3);
    assert_eq!(requests_to(&server, "/dm/abort-multipart-upload").await.len(), 1);
}

#[tokio::test]
async fn failed_commit_aborts_the_session() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/dm/create-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upload_id": "u4",
            "parts": [
                {"index": 1, "url": format!("{}/store/part/1", server.uri())},
                {"index": 2, "url": format!("{}/store/part/2", server.uri())},
            ],
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/store/part/\d+$"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"e\""))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/complete-multipart-upload"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dm/abort-multipart-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let file = temp_file(b"0123456789abcdef");
    let client = client(&server, small_parts(8, 8));
    let err = client
        .upload(file.path(), &destination())
        .await
        .expect_err("commit failure must surface");

    assert!(matches!(err, Error::Http { status: 500, .. }), "got {err:?}");
    assert_eq!(requests_to(&server, "/dm/abort-multipart-upload").await.len(), 1);
}
