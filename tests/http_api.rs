//! The HTTP surface: status codes, JSON shapes and headers, driven through
//! the router with `tower::ServiceExt::oneshot`.

mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use async_trait::async_trait;
use bytes::Bytes;
use common::{BUCKET, Fixture};
use futures::StreamExt;
use file_gateway::services::{
    file_service::FileService,
    object_store::{
        DiskObjectStore, ObjectResult, ObjectStat, ObjectStore, ObjectStream, PutMode,
    },
};
use serde_json::{Value, json};
use std::{io, sync::Arc};
use tower::ServiceExt;

const BOUNDARY: &str = "gateway-test-boundary";
const LIMIT: usize = 64 * 1024;

fn router(fx: &Fixture) -> Router {
    file_gateway::app(fx.service.clone(), LIMIT)
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(token: &str, body: Vec<u8>) -> Request<Body> {
    Request::post("/file/upload")
        .header(header::AUTHORIZATION, bearer(token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn upload(fx: &Fixture, token: &str, name: &str, data: &[u8], replace: bool) -> Response {
    let replace = if replace { "true" } else { "false" };
    let body = multipart_body(
        &[("bucketName", BUCKET), ("replace", replace)],
        Some((name, "text/plain", data)),
    );
    router(fx)
        .oneshot(upload_request(token, body))
        .await
        .unwrap()
}

#[tokio::test]
async fn probes_answer_without_a_token() {
    let fx = Fixture::new().await;

    let live = router(&fx)
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let ready = router(&fx)
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
    let body = json_body(ready).await;
    assert_eq!(body["checks"]["metadata"]["ok"], json!(true));
    assert_eq!(body["checks"]["objectStore"]["ok"], json!(true));
}

#[tokio::test]
async fn missing_token_is_401_and_unknown_token_is_403() {
    let fx = Fixture::new().await;

    let anonymous = router(&fx)
        .oneshot(Request::get("/me").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(anonymous).await;
    assert!(body["error"]["message"].is_string());

    let forged = router(&fx)
        .oneshot(
            Request::get("/me")
                .header(header::AUTHORIZATION, bearer("not-a-real-token"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn me_reports_the_token_owner() {
    let fx = Fixture::new().await;

    let response = router(&fx)
        .oneshot(
            Request::get("/me")
                .header(header::AUTHORIZATION, bearer(&fx.admin.api_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], json!(fx.admin.id));
    assert_eq!(body["name"], json!("root"));
    assert_eq!(body["isAdmin"], json!(true));
    assert!(body.get("apiToken").is_none());
}

#[tokio::test]
async fn upload_creates_then_replace_updates() {
    let fx = Fixture::new().await;
    let token = fx.member.api_token.clone();

    let created = upload(&fx, &token, "My Report.PDF", b"first", false).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = json_body(created).await;
    assert_eq!(body["message"], json!("Upload completed successfully!"));
    assert_eq!(body["fileName"], json!("My_Report.PDF"));
    assert_eq!(body["originalName"], json!("My Report.PDF"));
    assert_eq!(body["mimeType"], json!("text/plain"));
    assert_eq!(body["size"], json!(5));
    assert_eq!(body["bucket"], json!(BUCKET));
    assert_eq!(
        body["url"],
        json!("https://files.example.com/docs/My_Report.PDF")
    );

    let suffixed = upload(&fx, &token, "My Report.PDF", b"second", false).await;
    assert_eq!(suffixed.status(), StatusCode::CREATED);
    assert_eq!(json_body(suffixed).await["fileName"], json!("My_Report_(1).PDF"));

    let replaced = upload(&fx, &token, "My Report.PDF", b"third!", true).await;
    assert_eq!(replaced.status(), StatusCode::OK);
    let body = json_body(replaced).await;
    assert_eq!(body["message"], json!("File replaced successfully!"));
    assert_eq!(body["fileName"], json!("My_Report.PDF"));
    assert_eq!(body["size"], json!(6));

    assert_eq!(fx.file_count().await, 2);
}

#[tokio::test]
async fn upload_without_file_or_bucket_is_400() {
    let fx = Fixture::new().await;
    let token = fx.member.api_token.clone();

    let no_file = router(&fx)
        .oneshot(upload_request(
            &token,
            multipart_body(&[("bucketName", BUCKET)], None),
        ))
        .await
        .unwrap();
    assert_eq!(no_file.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(no_file).await["error"]["code"], json!("FILE_MISSING"));

    let no_bucket = router(&fx)
        .oneshot(upload_request(
            &token,
            multipart_body(&[], Some(("a.txt", "text/plain", b"x"))),
        ))
        .await
        .unwrap();
    assert_eq!(no_bucket.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(no_bucket).await["error"]["code"],
        json!("BUCKET_NAME_MISSING")
    );

    let not_multipart = router(&fx)
        .oneshot(json_request(
            "POST",
            "/file/upload",
            &token,
            json!({ "bucketName": BUCKET }),
        ))
        .await
        .unwrap();
    assert_eq!(not_multipart.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn second_file_part_is_rejected() {
    let fx = Fixture::new().await;
    let mut body = multipart_body(&[("bucketName", BUCKET)], Some(("a.txt", "text/plain", b"a")));
    // Splice a second file part in before the closing boundary.
    let closing = format!("--{BOUNDARY}--\r\n");
    body.truncate(body.len() - closing.len());
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"b.txt\"\r\n\r\nb\r\n{closing}"
        )
        .as_bytes(),
    );

    let response = router(&fx)
        .oneshot(upload_request(&fx.member.api_token, body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"]["code"],
        json!("LIMIT_UNEXPECTED_FILE")
    );
    assert_eq!(fx.file_count().await, 0);
}

#[tokio::test]
async fn oversized_upload_is_400() {
    let fx = Fixture::new().await;
    let big = vec![b'x'; LIMIT * 2];

    let response = upload(&fx, &fx.member.api_token, "big.bin", &big, false).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("File upload error:")
    );
    assert_eq!(fx.file_count().await, 0);
}

#[tokio::test]
async fn outsider_upload_is_403() {
    let fx = Fixture::new().await;

    let response = upload(&fx, &fx.outsider.api_token, "a.txt", b"x", false).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        json_body(response).await["error"]["code"],
        json!("UPLOAD_FORBIDDEN")
    );
}

#[tokio::test]
async fn info_describes_the_file() {
    let fx = Fixture::new().await;
    upload(&fx, &fx.member.api_token, "plan.txt", b"four", false).await;

    let response = router(&fx)
        .oneshot(json_request(
            "POST",
            "/file/info",
            &fx.other_member.api_token,
            json!({ "bucketName": BUCKET, "path": "plan.txt" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["path"], json!("plan.txt"));
    assert_eq!(body["originalName"], json!("plan.txt"));
    assert_eq!(body["size"], json!(4));
    assert_eq!(body["bucket"], json!(BUCKET));
    assert_eq!(body["uploader"], json!("maria"));
    assert_eq!(body["url"], json!("https://files.example.com/docs/plan.txt"));
    assert!(body["uploadedAt"].is_string());
}

#[tokio::test]
async fn info_with_malformed_body_is_400() {
    let fx = Fixture::new().await;

    let response = router(&fx)
        .oneshot(
            Request::post("/file/info")
                .header(header::AUTHORIZATION, bearer(&fx.member.api_token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_streams_with_attachment_headers() {
    let fx = Fixture::new().await;
    upload(&fx, &fx.member.api_token, "Quarterly Plan.txt", b"hello world", false).await;

    let response = router(&fx)
        .oneshot(
            Request::get("/file/download?bucketName=docs&path=Quarterly_Plan.txt")
                .header(header::AUTHORIZATION, bearer(&fx.member.api_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(headers[header::CONTENT_LENGTH], "11");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Quarterly_Plan.txt\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello world");
}

#[tokio::test]
async fn download_errors_map_to_status_codes() {
    let fx = Fixture::new().await;
    upload(&fx, &fx.member.api_token, "a.txt", b"x", false).await;

    let get = |uri: &'static str, token: String| {
        let app = router(&fx);
        async move {
            app.oneshot(
                Request::get(uri)
                    .header(header::AUTHORIZATION, bearer(&token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
        }
    };

    assert_eq!(
        get("/file/download?bucketName=docs", fx.member.api_token.clone()).await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        get("/file/download?bucketName=docs&path=nope.txt", fx.member.api_token.clone()).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        get("/file/download?bucketName=docs&path=a.txt", fx.outsider.api_token.clone()).await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn delete_is_204_then_404() {
    let fx = Fixture::new().await;
    upload(&fx, &fx.member.api_token, "a.txt", b"x", false).await;
    let locator = json!({ "bucketName": BUCKET, "path": "a.txt" });

    let by_colleague = router(&fx)
        .oneshot(json_request("DELETE", "/file", &fx.other_member.api_token, locator.clone()))
        .await
        .unwrap();
    assert_eq!(by_colleague.status(), StatusCode::FORBIDDEN);

    let deleted = router(&fx)
        .oneshot(json_request("DELETE", "/file", &fx.member.api_token, locator.clone()))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let info = router(&fx)
        .oneshot(json_request("POST", "/file/info", &fx.member.api_token, locator))
        .await
        .unwrap();
    assert_eq!(info.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(info).await["error"]["code"], json!("FILE_NOT_FOUND"));
}

#[tokio::test]
async fn internal_failures_hide_details() {
    let fx = Fixture::new().await;
    sqlx::query(
        "CREATE TRIGGER reject_files BEFORE INSERT ON files
         BEGIN SELECT RAISE(ABORT, 'disk on fire'); END",
    )
    .execute(&*fx.service.metadata.db)
    .await
    .unwrap();

    let response = upload(&fx, &fx.member.api_token, "a.txt", b"x", false).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(
        body["error"]["message"],
        json!(file_gateway::errors::INTERNAL_MESSAGE)
    );
    assert!(body["error"].get("code").is_none());
}

/// Disk store whose reads fail after the first chunk.
struct BrokenReads(DiskObjectStore);

#[async_trait]
impl ObjectStore for BrokenReads {
    async fn bucket_exists(&self, bucket: &str) -> ObjectResult<bool> {
        self.0.bucket_exists(bucket).await
    }

    async fn create_bucket(&self, bucket: &str) -> ObjectResult<()> {
        self.0.create_bucket(bucket).await
    }

    async fn stat(&self, bucket: &str, key: &str) -> ObjectResult<ObjectStat> {
        self.0.stat(bucket, key).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        mode: PutMode,
    ) -> ObjectResult<ObjectStat> {
        self.0.put(bucket, key, data, content_type, mode).await
    }

    async fn get(&self, bucket: &str, key: &str) -> ObjectResult<ObjectStream> {
        self.0.stat(bucket, key).await?;
        let chunks = vec![
            Ok(Bytes::from_static(b"first chunk")),
            Err(io::Error::other("disk read failed")),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn remove(&self, bucket: &str, key: &str) -> ObjectResult<()> {
        self.0.remove(bucket, key).await
    }

    async fn list_keys(&self, bucket: &str) -> ObjectResult<Vec<String>> {
        self.0.list_keys(bucket).await
    }

    async fn root_writable(&self) -> ObjectResult<()> {
        self.0.root_writable().await
    }
}

#[tokio::test]
async fn read_failure_mid_download_aborts_the_body() {
    let fx = Fixture::new().await;
    upload(&fx, &fx.member.api_token, "big.txt", b"0123456789012345678901234", false).await;

    let service = FileService::new(
        fx.service.metadata.clone(),
        Arc::new(BrokenReads(fx.disk.clone())),
        common::PUBLIC_BASE,
    );
    let response = file_gateway::app(service, LIMIT)
        .oneshot(
            Request::get("/file/download?bucketName=docs&path=big.txt")
                .header(header::AUTHORIZATION, bearer(&fx.member.api_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "25");
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
}
