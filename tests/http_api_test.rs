use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use cloth_seg_rs::auth::{AcceptAnyBearer, TokenGate};
use cloth_seg_rs::mocks::{MockSegmentationModel, StaticTokenVerifier};
use cloth_seg_rs::server::{build_router, AppState};
use cloth_seg_rs::store::ResultStore;
use cloth_seg_rs::traits::TokenVerifier;
use cloth_seg_rs::{Palette, Pipeline};

const BOUNDARY: &str = "cloth-seg-test-boundary";
const TOKEN: &str = "letmein";

struct TestApp {
    router: Router,
    model: Arc<MockSegmentationModel>,
    temp_dir: TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_verifier(Arc::new(StaticTokenVerifier::new(TOKEN)))
    }

    fn with_verifier(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self::build(verifier, 20 * 1024 * 1024)
    }

    fn build(verifier: Arc<dyn TokenVerifier>, max_upload_bytes: usize) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockSegmentationModel::new(768));
        let pipeline = Pipeline::new(
            model.clone(),
            Palette::default(),
            ResultStore::new(temp_dir.path().join("output")),
            1,
        );
        let state = AppState::new(Arc::new(pipeline), TokenGate::new(verifier, true))
            .with_service_info("1.2.3", "test")
            .with_max_upload_bytes(max_upload_bytes);
        Self {
            router: build_router(state),
            model,
            temp_dir,
        }
    }

    fn output_dir(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("output")
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 30, 60])));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
    bytes.into_inner()
}

fn multipart_body(field: &str, filename: Option<&str>, content: &[u8]) -> Vec<u8> {
    let disposition = match filename {
        Some(filename) => format!("form-data; name=\"{field}\"; filename=\"{filename}\""),
        None => format!("form-data; name=\"{field}\""),
    };
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(token: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::post("/api/v1/get-cloth").header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

fn output_files(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn health_and_ready_are_open_and_empty() {
    let app = TestApp::new();

    for uri in ["/health", "/ready", "/health", "/ready"] {
        let (status, body) = app.send(Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert!(body.is_empty(), "{uri}");
    }
}

#[tokio::test]
async fn root_reports_service_info() {
    let app = TestApp::new();
    let request = Request::get("/")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap();

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"message": "cloth-segmenter-api", "version": "1.2.3", "environment": "test"})
    );
}

#[tokio::test]
async fn missing_credentials_are_unauthenticated() {
    let app = TestApp::new();
    let request = upload_request(None, multipart_body("file", Some("a.jpg"), &jpeg_bytes(8, 8)));

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Not authenticated");
    assert_eq!(body["error_kind"], "unauthenticated");
    assert_eq!(app.model.invocations(), 0);
    assert!(output_files(&app.output_dir()).is_empty());
}

#[tokio::test]
async fn wrong_scheme_is_forbidden() {
    let app = TestApp::new();
    let request = Request::get("/")
        .header(header::AUTHORIZATION, "Basic xyz")
        .body(Body::empty())
        .unwrap();

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Invalid authentication scheme.");
    assert_eq!(body["error_kind"], "forbidden");
}

#[tokio::test]
async fn rejected_token_never_reaches_the_model() {
    let app = TestApp::new();
    let request = upload_request(
        Some("wrong"),
        multipart_body("file", Some("a.jpg"), &jpeg_bytes(8, 8)),
    );

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Invalid token.");
    assert_eq!(app.model.invocations(), 0);
}

#[tokio::test]
async fn jpeg_upload_is_segmented_and_stored() {
    let app = TestApp::new();
    let payload = jpeg_bytes(100, 150);
    let request = upload_request(Some(TOKEN), multipart_body("file", Some("shirt.jpg"), &payload));

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], 200);
    assert_eq!(body["path"], "DONE");
    assert_eq!(
        body["metadata"],
        json!({
            "width": 100,
            "height": 150,
            "format": "JPEG",
            "mode": "RGB",
            "size_bytes": payload.len(),
        })
    );

    let output_path = Path::new(body["output_path"].as_str().unwrap());
    assert!(output_path.exists());
    let name = output_path.file_name().unwrap().to_str().unwrap();
    let id = name
        .strip_prefix("output_")
        .and_then(|rest| rest.strip_suffix(".jpg"))
        .unwrap_or_else(|| panic!("unexpected output name {name}"));
    assert!(Uuid::parse_str(id).is_ok(), "{name}");

    let stored = image::open(output_path).unwrap();
    assert_eq!((stored.width(), stored.height()), (100, 150));
    assert_eq!(app.model.invocations(), 1);
}

#[tokio::test]
async fn text_upload_is_a_client_error() {
    let app = TestApp::new();
    let request = upload_request(
        Some(TOKEN),
        multipart_body("file", Some("notes.txt"), b"this is not an image"),
    );

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "invalid_input");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Error processing image:"));
    assert_eq!(app.model.invocations(), 0);
    assert!(output_files(&app.output_dir()).is_empty());
}

#[tokio::test]
async fn missing_file_field_is_a_client_error() {
    let app = TestApp::new();
    let request = upload_request(Some(TOKEN), multipart_body("comment", None, b"hello"));

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "invalid_input");
    assert_eq!(app.model.invocations(), 0);
}

#[tokio::test]
async fn non_multipart_request_is_a_client_error() {
    let app = TestApp::new();
    let request = Request::post("/api/v1/get-cloth")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "invalid_input");
}

#[tokio::test]
async fn differently_named_file_field_is_accepted() {
    let app = TestApp::with_verifier(Arc::new(AcceptAnyBearer));
    let request = upload_request(
        Some("anything"),
        multipart_body("image", Some("shirt.jpg"), &jpeg_bytes(12, 20)),
    );

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["width"], 12);
    assert_eq!(output_files(&app.output_dir()).len(), 1);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let app = TestApp::build(Arc::new(AcceptAnyBearer), 1024);
    let request = upload_request(
        Some("anything"),
        multipart_body("file", Some("big.bin"), &vec![0u8; 8 * 1024]),
    );

    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "invalid_input");
    assert_eq!(app.model.invocations(), 0);
}
