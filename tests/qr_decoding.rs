// QR decoding against rendered codes, directly and through the upload route

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use common::{qr_png, seeded_store, StaticGeocoder};
use securerails::verification::{decode_with_timeout, QrDecodeError};
use securerails::{create_router, AppState, QrDecoder, RqrrDecoder, SecureRailsConfig, TransportStore};

const BOUNDARY: &str = "securerails-test-boundary";

fn multipart_body(image: Option<&[u8]>, expected: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(expected) = expected {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"expectedBatchId\"\r\n\r\n{expected}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(image) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"scan.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn upload(body: Vec<u8>) -> (StatusCode, Value) {
    let store: Arc<dyn TransportStore> = seeded_store().await;
    let app = create_router(AppState::new(
        SecureRailsConfig::default(),
        store,
        Arc::new(StaticGeocoder("unused")),
        Arc::new(RqrrDecoder),
    ));

    let request = Request::builder()
        .method("POST")
        .uri("/transport/api/verify-qr")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn test_rqrr_reads_rendered_batch_code() {
    let png = qr_png("BATCH-2024-0042");
    assert_eq!(RqrrDecoder.decode(&png).unwrap(), "BATCH-2024-0042");
}

#[test]
fn test_blank_image_has_no_code() {
    let blank = image::GrayImage::from_pixel(64, 64, image::Luma([255]));
    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(blank)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();

    assert_eq!(RqrrDecoder.decode(&png), Err(QrDecodeError::NoCodeFound));
}

#[test]
fn test_garbage_bytes_are_unreadable() {
    let err = RqrrDecoder.decode(b"definitely not an image").unwrap_err();
    assert!(matches!(err, QrDecodeError::UnreadableImage(_)));
}

#[tokio::test]
async fn test_decode_with_timeout_runs_off_the_async_runtime() {
    let png = qr_png("B1");
    let payload = decode_with_timeout(Arc::new(RqrrDecoder), png, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(payload, "B1");
}

#[tokio::test]
async fn test_upload_with_matching_code_is_verified() {
    let png = qr_png("B1");
    let (status, body) = upload(multipart_body(Some(&png), Some("B1"))).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["verified"], true);
    assert_eq!(body["batchId"], "B1");
}

#[tokio::test]
async fn test_upload_with_other_batch_code_is_a_mismatch() {
    let png = qr_png("B2");
    let (status, body) = upload(multipart_body(Some(&png), Some("B1"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["scanned"], "B2");
    assert_eq!(body["expected"], "B1");
}

#[tokio::test]
async fn test_upload_without_image_lists_missing_field() {
    let (status, body) = upload(multipart_body(None, Some("B1"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields: image");
}
