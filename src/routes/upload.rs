//! Upload Routes
//!
//! HTTP endpoints for the chunked upload protocol.
//!
//! Endpoints:
//! - POST /upload-chunk - Store one chunk (multipart)
//! - POST /merge-chunks - Reassemble a session and route the file

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upload::{ChunkMeta, ChunkUploadResponse, MergeRequest, MergeResponse, UploadError};

/// Multipart framing allowance on top of the chunk ceiling
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(state: &AppState) -> Router<AppState> {
    let body_limit = usize::try_from(state.config().upload.chunk_upload_ceiling)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(
            "/upload-chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/merge-chunks", post(merge_chunks))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload-chunk
///
/// Fields: `file`, `chunkIndex`, `sessionId`; optionally `totalChunks`,
/// `originalFileName`, `originalFileType`, `originalFileSize`.
async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>> {
    let mut file = None;
    let mut chunk_index = None;
    let mut session_id = None;
    let mut meta = ChunkMeta::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            file = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?,
            );
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        match name.as_str() {
            "chunkIndex" => chunk_index = Some(parse_field::<usize>("chunkIndex", &value)?),
            "sessionId" => session_id = Some(value),
            "totalChunks" => meta.total_chunks = Some(parse_field("totalChunks", &value)?),
            "originalFileName" => meta.original_file_name = non_empty(value),
            "originalFileType" => meta.original_file_type = non_empty(value),
            "originalFileSize" => {
                meta.original_file_size = Some(parse_field("originalFileSize", &value)?)
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| missing_field("file"))?;
    let chunk_index = chunk_index.ok_or_else(|| missing_field("chunkIndex"))?;
    let session_id = session_id.ok_or_else(|| missing_field("sessionId"))?;

    let receipt = state
        .sessions()
        .put_chunk(&session_id, chunk_index, file, meta)
        .await?;

    Ok(Json(ChunkUploadResponse {
        success: receipt.accepted,
        chunk_index,
        session_id,
        is_complete: receipt
            .total_chunks
            .is_some_and(|total| receipt.received_count >= total),
        uploaded_chunks: receipt.received_count,
        total_chunks: receipt.total_chunks,
    }))
}

/// POST /merge-chunks
///
/// Reassemble a session's chunks and route the result.
async fn merge_chunks(
    State(state): State<AppState>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<MergeResponse>> {
    let outcome = state.sessions().merge(request, state.router()).await?;

    tracing::info!(
        name = %outcome.name,
        size = outcome.size,
        address = %outcome.address.url(),
        "Chunked upload routed"
    );

    Ok(Json(outcome.into()))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        AppError::Upload(UploadError::InvalidRequest(format!(
            "{} is not a valid number: {:?}",
            name, value
        )))
    })
}

fn missing_field(name: &str) -> AppError {
    AppError::Upload(UploadError::InvalidRequest(format!("{} is required", name)))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::scheduler::MemoryTaskStore;
    use crate::state::AppState;
    use crate::testing::FakeRouter;

    const BOUNDARY: &str = "rehost-test-boundary";

    fn state() -> AppState {
        AppState::new(
            Config::default(),
            Arc::new(FakeRouter::new()),
            Arc::new(MemoryTaskStore::new()),
        )
    }

    fn chunk_request(fields: &[(&str, &str)], file: Option<&[u8]>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some(file) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY
                )
                .as_bytes(),
            );
            body.extend_from_slice(file);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload-chunk")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = crate::routes::router(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_upload_chunks_then_merge() {
        let state = state();

        let (status, body) = send(
            &state,
            chunk_request(
                &[("sessionId", "s1"), ("chunkIndex", "1"), ("totalChunks", "2")],
                Some(b"world"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["isComplete"], false);
        assert_eq!(body["uploadedChunks"], 1);
        assert_eq!(body["totalChunks"], 2);

        let (_, body) = send(
            &state,
            chunk_request(&[("sessionId", "s1"), ("chunkIndex", "0")], Some(b"hello ")),
        )
        .await;
        assert_eq!(body["isComplete"], true);

        let server = TestServer::new(crate::routes::router(state.clone())).unwrap();
        let response = server
            .post("/merge-chunks")
            .json(&json!({
                "sessionId": "s1",
                "fileName": "greeting.txt",
                "totalChunks": 2,
                "fileSize": 11
            }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["src"], "https://img.example/r/greeting.txt");
        assert_eq!(body["result"]["size"], 11);
        assert_eq!(body["result"]["isChunkFile"], true);
    }

    #[tokio::test]
    async fn test_merge_with_missing_chunk_lists_it() {
        let state = state();
        send(
            &state,
            chunk_request(&[("sessionId", "s2"), ("chunkIndex", "0")], Some(b"a")),
        )
        .await;

        let server = TestServer::new(crate::routes::router(state)).unwrap();
        let response = server
            .post("/merge-chunks")
            .json(&json!({ "sessionId": "s2", "fileName": "a.jpg", "totalChunks": 3 }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["code"], "CHUNK_MISSING");
        assert_eq!(body["missing"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let state = state();

        let (status, body) = send(&state, chunk_request(&[("chunkIndex", "0")], Some(b"a"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");

        let (status, _) = send(
            &state,
            chunk_request(&[("sessionId", "s3"), ("chunkIndex", "zero")], Some(b"a")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, chunk_request(&[("sessionId", "s3"), ("chunkIndex", "0")], None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chunk_index_beyond_total() {
        let (status, body) = send(
            &state(),
            chunk_request(
                &[("sessionId", "s4"), ("chunkIndex", "5"), ("totalChunks", "2")],
                Some(b"a"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "CHUNK_INDEX_OUT_OF_BOUNDS");
    }

    #[tokio::test]
    async fn test_declared_size_over_ceiling() {
        let (status, body) = send(
            &state(),
            chunk_request(
                &[
                    ("sessionId", "s5"),
                    ("chunkIndex", "0"),
                    ("originalFileSize", "209715200"),
                ],
                Some(b"a"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "FILE_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_merge_unknown_session() {
        let server = TestServer::new(crate::routes::router(state())).unwrap();
        let response = server
            .post("/merge-chunks")
            .json(&json!({ "sessionId": "ghost", "fileName": "a.jpg", "totalChunks": 1 }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_routing_failure_is_server_error() {
        let state = state();
        send(
            &state,
            chunk_request(&[("sessionId", "s6"), ("chunkIndex", "0")], Some(b"a")),
        )
        .await;

        let server = TestServer::new(crate::routes::router(state)).unwrap();
        let response = server
            .post("/merge-chunks")
            .json(&json!({ "sessionId": "s6", "fileName": "fail.jpg", "totalChunks": 1 }))
            .await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["code"], "UPLOAD_FAILED");
    }
}
