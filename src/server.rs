//! JSON HTTP surface over [`Client`](crate::client::Client).
//!
//! Object keys travel as a single path segment, so keys containing `/`
//! must be percent-encoded (`a%2Fb`).  The one exception is
//! `/r2/get/*key`, which captures the rest of the path.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use garde::Validate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::client::StoreOptions;
use crate::errors::{generate_request_id, SyncError};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::retry::JobId;
use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "metasync",
        description = "Metadata index kept in sync with an S3-compatible object store",
    ),
    paths(
        health_check,
        create_upload_url,
        sync_object,
        get_object_metadata,
        get_object_url,
        delete_object,
        list_bucket,
        get_job,
        cancel_job,
        r2_get,
        r2_send,
    ),
    components(schemas(
        UploadUrlRequest,
        SyncRequest,
        UrlResponse,
        JobResponse,
        CancelResponse,
        KeyResponse,
    )),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Objects", description = "Upload, sync, read and delete objects"),
        (name = "Jobs", description = "Deletion job control"),
        (name = "R2", description = "Server-side byte transfer"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`].
///
/// The `/store` routes are only mounted when the memory object store is in
/// use; they are where its signed URLs point.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .route("/api/upload-url", post(create_upload_url))
        .route(
            "/api/objects/:key",
            get(get_object_metadata).delete(delete_object),
        )
        .route("/api/objects/:key/sync", post(sync_object))
        .route("/api/objects/:key/url", get(get_object_url))
        .route("/api/buckets/:bucket/objects", get(list_bucket))
        .route("/api/jobs/:id", get(get_job).delete(cancel_job))
        .route("/r2/get/*key", get(r2_get))
        .route("/r2/send", post(r2_send));

    if state.memory.is_some() {
        router = router.route("/store/*path", get(signed_get).put(signed_put));
    }

    let body_limit = state.max_body_bytes;
    router
        .with_state(state)
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (unless the error path already set one), `Date` and
/// `Server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert(header::DATE, value);
    }
    headers.insert(header::SERVER, HeaderValue::from_static("metasync"));

    response
}

// -- Request and response bodies ---------------------------------------------

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    /// Custom key; a random one is generated when absent.
    #[serde(default)]
    #[garde(length(min = 1, max = 1024))]
    pub key: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Expected SHA-256 of the uploaded bytes, hex or base64.
    #[serde(default)]
    #[garde(length(min = 1, max = 128))]
    pub sha256: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UrlQuery {
    /// Lifetime of the signed URL in seconds.
    ttl: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    cursor: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SendQuery {
    key: Option<String>,
    sha256: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UrlResponse {
    url: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    job_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    canceled: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KeyResponse {
    key: String,
}

/// Parse an optional JSON body; an empty body is the type's default.
fn parse_body<T>(body: &Bytes) -> Result<T, SyncError>
where
    T: DeserializeOwned + Default + Validate,
    T::Context: Default,
{
    let value: T = if body.is_empty() {
        T::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| SyncError::invalid(format!("malformed request body: {e}")))?
    };
    value
        .validate()
        .map_err(|report| SyncError::invalid(report.to_string()))?;
    Ok(value)
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn bytes_response(data: Bytes, content_type: Option<String>) -> Response {
    let content_type =
        content_type.unwrap_or_else(|| "application/octet-stream".to_string());
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], data).into_response()
}

// -- Handlers ----------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Health check OK"))
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    post,
    path = "/api/upload-url",
    tag = "Objects",
    request_body(content = UploadUrlRequest, description = "Optional custom key"),
    responses(
        (status = 200, description = "Key and signed PUT URL"),
        (status = 403, description = "Upload denied"),
        (status = 409, description = "Custom key already has a record"),
    )
)]
async fn create_upload_url(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, SyncError> {
    let req: UploadUrlRequest = parse_body(&body)?;
    let upload = state.client.generate_upload_url(req.key.as_deref()).await?;
    Ok(Json(upload).into_response())
}

#[utoipa::path(
    post,
    path = "/api/objects/{key}/sync",
    tag = "Objects",
    params(("key" = String, Path, description = "Object key, percent-encoded")),
    request_body(content = SyncRequest, description = "Optional expected checksum"),
    responses(
        (status = 204, description = "Metadata synced"),
        (status = 404, description = "Object not in the store"),
        (status = 422, description = "Checksum mismatch"),
    )
)]
async fn sync_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Response, SyncError> {
    let req: SyncRequest = parse_body(&body)?;
    let record = state.client.sync_metadata(&key, req.sha256.as_deref()).await?;
    debug!(key = %record.key, "synced over http");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    get,
    path = "/api/objects/{key}",
    tag = "Objects",
    params(("key" = String, Path, description = "Object key, percent-encoded")),
    responses((status = 200, description = "Record with a signed URL, or null"))
)]
async fn get_object_metadata(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, SyncError> {
    let metadata = state.client.get_metadata(&key).await?;
    Ok(Json(metadata).into_response())
}

#[utoipa::path(
    get,
    path = "/api/objects/{key}/url",
    tag = "Objects",
    params(("key" = String, Path, description = "Object key, percent-encoded"), UrlQuery),
    responses((status = 200, description = "Signed GET URL", body = UrlResponse))
)]
async fn get_object_url(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<UrlQuery>,
) -> Result<Response, SyncError> {
    let ttl = query.ttl.map(Duration::from_secs);
    let url = state.client.get_url(&key, ttl).await?;
    Ok(Json(UrlResponse { url }).into_response())
}

#[utoipa::path(
    delete,
    path = "/api/objects/{key}",
    tag = "Objects",
    params(("key" = String, Path, description = "Object key, percent-encoded")),
    responses(
        (status = 202, description = "Deletion scheduled", body = JobResponse),
        (status = 403, description = "Delete denied"),
    )
)]
async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, SyncError> {
    let job_id = state.client.delete_object(&key).await?;
    let body = JobResponse {
        job_id: job_id.to_string(),
    };
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

#[utoipa::path(
    get,
    path = "/api/buckets/{bucket}/objects",
    tag = "Objects",
    params(("bucket" = String, Path, description = "Bucket name"), PageQuery),
    responses(
        (status = 200, description = "One page of records"),
        (status = 400, description = "Malformed or foreign cursor"),
    )
)]
async fn list_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Response, SyncError> {
    let page = state
        .client
        .page_metadata(&bucket, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(page).into_response())
}

#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    tag = "Jobs",
    params(("id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job status"),
        (status = 404, description = "Unknown job"),
    )
)]
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, SyncError> {
    let job_id: JobId = id.parse()?;
    let status = state.client.deletion_status(job_id).await?;
    Ok(Json(status).into_response())
}

#[utoipa::path(
    delete,
    path = "/api/jobs/{id}",
    tag = "Jobs",
    params(("id" = String, Path, description = "Job id")),
    responses((status = 200, description = "Whether the job was canceled", body = CancelResponse))
)]
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, SyncError> {
    let job_id: JobId = id.parse()?;
    let canceled = state.client.cancel_deletion(job_id).await?;
    Ok(Json(CancelResponse { canceled }).into_response())
}

#[utoipa::path(
    get,
    path = "/r2/get/{key}",
    tag = "R2",
    params(("key" = String, Path, description = "Object key")),
    responses(
        (status = 200, description = "Object bytes"),
        (status = 404, description = "No such object"),
    )
)]
async fn r2_get(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, SyncError> {
    match state.client.get_object(&key).await? {
        Some(object) => Ok(bytes_response(object.data, object.content_type)),
        None => Err(SyncError::NotFound {
            bucket: state.client.bucket().to_string(),
            key,
        }),
    }
}

#[utoipa::path(
    post,
    path = "/r2/send",
    tag = "R2",
    params(SendQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream", description = "Raw object bytes"),
    responses(
        (status = 200, description = "Stored; returns the key", body = KeyResponse),
        (status = 422, description = "Checksum mismatch"),
    )
)]
async fn r2_send(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SendQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, SyncError> {
    let options = StoreOptions {
        key: query.key,
        content_type: content_type(&headers),
        sha256: query.sha256,
    };
    let key = state.client.store(body, options).await?;
    Ok(Json(KeyResponse { key }).into_response())
}

// -- Signed URL endpoints (memory backend) -----------------------------------

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

async fn signed_put(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, SyncError> {
    let Some(memory) = &state.memory else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let (bucket, key) = memory
        .put_signed(path_and_query(&uri), body, content_type(&headers))
        .await?;
    debug!(%bucket, %key, "signed upload received");
    Ok(StatusCode::OK.into_response())
}

async fn signed_get(
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> Result<Response, SyncError> {
    let Some(memory) = &state.memory else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let object = memory.get_signed(path_and_query(&uri)).await?;
    Ok(bytes_response(object.data, object.content_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::permissions::ReadOnly;
    use crate::retry::inprocess::InProcessExecutor;
    use crate::retry::{BackoffPolicy, JobStatus, RunResult};
    use crate::storage::memory::MemoryObjectStore;
    use axum::body::Body;
    use tower::ServiceExt;

    const ENDPOINT: &str = "http://localhost:9020";

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_backoff: Duration::from_millis(1),
            base: 2.0,
            max_failures: 3,
            jitter: false,
        }
    }

    fn test_state(read_only: bool) -> (Arc<AppState>, Arc<MemoryObjectStore>) {
        let objects = Arc::new(MemoryObjectStore::new(ENDPOINT));
        let metadata = Arc::new(MemoryMetadataStore::new());
        let mut builder = Client::builder("photos", objects.clone(), metadata)
            .executor(Arc::new(InProcessExecutor::new()))
            .retry_policy(fast_policy());
        if read_only {
            builder = builder.permissions(Arc::new(ReadOnly));
        }
        let state = Arc::new(AppState {
            client: Arc::new(builder.build()),
            memory: Some(objects.clone()),
            max_body_bytes: 1024 * 1024,
        });
        (state, objects)
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Bytes) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (state, _) = test_state(false);
        let router = app(state);
        let resp = router.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(resp.headers().get("server").unwrap(), "metasync");
    }

    #[tokio::test]
    async fn test_upload_sync_read_delete_over_http() {
        let (state, objects) = test_state(false);
        let router = app(state);

        let (status, body) = send(
            &router,
            json_request("POST", "/api/upload-url", r#"{"key":"cat.jpg"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let upload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(upload["key"], "cat.jpg");
        let url = upload["url"].as_str().unwrap();
        let signed_path = url.strip_prefix(ENDPOINT).unwrap();

        let put = Request::builder()
            .method("PUT")
            .uri(signed_path)
            .header("content-type", "image/jpeg")
            .body(Body::from("meow"))
            .unwrap();
        let (status, _) = send(&router, put).await;
        assert_eq!(status, StatusCode::OK);
        assert!(objects.contains("photos", "cat.jpg").await);

        let (status, _) = send(&router, empty_request("POST", "/api/objects/cat.jpg/sync")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&router, empty_request("GET", "/api/objects/cat.jpg")).await;
        assert_eq!(status, StatusCode::OK);
        let record: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(record["key"], "cat.jpg");
        assert_eq!(record["contentType"], "image/jpeg");
        assert_eq!(record["size"], 4);
        assert!(record["url"].as_str().unwrap().starts_with(ENDPOINT));

        let (status, body) =
            send(&router, empty_request("GET", "/api/buckets/photos/objects?limit=10")).await;
        assert_eq!(status, StatusCode::OK);
        let page: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(page["page"].as_array().unwrap().len(), 1);
        assert_eq!(page["isDone"], true);

        let (status, body) = send(&router, empty_request("DELETE", "/api/objects/cat.jpg")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let job_id = job["jobId"].as_str().unwrap().to_string();

        let (status, body) = send(&router, empty_request("GET", "/api/objects/cat.jpg")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"null");

        let mut done = false;
        for _ in 0..100 {
            let (status, body) =
                send(&router, empty_request("GET", &format!("/api/jobs/{job_id}"))).await;
            assert_eq!(status, StatusCode::OK);
            let status: JobStatus = serde_json::from_slice(&body).unwrap();
            if let JobStatus::Completed(result) = status {
                assert!(matches!(result, RunResult::Success(_)));
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(done);
        assert!(!objects.contains("photos", "cat.jpg").await);
    }

    #[tokio::test]
    async fn test_missing_metadata_is_null() {
        let (state, _) = test_state(false);
        let router = app(state);
        let (status, body) = send(&router, empty_request("GET", "/api/objects/nothing")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"null");
    }

    #[tokio::test]
    async fn test_sync_of_absent_object_is_404() {
        let (state, _) = test_state(false);
        let router = app(state);
        let (status, body) = send(&router, empty_request("POST", "/api/objects/ghost/sync")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["code"], "NotFound");
    }

    #[tokio::test]
    async fn test_oversized_custom_key_rejected() {
        let (state, _) = test_state(false);
        let router = app(state);
        let body = format!(r#"{{"key":"{}"}}"#, "k".repeat(1025));
        let (status, _) = send(&router, json_request("POST", "/api/upload-url", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let (state, _) = test_state(false);
        let router = app(state);
        let (status, _) = send(&router, json_request("POST", "/api/upload-url", "{nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_read_only_denies_upload_and_delete() {
        let (state, _) = test_state(true);
        let router = app(state);
        let (status, _) = send(&router, empty_request("POST", "/api/upload-url")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&router, empty_request("DELETE", "/api/objects/a")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&router, empty_request("GET", "/api/objects/a")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_r2_send_then_get() {
        let (state, _) = test_state(false);
        let router = app(state);
        let req = Request::builder()
            .method("POST")
            .uri("/r2/send?key=notes%2Ftoday.txt")
            .header("content-type", "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let (status, body) = send(&router, req).await;
        assert_eq!(status, StatusCode::OK);
        let stored: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stored["key"], "notes/today.txt");

        let resp = router
            .clone()
            .oneshot(empty_request("GET", "/r2/get/notes/today.txt"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/plain");

        let (status, _) = send(&router, empty_request("GET", "/r2/get/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            send(&router, empty_request("GET", "/api/objects/notes%2Ftoday.txt")).await;
        assert_eq!(status, StatusCode::OK);
        let record: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(record["size"], 5);
    }

    #[tokio::test]
    async fn test_tampered_signed_url_is_forbidden() {
        let (state, _) = test_state(false);
        let router = app(state);
        let (_, body) = send(&router, empty_request("POST", "/api/upload-url")).await;
        let upload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let path = upload["url"].as_str().unwrap().strip_prefix(ENDPOINT).unwrap();
        let tampered = path.replacen("/store/photos/", "/store/other/", 1);

        let put = Request::builder()
            .method("PUT")
            .uri(tampered)
            .body(Body::from("x"))
            .unwrap();
        let (status, _) = send(&router, put).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_job_ids() {
        let (state, _) = test_state(false);
        let router = app(state);
        let (status, _) = send(&router, empty_request("GET", "/api/jobs/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let unknown = JobId::new();
        let (status, _) = send(&router, empty_request("GET", &format!("/api/jobs/{unknown}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_foreign_cursor_is_bad_request() {
        let (state, _) = test_state(false);
        let router = app(state);
        let cursor = crate::metadata::cursor::Cursor::start("docs").encode();
        let uri = format!("/api/buckets/photos/objects?cursor={cursor}");
        let (status, _) = send(&router, empty_request("GET", &uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_openapi_document_served() {
        let (state, _) = test_state(false);
        let router = app(state);
        let (status, body) = send(&router, empty_request("GET", "/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(doc["paths"]["/api/upload-url"].is_object());
    }
}
