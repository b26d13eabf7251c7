use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleeting_core::{Entry, ListQuery, RegistryError, SortOrder, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tower_http::trace::TraceLayer;

/// Maximum accepted request body (1 MB)
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Response header set when a requested sort could not be applied
pub const SORT_SKIPPED_HEADER: &str = "x-sort-skipped";

/// Builds the HTTP routes around a shared store
pub fn router(store: Store) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/list", get(list).post(list))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// Body returned by every non-list endpoint
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusBody {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
}

impl StatusBody {
    fn success(entries: usize) -> Self {
        Self {
            status: "success".to_string(),
            message: "Data registered".to_string(),
            entries: Some(entries),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            entries: None,
        }
    }
}

/// Query string accepted by `/list`
#[derive(Debug, Default)]
pub struct ListParams {
    pub sort: Option<String>,
    pub order: Option<String>,
    pub filter: Option<String>,
    pub filter_key: Option<String>,
}

impl ListParams {
    /// Collects known parameters; a repeated parameter keeps its last value
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (name, value) in pairs {
            let slot = match name.as_str() {
                "sort" => &mut params.sort,
                "order" => &mut params.order,
                "filter" => &mut params.filter,
                "filter_key" => &mut params.filter_key,
                _ => continue,
            };
            *slot = Some(value);
        }
        params
    }

    /// `filter` wins over its `filter_key` alias when both are non-empty
    fn into_query(self) -> ListQuery {
        let given = |v: Option<String>| v.filter(|s| !s.is_empty());
        ListQuery {
            filter: given(self.filter).or(given(self.filter_key)),
            sort: given(self.sort),
            order: SortOrder::parse(self.order.as_deref()),
        }
    }
}

/// Request failures as seen by HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid payload: body is not valid JSON ({0})")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid request body: {0}")]
    Body(#[from] BytesRejection),

    #[error("Invalid query string: {0}")]
    Query(#[from] QueryRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidJson(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Registry(RegistryError::InvalidPayload(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Registry(RegistryError::PersistenceWriteFailed(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update data".to_string(),
            ),
            ApiError::Body(rejection) => (rejection.status(), self.to_string()),
            ApiError::Query(rejection) => (rejection.status(), self.to_string()),
        };

        if status.is_server_error() {
            tracing::error!("Register failed: {}", self);
        } else {
            tracing::warn!("Rejected request: {}", self);
        }

        (status, Json(StatusBody::error(message))).into_response()
    }
}

async fn register(
    State(store): State<Store>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<StatusBody>, ApiError> {
    let body = body?;
    let payload: Value = serde_json::from_slice(&body)?;
    tracing::debug!("REGISTER ({} bytes)", body.len());

    let live = store.register(payload).await?;
    Ok(Json(StatusBody::success(live)))
}

async fn list(
    State(store): State<Store>,
    pairs: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<(HeaderMap, Json<Vec<Entry>>), ApiError> {
    let Query(pairs) = pairs?;
    let query = ListParams::from_pairs(pairs).into_query();
    let outcome = store.list(&query).await;

    let mut headers = HeaderMap::new();
    if let Some(reason) = outcome.sort_skipped {
        let value = HeaderValue::from_str(&reason.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("values are not mutually comparable"));
        headers.insert(SORT_SKIPPED_HEADER, value);
    }

    Ok((headers, Json(outcome.entries)))
}

async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use chrono::{Duration, TimeZone, Utc};
    use fleeting_core::{
        Backend, ManualClock, MemoryBackend, PersistenceError, RegistryConfig,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Creates a store on a memory backend with a clock frozen at a fixed instant.
    async fn create_test_store() -> (Store, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let store = Store::open_with_clock(
            RegistryConfig::default(),
            Arc::new(MemoryBackend::new()),
            clock.clone(),
        )
        .await;
        (store, clock)
    }

    async fn send(store: &Store, method: Method, uri: &str, body: &str) -> (StatusCode, HeaderMap, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router(store.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, headers, value)
    }

    async fn register(store: &Store, body: Value) -> (StatusCode, Value) {
        let (status, _, value) = send(store, Method::POST, "/register", &body.to_string()).await;
        (status, value)
    }

    fn names(value: &Value) -> Vec<Value> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].clone())
            .collect()
    }

    #[tokio::test]
    async fn test_register_and_list_sorted() {
        let (store, clock) = create_test_store().await;

        let (status, body) = register(&store, json!({"name": "alice"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "success", "message": "Data registered", "entries": 1})
        );

        clock.advance(Duration::seconds(1));
        let (_, body) = register(&store, json!({"name": "bob"})).await;
        assert_eq!(body["entries"], json!(2));

        let (status, headers, body) = send(&store, Method::GET, "/list?sort=name&order=asc", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(SORT_SKIPPED_HEADER).is_none());
        assert_eq!(names(&body), vec![json!("alice"), json!("bob")]);
        assert_eq!(body[0]["timestamp"], json!("2024-05-01T12:00:00.000000Z"));
        assert_eq!(body[1]["timestamp"], json!("2024-05-01T12:00:01.000000Z"));
    }

    #[tokio::test]
    async fn test_register_prunes_after_window() {
        let (store, clock) = create_test_store().await;

        register(&store, json!({"name": "first"})).await;
        clock.advance(Duration::minutes(6));
        let (_, body) = register(&store, json!({"name": "second"})).await;

        assert_eq!(body["entries"], json!(1));
        let (_, _, list) = send(&store, Method::GET, "/list", "").await;
        assert_eq!(names(&list), vec![json!("second")]);
    }

    #[tokio::test]
    async fn test_list_filter_and_alias() {
        let (store, _) = create_test_store().await;
        for body in [
            json!({"name": "a", "score": 10}),
            json!({"name": "b"}),
            json!({"name": "c"}),
            json!({"name": "d", "score": 2}),
            json!({"name": "e"}),
        ] {
            register(&store, body).await;
        }

        let (_, _, list) = send(&store, Method::GET, "/list?filter=score", "").await;
        assert_eq!(names(&list), vec![json!("a"), json!("d")]);

        let (_, _, list) = send(&store, Method::POST, "/list?filter_key=score&sort=score&order=desc", "").await;
        assert_eq!(names(&list), vec![json!("a"), json!("d")]);

        let (_, _, list) = send(&store, Method::GET, "/list?filter_key=score&sort=score", "").await;
        assert_eq!(names(&list), vec![json!("d"), json!("a")]);
    }

    #[tokio::test]
    async fn test_register_rejects_non_object() {
        let (store, _) = create_test_store().await;

        let (status, body) = register(&store, json!([1, 2, 3])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], json!("error"));
        assert!(body["message"].as_str().unwrap().contains("JSON object"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_json() {
        let (store, _) = create_test_store().await;

        let (status, _, body) = send(&store, Method::POST, "/register", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], json!("error"));
        assert!(body["message"].as_str().unwrap().starts_with("Invalid payload"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_caller_timestamp_is_overwritten() {
        let (store, _) = create_test_store().await;
        register(&store, json!({"name": "x", "timestamp": "1970-01-01T00:00:00Z"})).await;

        let (_, _, list) = send(&store, Method::GET, "/list", "").await;
        assert_eq!(list[0]["timestamp"], json!("2024-05-01T12:00:00.000000Z"));
    }

    #[tokio::test]
    async fn test_incomparable_sort_returns_unsorted_with_header() {
        let (store, _) = create_test_store().await;
        register(&store, json!({"name": "a", "v": 3})).await;
        register(&store, json!({"name": "b", "v": {"x": 1}})).await;
        register(&store, json!({"name": "c", "v": 1})).await;

        let (status, headers, list) = send(&store, Method::GET, "/list?sort=v", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(SORT_SKIPPED_HEADER).is_some());
        assert_eq!(names(&list), vec![json!("a"), json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn test_unknown_order_means_ascending() {
        let (store, _) = create_test_store().await;
        register(&store, json!({"name": "b"})).await;
        register(&store, json!({"name": "a"})).await;

        let (_, _, list) = send(&store, Method::GET, "/list?sort=name&order=upwards", "").await;
        assert_eq!(names(&list), vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_empty_list_is_empty_array() {
        let (store, _) = create_test_store().await;
        let (status, _, list) = send(&store, Method::GET, "/list", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list, json!([]));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (store, _) = create_test_store().await;
        let big = json!({"blob": "x".repeat(MAX_BODY_BYTES + 1)});

        let (status, body) = register(&store, big).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["status"], json!("error"));
        assert!(body["message"].as_str().unwrap().starts_with("Invalid request body"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_repeated_query_params_keep_last_value() {
        let (store, _) = create_test_store().await;
        register(&store, json!({"name": "b", "rank": 1})).await;
        register(&store, json!({"name": "a", "rank": 2})).await;

        let (status, headers, list) = send(&store, Method::GET, "/list?sort=rank&sort=name", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(SORT_SKIPPED_HEADER).is_none());
        assert_eq!(names(&list), vec![json!("a"), json!("b")]);

        let (status, _, list) = send(&store, Method::GET, "/list?sort=name&order=asc&order=desc", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&list), vec![json!("b"), json!("a")]);
    }

    #[tokio::test]
    async fn test_empty_filter_does_not_shadow_alias() {
        let (store, _) = create_test_store().await;
        register(&store, json!({"name": "a", "score": 1})).await;
        register(&store, json!({"name": "b"})).await;

        let (_, _, list) = send(&store, Method::GET, "/list?filter=&filter_key=score", "").await;
        assert_eq!(names(&list), vec![json!("a")]);
    }

    #[tokio::test]
    async fn test_health() {
        let (store, _) = create_test_store().await;
        let (status, _, body) = send(&store, Method::GET, "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("OK"));
    }

    struct ReadOnlyBackend;

    #[async_trait::async_trait]
    impl Backend for ReadOnlyBackend {
        fn name(&self) -> &'static str {
            "read-only"
        }

        async fn load(&self) -> Result<Vec<Entry>, PersistenceError> {
            Ok(Vec::new())
        }

        async fn save(&self, _entries: &[Entry]) -> Result<(), PersistenceError> {
            Err(PersistenceError::Corrupt("medium is read-only".into()))
        }
    }

    #[tokio::test]
    async fn test_write_failure_maps_to_server_error() {
        let store = Store::open(RegistryConfig::default(), Arc::new(ReadOnlyBackend)).await;

        let (status, body) = register(&store, json!({"name": "a"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({"status": "error", "message": "Failed to update data"})
        );

        // The entry is still served from memory
        let (_, _, list) = send(&store, Method::GET, "/list", "").await;
        assert_eq!(names(&list), vec![json!("a")]);
    }

    #[test]
    fn test_list_params_prefer_filter() {
        let params = ListParams {
            filter: Some("a".into()),
            filter_key: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(params.into_query().filter.as_deref(), Some("a"));

        let params = ListParams {
            filter_key: Some("b".into()),
            order: Some("desc".into()),
            ..Default::default()
        };
        let query = params.into_query();
        assert_eq!(query.filter.as_deref(), Some("b"));
        assert_eq!(query.order, SortOrder::Desc);
    }

    #[test]
    fn test_list_params_from_pairs() {
        let pairs = vec![
            ("filter".to_string(), "x".to_string()),
            ("unknown".to_string(), "ignored".to_string()),
            ("filter".to_string(), "y".to_string()),
            ("sort".to_string(), String::new()),
        ];
        let query = ListParams::from_pairs(pairs).into_query();
        assert_eq!(query.filter.as_deref(), Some("y"));
        assert_eq!(query.sort, None);
        assert_eq!(query.order, SortOrder::Asc);
    }
}
