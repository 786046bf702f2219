//! HTTP API endpoints

use axum::{
    extract::{FromRequest, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tagdb_core::catalog::GroupKey;
use tagdb_core::{Engine, Resolution, Sample, TagDbError, Timestamp, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Application state
pub type AppState = Arc<Engine>;

/// Create the API router
pub fn create_router(engine: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health))
        .route("/ping", get(ping))
        // Series values
        .route("/api/get", get(get_values))
        .route("/api/put", post(put_values))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Deserialize)]
pub struct GetParams {
    pub expr: String,
    #[serde(default)]
    pub format: OutputFormat,
    pub resolution: Option<String>,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

/// One grouping bucket of a `/api/get` response
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GroupValues {
    pub tags: BTreeMap<String, String>,
    pub timestamps_values: Vec<Sample>,
}

/// One batch of samples for a single series
#[derive(Debug, Deserialize)]
pub struct PutBlock {
    /// `key=value` tag strings naming the series
    pub tags: Vec<String>,
    /// Values stamped with the server's current time
    #[serde(default)]
    pub values: Vec<Value>,
    /// Explicit `[timestamp, value]` pairs, used instead of `values`
    pub timestamps_values: Option<Vec<Sample>>,
    /// Sender's clock when the batch was built
    pub client_timestamp: Option<Timestamp>,
    /// Values are deltas against the previous sample
    #[serde(default)]
    pub offset: bool,
}

impl PutBlock {
    /// Build a block from repeated `tag` and `value` form fields
    fn from_form(fields: Vec<(String, String)>) -> Result<Self, ApiError> {
        let mut block = PutBlock {
            tags: Vec::new(),
            values: Vec::new(),
            timestamps_values: None,
            client_timestamp: None,
            offset: false,
        };
        for (name, raw) in fields {
            match name.as_str() {
                "tag" => block.tags.push(raw),
                "value" => block.values.push(raw.trim().parse().map_err(|_| {
                    ApiError::bad_request(format!("Invalid value: {}", raw))
                })?),
                "offset" => block.offset = parse_flag(&raw),
                _ => {}
            }
        }
        Ok(block)
    }

    /// Absolute samples of this block as seen by a server at `now`
    fn samples(&self, now: Timestamp) -> Result<Vec<Sample>, ApiError> {
        let out_of_range = || ApiError::bad_request("client_timestamp shifts samples out of range");
        let shift = match self.client_timestamp {
            Some(client) => now.checked_sub(client).ok_or_else(out_of_range)?,
            None => 0,
        };
        let shifted = |t: Timestamp| t.checked_add(shift).ok_or_else(out_of_range);
        match &self.timestamps_values {
            Some(pairs) => pairs.iter().map(|&(t, v)| Ok((shifted(t)?, v))).collect(),
            None => {
                let t = shifted(now)?;
                Ok(self.values.iter().map(|&v| (t, v)).collect())
            }
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(raw.trim().to_lowercase().as_str(), "" | "0" | "false" | "off" | "no")
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error rendered as a JSON [`ErrorResponse`]
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<TagDbError> for ApiError {
    fn from(e: TagDbError) -> Self {
        let status = if e.is_parse() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("Request failed: {}", self.message);
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: tagdb_core::VERSION.to_string(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

async fn get_values(
    State(engine): State<AppState>,
    Query(params): Query<GetParams>,
) -> Result<Response, ApiError> {
    let resolution = match params.resolution.as_deref() {
        None => Resolution::Full,
        Some(name) => Resolution::from_name(name)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown resolution: {}", name)))?,
    };

    let result = engine.query(&params.expr, params.start, params.end, resolution)?;
    let group_keys = result.group_keys.clone();
    let groups = result.collect()?;
    debug!("{} returned {} groups", params.expr, groups.len());

    Ok(match params.format {
        OutputFormat::Json => Json(
            groups
                .into_iter()
                .map(|(key, values)| GroupValues {
                    tags: key
                        .tags()
                        .iter()
                        .map(|tag| (tag.key().to_string(), tag.value().to_string()))
                        .collect(),
                    timestamps_values: values,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        OutputFormat::Csv => (
            [(header::CONTENT_TYPE, "text/csv")],
            render_csv(&group_keys, &groups),
        )
            .into_response(),
    })
}

async fn put_values(
    State(engine): State<AppState>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split_once(';').map_or(v, |(mime, _)| mime).trim().to_string())
        .unwrap_or_default();

    let blocks = match content_type.as_str() {
        "application/x-www-form-urlencoded" => {
            let Form(fields) = Form::<Vec<(String, String)>>::from_request(request, &())
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            vec![PutBlock::from_form(fields)?]
        }
        "application/json" => {
            let Json(blocks) = Json::<Vec<PutBlock>>::from_request(request, &())
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            blocks
        }
        other => {
            return Err(ApiError {
                status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
                message: format!("Unsupported content type: {:?}", other),
            })
        }
    };

    let now = engine.clock().now();
    for block in &blocks {
        engine.add_values(&block.tags, &block.samples(now)?, block.offset)?;
    }
    debug!("Stored {} blocks", blocks.len());

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// CSV output
// ============================================================================

/// `timestamp,<group keys...>,value` rows; empty when nothing matched
fn render_csv(group_keys: &[String], groups: &[(GroupKey, Vec<Sample>)]) -> String {
    let mut out = String::new();
    if groups.is_empty() {
        return out;
    }

    let mut header = vec!["timestamp"];
    header.extend(group_keys.iter().map(String::as_str));
    header.push("value");
    push_row(&mut out, header);

    for (key, values) in groups {
        let constants: Vec<&str> = group_keys
            .iter()
            .map(|k| {
                key.tags()
                    .iter()
                    .find(|tag| tag.key() == k)
                    .map_or("", |tag| tag.value())
            })
            .collect();
        for (timestamp, value) in values {
            let timestamp = timestamp.to_string();
            let value = value.to_string();
            let mut row = vec![timestamp.as_str()];
            row.extend(constants.iter().copied());
            row.push(value.as_str());
            push_row(&mut out, row);
        }
    }
    out
}

fn push_row(out: &mut String, fields: Vec<&str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use tagdb_core::blockstore::BlockStoreConfig;
    use tagdb_core::cache::MemoryCache;
    use tagdb_core::clock::ManualClock;
    use tagdb_core::storage::MemoryStore;
    use tower::ServiceExt;

    const NOW: Timestamp = 1_000_000;

    fn app() -> (Router, AppState) {
        let engine = Arc::new(Engine::with_parts(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCache::new()),
            Arc::new(ManualClock::new(NOW)),
            BlockStoreConfig::default(),
        ));
        (create_router(engine.clone()), engine)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(content_type: &str, body: impl Into<String>) -> Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/put")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.into()))
            .unwrap()
    }

    fn post_json(body: serde_json::Value) -> Request<Body> {
        post("application/json", body.to_string())
    }

    #[tokio::test]
    async fn test_health_and_ping() {
        let (app, _) = app();
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"ok\""));
        assert_eq!(send(&app, get("/ping")).await, (StatusCode::OK, "pong".to_string()));
    }

    #[tokio::test]
    async fn test_json_put_then_grouped_get() {
        let (app, _) = app();
        let (status, _) = send(
            &app,
            post_json(serde_json::json!([
                {"tags": ["project=web", "hostname=a"], "timestamps_values": [[100, 1], [300, 3]]},
                {"tags": ["project=web", "hostname=b"], "timestamps_values": [[200, 2]]},
            ])),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) =
            send(&app, get("/api/get?expr=%7Bproject%3Dweb%7D%5Bhostname%5D")).await;
        assert_eq!(status, StatusCode::OK);
        let groups: Vec<GroupValues> = serde_json::from_str(&body).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].tags["hostname"], "a");
        assert_eq!(groups[0].timestamps_values, vec![(100, 1), (300, 3)]);
        assert_eq!(groups[1].tags["hostname"], "b");
        assert_eq!(groups[1].timestamps_values, vec![(200, 2)]);
    }

    #[tokio::test]
    async fn test_csv_output() {
        let (app, _) = app();
        send(
            &app,
            post_json(serde_json::json!([
                {"tags": ["metric=cpu", "hostname=a"], "timestamps_values": [[10, 5], [20, 6]]},
            ])),
        )
        .await;

        let (status, body) = send(
            &app,
            get("/api/get?expr=%7Bmetric%3Dcpu%7D%5Bhostname%5D&format=csv"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "timestamp,hostname,value\r\n10,a,5\r\n20,a,6\r\n");

        let (_, empty) =
            send(&app, get("/api/get?expr=%7Bmetric%3Dcpu%7D%5Bdc%5D&format=csv")).await;
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_form_put_stamps_server_time() {
        let (app, engine) = app();
        let (status, _) = send(
            &app,
            post(
                "application/x-www-form-urlencoded; charset=utf-8",
                "tag=host%3Da&tag=metric%3Dload&value=7&value=9",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let groups = engine
            .query("{host=a}", None, None, Resolution::Full)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(groups[0].1, vec![(NOW, 7), (NOW, 9)]);
    }

    #[tokio::test]
    async fn test_client_timestamp_shifts_samples() {
        let (app, engine) = app();
        send(
            &app,
            post_json(serde_json::json!([{
                "tags": ["host=a"],
                "timestamps_values": [[500, 1], [600, 2]],
                "client_timestamp": 700,
            }])),
        )
        .await;

        let shift = NOW - 700;
        let groups = engine
            .query("{host=a}", None, None, Resolution::Full)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(groups[0].1, vec![(500 + shift, 1), (600 + shift, 2)]);
    }

    #[tokio::test]
    async fn test_relative_start_and_resolution() {
        let (app, _) = app();
        send(
            &app,
            post_json(serde_json::json!([
                {"tags": ["host=a"], "timestamps_values": [[NOW - 500, 1], [NOW - 50, 2]]},
            ])),
        )
        .await;

        let (_, body) = send(&app, get("/api/get?expr=%7Bhost%3Da%7D&start=-100")).await;
        let groups: Vec<GroupValues> = serde_json::from_str(&body).unwrap();
        assert_eq!(groups[0].timestamps_values, vec![(NOW - 50, 2)]);
        assert!(groups[0].tags.is_empty());

        let (status, _) = send(&app, get("/api/get?expr=%7Bhost%3Da%7D&resolution=hour")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, get("/api/get?expr=%7Bhost%3Da%7D&resolution=week")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_parse_errors_are_bad_requests() {
        let (app, engine) = app();
        let (status, body) = send(&app, get("/api/get?expr=%7Bhost")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("error"));

        let (status, _) = send(
            &app,
            post_json(serde_json::json!([{"tags": ["host=z", "broken"], "values": [1]}])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(engine.tags().get("host", "z").unwrap().is_none());

        let form = post("application/x-www-form-urlencoded", "tag=a%3Db&value=x");
        let (status, _) = send(&app, form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, post("text/plain", "a=b 1")).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_extreme_client_timestamp_is_rejected() {
        let (app, engine) = app();
        let (status, body) = send(
            &app,
            post_json(serde_json::json!([{
                "tags": ["host=a"],
                "timestamps_values": [[1, 1]],
                "client_timestamp": i64::MIN,
            }])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("client_timestamp"));

        let (status, _) = send(
            &app,
            post_json(serde_json::json!([{
                "tags": ["host=a"],
                "timestamps_values": [[i64::MAX, 1]],
                "client_timestamp": NOW - 1,
            }])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(engine.tags().get("host", "a").unwrap().is_none());
    }

    #[test]
    fn test_csv_quoting() {
        let mut out = String::new();
        push_row(&mut out, vec!["1", "a,b", "say \"hi\""]);
        assert_eq!(out, "1,\"a,b\",\"say \"\"hi\"\"\"\r\n");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("true"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
