//! HTTP surface: the chat-plugin ingestion endpoints plus a small JSON API.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::engine::parser;
use crate::engine::query::{BoardKind, BoardResult, Period};
use crate::engine::scope::ScopeError;
use crate::engine::state::IngestOutcome;
use crate::error::EngineError;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::render;
use crate::service::{LedgerExport, Runtime};

/// Upper bound for a raw `/dink` body.
const MAX_DINK_BODY: usize = 1024 * 1024;

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// JSON error body for `/api` routes.
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

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ScopeError> for ApiError {
    fn from(err: ScopeError) -> Self {
        let status = match &err {
            ScopeError::Duplicate(_) | ScopeError::NoActiveScope => StatusCode::CONFLICT,
            ScopeError::Unknown(_) => StatusCode::NOT_FOUND,
            ScopeError::Invalid(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Scope(scope) => scope.into(),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub async fn serve<F>(addr: SocketAddr, runtime: Arc<Runtime>, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(runtime);
    let listener = TcpListener::bind(addr).await?;
    log(
        Level::Info,
        Domain::Http,
        "listening",
        obj(&[("addr", v_str(&addr.to_string()))]),
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/logLoot", post(log_loot))
        .route("/logKill", post(log_kill))
        .route("/dink", post(dink))
        .route("/api/boards/{kind}", get(get_board))
        .route("/api/export/{kind}", get(export_board))
        .route("/api/ledger/{kind}", get(export_ledger))
        .route("/api/total-gold", get(total_gold))
        .route("/api/scopes", get(list_scopes).post(create_scope))
        .route("/api/scopes/finish", post(finish_scope))
        .route("/api/adjust", post(adjust))
        .route("/api/reset", post(reset))
        .route("/api/health", get(health))
        .layer(middleware::from_fn(log_requests))
        .with_state(runtime)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    log(
        Level::Debug,
        Domain::Http,
        "request",
        obj(&[
            ("method", v_str(&method)),
            ("route", v_str(&route)),
            ("status", json!(response.status().as_u16())),
            ("elapsed_ms", json!(started.elapsed().as_secs_f64() * 1000.0)),
        ]),
    );
    response
}

fn outcome_reply(outcome: &IngestOutcome) -> (StatusCode, &'static str) {
    if outcome.accepted {
        (StatusCode::OK, "ok")
    } else if outcome.is_duplicate() {
        (StatusCode::OK, "duplicate")
    } else {
        (StatusCode::BAD_REQUEST, "fmt")
    }
}

// ---- ingestion ----

#[derive(Debug, Deserialize)]
struct LogLootBody {
    #[serde(rename = "lootMessage")]
    loot_message: Option<String>,
}

async fn log_loot(
    State(rt): State<Arc<Runtime>>,
    body: Result<Json<LogLootBody>, JsonRejection>,
) -> (StatusCode, &'static str) {
    let message = body
        .ok()
        .and_then(|Json(b)| b.loot_message)
        .filter(|m| !m.trim().is_empty());
    let Some(message) = message else {
        return (StatusCode::BAD_REQUEST, "bad");
    };
    outcome_reply(&rt.ingest_text(&message, None, "logLoot"))
}

#[derive(Debug, Deserialize)]
struct LogKillBody {
    killer: Option<String>,
    victim: Option<String>,
}

async fn log_kill(
    State(rt): State<Arc<Runtime>>,
    body: Result<Json<LogKillBody>, JsonRejection>,
) -> (StatusCode, &'static str) {
    let Ok(Json(LogKillBody {
        killer: Some(killer),
        victim: Some(victim),
    })) = body
    else {
        return (StatusCode::BAD_REQUEST, "bad data");
    };
    let outcome = rt.ingest_kill(&killer, &victim);
    if outcome.is_invalid() {
        return (StatusCode::BAD_REQUEST, "bad data");
    }
    outcome_reply(&outcome)
}

/// A clan-chat line pulled out of a plugin payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub observer: Option<String>,
    pub message: String,
}

/// `type == "CHAT"`, `extra.type` in `CLAN_CHAT | CLAN_MESSAGE`, string `extra.message`.
pub fn clan_chat_line(payload: &Value) -> Option<ChatLine> {
    if payload.get("type").and_then(Value::as_str) != Some("CHAT") {
        return None;
    }
    let extra = payload.get("extra")?;
    let chat_type = extra.get("type").and_then(Value::as_str)?;
    if !matches!(chat_type, "CLAN_CHAT" | "CLAN_MESSAGE") {
        return None;
    }
    let message = extra.get("message").and_then(Value::as_str)?;
    Some(ChatLine {
        observer: payload
            .get("playerName")
            .and_then(Value::as_str)
            .map(str::to_string),
        message: message.to_string(),
    })
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

/// Raw payload text: the `payload_json` form field, or the whole body.
async fn dink_payload(request: Request) -> Result<Option<String>, (StatusCode, &'static str)> {
    if is_multipart(&request) {
        let mut form = Multipart::from_request(request, &())
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "bad multipart"))?;
        while let Some(field) = form
            .next_field()
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "bad multipart"))?
        {
            if field.name() == Some("payload_json") {
                let text = field
                    .text()
                    .await
                    .map_err(|_| (StatusCode::BAD_REQUEST, "bad multipart"))?;
                return Ok(Some(text));
            }
        }
        return Ok(None);
    }
    let bytes = axum::body::to_bytes(request.into_body(), MAX_DINK_BODY)
        .await
        .map_err(|_| (StatusCode::BAD_REQUEST, "bad body"))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

async fn dink(State(rt): State<Arc<Runtime>>, request: Request) -> Response {
    let raw = match dink_payload(request).await {
        Ok(raw) => raw.filter(|r| !r.trim().is_empty()),
        Err(reply) => return reply.into_response(),
    };
    let Some(raw) = raw else {
        return (StatusCode::BAD_REQUEST, "no payload").into_response();
    };
    let payload: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(_) => return (StatusCode::BAD_REQUEST, "bad JSON").into_response(),
    };
    let Some(line) = clan_chat_line(&payload) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    // ordinary clan chatter is not an error
    if parser::parse(&line.message).is_err() {
        return StatusCode::NO_CONTENT.into_response();
    }
    outcome_reply(&rt.ingest_text(&line.message, line.observer.as_deref(), "dink")).into_response()
}

// ---- boards ----

#[derive(Debug, Default, Deserialize)]
struct BoardParams {
    period: Option<String>,
    name: Option<String>,
    scope: Option<String>,
    limit: Option<usize>,
    format: Option<String>,
}

fn parse_board_request(kind: &str, params: &BoardParams) -> Result<(BoardKind, Period), ApiError> {
    let kind = BoardKind::parse(kind)
        .ok_or_else(|| ApiError::not_found(format!("unknown board {kind}")))?;
    let period = match params.period.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(p) => Period::parse(p).ok_or_else(|| ApiError::bad_request(format!("unknown period {p}")))?,
        None => Period::All,
    };
    Ok((kind, period))
}

fn fetch_board(rt: &Runtime, kind: &str, params: &BoardParams) -> Result<BoardResult, ApiError> {
    let (kind, period) = parse_board_request(kind, params)?;
    Ok(rt.board(
        kind,
        params.scope.as_deref(),
        period,
        params.name.as_deref().filter(|n| !n.trim().is_empty()),
        params.limit,
    ))
}

pub fn board_json(board: &BoardResult) -> Value {
    match board {
        BoardResult::Ranked(ranked) => json!(ranked),
        BoardResult::NoData {
            kind,
            scope,
            period,
        } => json!({
            "no_data": true,
            "kind": kind,
            "scope": scope,
            "period": period,
        }),
    }
}

async fn get_board(
    State(rt): State<Arc<Runtime>>,
    Path(kind): Path<String>,
    Query(params): Query<BoardParams>,
) -> Result<Response, ApiError> {
    let board = fetch_board(&rt, &kind, &params)?;
    if params.format.as_deref() == Some("text") {
        return Ok(render::render_board(&board).into_response());
    }
    Ok(Json(board_json(&board)).into_response())
}

fn csv_response(body: String) -> Response {
    ([(CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response()
}

async fn export_board(
    State(rt): State<Arc<Runtime>>,
    Path(kind): Path<String>,
    Query(params): Query<BoardParams>,
) -> Result<Response, ApiError> {
    let board = fetch_board(&rt, &kind, &params)?;
    Ok(csv_response(render::board_csv(&board)))
}

async fn export_ledger(
    State(rt): State<Arc<Runtime>>,
    Path(kind): Path<String>,
) -> Result<Response, ApiError> {
    let which = match kind.as_str() {
        "kills" => LedgerExport::Kills,
        "loot" => LedgerExport::Loot,
        other => return Err(ApiError::not_found(format!("unknown ledger {other}"))),
    };
    Ok(csv_response(rt.export_ledger(which)))
}

#[derive(Debug, Default, Deserialize)]
struct ScopeParam {
    scope: Option<String>,
}

async fn total_gold(
    State(rt): State<Arc<Runtime>>,
    Query(params): Query<ScopeParam>,
) -> Json<Value> {
    let (scope, total) = rt.total_gold(params.scope.as_deref());
    Json(json!({
        "scope": scope,
        "total_gold": total,
        "text": render::render_total_gold(&scope, total),
    }))
}

// ---- scopes / corrections ----

async fn list_scopes(State(rt): State<Arc<Runtime>>) -> Json<Value> {
    Json(json!({
        "current": rt.current_scope(),
        "scopes": rt.list_scopes(),
    }))
}

#[derive(Debug, Deserialize)]
struct CreateScopeBody {
    name: String,
}

async fn create_scope(
    State(rt): State<Arc<Runtime>>,
    Json(body): Json<CreateScopeBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = rt.create_scope(&body.name).await?;
    Ok((StatusCode::CREATED, Json(json!({ "current": name }))))
}

async fn finish_scope(State(rt): State<Arc<Runtime>>) -> Result<Json<Value>, ApiError> {
    let (finished, path) = rt.finish_scope().await?;
    Ok(Json(json!({
        "finished": finished,
        "archived_to": path.map(|p| p.display().to_string()),
        "current": rt.current_scope(),
    })))
}

#[derive(Debug, Deserialize)]
struct AdjustBody {
    player: String,
    amount: Value,
    scope: Option<String>,
}

async fn adjust(
    State(rt): State<Arc<Runtime>>,
    Json(body): Json<AdjustBody>,
) -> Result<Json<Value>, ApiError> {
    let amount = match &body.amount {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(ApiError::bad_request("amount must be a string or number")),
    };
    let running_total = rt.adjust(&body.player, &amount, body.scope.as_deref())?;
    Ok(Json(json!({
        "player": body.player.trim(),
        "running_total": running_total,
    })))
}

#[derive(Debug, Deserialize)]
struct ResetBody {
    scope: String,
    player: Option<String>,
}

async fn reset(
    State(rt): State<Arc<Runtime>>,
    Json(body): Json<ResetBody>,
) -> Result<Json<Value>, ApiError> {
    let removed = rt.reset(&body.scope, body.player.as_deref()).await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn health(State(rt): State<Arc<Runtime>>) -> Json<Value> {
    Json(json!({ "status": "ok", "state": rt.health() }))
}
