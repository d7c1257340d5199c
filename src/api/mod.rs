//! HTTP API for remote presses, control inspection and the emulator
//!
//! Every handler talks to the hub through [`HubHandle::invoke`], so requests
//! are serialized with surface input and timers. Emulator draws are streamed
//! over `/api/ws/draws`.

use crate::controls::model::ControlModel;
use crate::controls::DrawStyle;
use crate::error::ControlError;
use crate::hub::{Hub, HubHandle};
use crate::page::ControlLocation;
use crate::references::ReferencesCollector;
use crate::surface::{DrawEvent, EmulatorPanel, SurfaceInputEvent};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{StreamExt, StreamMap};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared state for API handlers
pub struct ApiState {
    pub hub: HubHandle,
    /// Emulator panels by surface id
    pub emulators: BTreeMap<String, Arc<EmulatorPanel>>,
}

impl ApiState {
    pub fn new(hub: HubHandle, emulators: impl IntoIterator<Item = Arc<EmulatorPanel>>) -> Self {
        let emulators = emulators
            .into_iter()
            .map(|panel| (crate::surface::SurfacePanel::id(panel.as_ref()).to_string(), panel))
            .collect();
        Self { hub, emulators }
    }

    /// Run `f` on the hub, mapping a stopped hub to 503
    async fn with_hub<R, F>(&self, f: F) -> Result<R, ApiError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Hub) -> R + Send + 'static,
    {
        self.hub.invoke(f).await.ok_or_else(|| ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: "Hub is not running".to_string(),
        })
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ApiError {
    fn not_found(what: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: what.into(),
        }
    }

    fn bad_request(what: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: what.into(),
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SetValueRequest {
    pub value: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnlockRequest {
    #[serde(default)]
    pub pin: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedControl {
    pub control_id: String,
}

/// Connections and variables a control refers to, sorted
#[derive(Debug, Serialize)]
pub struct ControlReferences {
    pub connection_ids: BTreeSet<String>,
    pub connection_labels: BTreeSet<String>,
    pub variable_ids: BTreeSet<String>,
}

impl From<ReferencesCollector> for ControlReferences {
    fn from(collector: ReferencesCollector) -> Self {
        Self {
            connection_ids: collector.connection_ids.into_iter().collect(),
            connection_labels: collector.connection_labels.into_iter().collect(),
            variable_ids: collector.variable_ids.into_iter().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StyleResponse {
    pub control_id: Option<String>,
    pub style: Option<DrawStyle>,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/location/:page/:row/:column/press", post(location_press))
        .route("/api/location/:page/:row/:column/down", post(location_down))
        .route("/api/location/:page/:row/:column/up", post(location_up))
        .route("/api/location/:page/:row/:column/rotate-left", post(location_rotate_left))
        .route("/api/location/:page/:row/:column/rotate-right", post(location_rotate_right))
        .route("/api/location/:page/:row/:column/style", get(location_style))
        .route("/api/location/:page/:row/:column/control", post(create_control))
        .route("/api/controls/:id", get(get_control).delete(delete_control))
        .route("/api/controls/:id/references", get(control_references))
        .route("/api/custom-variable/:name/value", post(set_custom_variable))
        .route("/api/surfaces/:id/lock", post(lock_surface))
        .route("/api/surfaces/:id/unlock", post(unlock_surface))
        .route("/api/surfaces/:id/input", post(surface_input))
        .route("/api/ws/draws", get(draws_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /api/health
async fn health_check() -> &'static str {
    "ok"
}

fn location(page: u32, row: i32, column: i32) -> ControlLocation {
    ControlLocation::new(page, row, column)
}

/// Press then release, like a tap on the surface
async fn location_press(
    Path((page, row, column)): Path<(u32, i32, i32)>,
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Value> {
    let loc = location(page, row, column);
    let handled = state
        .with_hub(move |hub| {
            let handled = hub.press_location(loc, true, None);
            hub.press_location(loc, false, None);
            handled
        })
        .await?;
    pressed_response(loc, handled)
}

async fn location_down(
    Path((page, row, column)): Path<(u32, i32, i32)>,
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Value> {
    let loc = location(page, row, column);
    let handled = state.with_hub(move |hub| hub.press_location(loc, true, None)).await?;
    pressed_response(loc, handled)
}

async fn location_up(
    Path((page, row, column)): Path<(u32, i32, i32)>,
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Value> {
    let loc = location(page, row, column);
    let handled = state.with_hub(move |hub| hub.press_location(loc, false, None)).await?;
    pressed_response(loc, handled)
}

async fn location_rotate_left(
    Path((page, row, column)): Path<(u32, i32, i32)>,
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Value> {
    let loc = location(page, row, column);
    let handled = state.with_hub(move |hub| hub.rotate_location(loc, false, None)).await?;
    pressed_response(loc, handled)
}

async fn location_rotate_right(
    Path((page, row, column)): Path<(u32, i32, i32)>,
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Value> {
    let loc = location(page, row, column);
    let handled = state.with_hub(move |hub| hub.rotate_location(loc, true, None)).await?;
    pressed_response(loc, handled)
}

fn pressed_response(loc: ControlLocation, handled: bool) -> ApiResult<Value> {
    if !handled {
        return Err(ApiError::not_found(format!("No control at {}", loc)));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// GET /api/location/:page/:row/:column/style
async fn location_style(
    Path((page, row, column)): Path<(u32, i32, i32)>,
    State(state): State<Arc<ApiState>>,
) -> ApiResult<StyleResponse> {
    let loc = location(page, row, column);
    let response = state
        .with_hub(move |hub| StyleResponse {
            control_id: hub.pages().get_control_id_at(&loc).cloned(),
            style: hub.draw_style_at(loc),
        })
        .await?;
    Ok(Json(response))
}

/// POST /api/location/:page/:row/:column/control - create (or replace) a control
async fn create_control(
    Path((page, row, column)): Path<(u32, i32, i32)>,
    State(state): State<Arc<ApiState>>,
    Json(model): Json<ControlModel>,
) -> ApiResult<CreatedControl> {
    let loc = location(page, row, column);
    let control_id = state
        .with_hub(move |hub| hub.create_control_at(loc, model))
        .await??;
    info!("Control {} created at {} through the API", control_id, loc);
    Ok(Json(CreatedControl { control_id }))
}

async fn get_control(Path(id): Path<String>, State(state): State<Arc<ApiState>>) -> ApiResult<ControlModel> {
    let lookup = id.clone();
    state
        .with_hub(move |hub| hub.control_model(&lookup))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Unknown control '{}'", id)))
}

/// GET /api/controls/:id/references
async fn control_references(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> ApiResult<ControlReferences> {
    let lookup = id.clone();
    state
        .with_hub(move |hub| hub.controls_mut().collect_references(&lookup))
        .await?
        .map(|collector| Json(collector.into()))
        .ok_or_else(|| ApiError::not_found(format!("Unknown control '{}'", id)))
}

async fn delete_control(Path(id): Path<String>, State(state): State<Arc<ApiState>>) -> ApiResult<Value> {
    let lookup = id.clone();
    if !state.with_hub(move |hub| hub.delete_control(&lookup)).await? {
        return Err(ApiError::not_found(format!("Unknown control '{}'", id)));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// POST /api/custom-variable/:name/value
async fn set_custom_variable(
    Path(name): Path<String>,
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SetValueRequest>,
) -> ApiResult<Value> {
    let lookup = name.clone();
    if !state
        .with_hub(move |hub| hub.set_custom_variable_value(&lookup, req.value))
        .await?
    {
        return Err(ApiError::not_found(format!("Unknown custom variable '{}'", name)));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn lock_surface(Path(id): Path<String>, State(state): State<Arc<ApiState>>) -> ApiResult<Value> {
    let surface_id = id.clone();
    let locked = state.with_hub(move |hub| hub.lock_surface(&surface_id)).await?;
    Ok(Json(serde_json::json!({ "ok": locked })))
}

async fn unlock_surface(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
    body: Option<Json<UnlockRequest>>,
) -> ApiResult<Value> {
    let pin = body.and_then(|Json(req)| req.pin);
    let surface_id = id.clone();
    let unlocked = state
        .with_hub(move |hub| hub.unlock_surface(&surface_id, pin.as_deref()))
        .await?;
    if !unlocked {
        return Err(ApiError {
            status: StatusCode::FORBIDDEN,
            error: format!("Surface '{}' not unlocked", id),
        });
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// POST /api/surfaces/:id/input - raw key event from an emulator client
async fn surface_input(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
    Json(event): Json<SurfaceInputEvent>,
) -> ApiResult<Value> {
    if !state.emulators.contains_key(&id) {
        return Err(ApiError::not_found(format!("Unknown emulator '{}'", id)));
    }
    state.hub.surface_input(&id, event);
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// GET /api/ws/draws - current faces, then every draw as it happens
async fn draws_ws(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(mut socket: WebSocket, state: Arc<ApiState>) {
    debug!("WebSocket client connected for draws");

    let mut draws = StreamMap::new();
    for (id, panel) in &state.emulators {
        draws.insert(id.clone(), BroadcastStream::new(panel.subscribe()));
    }

    let initial: Vec<DrawEvent> = state.emulators.values().flat_map(|p| p.snapshot()).collect();
    for draw in initial {
        if send_draw(&mut socket, &draw).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            next = draws.next(), if !draws.is_empty() => {
                match next {
                    Some((_, Ok(draw))) => {
                        if send_draw(&mut socket, &draw).await.is_err() {
                            debug!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Some((id, Err(BroadcastStreamRecvError::Lagged(n)))) => {
                        warn!("WebSocket client lagged by {} draws on '{}'", n, id);
                    }
                    None => break,
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

async fn send_draw(socket: &mut WebSocket, draw: &DrawEvent) -> Result<()> {
    let msg = serde_json::to_string(draw).context("Failed to serialize draw")?;
    socket.send(Message::Text(msg)).await.context("WebSocket send failed")?;
    Ok(())
}

/// Serve the API until `shutdown` resolves
pub async fn start_server(
    state: Arc<ApiState>,
    bind: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind API server to {}", bind))?;
    info!("API server listening on http://{}", bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ConnectionRegistry;
    use crate::controls::model::ButtonModel;
    use crate::page::PageStore;
    use crate::surface::SurfaceController;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn spawn_hub() -> (Arc<ApiState>, Arc<EmulatorPanel>) {
        let (handle, rx) = HubHandle::channel();
        let mut hub = Hub::new(
            handle.clone(),
            Arc::new(ConnectionRegistry::new()),
            PageStore::new(2, 4, 8),
            SurfaceController::new(&[], 1),
            None,
        );
        let emulator = Arc::new(EmulatorPanel::new("emu", 8, 4));
        hub.add_surface(emulator.clone(), None);
        hub.spawn(rx);
        (Arc::new(ApiState::new(handle, [emulator.clone()])), emulator)
    }

    async fn call(state: &Arc<ApiState>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = build_router(state.clone())
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = spawn_hub();
        let response = build_router(state)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_then_inspect_control() {
        let (state, emulator) = spawn_hub();
        let mut model = ButtonModel::default();
        model.style.text = "API".to_string();
        let body = serde_json::to_value(ControlModel::Button(model)).unwrap();

        let (status, created) = call(&state, "POST", "/api/location/1/0/2/control", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        let id = created["control_id"].as_str().unwrap().to_string();

        let (status, style) = call(&state, "GET", "/api/location/1/0/2/style", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(style["control_id"], Value::from(id.clone()));
        assert_eq!(style["style"]["text"], Value::from("API"));

        let (status, _) = call(&state, "GET", &format!("/api/controls/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(emulator.key(2, 0).is_some());

        let (status, _) = call(&state, "POST", "/api/location/1/0/2/press", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&state, "DELETE", &format!("/api/controls/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&state, "GET", &format!("/api/controls/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_control_references_lists_variables() {
        let (state, _) = spawn_hub();
        let mut model = ButtonModel::default();
        model.style.text = "$(custom:mode) on $(desk:x)".to_string();
        let body = serde_json::to_value(ControlModel::Button(model)).unwrap();
        let (_, created) = call(&state, "POST", "/api/location/1/0/0/control", Some(body)).await;
        let id = created["control_id"].as_str().unwrap().to_string();

        let (status, refs) = call(&state, "GET", &format!("/api/controls/{}/references", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refs["connection_labels"], serde_json::json!(["custom", "desk"]));
        assert_eq!(refs["variable_ids"], serde_json::json!(["custom:mode", "desk:x"]));

        let (status, _) = call(&state, "GET", "/api/controls/bank:none/references", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_press_on_empty_slot_is_not_found() {
        let (state, _) = spawn_hub();
        let (status, body) = call(&state, "POST", "/api/location/1/3/3/down", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("1/3/3"));
    }

    #[tokio::test]
    async fn test_invalid_location_is_bad_request() {
        let (state, _) = spawn_hub();
        let body = serde_json::to_value(ControlModel::PageUp).unwrap();
        let (status, _) = call(&state, "POST", "/api/location/7/0/0/control", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_custom_variable() {
        let (state, _) = spawn_hub();
        let (status, _) = call(
            &state,
            "POST",
            "/api/custom-variable/nope/value",
            Some(serde_json::json!({ "value": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state
            .hub
            .invoke(|hub| hub.create_custom_variable("mode", Value::from("a")))
            .await
            .unwrap();
        let (status, _) = call(
            &state,
            "POST",
            "/api/custom-variable/mode/value",
            Some(serde_json::json!({ "value": "b" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value = state
            .hub
            .invoke(|hub| hub.variables().get_value("custom:mode").cloned())
            .await
            .unwrap();
        assert_eq!(value, Some(Value::from("b")));
    }
}
