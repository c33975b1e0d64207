/// HTTP API for switching the radio and managing alarms.
///
/// | Route                      | Method | Effect                                   |
/// |----------------------------|--------|------------------------------------------|
/// | `/radio`, `/radio/status`  | GET    | `{"isPlaying": bool}` (persisted intent) |
/// | `/radio`                   | POST   | `{"switch": "on" \| "off"}`              |
/// | `/alarm`                   | GET    | all alarms                               |
/// | `/alarm`                   | POST   | append one alarm                         |
/// | `/alarm/{index}`           | GET    | one alarm                                |
/// | `/alarm/{index}`           | PUT    | merge fields into one alarm              |
/// | `/alarm/{index}`           | DELETE | remove one alarm                         |
///
/// Bodies are decoded from raw bytes so that undecodable JSON maps to 400
/// like every other client error.
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::alarm::Alarm;
use crate::error::Error;
use crate::event::DaemonEvent;
use crate::player::Playback;
use crate::store::{ConfigStore, Intent};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub player: Arc<dyn Playback>,
    /// Receives manual on/off switches for the status file.
    pub events: Option<mpsc::Sender<DaemonEvent>>,
    /// Alarm window length, used to flag windows cut off at midnight.
    pub window_minutes: u32,
}

impl AppState {
    fn notify(&self, event: DaemonEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                warn!(error = %e, "Dropped daemon event");
            }
        }
    }
}

/// Error response: maps the error taxonomy onto HTTP status codes with a
/// `{"error": "..."}` body.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::PathNotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::MalformedRequestBody(_) => StatusCode::BAD_REQUEST,
            Error::Persistence { .. } | Error::PlayerSpawn { .. } => {
                error!(error = %self.0, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct RadioStatusBody {
    #[serde(rename = "isPlaying")]
    is_playing: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/radio", get(get_radio).post(switch_radio).options(preflight))
        .route("/radio/{action}", get(get_radio_action).options(preflight))
        .route("/alarm", get(list_alarms).post(create_alarm).options(preflight))
        .route(
            "/alarm/{index}",
            get(get_alarm)
                .put(update_alarm)
                .delete(delete_alarm)
                .options(preflight),
        )
        .layer(middleware::map_response(cors_headers))
        .with_state(state)
}

// ── /radio ────────────────────────────────────────────────────────────────────

async fn get_radio(State(state): State<AppState>) -> Json<RadioStatusBody> {
    Json(RadioStatusBody {
        is_playing: state.store.playing(),
    })
}

async fn get_radio_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> ApiResult<Json<RadioStatusBody>> {
    if action != "status" {
        return Err(Error::path_not_found(format!("radio/{action}")).into());
    }
    Ok(get_radio(State(state)).await)
}

async fn switch_radio(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<RadioStatusBody>> {
    let request = parse_json(&body)?;
    let on = match request.get("switch") {
        None | Some(Value::Null) => {
            return Err(Error::Validation("JSON key `switch` is missing".to_string()).into())
        }
        Some(Value::String(s)) if s == "on" => true,
        Some(Value::String(s)) if s == "off" => false,
        Some(other) => {
            return Err(Error::Validation(format!(
                "`switch` must be \"on\" or \"off\", got {other}"
            ))
            .into())
        }
    };

    state.store.with_intent(|intent| {
        if on {
            state.player.start()?;
        } else {
            state.player.stop();
        }
        *intent = Intent {
            playing: on,
            by_alarm: false,
        };
        Ok(())
    })?;
    info!(on, "Radio switched");
    state.notify(DaemonEvent::PlaybackSwitched(on));

    Ok(Json(RadioStatusBody {
        is_playing: state.store.playing(),
    }))
}

// ── /alarm ────────────────────────────────────────────────────────────────────

async fn list_alarms(State(state): State<AppState>) -> ApiResult<Json<Vec<Value>>> {
    Ok(Json(state.store.alarms()?))
}

async fn get_alarm(
    State(state): State<AppState>,
    Path(index): Path<String>,
) -> ApiResult<Json<Value>> {
    let index = parse_index(&index)?;
    Ok(Json(state.store.alarm(index)?))
}

async fn create_alarm(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Vec<Value>>)> {
    let alarm = Alarm::from_value(&parse_json(&body)?)?;
    warn_if_truncated(&alarm, state.window_minutes);
    let alarms = state.store.append_alarm(&alarm)?;
    info!(alarm = %alarm.name, index = alarms.len() - 1, "Alarm added");
    Ok((StatusCode::CREATED, Json(alarms)))
}

async fn update_alarm(
    State(state): State<AppState>,
    Path(index): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let index = parse_index(&index)?;
    let Value::Object(fields) = parse_json(&body)? else {
        return Err(Error::MalformedRequestBody(
            "expected a JSON object of alarm fields".to_string(),
        )
        .into());
    };
    let alarm = state.store.merge_alarm(index, &fields)?;
    warn_if_truncated(&alarm, state.window_minutes);
    info!(alarm = %alarm.name, index, "Alarm updated");
    Ok((StatusCode::ACCEPTED, Json(alarm.to_value())))
}

async fn delete_alarm(
    State(state): State<AppState>,
    Path(index): Path<String>,
) -> ApiResult<(StatusCode, Json<Vec<Value>>)> {
    let index = parse_index(&index)?;
    let alarms = state.store.remove_alarm(index)?;
    info!(index, "Alarm removed");
    Ok((StatusCode::ACCEPTED, Json(alarms)))
}

// ── helpers ───────────────────────────────────────────────────────────────────

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, PUT, DELETE"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
    // 20 days
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("1728000"));
    response
}

fn parse_json(body: &[u8]) -> Result<Value, Error> {
    serde_json::from_slice(body).map_err(|e| Error::MalformedRequestBody(e.to_string()))
}

fn parse_index(raw: &str) -> Result<usize, Error> {
    raw.parse()
        .map_err(|_| Error::path_not_found(format!("alarm/{raw}")))
}

fn warn_if_truncated(alarm: &Alarm, window_minutes: u32) {
    let window = alarm.window(window_minutes);
    if window.is_truncated() {
        warn!(alarm = %alarm.name, %window, "Alarm window is cut off at midnight");
    }
}
