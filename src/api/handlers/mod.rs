use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use super::{LoopbackState, RemotePhase, RemoteSession};
use crate::client::wire::*;
use crate::client::ModelFormat;
use crate::models::*;

// ============================================================
// Error Handling
// ============================================================

type ApiError = (StatusCode, Json<MessageBody>);

/// Every error body carries a `message`, like the hosted service.
fn reject(status: StatusCode, message: impl Into<String>) -> ApiError {
    let message = message.into();
    tracing::warn!(%status, %message, "loopback rejected request");
    (
        status,
        Json(MessageBody {
            message: Some(message),
        }),
    )
}

fn not_found(id: &str) -> ApiError {
    reject(StatusCode::NOT_FOUND, format!("session {} not found", id))
}

fn busy(id: &str) -> ApiError {
    reject(StatusCode::CONFLICT, format!("session {} is running", id))
}

fn ack(message: &str) -> Json<MessageBody> {
    Json(MessageBody {
        message: Some(message.to_string()),
    })
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.body_text()))
}

impl LoopbackState {
    fn with_session<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut RemoteSession) -> Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        let mut sessions = self.sessions.lock().expect("loopback lock poisoned");
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        f(session)
    }
}

// ============================================================
// Health
// ============================================================

pub async fn health(State(state): State<LoopbackState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        version: state.config.version.clone(),
        build_time: String::new(),
        message: "loopback".to_string(),
    })
}

// ============================================================
// Models
// ============================================================

pub async fn upload(
    State(state): State<LoopbackState>,
    mut multipart: Multipart,
) -> Result<Json<IdResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        ModelFormat::from_file_name(&file_name)
            .map_err(|_| reject(StatusCode::BAD_REQUEST, "unsupported model format"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| reject(StatusCode::BAD_REQUEST, e.body_text()))?;
        if bytes.is_empty() {
            return Err(reject(StatusCode::BAD_REQUEST, "empty model"));
        }

        let id = state.insert_model(bytes.to_vec());
        tracing::info!(%id, %file_name, "model uploaded");
        return Ok(Json(IdResponse { id, message: None }));
    }
    Err(reject(StatusCode::BAD_REQUEST, "missing file field"))
}

pub async fn download_model(
    State(state): State<LoopbackState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.with_session(&id, |s| {
        Ok(s.phases
            .last()
            .map(|p| p.bytes.clone())
            .unwrap_or_else(|| s.model.clone()))
    })?;
    Ok(octet_stream(bytes))
}

pub async fn download_phase(
    State(state): State<LoopbackState>,
    Path((session_id, phase_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.with_session(&session_id, |s| {
        s.phases
            .iter()
            .find(|p| p.id == phase_id)
            .map(|p| p.bytes.clone())
            .ok_or_else(|| {
                reject(
                    StatusCode::NOT_FOUND,
                    format!("phase {} not found", phase_id),
                )
            })
    })?;
    Ok(octet_stream(bytes))
}

fn octet_stream(bytes: Arc<Vec<u8>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes.as_ref().clone(),
    )
}

// ============================================================
// Sessions
// ============================================================

pub async fn configure(
    State(state): State<LoopbackState>,
    Path(id): Path<String>,
    payload: Result<Json<ConfigRequest>, JsonRejection>,
) -> Result<Json<MessageBody>, ApiError> {
    let request = body(payload)?;
    if let Err(e) = request.percent.validate() {
        return Err(reject(StatusCode::BAD_REQUEST, e.to_string()));
    }
    state.with_session(&id, |s| {
        if s.running {
            return Err(busy(&id));
        }
        s.configuration = Some(request.percent);
        Ok(())
    })?;
    Ok(ack("configured"))
}

pub async fn run(
    State(state): State<LoopbackState>,
    Path(id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let (configuration, model) = state.with_session(&id, |s| {
        if s.running {
            return Err(busy(&id));
        }
        let configuration = s
            .configuration
            .clone()
            .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "session is not configured"))?;
        s.running = true;
        Ok((configuration, s.model.clone()))
    })?;

    // The computation finishes even if the caller hangs up.
    let worker = tokio::spawn(compute(state.clone(), id.clone(), configuration, model));
    worker
        .await
        .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map(Json)
}

async fn compute(
    state: LoopbackState,
    id: SessionId,
    configuration: Configuration,
    model: Arc<Vec<u8>>,
) -> Result<RunResponse, ApiError> {
    if !state.config.run_delay.is_zero() {
        tokio::time::sleep(state.config.run_delay).await;
    }

    let ratio = configuration.mean_ratio().unwrap_or(0.0);
    let count = state.config.phases_per_run;
    state.with_session(&id, |s| {
        s.running = false;
        let mut ids = Vec::with_capacity(count);
        for step in 1..=count {
            // Each phase keeps a little less of the model than the last.
            let keep = 1.0 - ratio * step as f64 / count as f64;
            let len = ((model.len() as f64 * keep).ceil() as usize).clamp(1, model.len().max(1));
            let phase_id = Uuid::new_v4().to_string();
            s.phases.push(RemotePhase {
                id: phase_id.clone(),
                bytes: Arc::new(model.iter().take(len).copied().collect()),
                rating: None,
            });
            ids.push(phase_id);
        }
        tracing::info!(session = %id, phases = ids.len(), "run complete");
        Ok(RunResponse {
            ids,
            optimal: ratio.clamp(0.0, 1.0),
            message: None,
        })
    })
}

/// `GET /evaluate/{id}`: phases still awaiting a rating.
pub async fn inspect(
    State(state): State<LoopbackState>,
    Path(id): Path<String>,
) -> Result<Json<InspectResponse>, ApiError> {
    let ids = state.with_session(&id, |s| {
        Ok(s.phases
            .iter()
            .filter(|p| p.rating.is_none())
            .map(|p| p.id.clone())
            .collect())
    })?;
    Ok(Json(InspectResponse { ids, message: None }))
}

pub async fn evaluate(
    State(state): State<LoopbackState>,
    Path(id): Path<String>,
    payload: Result<Json<EvaluateRequest>, JsonRejection>,
) -> Result<Json<MessageBody>, ApiError> {
    let ratings = body(payload)?;
    state.with_session(&id, |s| {
        for phase_id in ratings.keys() {
            match s.phases.iter().find(|p| &p.id == phase_id) {
                Some(phase) if phase.rating.is_some() => {
                    return Err(reject(
                        StatusCode::BAD_REQUEST,
                        format!("phase {} already evaluated", phase_id),
                    ));
                }
                Some(_) => {}
                None => {
                    return Err(reject(
                        StatusCode::NOT_FOUND,
                        format!("phase {} not found", phase_id),
                    ));
                }
            }
        }
        for phase in s.phases.iter_mut() {
            if let Some(&score) = ratings.get(&phase.id) {
                phase.rating = Some(score);
            }
        }
        Ok(())
    })?;
    Ok(ack("evaluated"))
}

pub async fn reset(
    State(state): State<LoopbackState>,
    Path(id): Path<String>,
) -> Result<Json<IdResponse>, ApiError> {
    state.with_session(&id, |s| {
        if s.running {
            return Err(busy(&id));
        }
        s.configuration = None;
        s.phases.clear();
        Ok(())
    })?;
    Ok(Json(IdResponse { id, message: None }))
}

pub async fn copy(
    State(state): State<LoopbackState>,
    Path(id): Path<String>,
) -> Result<Json<IdResponse>, ApiError> {
    let new_id = Uuid::new_v4().to_string();
    let mut sessions = state.sessions.lock().expect("loopback lock poisoned");
    let source = sessions.get(&id).ok_or_else(|| not_found(&id))?;
    if source.running {
        return Err(busy(&id));
    }
    let branch = RemoteSession::new(source.model.clone());
    sessions.insert(new_id.clone(), branch);
    tracing::info!(source = %id, branch = %new_id, "session copied");
    Ok(Json(IdResponse {
        id: new_id,
        message: None,
    }))
}
