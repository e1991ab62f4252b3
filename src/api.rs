use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tokio::task::spawn_blocking;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    config::AppConfig,
    linker::{self, AnalysisOptions},
    models::{AnalysisReport, Resolution},
};

type ApiError = (StatusCode, Json<Value>);

/// Cuerpo de la petición. Los fallos de extracción se traducen a errores
/// propios de la API en lugar de la respuesta por defecto de axum.
type Payload = Result<Json<Value>, JsonRejection>;

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/workflow/analyze", post(analyze_handler))
        .route("/api/workflow/resolve", post(resolve_handler))
        .route("/api/models", get(list_models_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn resolve_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message, "success": false })))
}

// --- Lectura de Payloads ---

fn parse_body(payload: Payload) -> Result<Value, String> {
    match payload {
        Ok(Json(body)) if body.is_object() => Ok(body),
        Ok(_) => Err("El cuerpo de la petición debe ser un objeto JSON.".to_string()),
        Err(rejection) => {
            warn!("Cuerpo de petición rechazado: {}", rejection.body_text());
            Err(format!("Cuerpo JSON inválido: {}", rejection.body_text()))
        }
    }
}

/// Exige un documento con una lista `nodes`.
fn require_workflow(body: &mut Value) -> Result<Value, &'static str> {
    match body.get_mut("workflow").map(Value::take) {
        None | Some(Value::Null) => Err("No se ha proporcionado el workflow."),
        Some(wf) if wf.get("nodes").is_some_and(Value::is_array) => Ok(wf),
        Some(_) => Err("El workflow no es válido: falta la lista 'nodes'."),
    }
}

fn analysis_options(body: &Value, config: &AppConfig) -> Result<AnalysisOptions, &'static str> {
    let similarity_threshold = match body.get("similarity_threshold") {
        None | Some(Value::Null) => config.similarity_threshold,
        Some(v) => v.as_f64().ok_or("similarity_threshold debe ser numérico.")?,
    };
    if !(0.0..=1.0).contains(&similarity_threshold) {
        return Err("similarity_threshold debe estar entre 0 y 1.");
    }

    let max_matches_per_model = match body.get("max_matches") {
        None | Some(Value::Null) => config.max_matches_per_model,
        Some(v) => v
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or("max_matches debe ser un entero positivo.")?,
    };

    Ok(AnalysisOptions {
        similarity_threshold,
        max_matches_per_model,
        model_extensions: config.model_extensions.clone(),
    })
}

/// Lee las resoluciones una a una; las que no encajan se descartan con un
/// aviso sin invalidar el resto del lote.
fn parse_resolutions(body: &Value) -> Result<Vec<Resolution>, &'static str> {
    let items = match body.get("resolutions") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Err("No se han proporcionado resoluciones."),
    };

    let resolutions: Vec<Resolution> = items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| match serde_json::from_value(item.clone()) {
            Ok(resolution) => Some(resolution),
            Err(e) => {
                warn!("Resolución {} descartada: {}", idx, e);
                None
            }
        })
        .collect();

    info!("{} de {} resoluciones aceptadas.", resolutions.len(), items.len());
    Ok(resolutions)
}

// --- Handlers ---

#[axum::debug_handler]
async fn analyze_handler(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<Json<AnalysisReport>, ApiError> {
    let mut body = parse_body(payload).map_err(|msg| bad_request(&msg))?;
    let workflow = require_workflow(&mut body).map_err(bad_request)?;
    let options = analysis_options(&body, &state.config).map_err(bad_request)?;

    let inventory = state.inventory.clone();
    let result = spawn_blocking(move || {
        linker::analyze_and_find_matches(&workflow, inventory.as_ref(), &options)
    })
    .await;

    match result {
        Ok(Ok(report)) => Ok(Json(report)),
        Ok(Err(e)) => {
            error!("Error analizando el workflow: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Error al analizar el workflow: {}", e) })),
            ))
        }
        Err(e) => {
            error!("La tarea de análisis falló: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Error interno: {}", e) })),
            ))
        }
    }
}

#[axum::debug_handler]
async fn resolve_handler(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<Json<Value>, ApiError> {
    let mut body = parse_body(payload).map_err(|msg| resolve_error(&msg))?;
    let workflow = require_workflow(&mut body).map_err(resolve_error)?;
    let resolutions = parse_resolutions(&body).map_err(resolve_error)?;

    let formatter = state.formatter.clone();
    let result = spawn_blocking(move || {
        linker::apply_resolution(workflow, &resolutions, formatter.as_deref())
    })
    .await;

    match result {
        Ok(workflow) => Ok(Json(json!({ "workflow": workflow, "success": true }))),
        Err(e) => {
            error!("La tarea de resolución falló: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Error interno: {}", e), "success": false })),
            ))
        }
    }
}

#[axum::debug_handler]
async fn list_models_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let inventory = state.inventory.clone();
    let result = spawn_blocking(move || inventory.list_assets()).await;

    match result {
        Ok(Ok(models)) => Ok(Json(json!({ "total": models.len(), "models": models }))),
        Ok(Err(e)) => {
            error!("Error listando modelos: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Error al listar los modelos: {}", e) })),
            ))
        }
        Err(e) => {
            error!("La tarea de inventario falló: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Error interno: {}", e) })),
            ))
        }
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "roots": state.config.models_dirs }))
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
