use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{ApiContext, ListScope};
use shared::{
    domain::{ControlId, FileId, SubitemId, UserSummary},
    error::{ApiError, ErrorCode},
    protocol::{
        ControlDetail, ControlFilePayload, ControlForm, ControlSummary, CreateUserRequest,
        CreatedUser, DeleteConfirmation, FormSchema, NewSubitemRequest, SubitemPayload,
    },
};
use storage::{media::LocalMediaStore, Storage};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

type HttpError = (StatusCode, Json<ApiError>);

const LIST_URL: &str = "/";

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    scope: ListScope,
}

#[derive(Debug, Deserialize)]
struct FileUploadQuery {
    filename: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    info!(media_root = %settings.media_root.display(), "using local file storage");
    let api = ApiContext {
        storage,
        media: Arc::new(LocalMediaStore::new(settings.media_root.clone())),
    };

    let state = AppState {
        api,
        max_upload_bytes: settings.max_upload_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .route("/", get(http_list_controls))
        .route("/healthz", get(healthz))
        .route("/users/", get(http_list_users).post(http_create_user))
        .route(
            "/control/create/",
            get(http_create_form).post(http_create_control),
        )
        .route("/control/:control_id/", get(http_control_detail))
        .route(
            "/control/:control_id/update/",
            get(http_edit_form).post(http_update_control),
        )
        .route(
            "/control/:control_id/delete/",
            get(http_delete_confirmation).post(http_delete_control),
        )
        .route("/control/:control_id/subitems/", post(http_add_subitem))
        .route(
            "/control/:control_id/subitems/:subitem_id/delete/",
            post(http_delete_subitem),
        )
        .route("/control/:control_id/files/", post(http_upload_file))
        .route(
            "/control/:control_id/files/:file_id/",
            get(http_download_file),
        )
        .route(
            "/control/:control_id/files/:file_id/delete/",
            post(http_delete_file),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn http_error(error: ApiError) -> HttpError {
    let status = match error.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error))
}

/// Path ids that are not integers cannot name a row, so they are a 404.
fn parse_id(raw: &str) -> Result<i64, HttpError> {
    raw.parse::<i64>()
        .map_err(|_| http_error(ApiError::not_found("no such record")))
}

/// Malformed or mistyped JSON bodies become validation errors with the
/// usual `ApiError` shape.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<Json<T>, HttpError> {
    body.map_err(|rejection| {
        http_error(ApiError::new(ErrorCode::Validation, rejection.body_text()))
    })
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_list_controls(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ControlSummary>>, HttpError> {
    let controls = server_api::list_controls(&state.api, q.scope)
        .await
        .map_err(http_error)?;
    Ok(Json(controls))
}

async fn http_control_detail(
    State(state): State<Arc<AppState>>,
    Path(control_id): Path<String>,
) -> Result<Json<ControlDetail>, HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    let detail = server_api::control_detail(&state.api, control_id)
        .await
        .map_err(http_error)?;
    Ok(Json(detail))
}

async fn http_create_form(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FormSchema>, HttpError> {
    let schema = server_api::create_form(&state.api)
        .await
        .map_err(http_error)?;
    Ok(Json(schema))
}

async fn http_create_control(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ControlForm>, JsonRejection>,
) -> Result<Redirect, HttpError> {
    let Json(form) = json_body(body)?;
    server_api::create_control(&state.api, &form)
        .await
        .map_err(http_error)?;
    Ok(Redirect::to(LIST_URL))
}

async fn http_edit_form(
    State(state): State<Arc<AppState>>,
    Path(control_id): Path<String>,
) -> Result<Json<FormSchema>, HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    let schema = server_api::edit_form(&state.api, control_id)
        .await
        .map_err(http_error)?;
    Ok(Json(schema))
}

async fn http_update_control(
    State(state): State<Arc<AppState>>,
    Path(control_id): Path<String>,
    body: Result<Json<ControlForm>, JsonRejection>,
) -> Result<Redirect, HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    let Json(form) = json_body(body)?;
    server_api::update_control(&state.api, control_id, &form)
        .await
        .map_err(http_error)?;
    Ok(Redirect::to(LIST_URL))
}

async fn http_delete_confirmation(
    State(state): State<Arc<AppState>>,
    Path(control_id): Path<String>,
) -> Result<Json<DeleteConfirmation>, HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    let confirmation = server_api::delete_confirmation(&state.api, control_id)
        .await
        .map_err(http_error)?;
    Ok(Json(confirmation))
}

async fn http_delete_control(
    State(state): State<Arc<AppState>>,
    Path(control_id): Path<String>,
) -> Result<Redirect, HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    server_api::delete_control(&state.api, control_id)
        .await
        .map_err(http_error)?;
    Ok(Redirect::to(LIST_URL))
}

async fn http_add_subitem(
    State(state): State<Arc<AppState>>,
    Path(control_id): Path<String>,
    body: Result<Json<NewSubitemRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubitemPayload>), HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    let Json(request) = json_body(body)?;
    let subitem = server_api::add_subitem(&state.api, control_id, &request)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(subitem)))
}

async fn http_delete_subitem(
    State(state): State<Arc<AppState>>,
    Path((control_id, subitem_id)): Path<(String, String)>,
) -> Result<StatusCode, HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    let subitem_id = SubitemId(parse_id(&subitem_id)?);
    server_api::delete_subitem(&state.api, control_id, subitem_id)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_upload_file(
    State(state): State<Arc<AppState>>,
    Path(control_id): Path<String>,
    Query(q): Query<FileUploadQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<ControlFilePayload>), HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    let stored = server_api::upload_file(&state.api, control_id, q.filename.as_deref(), &body)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn http_download_file(
    State(state): State<Arc<AppState>>,
    Path((control_id, file_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    let file_id = FileId(parse_id(&file_id)?);
    let (file, bytes) = server_api::download_file(&state.api, control_id, file_id)
        .await
        .map_err(http_error)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&file.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((StatusCode::OK, headers, bytes))
}

/// Quoted-string form; backslashes and quotes are escaped so the name
/// cannot end the parameter early.
fn content_disposition(filename: &str) -> String {
    let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
    format!("attachment; filename=\"{escaped}\"")
}

async fn http_delete_file(
    State(state): State<Arc<AppState>>,
    Path((control_id, file_id)): Path<(String, String)>,
) -> Result<StatusCode, HttpError> {
    let control_id = ControlId(parse_id(&control_id)?);
    let file_id = FileId(parse_id(&file_id)?);
    server_api::delete_file(&state.api, control_id, file_id)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserSummary>>, HttpError> {
    let users = server_api::list_users(&state.api)
        .await
        .map_err(http_error)?;
    Ok(Json(users))
}

async fn http_create_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedUser>), HttpError> {
    let Json(req) = json_body(body)?;
    let user_id = server_api::create_user(&state.api, &req)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(CreatedUser { user_id })))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
