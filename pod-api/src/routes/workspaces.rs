use crate::{
    auth::AuthenticatedUser,
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use pod_orchestrator::{build_tree, TreeNode, WorkspaceStatus, WorkspaceSummary};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_workspace))
        .route("/list", get(list_workspaces))
        .route("/file-structure", get(file_structure))
        .route("/file-content", get(read_file_content).put(write_file_content))
        .route("/update/{id}", patch(update_workspace))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceBody {
    #[serde(default)]
    pub workspace_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileStructureQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileContentQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileContentBody {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspaceBody {
    #[serde(default)]
    pub status: Option<String>,
}

async fn create_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateWorkspaceBody>,
) -> ApiResult<(StatusCode, Json<WorkspaceSummary>)> {
    let name = body
        .workspace_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("workspaceName is required".to_string()))?;

    let workspace = state
        .orchestrator
        .create_named_workspace(&user.username, &name)
        .await?;

    Ok((StatusCode::CREATED, Json(WorkspaceSummary::from(&workspace))))
}

async fn list_workspaces(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Vec<WorkspaceSummary>>> {
    let workspaces = state.orchestrator.list_workspaces(&user.username).await?;

    Ok(Json(workspaces.iter().map(WorkspaceSummary::from).collect()))
}

async fn file_structure(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<FileStructureQuery>,
) -> ApiResult<Json<Vec<TreeNode>>> {
    let path = query
        .path
        .ok_or_else(|| ApiError::BadRequest("path query parameter is required".to_string()))?;

    let entries = state
        .orchestrator
        .list_workspace_files(&user.username, &path)
        .await?;

    Ok(Json(build_tree(&entries)))
}

async fn read_file_content(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<FileContentQuery>,
) -> ApiResult<Json<Value>> {
    let filename = query
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("filename query parameter is required".to_string()))?;

    let content = state
        .orchestrator
        .read_file(&user.username, &filename)
        .await?;

    Ok(Json(json!({ "content": content })))
}

async fn write_file_content(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<FileContentBody>,
) -> ApiResult<Json<Value>> {
    let (filename, content) = match (body.filename, body.content) {
        (Some(filename), Some(content)) if !filename.trim().is_empty() => (filename, content),
        _ => {
            return Err(ApiError::BadRequest(
                "filename and content are required".to_string(),
            ))
        }
    };

    state
        .orchestrator
        .write_file(&user.username, &filename, &content)
        .await?;

    Ok(Json(json!({ "message": "File saved" })))
}

async fn update_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(body): Json<UpdateWorkspaceBody>,
) -> ApiResult<Json<Value>> {
    let status: WorkspaceStatus = body
        .status
        .ok_or_else(|| ApiError::BadRequest("status is required".to_string()))?
        .parse()?;

    let transition = state
        .orchestrator
        .update_status(&user.username, &id, status)
        .await?;

    Ok(Json(json!({ "message": transition.message() })))
}
