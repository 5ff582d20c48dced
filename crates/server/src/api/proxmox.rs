/// Proxmox 操作接口
///
/// `POST /api/proxmox`，请求体为 `{action, ...参数, credentials?}`。

use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use pve_common::{ActionOutput, ActionRequest};
use serde_json::Value;

use super::{parse_body, ApiError};
use crate::app_state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(run_action))
}

/// 执行一个操作
///
/// 操作名与参数先在本地校验，之后才解析凭据并访问 Proxmox。
pub async fn run_action(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ActionOutput>, ApiError> {
    let body: Value = parse_body(&body, "请求体不是合法 JSON")?;
    let (action, explicit) = ActionRequest::from_value(body)?.into_parts()?;
    let credentials = state.resolve_credentials(explicit).await?;
    let client = state.clients().connect(&credentials)?;

    let output = state.broker().dispatch(action, client.as_ref()).await?;
    Ok(Json(output))
}
