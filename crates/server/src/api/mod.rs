pub mod proxmox;
pub mod settings;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use pve_common::protocol::ErrorBody;
use pve_common::Error;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::app_state::AppState;

/// 所有 API 路由（统一入口）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/proxmox", proxmox::routes())
        .nest("/config", settings::routes())
}

/// API 错误，响应体为 `{"error": ..., "code": ...}`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_rejected_locally() {
            return StatusCode::BAD_REQUEST;
        }
        match &self.0 {
            Error::VmidConflict { .. } => StatusCode::CONFLICT,
            Error::Upstream { .. } | Error::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// 解析请求体
///
/// 不依赖 Content-Type，解析失败统一返回 `Validation`，响应体仍是 `{error, code}`。
pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| Error::validation(format!("{}: {}", what, e)))
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("❌ 请求处理失败 ({}): {}", status.as_u16(), self.0);
        } else {
            warn!("请求被拒绝 ({}): {}", status.as_u16(), self.0);
        }

        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}
