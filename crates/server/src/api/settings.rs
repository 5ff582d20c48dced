/// Proxmox 配置接口
///
/// 读取时永远不返回 tokenSecret。

use axum::{body::Bytes, extract::State, routing::get, Json, Router};
use pve_common::Credentials;
use serde::Serialize;
use tracing::info;

use super::{parse_body, ApiError};
use crate::app_state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(get_config).put(put_config).delete(delete_config))
}

/// 对外展示的配置
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_tls_verify: Option<bool>,
}

impl ConfigView {
    fn unconfigured() -> Self {
        Self {
            configured: false,
            endpoint_url: None,
            token_id: None,
            skip_tls_verify: None,
        }
    }
}

impl From<Option<Credentials>> for ConfigView {
    fn from(credentials: Option<Credentials>) -> Self {
        match credentials {
            Some(c) => Self {
                configured: true,
                endpoint_url: Some(c.endpoint_url),
                token_id: Some(c.token_id),
                skip_tls_verify: Some(c.skip_tls_verify),
            },
            None => Self::unconfigured(),
        }
    }
}

pub async fn get_config(State(state): State<AppState>) -> Json<ConfigView> {
    Json(ConfigView::from(state.config_store.load().await))
}

pub async fn put_config(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ConfigView>, ApiError> {
    let credentials: Credentials = parse_body(&body, "配置格式错误")?;
    state.config_store.save(&credentials).await?;
    Ok(Json(ConfigView::from(Some(credentials))))
}

pub async fn delete_config(State(state): State<AppState>) -> Result<Json<ConfigView>, ApiError> {
    if !state.config_store.clear().await? {
        info!("没有已保存的 Proxmox 配置");
    }
    Ok(Json(ConfigView::unconfigured()))
}
