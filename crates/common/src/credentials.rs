/// Proxmox 访问凭据
///
/// 凭据由调用方显式传入客户端构造函数，核心逻辑不读取任何全局存储。

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;
use validator::{Validate, ValidationError};

use crate::errors::Result;

/// 持久化配置的固定键名
pub const STORED_CONFIG_KEY: &str = "proxmox_config";

/// 单个 Proxmox 集群的访问凭据
///
/// `skip_tls_verify` 必须显式开启，默认始终校验证书。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(alias = "serverUrl")]
    #[validate(custom = "validate_endpoint")]
    pub endpoint_url: String,

    #[validate(length(min = 1, message = "tokenId 不能为空"))]
    pub token_id: String,

    #[validate(length(min = 1, message = "tokenSecret 不能为空"))]
    pub token_secret: String,

    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl Credentials {
    pub fn new(
        endpoint_url: impl Into<String>,
        token_id: impl Into<String>,
        token_secret: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            token_id: token_id.into(),
            token_secret: token_secret.into(),
            skip_tls_verify: false,
        }
    }

    /// 校验所有字段
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }

    /// 去掉末尾斜杠后的地址，任务句柄以它作为作用域
    pub fn endpoint(&self) -> &str {
        self.endpoint_url.trim_end_matches('/')
    }

    /// JSON API 根路径
    pub fn api_base(&self) -> String {
        format!("{}/api2/json", self.endpoint())
    }

    /// `Authorization` 头的值
    pub fn authorization(&self) -> String {
        format!("PVEAPIToken={}={}", self.token_id, self.token_secret)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint_url", &self.endpoint_url)
            .field("token_id", &self.token_id)
            .field("token_secret", &"***")
            .field("skip_tls_verify", &self.skip_tls_verify)
            .finish()
    }
}

fn validate_endpoint(url: &str) -> std::result::Result<(), ValidationError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(host) if !host.trim_end_matches('/').is_empty() && !host.contains(char::is_whitespace) => {
            Ok(())
        }
        _ => {
            let mut err = ValidationError::new("endpoint_url");
            err.message = Some("endpointUrl 必须是 http(s):// 开头的地址".into());
            Err(err)
        }
    }
}

/// 解析持久化的配置 JSON
///
/// 不存在、不是合法 JSON、字段不完整，都视为“未配置”，而不是错误。
pub fn parse_stored_config(raw: Option<&str>) -> Option<Credentials> {
    let raw = raw?;
    let credentials: Credentials = match serde_json::from_str(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!("持久化配置不是合法 JSON，按未配置处理: {}", e);
            return None;
        }
    };
    match credentials.check() {
        Ok(()) => Some(credentials),
        Err(e) => {
            warn!("持久化配置不完整，按未配置处理: {}", e);
            None
        }
    }
}
