/// Proxmox 控制面客户端
///
/// 负责带认证的 HTTP 调用、错误归一化以及单次请求超时。
/// 客户端本身不做任何重试，是否重试由调用方按操作决定。

use async_trait::async_trait;
use pve_common::models::PveResponse;
use pve_common::{Credentials, Error, Result};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// 一次 API 调用，`path` 相对于 `/api2/json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    /// 表单字段（仅 POST）
    pub form: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            form: Vec::new(),
        }
    }

    pub fn post(path: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            query: Vec::new(),
            form,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// 查找表单字段
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// 控制面调用接口
///
/// 返回 Proxmox 响应中 `data` 字段的内容。
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn call(&self, request: ApiRequest) -> Result<Value>;

    /// 当前连接的 Proxmox 地址，用于限定任务句柄的作用域
    fn endpoint(&self) -> &str;
}

/// 基于 reqwest 的 Proxmox 客户端
pub struct PveClient {
    http: reqwest::Client,
    api_base: String,
    endpoint: String,
    authorization: HeaderValue,
    timeout: Duration,
}

impl PveClient {
    /// 使用显式传入的凭据创建客户端
    pub fn new(credentials: &Credentials, timeout: Duration) -> Result<Self> {
        credentials.check()?;

        let mut authorization = HeaderValue::from_str(&credentials.authorization())
            .map_err(|_| Error::validation("tokenId 或 tokenSecret 包含非法字符"))?;
        authorization.set_sensitive(true);

        if credentials.skip_tls_verify {
            warn!(
                "⚠️ 已为 {} 关闭 TLS 证书校验（skipTlsVerify=true）",
                credentials.endpoint()
            );
        }

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(credentials.skip_tls_verify)
            .build()
            .map_err(|e| Error::Internal(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            http,
            api_base: credentials.api_base(),
            endpoint: credentials.endpoint().to_string(),
            authorization,
            timeout,
        })
    }

    /// 发送请求并读取完整响应
    async fn round_trip(&self, request: &ApiRequest) -> Result<Value> {
        let url = format!("{}{}", self.api_base, request.path);

        let builder = match request.method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url).form(&request.form),
        };

        let response = builder
            .query(&request.query)
            .header(AUTHORIZATION, self.authorization.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ [Proxmox] API 错误 {}: {}", status.as_u16(), body);
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        let parsed: PveResponse<Value> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidResponse(format!("{} {}: {}", request.method, request.path, e)))?;

        Ok(parsed.data)
    }
}

#[async_trait]
impl ControlPlane for PveClient {
    async fn call(&self, request: ApiRequest) -> Result<Value> {
        info!("📤 [Proxmox] {} {}{}", request.method, self.api_base, request.path);
        if !request.form.is_empty() {
            debug!("📤 表单字段: {:?}", request.form);
        }

        // 超时后 future 被丢弃，进行中的请求随之取消
        match tokio::time::timeout(self.timeout, self.round_trip(&request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("⏱️ [Proxmox] 请求超时: {} {}", request.method, request.path);
                Err(Error::Timeout(self.timeout))
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// 按凭据创建控制面客户端
pub trait ControlPlaneFactory: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ControlPlane>>;
}

/// 创建 [`PveClient`]，所有客户端共用同一个请求超时
pub struct PveClientFactory {
    timeout: Duration,
}

impl PveClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ControlPlaneFactory for PveClientFactory {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ControlPlane>> {
        Ok(Arc::new(PveClient::new(credentials, self.timeout)?))
    }
}

/// 把 reqwest 错误归一化为传输错误（附带底层原因）
fn transport_error(err: reqwest::Error) -> Error {
    let err = err.without_url();
    let mut message = err.to_string();
    let mut source = StdError::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = StdError::source(cause);
    }
    warn!("❌ [Proxmox] 请求失败: {}", message);
    Error::Transport(message)
}
