/// 统一错误类型

use std::time::Duration;
use thiserror::Error;

/// 统一错误类型
///
/// 校验类错误（`Validation` / `UnknownAction` / `Unconfigured`）在发起任何网络请求之前产生；
/// 其余错误来自与 Proxmox API 的交互。
#[derive(Error, Debug)]
pub enum Error {
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("未知操作: {0}")]
    UnknownAction(String),

    #[error("Proxmox 尚未配置")]
    Unconfigured,

    #[error("网络错误: {0}")]
    Transport(String),

    #[error("请求超时: Proxmox 服务器未在 {}秒内响应，请检查地址以及服务器是否可达", .0.as_secs())]
    Timeout(Duration),

    #[error("Proxmox API {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("VMID {vmid} 已被占用 (Proxmox API {status}): {body}")]
    VmidConflict { vmid: u32, status: u16, body: String },

    #[error("响应格式错误: {0}")]
    InvalidResponse(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl Error {
    /// 错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UnknownAction(_) => "UNKNOWN_ACTION",
            Self::Unconfigured => "UNCONFIGURED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::VmidConflict { .. } => "VMID_CONFLICT",
            Self::InvalidResponse(_) => "INVALID_RESPONSE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为瞬时错误（网络不可达或超时）
    ///
    /// 只有任务轮询会吸收这类错误并在下一个周期重试。
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// 是否在发起网络请求之前就被拒绝
    pub fn is_rejected_locally(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::UnknownAction(_) | Self::Unconfigured
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;
