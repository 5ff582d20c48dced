/// 仪表盘与后端之间的操作协议
///
/// 请求形如 `{action, <参数>, credentials}`，`action` 取值是固定的封闭集合；
/// 每个操作对应一个强类型的参数结构，未知操作在边界处直接拒绝。

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use crate::credentials::Credentials;
use crate::errors::{Error, Result};
use crate::models::{NodeStatus, NodeUsage, StorageInfo, TaskLogEntry, TaskStatus, Vm};

/// 操作名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionName {
    TestConnection,
    GetNodes,
    GetNodeStatus,
    GetVms,
    GetStorages,
    ExportVm,
    ImportVm,
    GetTaskStatus,
    GetRecentTasks,
}

impl ActionName {
    pub const ALL: [ActionName; 9] = [
        Self::TestConnection,
        Self::GetNodes,
        Self::GetNodeStatus,
        Self::GetVms,
        Self::GetStorages,
        Self::ExportVm,
        Self::ImportVm,
        Self::GetTaskStatus,
        Self::GetRecentTasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestConnection => "test_connection",
            Self::GetNodes => "get_nodes",
            Self::GetNodeStatus => "get_node_status",
            Self::GetVms => "get_vms",
            Self::GetStorages => "get_storages",
            Self::ExportVm => "export_vm",
            Self::ImportVm => "import_vm",
            Self::GetTaskStatus => "get_task_status",
            Self::GetRecentTasks => "get_recent_tasks",
        }
    }
}

impl FromStr for ActionName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| Error::UnknownAction(s.to_string()))
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 只需要节点名的操作参数
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct NodeParams {
    #[validate(custom = "validate_segment")]
    pub node: String,
}

/// 导出虚拟机参数
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct ExportVmParams {
    #[validate(custom = "validate_segment")]
    pub node: String,
    #[serde(deserialize_with = "lenient_u32")]
    #[validate(range(min = 1, message = "vmid 必须为正整数"))]
    pub vmid: u32,
    #[validate(custom = "validate_segment")]
    pub storage: String,
    #[validate(custom = "validate_export_format")]
    pub format: String,
}

/// 导入虚拟机参数
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImportVmParams {
    #[validate(custom = "validate_segment")]
    pub node: String,
    #[validate(custom = "validate_segment")]
    pub storage: String,
    /// 备份归档的卷 ID、路径或 URL
    #[validate(length(min = 1, message = "filename 不能为空"))]
    pub filename: String,
    #[validate(length(min = 1, message = "vmName 不能为空"))]
    pub vm_name: String,
    #[serde(deserialize_with = "lenient_u32")]
    #[validate(range(min = 1, message = "cores 必须大于 0"))]
    pub cores: u32,
    /// 内存（MB）
    #[serde(deserialize_with = "lenient_u32")]
    #[validate(range(min = 1, message = "memory 必须大于 0"))]
    pub memory: u32,
}

/// 任务查询参数
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct TaskParams {
    #[validate(custom = "validate_segment")]
    pub node: String,
    #[validate(length(min = 1, message = "upid 不能为空"))]
    pub upid: String,
}

/// 支持的导出格式
pub const EXPORT_FORMATS: [&str; 3] = ["raw", "qcow2", "vmdk"];

/// 操作（每个操作名一个分支）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    TestConnection,
    GetNodes,
    GetNodeStatus(NodeParams),
    GetVms(NodeParams),
    GetStorages(NodeParams),
    ExportVm(ExportVmParams),
    ImportVm(ImportVmParams),
    GetTaskStatus(TaskParams),
    GetRecentTasks(NodeParams),
}

impl Action {
    /// 由操作名和参数表构造操作
    ///
    /// 所有校验都在这里完成，失败时不会发出任何网络请求。
    pub fn parse(name: &str, params: Map<String, Value>) -> Result<Self> {
        let name: ActionName = name.parse()?;
        let action = match name {
            ActionName::TestConnection => Self::TestConnection,
            ActionName::GetNodes => Self::GetNodes,
            ActionName::GetNodeStatus => Self::GetNodeStatus(typed(name, params)?),
            ActionName::GetVms => Self::GetVms(typed(name, params)?),
            ActionName::GetStorages => Self::GetStorages(typed(name, params)?),
            ActionName::ExportVm => Self::ExportVm(typed(name, params)?),
            ActionName::ImportVm => Self::ImportVm(typed(name, params)?),
            ActionName::GetTaskStatus => Self::GetTaskStatus(typed(name, params)?),
            ActionName::GetRecentTasks => Self::GetRecentTasks(typed(name, params)?),
        };
        Ok(action)
    }

    pub fn name(&self) -> ActionName {
        match self {
            Self::TestConnection => ActionName::TestConnection,
            Self::GetNodes => ActionName::GetNodes,
            Self::GetNodeStatus(_) => ActionName::GetNodeStatus,
            Self::GetVms(_) => ActionName::GetVms,
            Self::GetStorages(_) => ActionName::GetStorages,
            Self::ExportVm(_) => ActionName::ExportVm,
            Self::ImportVm(_) => ActionName::ImportVm,
            Self::GetTaskStatus(_) => ActionName::GetTaskStatus,
            Self::GetRecentTasks(_) => ActionName::GetRecentTasks,
        }
    }

    /// 操作针对的节点（集群级操作返回 None）
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::TestConnection | Self::GetNodes => None,
            Self::GetNodeStatus(p) | Self::GetVms(p) | Self::GetStorages(p) | Self::GetRecentTasks(p) => {
                Some(&p.node)
            }
            Self::ExportVm(p) => Some(&p.node),
            Self::ImportVm(p) => Some(&p.node),
            Self::GetTaskStatus(p) => Some(&p.node),
        }
    }
}

fn typed<T>(name: ActionName, params: Map<String, Value>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let parsed: T = serde_json::from_value(Value::Object(params))
        .map_err(|e| Error::Validation(format!("{}: {}", name, e)))?;
    parsed
        .validate()
        .map_err(|e| Error::Validation(format!("{}: {}", name, e)))?;
    Ok(parsed)
}

/// 单个 URL 路径段：非空、不含 `/` 与空白
fn validate_segment(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("required"));
    }
    if value.contains('/') || value.contains(char::is_whitespace) {
        return Err(ValidationError::new("path_segment"));
    }
    Ok(())
}

fn validate_export_format(value: &str) -> std::result::Result<(), ValidationError> {
    if EXPORT_FORMATS.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("export_format"))
    }
}

/// 同时接受数字和数字字符串（表单提交的值常常是字符串）
fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => u32::try_from(n).map_err(de::Error::custom),
        NumOrString::Str(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

/// 仪表盘发来的请求信封
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default, alias = "config")]
    pub credentials: Option<Credentials>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ActionRequest {
    /// 从任意 JSON 解析请求；信封本身不合法时返回 `Validation`
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Validation(format!("请求格式错误: {}", e)))
    }

    /// 拆分为操作与（可选的）凭据
    pub fn into_parts(self) -> Result<(Action, Option<Credentials>)> {
        let action = Action::parse(&self.action, self.params)?;
        Ok((action, self.credentials))
    }
}

/// 操作结果
///
/// 序列化后的字段名即响应体的字段名，例如 `{"upid": "..."}`。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionOutput {
    Version { version: String },
    Nodes { nodes: Vec<String> },
    NodeStatus { status: NodeStatus, usage: NodeUsage },
    Vms { vms: Vec<Vm> },
    Storages { storages: Vec<StorageInfo> },
    Submitted { upid: String },
    Task { task: TaskStatus },
    Tasks { tasks: Vec<TaskLogEntry> },
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
        }
    }
}
