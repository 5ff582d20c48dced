/// 共享数据模型
/// 
/// Proxmox API 返回的数据结构，以及在 Action Broker、Task Poller 与前端之间传递的领域类型。
/// 所有快照类型都是只读的，每次都从 Proxmox 重新获取。

pub mod node;
pub mod storage;
pub mod task;
pub mod vm;

pub use node::{NodeStatus, NodeUsage, Usage};
pub use storage::StorageInfo;
pub use task::{TaskHandle, TaskLogEntry, TaskState, TaskStatus};
pub use vm::{Vm, VmStatus, VmType};

use serde::Deserialize;

/// Proxmox API 响应外层结构，实际负载位于 `data` 字段
#[derive(Debug, Clone, Deserialize)]
pub struct PveResponse<T: Default> {
    #[serde(default)]
    pub data: T,
}

/// 常量定义
pub mod constants {
    /// 导出时派生 VMID 的偏移量
    pub const EXPORT_VMID_OFFSET: u32 = 9000;

    /// 导入时随机分配 VMID 的下界（含）
    pub const IMPORT_VMID_MIN: u32 = 1000;

    /// 导入时随机分配 VMID 的上界（含）
    pub const IMPORT_VMID_MAX: u32 = 9999;

    /// 最近任务列表的条数上限
    pub const RECENT_TASKS_LIMIT: u32 = 50;

    /// 单次 API 请求超时（秒）
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

    /// 任务轮询间隔（秒）
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;

    /// 默认 Server 端口
    pub const DEFAULT_SERVER_PORT: u16 = 3000;
}
