/// 任务（UPID）相关类型

use serde::{Deserialize, Serialize};
use std::fmt;

/// 任务运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Stopped,
}

/// `/nodes/{node}/tasks/{upid}/status` 返回的任务状态
///
/// `exitstatus` 与 `endtime` 只在 `status == stopped` 时出现。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub upid: String,
    pub status: TaskState,
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitstatus: Option<String>,
    #[serde(default)]
    pub pstart: u64,
    #[serde(default)]
    pub starttime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endtime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl TaskStatus {
    pub fn is_stopped(&self) -> bool {
        self.status == TaskState::Stopped
    }
}

/// `/nodes/{node}/tasks` 任务日志中的一项
///
/// 日志接口与状态接口不同：`status` 只在任务结束后出现，内容是退出状态（`OK` 或错误信息）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub upid: String,
    #[serde(default)]
    pub node: String,
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub starttime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endtime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl TaskLogEntry {
    pub fn is_running(&self) -> bool {
        self.endtime.is_none()
    }
}

/// 任务句柄
///
/// UPID 只有与签发它的节点以及 Proxmox 地址组合在一起才有意义。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle {
    pub endpoint: String,
    pub node: String,
    pub upid: String,
}

impl TaskHandle {
    pub fn new(
        endpoint: impl Into<String>,
        node: impl Into<String>,
        upid: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            node: node.into(),
            upid: upid.into(),
        }
    }

    /// 是否指向同一个 (node, upid)
    pub fn refers_to(&self, node: &str, upid: &str) -> bool {
        self.node == node && self.upid == upid
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.upid, self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const UPID: &str = "UPID:pve1:000A1B2C:0123ABCD:65A0F00D:qmclone:100:root@pam:";

    #[test]
    fn test_running_task_has_no_exitstatus() {
        let task: TaskStatus = serde_json::from_value(json!({
            "upid": UPID,
            "status": "running",
            "type": "qmclone",
            "pstart": 19113933,
            "starttime": 1705046029,
            "node": "pve1",
            "pid": 662316
        }))
        .unwrap();

        assert!(!task.is_stopped());
        assert!(task.exitstatus.is_none());
    }

    #[test]
    fn test_stopped_task_with_error() {
        let task: TaskStatus = serde_json::from_value(json!({
            "upid": UPID,
            "status": "stopped",
            "exitstatus": "clone failed: storage 'local' does not support content-type 'images'",
            "type": "qmclone",
            "starttime": 1705046029,
            "endtime": 1705046031
        }))
        .unwrap();

        assert!(task.is_stopped());
        assert_ne!(task.exitstatus.as_deref(), Some("OK"));
        assert_eq!(task.endtime, Some(1705046031));
    }

    #[test]
    fn test_log_entry_running_until_endtime() {
        let running: TaskLogEntry = serde_json::from_value(json!({
            "upid": UPID, "node": "pve1", "type": "qmclone", "starttime": 1
        }))
        .unwrap();
        assert!(running.is_running());

        let done: TaskLogEntry = serde_json::from_value(json!({
            "upid": UPID, "node": "pve1", "type": "qmclone",
            "starttime": 1, "endtime": 9, "status": "OK"
        }))
        .unwrap();
        assert!(!done.is_running());
        assert_eq!(done.status.as_deref(), Some("OK"));
    }

    #[test]
    fn test_handle_identity() {
        let handle = TaskHandle::new("https://pve.local:8006", "pve1", UPID);
        assert!(handle.refers_to("pve1", UPID));
        assert!(!handle.refers_to("pve2", UPID));
    }
}
