/// 虚拟机快照

use serde::{Deserialize, Serialize};
use std::fmt;

/// 虚拟机状态
///
/// Proxmox 可能返回这里未列出的状态，原样保留在 `Other` 中。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VmStatus {
    Running,
    Stopped,
    Paused,
    Suspended,
    Other(String),
}

impl VmStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Suspended => "suspended",
            Self::Other(s) => s,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl From<String> for VmStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "paused" => Self::Paused,
            "suspended" => Self::Suspended,
            _ => Self::Other(s),
        }
    }
}

impl From<VmStatus> for String {
    fn from(status: VmStatus) -> Self {
        status.as_str().to_string()
    }
}

impl Default for VmStatus {
    fn default() -> Self {
        Self::Other("unknown".to_string())
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 虚拟化类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmType {
    #[default]
    Qemu,
    Lxc,
}

/// 虚拟机描述
///
/// `/nodes/{node}/qemu` 的返回项不包含 `node` 字段，由 Action Broker 负责补齐。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireVm")]
pub struct Vm {
    pub vmid: u32,
    pub name: String,
    pub status: VmStatus,
    /// CPU 使用率（0..1）
    pub cpu: f64,
    pub maxcpu: u32,
    pub mem: u64,
    pub maxmem: u64,
    pub disk: u64,
    pub maxdisk: u64,
    pub uptime: u64,
    pub node: String,
    #[serde(rename = "type")]
    pub vm_type: VmType,
}

/// 上游返回的原始形态，核数可能在 `maxcpu` 或 `cpus` 中，也可能两者都有
#[derive(Deserialize)]
struct WireVm {
    vmid: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: VmStatus,
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    maxcpu: Option<u32>,
    #[serde(default)]
    cpus: Option<u32>,
    #[serde(default)]
    mem: u64,
    #[serde(default)]
    maxmem: u64,
    #[serde(default)]
    disk: u64,
    #[serde(default)]
    maxdisk: u64,
    #[serde(default)]
    uptime: u64,
    #[serde(default)]
    node: String,
    #[serde(rename = "type", default)]
    vm_type: VmType,
}

impl From<WireVm> for Vm {
    fn from(raw: WireVm) -> Self {
        Self {
            vmid: raw.vmid,
            name: raw.name,
            status: raw.status,
            cpu: raw.cpu,
            maxcpu: raw.maxcpu.or(raw.cpus).unwrap_or_default(),
            mem: raw.mem,
            maxmem: raw.maxmem,
            disk: raw.disk,
            maxdisk: raw.maxdisk,
            uptime: raw.uptime,
            node: raw.node,
            vm_type: raw.vm_type,
        }
    }
}
