/// 节点状态

use serde::{Deserialize, Serialize};

/// 资源用量（字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub free: u64,
}

impl Usage {
    /// 已用百分比，四舍五入；总量为 0 时返回 0
    pub fn percent(&self) -> u8 {
        ratio_percent(self.used as f64, self.total as f64)
    }
}

/// 节点状态摘要（仪表盘卡片数据）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// CPU 使用率（0..1）
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: Usage,
    #[serde(default)]
    pub rootfs: Usage,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub pveversion: String,
}

impl NodeStatus {
    pub fn cpu_percent(&self) -> u8 {
        ratio_percent(self.cpu, 1.0)
    }

    pub fn memory_percent(&self) -> u8 {
        self.memory.percent()
    }

    pub fn disk_percent(&self) -> u8 {
        self.rootfs.percent()
    }

    pub fn usage(&self) -> NodeUsage {
        NodeUsage {
            cpu: self.cpu_percent(),
            memory: self.memory_percent(),
            disk: self.disk_percent(),
        }
    }
}

/// 卡片上展示的百分比（0..=100）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub cpu: u8,
    pub memory: u8,
    pub disk: u8,
}

fn ratio_percent(part: f64, whole: f64) -> u8 {
    if whole <= 0.0 || !part.is_finite() {
        return 0;
    }
    (part / whole * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extra_upstream_fields_are_dropped() {
        let status: NodeStatus = serde_json::from_value(json!({
            "cpu": 0.256,
            "memory": {"used": 2048, "total": 8192, "free": 6144},
            "rootfs": {"used": 50, "total": 200, "free": 150, "avail": 140},
            "uptime": 86400,
            "pveversion": "pve-manager/8.1.4/ec5affc9e41f1d79",
            "kversion": "Linux 6.5.11-8-pve",
            "loadavg": ["0.10", "0.20", "0.30"]
        }))
        .unwrap();

        assert_eq!(status.usage(), NodeUsage { cpu: 26, memory: 25, disk: 25 });

        let out = serde_json::to_value(&status).unwrap();
        assert!(out.get("kversion").is_none());
        assert_eq!(out["rootfs"]["free"], 150);
    }

    #[test]
    fn test_percent_of_empty_total() {
        assert_eq!(Usage::default().percent(), 0);
    }
}
