/// 工具函数集合

use crate::models::constants::EXPORT_VMID_OFFSET;

/// 格式化字节大小
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 格式化运行时长，例如 `3d 4h 5m`
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}

/// 格式化任务耗时，例如 `2m 5s`
pub fn format_duration(starttime: i64, endtime: i64) -> String {
    let diff = (endtime - starttime).max(0);
    format!("{}m {}s", diff / 60, diff % 60)
}

/// 导出副本的 VMID
pub fn export_vmid(vmid: u32) -> Option<u32> {
    vmid.checked_add(EXPORT_VMID_OFFSET)
}

/// 导出副本的名称，带毫秒时间戳，重复导出同一台虚拟机也不会重名
pub fn export_vm_name(vmid: u32, now_millis: i64) -> String {
    format!("export-{}-{}", vmid, now_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(59), "0h 0m");
        assert_eq!(format_uptime(3 * 86400 + 4 * 3600 + 5 * 60), "3d 4h 5m");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(100, 225), "2m 5s");
        assert_eq!(format_duration(100, 50), "0m 0s");
    }

    #[test]
    fn test_export_naming() {
        assert_eq!(export_vmid(100), Some(9100));
        assert_eq!(export_vmid(u32::MAX), None);
        assert_eq!(export_vm_name(100, 1705046029123), "export-100-1705046029123");
    }
}
