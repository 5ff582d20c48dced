/// 配置管理
///
/// 默认值 ← 可选的 `pve-console.toml` ← 环境变量（`SERVER_PORT`、`DATA_DIR` 等）。

use anyhow::{bail, Context};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use pve_common::models::constants::{
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SERVER_PORT,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// 配置文件名（不含扩展名）
const CONFIG_FILE: &str = "pve-console";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server_port: u16,
    /// 持久化配置所在目录
    pub data_dir: PathBuf,
    pub log_level: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Config {
    /// 从配置文件和环境变量加载配置
    pub fn load() -> anyhow::Result<Self> {
        let builder = defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::default().try_parsing(true));
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .context("配置解析失败")?;

        if cfg.poll_interval_secs == 0 {
            bail!("POLL_INTERVAL_SECS 必须大于 0");
        }
        if cfg.request_timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS 必须大于 0");
        }
        Ok(cfg)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn defaults() -> anyhow::Result<ConfigBuilder<DefaultState>> {
    let d = Config::default();
    let builder = config::Config::builder()
        .set_default("server_port", i64::from(d.server_port))?
        .set_default("data_dir", d.data_dir.to_string_lossy().to_string())?
        .set_default("log_level", d.log_level)?
        .set_default("poll_interval_secs", d.poll_interval_secs as i64)?
        .set_default("request_timeout_secs", d.request_timeout_secs as i64)?;
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    impl Config {
        /// 只读取指定的配置文件（不读环境变量）
        fn from_file(path: &Path) -> anyhow::Result<Self> {
            Self::build(defaults()?.add_source(File::from(path)))
        }
    }

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_when_file_is_empty() {
        let file = write_toml("");
        let cfg = Config::from_file(file.path()).unwrap();

        assert_eq!(cfg.server_port, 3000);
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(3));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_toml(
            r#"
server_port = 8080
data_dir = "/var/lib/pve-console"
log_level = "debug"
poll_interval_secs = 5
"#,
        );
        let cfg = Config::from_file(file.path()).unwrap();

        assert_eq!(cfg.server_port, 8080);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/pve-console"));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.request_timeout_secs, 15);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let file = write_toml("poll_interval_secs = 0");
        assert!(Config::from_file(file.path()).is_err());
    }
}
