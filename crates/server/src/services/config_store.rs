/// 持久化的 Proxmox 配置
///
/// 单个 JSON 文件 `<data_dir>/proxmox_config.json`。文件不存在或内容不可用都视为未配置。

use pve_common::credentials::{parse_stored_config, STORED_CONFIG_KEY};
use pve_common::{Credentials, Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{}.json", STORED_CONFIG_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取已保存的凭据
    pub async fn load(&self) -> Option<Credentials> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => parse_stored_config(Some(&raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("读取配置文件 {} 失败，按未配置处理: {}", self.path.display(), e);
                None
            }
        }
    }

    /// 校验并保存凭据
    pub async fn save(&self, credentials: &Credentials) -> Result<()> {
        credentials.check()?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::Config(format!("创建目录 {} 失败: {}", dir.display(), e)))?;
        }

        let json = serde_json::to_string_pretty(credentials)?;
        // 先写临时文件再改名，避免留下半个文件
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Config(format!("写入 {} 失败: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Config(format!("保存 {} 失败: {}", self.path.display(), e)))?;

        info!(
            "💾 Proxmox 配置已保存: {} ({})",
            credentials.endpoint(),
            credentials.token_id
        );
        Ok(())
    }

    /// 删除已保存的配置，返回之前是否存在
    pub async fn clear(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("🗑️ Proxmox 配置已清除");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Config(format!(
                "删除 {} 失败: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
