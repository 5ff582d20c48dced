/// 应用全局状态

use pve_common::{Credentials, Error, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::services::{ActionBroker, ConfigStore, ControlPlaneFactory, PveClientFactory, TaskPoller};

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 操作分发
    pub broker: Arc<ActionBroker>,
    /// 任务轮询器（每个 watch 独立运行）
    pub poller: TaskPoller,
    /// 持久化的 Proxmox 配置
    pub config_store: Arc<ConfigStore>,
    /// 按凭据创建客户端
    pub clients: Arc<dyn ControlPlaneFactory>,
}

impl AppState {
    pub fn new(cfg: &Config) -> Self {
        Self::with_parts(
            Arc::new(ActionBroker::new()),
            TaskPoller::new(cfg.poll_interval()),
            Arc::new(ConfigStore::new(&cfg.data_dir)),
            Arc::new(PveClientFactory::new(cfg.request_timeout())),
        )
    }

    pub fn with_parts(
        broker: Arc<ActionBroker>,
        poller: TaskPoller,
        config_store: Arc<ConfigStore>,
        clients: Arc<dyn ControlPlaneFactory>,
    ) -> Self {
        Self {
            broker,
            poller,
            config_store,
            clients,
        }
    }

    pub fn broker(&self) -> Arc<ActionBroker> {
        self.broker.clone()
    }

    pub fn clients(&self) -> Arc<dyn ControlPlaneFactory> {
        self.clients.clone()
    }

    /// 请求自带凭据时优先使用，否则读取已保存的配置
    pub async fn resolve_credentials(&self, explicit: Option<Credentials>) -> Result<Credentials> {
        match explicit {
            Some(credentials) => Ok(credentials),
            None => self.config_store.load().await.ok_or(Error::Unconfigured),
        }
    }
}
