/// Action Broker
///
/// 把封闭集合中的操作翻译为对应的 Proxmox API 调用序列，并把结果整理成领域类型。

use async_trait::async_trait;
use chrono::Utc;
use pve_common::models::constants::{IMPORT_VMID_MAX, IMPORT_VMID_MIN, RECENT_TASKS_LIMIT};
use pve_common::models::{NodeStatus, StorageInfo, TaskHandle, TaskLogEntry, TaskStatus, Vm};
use pve_common::protocol::{ExportVmParams, ImportVmParams};
use pve_common::utils::{export_vm_name, export_vmid, format_bytes, format_uptime};
use pve_common::{Action, ActionName, ActionOutput, Error, Result};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::pve_client::{ApiRequest, ControlPlane};
use super::task_poller::TaskStatusSource;

/// 导入时的 VMID 分配策略
pub trait VmidAllocator: Send + Sync {
    fn next_vmid(&self) -> u32;
}

/// 在 [1000, 9999] 中随机取一个 VMID，不预先检查是否空闲
pub struct RandomVmid;

impl VmidAllocator for RandomVmid {
    fn next_vmid(&self) -> u32 {
        rand::thread_rng().gen_range(IMPORT_VMID_MIN..=IMPORT_VMID_MAX)
    }
}

/// `/nodes` 返回项中用到的部分
#[derive(Debug, Deserialize)]
struct NodeEntry {
    node: String,
}

pub struct ActionBroker {
    vmids: Arc<dyn VmidAllocator>,
}

impl ActionBroker {
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(RandomVmid))
    }

    pub fn with_allocator(vmids: Arc<dyn VmidAllocator>) -> Self {
        Self { vmids }
    }

    /// 执行已校验的操作
    pub async fn dispatch(&self, action: Action, client: &dyn ControlPlane) -> Result<ActionOutput> {
        let name = action.name();
        info!(
            "⚙️ [Action] {} endpoint={} node={}",
            name,
            client.endpoint(),
            action.node().unwrap_or("-")
        );

        let output = match action {
            Action::TestConnection => {
                let data = client.call(ApiRequest::get("/version")).await?;
                let version = data
                    .get("version")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid(name, "缺少 version 字段"))?
                    .to_string();
                ActionOutput::Version { version }
            }
            Action::GetNodes => {
                let data = client.call(ApiRequest::get("/nodes")).await?;
                let entries: Vec<NodeEntry> = decode_list(name, data)?;
                ActionOutput::Nodes {
                    nodes: entries.into_iter().map(|entry| entry.node).collect(),
                }
            }
            Action::GetNodeStatus(p) => {
                let data = client
                    .call(ApiRequest::get(format!("/nodes/{}/status", p.node)))
                    .await?;
                let status: NodeStatus = decode(name, data)?;
                debug!(
                    "节点 {} 状态: CPU {}%, 内存 {} / {}, 运行 {}",
                    p.node,
                    status.cpu_percent(),
                    format_bytes(status.memory.used),
                    format_bytes(status.memory.total),
                    format_uptime(status.uptime)
                );
                let usage = status.usage();
                ActionOutput::NodeStatus { status, usage }
            }
            Action::GetVms(p) => {
                let data = client
                    .call(ApiRequest::get(format!("/nodes/{}/qemu", p.node)))
                    .await?;
                let mut vms: Vec<Vm> = decode_list(name, data)?;
                // 上游返回项不含 node 字段
                for vm in &mut vms {
                    vm.node = p.node.clone();
                }
                let running = vms.iter().filter(|vm| vm.status.is_running()).count();
                debug!("节点 {} 共 {} 台虚拟机，运行中 {}", p.node, vms.len(), running);
                ActionOutput::Vms { vms }
            }
            Action::GetStorages(p) => {
                let data = client
                    .call(ApiRequest::get(format!("/nodes/{}/storage", p.node)))
                    .await?;
                let storages: Vec<StorageInfo> = decode_list(name, data)?;
                ActionOutput::Storages { storages }
            }
            Action::ExportVm(p) => ActionOutput::Submitted {
                upid: self.export_vm(p, client).await?,
            },
            Action::ImportVm(p) => ActionOutput::Submitted {
                upid: self.import_vm(p, client).await?,
            },
            Action::GetTaskStatus(p) => ActionOutput::Task {
                task: self.task_status(&p.node, &p.upid, client).await?,
            },
            Action::GetRecentTasks(p) => {
                let request = ApiRequest::get(format!("/nodes/{}/tasks", p.node))
                    .with_query("limit", RECENT_TASKS_LIMIT);
                let data = client.call(request).await?;
                let tasks: Vec<TaskLogEntry> = decode_list(name, data)?;
                let running = tasks.iter().filter(|task| task.is_running()).count();
                debug!("节点 {} 最近 {} 个任务，未结束 {}", p.node, tasks.len(), running);
                ActionOutput::Tasks { tasks }
            }
        };

        Ok(output)
    }

    /// 以完整克隆的方式导出虚拟机
    async fn export_vm(&self, p: ExportVmParams, client: &dyn ControlPlane) -> Result<String> {
        let newid = export_vmid(p.vmid)
            .ok_or_else(|| Error::validation(format!("vmid {} 超出可导出范围", p.vmid)))?;
        let form = vec![
            ("newid".to_string(), newid.to_string()),
            ("name".to_string(), export_vm_name(p.vmid, Utc::now().timestamp_millis())),
            ("target".to_string(), p.node.clone()),
            ("full".to_string(), "1".to_string()),
            ("storage".to_string(), p.storage),
            ("format".to_string(), p.format),
        ];

        let path = format!("/nodes/{}/qemu/{}/clone", p.node, p.vmid);
        let data = client.call(ApiRequest::post(path, form)).await?;
        let upid = upid_of(ActionName::ExportVm, data)?;

        info!("✅ 导出任务已提交: vmid={} -> {}, upid={}", p.vmid, newid, upid);
        Ok(upid)
    }

    /// 从归档创建新虚拟机
    async fn import_vm(&self, p: ImportVmParams, client: &dyn ControlPlane) -> Result<String> {
        let vmid = self.vmids.next_vmid();
        let form = vec![
            ("vmid".to_string(), vmid.to_string()),
            ("name".to_string(), p.vm_name),
            ("cores".to_string(), p.cores.to_string()),
            ("memory".to_string(), p.memory.to_string()),
            ("storage".to_string(), p.storage),
            ("archive".to_string(), p.filename),
        ];

        let path = format!("/nodes/{}/qemu", p.node);
        let data = match client.call(ApiRequest::post(path, form)).await {
            Ok(data) => data,
            Err(Error::Upstream { status, body }) if body.contains("already exists") => {
                warn!("VMID {} 已被占用: {}", vmid, body);
                return Err(Error::VmidConflict { vmid, status, body });
            }
            Err(e) => return Err(e),
        };
        let upid = upid_of(ActionName::ImportVm, data)?;

        info!("✅ 导入任务已提交: vmid={}, upid={}", vmid, upid);
        Ok(upid)
    }

    /// 查询单个任务状态
    pub async fn task_status(
        &self,
        node: &str,
        upid: &str,
        client: &dyn ControlPlane,
    ) -> Result<TaskStatus> {
        let path = format!("/nodes/{}/tasks/{}/status", node, urlencoding::encode(upid));
        let data = client.call(ApiRequest::get(path)).await?;
        decode(ActionName::GetTaskStatus, data)
    }
}

impl Default for ActionBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// 通过 Action Broker 查询任务状态的数据源
pub struct BrokerTaskSource {
    broker: Arc<ActionBroker>,
    client: Arc<dyn ControlPlane>,
}

impl BrokerTaskSource {
    pub fn new(broker: Arc<ActionBroker>, client: Arc<dyn ControlPlane>) -> Self {
        Self { broker, client }
    }
}

#[async_trait]
impl TaskStatusSource for BrokerTaskSource {
    /// UPID 只在签发它的 Proxmox 上有效，地址不一致时不发请求
    async fn task_status(&self, handle: &TaskHandle) -> Result<TaskStatus> {
        if handle.endpoint != self.client.endpoint() {
            return Err(Error::validation(format!(
                "任务 {} 属于 {}，当前连接的是 {}",
                handle,
                handle.endpoint,
                self.client.endpoint()
            )));
        }
        self.broker
            .task_status(&handle.node, &handle.upid, self.client.as_ref())
            .await
    }
}

fn invalid(name: ActionName, message: impl std::fmt::Display) -> Error {
    Error::InvalidResponse(format!("{}: {}", name, message))
}

fn decode<T: DeserializeOwned>(name: ActionName, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| invalid(name, e))
}

/// 列表类接口，`data` 为 null 时视为空列表
fn decode_list<T: DeserializeOwned>(name: ActionName, data: Value) -> Result<Vec<T>> {
    if data.is_null() {
        return Ok(Vec::new());
    }
    decode(name, data)
}

fn upid_of(name: ActionName, data: Value) -> Result<String> {
    match data {
        Value::String(upid) if !upid.is_empty() => Ok(upid),
        other => Err(invalid(name, format!("期望返回 UPID，实际为 {}", other))),
    }
}
