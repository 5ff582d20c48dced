/// 任务轮询
///
/// 对一个 (node, upid) 按固定间隔查询状态，直到任务结束。
/// 每个 watch 独占自己的轮询循环和状态机，取消只停止本地观察，不影响 Proxmox 上的任务。

use async_trait::async_trait;
use pve_common::models::{TaskHandle, TaskStatus};
use pve_common::utils::format_duration;
use pve_common::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 任务状态数据源
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn task_status(&self, handle: &TaskHandle) -> Result<TaskStatus>;
}

/// 任务的最终结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// 任务已结束，`exitstatus` 为 `OK` 或错误信息
    Completed { exitstatus: String },
    /// 无法继续观察（例如节点与 UPID 不匹配）
    Failed { reason: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { exitstatus } if exitstatus == "OK")
    }
}

/// 轮询状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling,
    Finished(TaskOutcome),
}

/// 轮询过程中向调用方发出的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// 任务仍在运行
    Observed(TaskStatus),
    /// 终态，每个任务只出现一次
    Finished(TaskOutcome),
}

/// 单个任务的状态机
#[derive(Debug)]
pub struct TaskTracker {
    state: PollState,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            state: PollState::Submitted,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, PollState::Finished(_))
    }

    /// 处理一次查询结果
    ///
    /// 终态之后的任何观察（包括重复的 stopped）都被忽略；瞬时错误被吸收，不产生事件。
    pub fn observe(&mut self, result: Result<TaskStatus>) -> Option<TaskEvent> {
        if self.is_finished() {
            return None;
        }
        self.state = PollState::Polling;

        let outcome = match result {
            Ok(status) if status.is_stopped() => TaskOutcome::Completed {
                exitstatus: status.exitstatus.unwrap_or_else(|| "unknown".to_string()),
            },
            Ok(status) => return Some(TaskEvent::Observed(status)),
            Err(e) if e.is_transient() => {
                debug!("轮询遇到瞬时错误，下个周期重试: {}", e);
                return None;
            }
            Err(e) => TaskOutcome::Failed {
                reason: e.to_string(),
            },
        };

        self.state = PollState::Finished(outcome.clone());
        Some(TaskEvent::Finished(outcome))
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 任务轮询器
#[derive(Debug, Clone)]
pub struct TaskPoller {
    interval: Duration,
}

impl TaskPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// 开始观察一个任务，返回可取消的句柄
    pub fn watch(&self, source: Arc<dyn TaskStatusSource>, handle: TaskHandle) -> TaskWatch {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let join = tokio::spawn(poll_loop(
            source,
            handle.clone(),
            self.interval,
            cancel.clone(),
            tx,
        ));

        TaskWatch {
            handle,
            cancel,
            events: rx,
            join: Some(join),
        }
    }
}

/// 正在进行的任务观察
///
/// 丢弃句柄即取消轮询。
pub struct TaskWatch {
    handle: TaskHandle,
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<TaskEvent>,
    join: Option<JoinHandle<Option<TaskOutcome>>>,
}

impl TaskWatch {
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 下一个事件；轮询结束或被取消后返回 None
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        self.events.recv().await
    }

    /// 等待终态；被取消时返回 None
    pub async fn outcome(mut self) -> Option<TaskOutcome> {
        let join = self.join.take()?;
        join.await.ok().flatten()
    }
}

impl Drop for TaskWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    source: Arc<dyn TaskStatusSource>,
    handle: TaskHandle,
    period: Duration,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TaskEvent>,
) -> Option<TaskOutcome> {
    let mut tracker = TaskTracker::new();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    // 上一次查询返回之前不会发起新的查询
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("🔄 开始轮询任务: {} (间隔 {:?})", handle, period);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = source.task_status(&handle) => result,
        };

        if let Ok(status) = &result {
            if let Some(end) = status.endtime {
                debug!("任务 {} 耗时 {}", handle, format_duration(status.starttime, end));
            }
        }

        match tracker.observe(result) {
            Some(TaskEvent::Finished(outcome)) => {
                match &outcome {
                    TaskOutcome::Completed { exitstatus } => {
                        info!("✅ 任务已结束: {}, exitstatus={}", handle, exitstatus)
                    }
                    TaskOutcome::Failed { reason } => warn!("❌ 任务观察失败: {}, {}", handle, reason),
                }
                let _ = events.send(TaskEvent::Finished(outcome.clone()));
                return Some(outcome);
            }
            Some(event) => {
                let _ = events.send(event);
            }
            None => {}
        }
    }

    info!("⏹️ 已停止轮询任务: {}", handle);
    None
}
