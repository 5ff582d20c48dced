/// 任务推送 WebSocket
///
/// 前端提交任务后通过 `/ws/tasks` 订阅 (node, upid) 的状态变化。
/// 每个连接持有自己的凭据和 watch 集合：更换凭据或断开连接会取消该连接的全部 watch。

use axum::extract::ws::{Message as AxumWsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use pve_common::models::{TaskHandle, TaskStatus};
use pve_common::protocol::{ErrorBody, TaskParams};
use pve_common::{Credentials, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::services::{BrokerTaskSource, ControlPlane, TaskEvent, TaskOutcome, TaskWatch};

/// 前端发来的消息
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 为当前连接设置凭据
    Configure { credentials: Credentials },
    WatchTask { node: String, upid: String },
    UnwatchTask { node: String, upid: String },
    Ping,
}

/// 推送给前端的消息
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskMessage {
    /// 任务仍在运行
    TaskStatusUpdate {
        node: String,
        upid: String,
        task: TaskStatus,
    },
    /// 任务结束，每个 watch 只发一次
    TaskFinished {
        node: String,
        upid: String,
        outcome: TaskOutcome,
    },
    Error {
        error: String,
        code: String,
    },
    Pong {
        timestamp: i64,
    },
}

impl From<&Error> for TaskMessage {
    fn from(err: &Error) -> Self {
        let body = ErrorBody::from(err);
        TaskMessage::Error {
            error: body.error,
            code: body.code,
        }
    }
}

/// 单个 WebSocket 连接的会话状态
pub struct TaskSession {
    id: String,
    state: AppState,
    outbound: mpsc::UnboundedSender<TaskMessage>,
    client: Option<Arc<dyn ControlPlane>>,
    watches: HashMap<TaskHandle, CancellationToken>,
}

impl TaskSession {
    pub fn new(id: String, state: AppState, outbound: mpsc::UnboundedSender<TaskMessage>) -> Self {
        Self {
            id,
            state,
            outbound,
            client: None,
            watches: HashMap::new(),
        }
    }

    /// 当前仍在轮询的 watch 数量
    pub fn active_watches(&mut self) -> usize {
        self.prune();
        self.watches.len()
    }

    /// 处理一条前端消息，错误以 `error` 消息回送
    pub async fn handle(&mut self, message: ClientMessage) {
        let result = match message {
            ClientMessage::Configure { credentials } => self.configure(&credentials),
            ClientMessage::WatchTask { node, upid } => self.watch(node, upid).await,
            ClientMessage::UnwatchTask { node, upid } => {
                self.unwatch(&node, &upid);
                Ok(())
            }
            ClientMessage::Ping => {
                self.send(TaskMessage::Pong {
                    timestamp: chrono::Utc::now().timestamp(),
                });
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("[{}] 处理任务消息失败: {}", self.id, e);
            self.send(TaskMessage::from(&e));
        }
    }

    /// 解析原始文本消息
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                let err = Error::validation(format!("无法识别的消息: {}", e));
                self.send(TaskMessage::from(&err));
            }
        }
    }

    fn configure(&mut self, credentials: &Credentials) -> Result<()> {
        let client = self.state.clients().connect(credentials)?;
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            info!("[{}] 凭据已更换，取消 {} 个任务观察", self.id, cancelled);
        }
        self.client = Some(client);
        Ok(())
    }

    /// 没有设置过凭据时使用已保存的配置
    async fn client(&mut self) -> Result<Arc<dyn ControlPlane>> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let credentials = self.state.resolve_credentials(None).await?;
        let client = self.state.clients().connect(&credentials)?;
        self.client = Some(client.clone());
        Ok(client)
    }

    async fn watch(&mut self, node: String, upid: String) -> Result<()> {
        // 与 get_task_status 使用同一套参数校验，node 会被拼进上游路径
        let params = TaskParams { node, upid };
        params.validate()?;

        self.prune();
        let client = self.client().await?;
        let handle = TaskHandle::new(client.endpoint(), params.node, params.upid);
        if self.watches.contains_key(&handle) {
            debug!("[{}] 任务已在观察中: {}", self.id, handle);
            return Ok(());
        }

        let source = Arc::new(BrokerTaskSource::new(self.state.broker(), client));
        let watch = self.state.poller.watch(source, handle.clone());

        self.watches.insert(handle, watch.cancellation_token());
        tokio::spawn(forward_events(watch, self.outbound.clone()));
        Ok(())
    }

    fn unwatch(&mut self, node: &str, upid: &str) {
        let id = &self.id;
        self.watches.retain(|handle, token| {
            if handle.refers_to(node, upid) {
                token.cancel();
                info!("[{}] 取消任务观察: {}", id, handle);
                false
            } else {
                true
            }
        });
    }

    fn cancel_all(&mut self) -> usize {
        let count = self.watches.len();
        for (_, token) in self.watches.drain() {
            token.cancel();
        }
        count
    }

    /// 已结束的 watch 会在转发任务退出时取消自己的 token
    fn prune(&mut self) {
        self.watches.retain(|_, token| !token.is_cancelled());
    }

    fn send(&self, message: TaskMessage) {
        if let Err(e) = self.outbound.send(message) {
            debug!("[{}] 连接已关闭，丢弃消息: {}", self.id, e);
        }
    }
}

impl Drop for TaskSession {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// 把 watch 的事件转成推送消息，结束后丢弃 watch
async fn forward_events(mut watch: TaskWatch, outbound: mpsc::UnboundedSender<TaskMessage>) {
    let node = watch.handle().node.clone();
    let upid = watch.handle().upid.clone();

    while let Some(event) = watch.next_event().await {
        let message = match event {
            TaskEvent::Observed(task) => TaskMessage::TaskStatusUpdate {
                node: node.clone(),
                upid: upid.clone(),
                task,
            },
            TaskEvent::Finished(outcome) => TaskMessage::TaskFinished {
                node: node.clone(),
                upid: upid.clone(),
                outcome,
            },
        };
        if outbound.send(message).is_err() {
            break;
        }
    }
}

/// WebSocket 升级处理器
pub async fn handle_task_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_task_connection(socket, state))
}

async fn handle_task_connection(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!("新的任务 WebSocket 连接: {}", connection_id);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<TaskMessage>();

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = send_task_message(&mut ws_sender, msg).await {
                error!("发送任务消息失败: {}", e);
                break;
            }
        }
        debug!("任务消息发送任务结束");
    });

    let mut session = TaskSession::new(connection_id.clone(), state, tx);
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(AxumWsMessage::Text(text)) => session.handle_text(&text).await,
                Ok(AxumWsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("接收任务消息错误: {}", e);
                    break;
                }
            }
        }
        // session 在此被丢弃，所有 watch 随之取消
        debug!("任务消息接收任务结束");
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("任务连接已关闭: {}", connection_id);
}

async fn send_task_message(
    sender: &mut futures_util::stream::SplitSink<WebSocket, AxumWsMessage>,
    msg: TaskMessage,
) -> std::result::Result<(), String> {
    let json = serde_json::to_string(&msg).map_err(|e| format!("序列化任务消息失败: {}", e))?;

    sender
        .send(AxumWsMessage::Text(json))
        .await
        .map_err(|e| format!("发送 WebSocket 消息失败: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::action_broker::tests::{StubControlPlane, StubFactory};
    use crate::services::{ActionBroker, ConfigStore, TaskPoller};
    use serde_json::{json, Value};
    use std::time::Duration;

    const UPID: &str = "UPID:pve1:000A1B2C:0123ABCD:65A0F00D:qmclone:100:root@pam:";

    struct Harness {
        session: TaskSession,
        rx: mpsc::UnboundedReceiver<TaskMessage>,
        stub: Arc<StubControlPlane>,
        factory: Arc<StubFactory>,
        _dir: tempfile::TempDir,
    }

    fn harness(responses: Vec<Result<Value>>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubControlPlane::new(responses));
        let factory = Arc::new(StubFactory::new(stub.clone()));
        let state = AppState::with_parts(
            Arc::new(ActionBroker::new()),
            TaskPoller::new(Duration::from_secs(3)),
            Arc::new(ConfigStore::new(dir.path())),
            factory.clone(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        Harness {
            session: TaskSession::new("test".into(), state, tx),
            rx,
            stub,
            factory,
            _dir: dir,
        }
    }

    fn credentials(token_id: &str) -> Credentials {
        Credentials::new("https://pve.test:8006", token_id, "s3cr3t-uuid")
    }

    fn task(status: &str, exitstatus: Option<&str>) -> Result<Value> {
        let mut value = json!({"upid": UPID, "status": status, "type": "qmclone", "starttime": 1705046029});
        if let Some(exit) = exitstatus {
            value["exitstatus"] = json!(exit);
            value["endtime"] = json!(1705046041);
        }
        Ok(value)
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"watch_task","node":"pve1","upid":"UPID:x"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::WatchTask { ref node, .. } if node == "pve1"));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"configure","credentials":{"endpointUrl":"https://pve:8006","tokenId":"a","tokenSecret":"b"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::Configure { .. }));
    }

    #[test]
    fn test_finished_message_shape() {
        let msg = TaskMessage::TaskFinished {
            node: "pve1".into(),
            upid: UPID.into(),
            outcome: TaskOutcome::Completed { exitstatus: "OK".into() },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "task_finished");
        assert_eq!(value["outcome"]["state"], "completed");
        assert_eq!(value["outcome"]["exitstatus"], "OK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_streams_updates_until_finished() {
        let mut h = harness(vec![task("running", None), task("stopped", Some("OK"))]);

        h.session
            .handle(ClientMessage::Configure { credentials: credentials("root@pam!dash") })
            .await;
        h.session
            .handle(ClientMessage::WatchTask { node: "pve1".into(), upid: UPID.into() })
            .await;

        let first = h.rx.recv().await.unwrap();
        assert!(matches!(first, TaskMessage::TaskStatusUpdate { ref upid, .. } if upid == UPID));

        let second = h.rx.recv().await.unwrap();
        match second {
            TaskMessage::TaskFinished { node, outcome, .. } => {
                assert_eq!(node, "pve1");
                assert!(outcome.is_success());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        assert_eq!(h.stub.calls().len(), 2);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.stub.calls().len(), 2);
        assert_eq!(h.session.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_watch_is_ignored() {
        let mut h = harness(vec![]);
        h.session
            .handle(ClientMessage::Configure { credentials: credentials("root@pam!dash") })
            .await;

        for _ in 0..2 {
            h.session
                .handle(ClientMessage::WatchTask { node: "pve1".into(), upid: UPID.into() })
                .await;
        }
        assert_eq!(h.session.active_watches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_cancels_watches() {
        let mut h = harness((0..20).map(|_| task("running", None)).collect());
        h.session
            .handle(ClientMessage::Configure { credentials: credentials("root@pam!dash") })
            .await;
        h.session
            .handle(ClientMessage::WatchTask { node: "pve1".into(), upid: UPID.into() })
            .await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        let polls = h.stub.calls().len();
        assert_eq!(polls, 1);
        assert_eq!(h.session.active_watches(), 1);

        h.session
            .handle(ClientMessage::Configure { credentials: credentials("root@pam!other") })
            .await;
        assert_eq!(h.session.active_watches(), 0);
        assert_eq!(h.factory.seen().len(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.stub.calls().len(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwatch_and_drop_stop_polling() {
        let mut h = harness(vec![]);
        h.session
            .handle(ClientMessage::Configure { credentials: credentials("root@pam!dash") })
            .await;
        h.session
            .handle(ClientMessage::WatchTask { node: "pve1".into(), upid: UPID.into() })
            .await;
        h.session
            .handle(ClientMessage::WatchTask { node: "pve2".into(), upid: "UPID:pve2:x".into() })
            .await;

        h.session
            .handle(ClientMessage::UnwatchTask { node: "pve1".into(), upid: UPID.into() })
            .await;
        assert_eq!(h.session.active_watches(), 1);

        drop(h.session);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.stub.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_rejects_node_with_path_separators() {
        let mut h = harness(vec![]);
        h.session
            .handle(ClientMessage::Configure { credentials: credentials("root@pam!dash") })
            .await;

        for node in ["pve1/../../access", "", "pve 1"] {
            h.session
                .handle(ClientMessage::WatchTask { node: node.into(), upid: UPID.into() })
                .await;
            match h.rx.recv().await.unwrap() {
                TaskMessage::Error { code, .. } => assert_eq!(code, "VALIDATION_ERROR"),
                other => panic!("unexpected message for {node:?}: {other:?}"),
            }
        }

        h.session
            .handle(ClientMessage::WatchTask { node: "pve1".into(), upid: String::new() })
            .await;
        assert!(matches!(h.rx.recv().await.unwrap(), TaskMessage::Error { .. }));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.stub.calls().is_empty());
        assert_eq!(h.session.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_watch_without_config_reports_unconfigured() {
        let mut h = harness(vec![]);
        h.session
            .handle(ClientMessage::WatchTask { node: "pve1".into(), upid: UPID.into() })
            .await;

        match h.rx.recv().await.unwrap() {
            TaskMessage::Error { code, .. } => assert_eq!(code, "UNCONFIGURED"),
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(h.stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ping_and_malformed_message() {
        let mut h = harness(vec![]);

        h.session.handle_text(r#"{"type":"ping"}"#).await;
        assert!(matches!(h.rx.recv().await.unwrap(), TaskMessage::Pong { .. }));

        h.session.handle_text(r#"{"type":"reboot"}"#).await;
        match h.rx.recv().await.unwrap() {
            TaskMessage::Error { code, .. } => assert_eq!(code, "VALIDATION_ERROR"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
