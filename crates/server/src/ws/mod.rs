/// WebSocket 模块
///
/// 向前端推送 Proxmox 任务状态

pub mod task_handler;

pub use task_handler::handle_task_websocket;
