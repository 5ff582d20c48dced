/// Easy PVE Console - Server
///
/// 为仪表盘提供 Proxmox 操作接口和任务状态推送

mod api;
mod app_state;
mod config;
mod services;
mod ws;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::app_state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    // 加载配置
    let cfg = config::Config::load()?;

    // 初始化日志
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level)),
        )
        .init();

    info!("🚀 启动 Easy PVE Console Server...");
    info!(
        "✅ 配置加载成功: 数据目录 {}, 轮询间隔 {:?}, 请求超时 {:?}",
        cfg.data_dir.display(),
        cfg.poll_interval(),
        cfg.request_timeout()
    );

    let app_state = AppState::new(&cfg);
    match app_state.config_store.load().await {
        Some(credentials) => info!("✅ 已加载 Proxmox 配置: {}", credentials.endpoint()),
        None => info!("ℹ️ 尚未配置 Proxmox，请求需自带凭据或先调用 PUT /api/config"),
    }

    // 设置CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // 构建应用路由
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ws/tasks", get(ws::handle_task_websocket))
        .nest("/api", api::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动服务器
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server_port));
    info!("🎯 服务器监听在 http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root_handler() -> &'static str {
    "Easy PVE Console Server API v1"
}

async fn health_handler() -> &'static str {
    "OK"
}
