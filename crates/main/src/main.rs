//! 主应用程序入口
//!
//! 加载配置、组装消息路由器并启动 Axum Web 服务。

use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // 初始化日志：RUST_LOG 优先，否则使用配置中的级别
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(?config, "配置已加载");

    let infrastructure = Infrastructure::build(&config);
    infrastructure.router.start_processing()?;

    let app = router(AppState::new(&infrastructure));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("协作消息服务启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    infrastructure.router.stop_processing().await;
    let stats = infrastructure.router.get_stats();
    tracing::info!(
        processed = stats.messages_processed,
        failed = stats.messages_failed,
        "服务已停止"
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到停止信号，开始关闭");
}
