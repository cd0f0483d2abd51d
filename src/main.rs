use apex_og_image::app::build_router;
use apex_og_image::features::og::OgImageService;
use apex_og_image::state::AppState;
use apex_og_image::{ShutdownManager, config::AppConfig};

#[tokio::main]
async fn main() {
    // 配置先于日志加载：日志过滤指令本身来自配置
    let config = match AppConfig::init_global() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config init failed: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .init();

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler().await {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    let og = match OgImageService::from_config(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("图片服务初始化失败: {}", e);
            std::process::exit(1);
        }
    };
    // 引擎保持惰性：首个图片请求触发初始化
    let state = AppState::new(og);
    let reporter = state.og.reporter().clone();
    let app = build_router(state);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("OG image: http://{}/?title=Apex%20SDK", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("OpenAPI: http://{}/api-docs/openapi.json", addr);

    let shutdown_signal = {
        let manager = shutdown_manager.clone();
        async move {
            let reason = manager.wait_for_shutdown().await;
            tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    // 连接已全部结束，再等待在途的错误上报
    let timeout = config.shutdown.timeout_duration();
    tracing::info!(
        in_flight = reporter.in_flight(),
        "等待错误上报完成，超时时间: {}秒",
        config.shutdown.timeout_secs
    );
    if reporter.drain(timeout).await {
        tracing::info!("优雅退出完成");
    } else {
        tracing::warn!(
            in_flight = reporter.in_flight(),
            "优雅退出超时，放弃未完成的错误上报"
        );
    }
}
