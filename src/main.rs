use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};

use orchestrator_api::{create_routes, AppState};
use orchestrator_core::config::AppConfig;
use orchestrator_core::logging::init_logging;
use orchestrator_dispatcher::{
    HandoffCoordinator, NodeLivenessSweeper, NodeLivenessSweeperConfig, NodeMatcher,
    SchedulingStrategy, TaskScheduler,
};
use orchestrator_infrastructure::{
    AgentClient, AgentClientConfig, HttpInferenceExecutor, MemoryHandoffRepository,
    MemoryNodeRegistry, MemoryTaskRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("orchestrator")
        .version("0.1.0")
        .about("分布式推理任务编排系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/orchestrator.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();

    // 加载配置
    let mut config = AppConfig::load(Some(config_path))
        .with_context(|| format!("加载配置文件失败: {config_path}"))?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.log.format = format.clone();
    }

    // 初始化日志系统
    init_logging(&config.log)?;

    info!("启动分布式推理任务编排系统");
    info!("配置文件: {config_path}");
    info!("监听地址: {}", config.api.bind_address);

    // 组装依赖：显式构造并注入，不使用全局单例
    let registry = Arc::new(MemoryNodeRegistry::new(
        config.registry.liveness_threshold_seconds,
    ));
    let task_repo = Arc::new(MemoryTaskRepository::new());
    let handoff_repo = Arc::new(MemoryHandoffRepository::new());

    let strategy = SchedulingStrategy::from_name(&config.scheduler.strategy).unwrap_or_else(|| {
        warn!(
            "未知的调度策略 '{}'，使用默认策略",
            config.scheduler.strategy
        );
        SchedulingStrategy::default()
    });
    let matcher = Arc::new(NodeMatcher::new(strategy));

    let agent_client = Arc::new(
        AgentClient::new(AgentClientConfig {
            request_timeout_seconds: config.agent.request_timeout_seconds,
            connect_timeout_seconds: config.agent.connect_timeout_seconds,
            forward_timeout_seconds: config.handoff.forward_timeout_seconds,
        })
        .context("构建节点通信客户端失败")?,
    );
    let executor = Arc::new(HttpInferenceExecutor::new(agent_client.clone()));

    let scheduler = Arc::new(TaskScheduler::new(
        registry.clone(),
        task_repo.clone(),
        matcher.clone(),
        executor,
        config.scheduler.clone(),
    ));

    let coordinator = Arc::new(HandoffCoordinator::new(
        registry.clone(),
        task_repo.clone(),
        handoff_repo.clone(),
        matcher.clone(),
        agent_client.clone(),
        config.handoff.clone(),
    ));

    let sweeper = Arc::new(NodeLivenessSweeper::new(
        registry.clone(),
        task_repo.clone(),
        scheduler.clone(),
        coordinator.clone(),
        agent_client.clone(),
        NodeLivenessSweeperConfig {
            liveness_threshold_seconds: config.registry.liveness_threshold_seconds,
            stale_node_seconds: config.registry.stale_node_seconds,
            sweep_interval_seconds: config.registry.sweep_interval_seconds,
        },
    ));

    // 启动后台服务
    let scheduler_handle = tokio::spawn(scheduler.clone().run());
    let sweeper_handle = tokio::spawn(sweeper.clone().run());
    let session_sweep_handle = tokio::spawn(coordinator.clone().run_sweep());

    // 启动HTTP服务
    let state = AppState {
        registry,
        task_repo,
        handoff_repo,
        scheduler: scheduler.clone(),
        coordinator: coordinator.clone(),
    };
    let app = create_routes(state);

    let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
        .await
        .with_context(|| format!("绑定监听地址失败: {}", config.api.bind_address))?;

    let server = axum::serve(listener, app).with_graceful_shutdown(wait_for_shutdown_signal());

    info!("编排系统已就绪");
    if let Err(e) = server.await {
        error!("HTTP服务异常退出: {e}");
    }

    info!("收到关闭信号，开始优雅关闭...");
    scheduler.stop().await;
    sweeper.stop().await;
    coordinator.stop().await;

    // 等待后台服务退出，设置超时
    for (name, handle) in [
        ("调度循环", scheduler_handle),
        ("存活巡检", sweeper_handle),
        ("会话清理", session_sweep_handle),
    ] {
        match tokio::time::timeout(Duration::from_secs(30), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{name}退出时发生错误: {e}"),
            Err(_) => warn!("{name}关闭超时"),
        }
    }

    info!("分布式推理任务编排系统已退出");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
