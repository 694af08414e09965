use clap::Parser;
use hostsync_lib::commands;
use hostsync_lib::config::StorageConfig;
use hostsync_lib::logging::{LogConfig, SizeRotatingWriter};
use hostsync_lib::storage::create_store;
use hostsync_lib::{AppState, Trigger};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

/// 把主机目录增量同步到对象存储
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// 状态、配置和日志文件所在目录
    #[arg(long, env = "SYNC_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// 要同步的源目录
    #[arg(long = "source", env = "SYNC_SOURCE_DIR", default_value = "/host_files")]
    source_dir: PathBuf,

    /// 执行一次同步后退出
    #[arg(long)]
    once: bool,
}

/// 初始化日志系统
fn init_logging(log_dir: &Path) {
    let _ = std::fs::create_dir_all(log_dir);

    let config = LogConfig::load(log_dir);

    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let subscriber = tracing_subscriber::registry();
        let _ = tracing::subscriber::set_global_default(subscriber);
        return;
    }

    let level = config.tracing_level();
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("opendal=warn".parse().unwrap_or_else(|_| level.into()))
        .add_directive("hyper=warn".parse().unwrap_or_else(|_| level.into()));

    match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
        Ok(file_writer) => {
            // 文件日志层 - 始终输出到文件
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            // 在 debug 模式下也输出到控制台
            #[cfg(debug_assertions)]
            {
                let console_layer = tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false);

                let subscriber = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .with(console_layer);
                let _ = tracing::subscriber::set_global_default(subscriber);
            }

            // 在 release 模式下只输出到文件
            #[cfg(not(debug_assertions))]
            {
                let subscriber = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer);
                let _ = tracing::subscriber::set_global_default(subscriber);
            }
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_target(false));
            let _ = tracing::subscriber::set_global_default(subscriber);
            tracing::warn!("无法创建日志文件，仅输出到控制台: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.data_dir);

    // 缺少凭据时仍然启动，启动同步会返回配置错误
    let store = match StorageConfig::from_env() {
        Ok(config) => match create_store(&config) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::error!("初始化对象存储失败: {:#}", e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    };

    let state = match AppState::new(&args.data_dir, &args.source_dir, store) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("初始化应用状态失败: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.once {
        let outcome = match commands::sync::start_sync(&state, Trigger::Manual) {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };
        state.cleanup().await;

        return match outcome {
            Ok(report) => {
                tracing::info!(
                    "同步结束: {:?}, 上传 {} 个, 跳过 {} 个, 失败 {} 个",
                    report.outcome,
                    report.uploaded,
                    report.skipped,
                    report.failed
                );
                if report.failed == 0 && report.outcome == hostsync_lib::RunOutcome::Completed {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(e) => {
                tracing::error!("同步失败: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    tracing::info!("同步服务已启动，按 Ctrl+C 退出");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("等待退出信号失败: {}", e);
    }
    state.cleanup().await;
    ExitCode::SUCCESS
}
