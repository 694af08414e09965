use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::config::{ConfigStore, ScheduleConfig, StorageConfig, SyncConfiguration, SyncState};
pub use crate::core::{RunOutcome, RunReport, StatusStore, SyncStatusSnapshot, Trigger};
pub use crate::error::{Result, SyncError};

use crate::core::{RunContext, Scheduler, SyncWorker, UploadConfig};
use crate::logging::ActivityLog;
use crate::storage::ObjectStore;

/// 应用状态，在各命令间共享
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub source_root: PathBuf,
    pub config: Arc<ConfigStore>,
    pub status: Arc<StatusStore>,
    pub activity: Arc<ActivityLog>,
    /// 未配置存储凭据时为 None，启动同步会被拒绝
    pub store: Option<Arc<dyn ObjectStore>>,
    worker: Arc<SyncWorker>,
    scheduler: Arc<Scheduler>,
}

impl AppState {
    /// 打开数据目录下的状态文件，启动同步工作线程并按配置安排定时任务。
    /// 必须在 tokio 运行时内调用
    pub fn new(
        data_dir: impl Into<PathBuf>,
        source_root: impl Into<PathBuf>,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        let source_root = source_root.into();
        std::fs::create_dir_all(&data_dir)?;

        let config = Arc::new(ConfigStore::open(&data_dir)?);
        let status = Arc::new(StatusStore::open(&data_dir)?);
        let activity = Arc::new(ActivityLog::open(&data_dir)?);

        // 进程刚启动，不可能有同步在跑
        let persisted = config.read()?;
        if persisted.sync_status == SyncState::Running {
            tracing::warn!("上次同步未正常结束，同步状态已重置为 stopped");
            config.set_sync_status(SyncState::Stopped)?;
        }

        let worker = SyncWorker::spawn(Arc::new(RunContext {
            source_root: source_root.clone(),
            status: status.clone(),
            config: config.clone(),
            activity: activity.clone(),
            upload: UploadConfig::default(),
        }));

        let state = Self {
            data_dir,
            source_root,
            config,
            status,
            activity,
            store,
            worker: Arc::new(worker),
            scheduler: Arc::new(Scheduler::new()),
        };
        state.apply_schedule(&persisted.schedule);

        tracing::info!(
            "应用初始化完成: 数据目录 {}, 源目录 {}",
            state.data_dir.display(),
            state.source_root.display()
        );
        Ok(state)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub(crate) fn worker(&self) -> &SyncWorker {
        &self.worker
    }

    /// 取消旧的定时任务，按新配置重新安排
    pub fn apply_schedule(&self, schedule: &ScheduleConfig) {
        let state = self.clone();
        let enabled = self.scheduler.apply(schedule, move || {
            commands::sync::start_sync(&state, Trigger::Scheduled).map(|_| ())
        });

        if enabled {
            self.activity
                .info(format!("已设置定时同步任务，间隔 {} 秒", schedule.interval));
        } else {
            self.activity.info("定时同步任务已禁用");
        }
    }

    pub fn scheduler_active(&self) -> bool {
        self.scheduler.is_active()
    }

    /// 清理资源（进程退出时调用）
    pub async fn cleanup(&self) {
        tracing::info!("正在清理应用资源...");

        // 1. 停止定时触发
        self.scheduler.stop();

        // 2. 请求正在进行的同步在当前文件结束后停止
        if self.status.is_syncing() {
            tracing::debug!("停止正在进行的同步");
            if let Err(e) = self.config.set_sync_status(SyncState::Stopped) {
                tracing::error!("写入同步状态失败: {}", e);
            }
        }

        // 3. 等待工作线程处理完队列
        self.worker.shutdown().await;

        tracing::info!("资源清理完成");
    }
}
