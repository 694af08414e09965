//! 同步控制命令

use crate::config::SyncState;
use crate::core::{RunReport, RunRequest, SyncStatusSnapshot, Trigger};
use crate::error::{Result, SyncError};
use crate::AppState;
use chrono::Utc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// 已入队的同步，可等待其报告
#[derive(Debug)]
pub struct RunHandle {
    pub id: Uuid,
    pub trigger: Trigger,
    receiver: oneshot::Receiver<RunReport>,
}

impl RunHandle {
    pub async fn wait(self) -> Result<RunReport> {
        self.receiver.await.map_err(|_| SyncError::WorkerUnavailable)
    }
}

/// 开始同步，只入队不等待
pub fn start_sync(state: &AppState, trigger: Trigger) -> Result<RunHandle> {
    let store = state
        .store
        .clone()
        .ok_or_else(|| SyncError::Configuration("未配置对象存储凭据".to_string()))?;

    state
        .config
        .read()
        .map_err(|e| SyncError::Configuration(format!("读取配置失败: {}", e)))?;

    state.status.try_begin(Utc::now())?;
    if let Err(e) = state.config.set_sync_status(SyncState::Running) {
        state.status.finish(Utc::now());
        return Err(e);
    }

    let id = Uuid::new_v4();
    let (done, receiver) = oneshot::channel();
    let request = RunRequest {
        id,
        trigger,
        store,
        done: Some(done),
    };
    if let Err(e) = state.worker().try_enqueue(request) {
        if let Err(write_err) = state.config.set_sync_status(SyncState::Stopped) {
            tracing::error!("写入同步状态失败: {}", write_err);
        }
        state.status.finish(Utc::now());
        return Err(e);
    }

    state.activity.info(match trigger {
        Trigger::Manual => "同步任务已开始",
        Trigger::Scheduled => "定时同步任务已开始",
    });
    Ok(RunHandle {
        id,
        trigger,
        receiver,
    })
}

/// 请求停止同步，当前文件会传完
pub fn stop_sync(state: &AppState) -> Result<()> {
    state.config.set_sync_status(SyncState::Stopped)?;
    state.activity.info("同步任务已停止");
    Ok(())
}

pub fn get_status(state: &AppState) -> SyncStatusSnapshot {
    state.status.read()
}

/// 强制恢复空闲状态，不会停止工作线程
pub fn reset_status(state: &AppState) -> SyncStatusSnapshot {
    state.status.reset();
    state.status.read()
}
