//! 同步状态快照
//!
//! 工作线程写、任意数量的读者并发读。所有修改都在同一把锁内完成并落盘，
//! 读者拿到的总是某次完整更新之后的副本。锁只在单次字段更新期间持有，
//! 不会跨越任何网络调用。

use crate::config::write_json_atomic;
use crate::core::meter::average_speed;
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub total_files: u64,
    pub processed_files: u64,
    pub current_file: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    /// 字节/秒
    pub instant_speed: f64,
    /// 字节/秒
    pub avg_speed: f64,
    pub total_bytes_transferred: u64,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub is_syncing: bool,
    pub progress: SyncProgress,
    pub network: NetworkStats,
}

/// 状态存储，"是否正在同步" 以这里为准
pub struct StatusStore {
    path: PathBuf,
    snapshot: Mutex<SyncStatusSnapshot>,
}

impl StatusStore {
    /// 加载上次持久化的状态。进程重启后不可能还有同步在跑，
    /// 残留的 `isSyncing=true` 视为异常中断，直接结束
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join("status.json");

        let mut snapshot: SyncStatusSnapshot = fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();

        if snapshot.is_syncing {
            warn!("上次同步未正常结束，重置同步状态");
            snapshot.is_syncing = false;
            snapshot.progress.current_file.clear();
            snapshot.progress.end_time.get_or_insert_with(Utc::now);
            snapshot.network.instant_speed = 0.0;
        }

        let store = Self {
            path,
            snapshot: Mutex::new(snapshot),
        };
        store.update(|_| {});
        Ok(store)
    }

    pub fn read(&self) -> SyncStatusSnapshot {
        self.lock().clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.lock().is_syncing
    }

    /// 原子地应用一次部分更新，重新计算平均速度并持久化
    pub fn update(&self, f: impl FnOnce(&mut SyncStatusSnapshot)) {
        let mut snapshot = self.lock();
        f(&mut snapshot);
        Self::refresh_average(&mut snapshot, Utc::now());
        self.persist(&snapshot);
    }

    /// 开始一次同步：已在同步时拒绝，否则清零网络统计并记录开始时间
    pub fn try_begin(&self, now: DateTime<Utc>) -> Result<()> {
        let mut snapshot = self.lock();
        if snapshot.is_syncing {
            return Err(SyncError::AlreadyRunning);
        }

        *snapshot = SyncStatusSnapshot {
            is_syncing: true,
            progress: SyncProgress {
                start_time: Some(now),
                ..Default::default()
            },
            network: NetworkStats::default(),
        };
        self.persist(&snapshot);
        Ok(())
    }

    /// 结束一次同步，保留已处理文件数和总字节数供事后查看
    pub fn finish(&self, now: DateTime<Utc>) {
        let mut snapshot = self.lock();
        snapshot.is_syncing = false;
        snapshot.progress.current_file.clear();
        snapshot.progress.end_time = Some(now);
        snapshot.network.instant_speed = 0.0;
        snapshot.network.last_update = Some(now);
        Self::refresh_average(&mut snapshot, now);
        self.persist(&snapshot);
    }

    /// 强制恢复为空闲默认值。工作线程仍在运行时会与实际状态不一致
    pub fn reset(&self) {
        let mut snapshot = self.lock();
        if snapshot.is_syncing {
            warn!("同步仍在进行时重置了状态，状态可能与实际不一致");
        }
        *snapshot = SyncStatusSnapshot::default();
        self.persist(&snapshot);
        info!("同步状态已重置");
    }

    fn refresh_average(snapshot: &mut SyncStatusSnapshot, now: DateTime<Utc>) {
        if let Some(start) = snapshot.progress.start_time {
            let end = snapshot.progress.end_time.unwrap_or(now);
            snapshot.network.avg_speed =
                average_speed(snapshot.network.total_bytes_transferred, start, end);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyncStatusSnapshot> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 在锁内落盘，失败只告警
    fn persist(&self, snapshot: &SyncStatusSnapshot) {
        if let Err(e) = write_json_atomic(&self.path, snapshot) {
            warn!("保存同步状态失败: {}", e);
        }
    }
}
