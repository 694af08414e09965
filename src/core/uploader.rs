//! 单文件上传
//!
//! 小于阈值的文件一次性写入；达到阈值的文件按固定分片大小顺序上传，
//! 任一分片失败则整个文件失败，不重试也不续传。

use crate::core::meter::{MeteredReader, TransferMeter};
use crate::core::planner::TransferTask;
use crate::core::status::StatusStore;
use crate::error::{Result, SyncError};
use crate::storage::{ObjectStore, PartToken};
use bytes::Bytes;
use chrono::Utc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// 分片上传阈值：10 MiB
pub const MULTIPART_THRESHOLD: u64 = 10 * 1024 * 1024;
/// 分片大小：5 MiB
pub const PART_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    Single,
    Multipart { parts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    pub multipart_threshold: u64,
    pub part_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: MULTIPART_THRESHOLD,
            part_size: PART_SIZE,
        }
    }
}

impl UploadConfig {
    pub fn strategy_for(&self, size: u64) -> UploadStrategy {
        if size < self.multipart_threshold {
            UploadStrategy::Single
        } else {
            UploadStrategy::Multipart {
                parts: size.div_ceil(self.part_size) as u32,
            }
        }
    }

    /// 各分片大小，按序号排列
    pub fn part_sizes(&self, size: u64) -> Vec<u64> {
        (0..size.div_ceil(self.part_size))
            .map(|i| (size - i * self.part_size).min(self.part_size))
            .collect()
    }
}

/// 上传器：一次同步内复用，读取时采样瞬时速度写入状态
pub struct Uploader<'a> {
    store: &'a dyn ObjectStore,
    status: &'a StatusStore,
    config: UploadConfig,
    meter: TransferMeter,
}

impl<'a> Uploader<'a> {
    pub fn new(store: &'a dyn ObjectStore, status: &'a StatusStore, config: UploadConfig) -> Self {
        Self {
            store,
            status,
            config,
            meter: TransferMeter::new(Instant::now()),
        }
    }

    /// 替换速度计，用于调整采样间隔
    pub fn with_meter(mut self, meter: TransferMeter) -> Self {
        self.meter = meter;
        self
    }

    /// 上传单个文件，成功时返回实际传输的字节数
    pub async fn upload(&mut self, task: &TransferTask) -> Result<u64> {
        let key = task.remote_key.as_str();
        let mut file = File::open(&task.local_path)
            .await
            .map_err(|e| SyncError::transfer(key, e))?;

        match self.config.strategy_for(task.size) {
            UploadStrategy::Single => {
                debug!("单次上传: {} ({} 字节)", key, task.size);
                let mut data = Vec::with_capacity(task.size as usize);
                file.read_to_end(&mut data)
                    .await
                    .map_err(|e| SyncError::transfer(key, e))?;
                let len = data.len() as u64;

                // 整个文件一次写出，速度按 put 的耗时计算，不含读盘时间
                self.meter.restart(Instant::now());
                self.store
                    .put(key, Bytes::from(data))
                    .await
                    .map_err(|e| SyncError::transfer(key, e))?;
                if let Some(speed) = self.meter.record_bytes(len, Instant::now()) {
                    Self::write_speed(self.status, speed);
                }
                Ok(len)
            }
            UploadStrategy::Multipart { parts } => {
                debug!("分片上传: {} ({} 字节, {} 个分片)", key, task.size, parts);
                // 分片的读取与上传交替进行，按读取进度采样
                let status = self.status;
                let meter = &mut self.meter;
                let mut reader = MeteredReader::new(file, |n| {
                    if let Some(speed) = meter.record_bytes(n, Instant::now()) {
                        Self::write_speed(status, speed);
                    }
                });
                Self::upload_multipart(self.store, self.config, key, &mut reader).await
            }
        }
    }

    fn write_speed(status: &StatusStore, speed: f64) {
        status.update(|s| {
            s.network.instant_speed = speed;
            s.network.last_update = Some(Utc::now());
        });
    }

    async fn upload_multipart<R: AsyncRead + Unpin>(
        store: &dyn ObjectStore,
        config: UploadConfig,
        key: &str,
        reader: &mut R,
    ) -> Result<u64> {
        let upload_id = store
            .init_multipart(key)
            .await
            .map_err(|e| SyncError::transfer(key, e))?;

        let result = Self::upload_parts(store, config, key, &upload_id, reader).await;
        let (parts, total) = match result {
            Ok(done) => done,
            Err(e) => {
                Self::abort(store, key, &upload_id).await;
                return Err(e);
            }
        };

        if let Err(e) = store.complete_multipart(key, &upload_id, parts).await {
            Self::abort(store, key, &upload_id).await;
            return Err(SyncError::transfer(key, format!("提交分片失败: {}", e)));
        }

        // 提交后核对远端大小
        match store.stat(key).await {
            Ok(Some(size)) if size == total => Ok(total),
            Ok(Some(size)) => Err(SyncError::transfer(
                key,
                format!("远端大小 {} 与本地 {} 不一致", size, total),
            )),
            Ok(None) => Err(SyncError::transfer(key, "提交后对象不存在")),
            Err(e) => Err(SyncError::transfer(key, e)),
        }
    }

    /// 进程内尽量清理远端会话；进程崩溃时会话仍会残留
    async fn abort(store: &dyn ObjectStore, key: &str, upload_id: &str) {
        if let Err(e) = store.abort_multipart(key, upload_id).await {
            warn!("放弃分片上传失败 {}: {}", key, e);
        }
    }

    async fn upload_parts<R: AsyncRead + Unpin>(
        store: &dyn ObjectStore,
        config: UploadConfig,
        key: &str,
        upload_id: &str,
        reader: &mut R,
    ) -> Result<(Vec<PartToken>, u64)> {
        let mut parts = Vec::new();
        let mut total = 0u64;

        for index in 1u32.. {
            let mut buf = Vec::with_capacity(config.part_size as usize);
            (&mut *reader)
                .take(config.part_size)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| SyncError::transfer(key, e))?;
            if buf.is_empty() {
                break;
            }

            total += buf.len() as u64;
            let token = store
                .upload_part(key, upload_id, index, Bytes::from(buf))
                .await
                .map_err(|e| SyncError::transfer(key, format!("分片 {} 上传失败: {}", index, e)))?;
            parts.push(token);
        }

        if parts.is_empty() {
            return Err(SyncError::transfer(key, "文件为空，无法分片上传"));
        }
        Ok((parts, total))
    }
}
