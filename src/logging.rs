//! 日志模块
//!
//! 两部分：
//! - `ActivityLog`：面向用户的同步日志，保存在 `logs.json`，最新的在前，最多 100 条
//! - `LogConfig` / `SizeRotatingWriter`：tracing 文件日志，超过大小后轮转为 `.old`

use crate::config::{write_json_atomic, ConfigStore};
use crate::error::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// 活动日志保留条数
pub const MAX_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub level: LogLevel,
}

/// 活动日志（环形缓冲，持久化到 JSON 文件）
pub struct ActivityLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ActivityLog {
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join("logs.json");
        if !path.exists() {
            write_json_atomic(&path, &Vec::<LogEntry>::new())?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn info(&self, message: impl Into<String>) {
        self.append(message, LogLevel::Info);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(message, LogLevel::Error);
    }

    /// 追加一条日志，同时输出到 tracing。写文件失败只告警，不影响调用方
    pub fn append(&self, message: impl Into<String>, level: LogLevel) {
        let message = message.into();
        match level {
            LogLevel::Error => tracing::error!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
        }

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load();
        entries.insert(
            0,
            LogEntry {
                timestamp: Local::now(),
                message,
                level,
            },
        );
        entries.truncate(MAX_LOG_ENTRIES);

        if let Err(e) = write_json_atomic(&self.path, &entries) {
            tracing::warn!("写入活动日志失败: {}", e);
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load()
    }

    /// 文件损坏时视为空日志
    fn load(&self) -> Vec<LogEntry> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用文件日志
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    pub const VALID_LEVELS: [&'static str; 5] = ["error", "warn", "info", "debug", "trace"];

    /// 从 `config.json` 的 `log` 段加载，缺失或损坏时使用默认值
    pub fn load(data_dir: &Path) -> Self {
        fs::read_to_string(data_dir.join("config.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("log").cloned())
            .and_then(|log| serde_json::from_value(log).ok())
            .unwrap_or_default()
    }

    /// 写回 `log` 段，其余配置保持不变
    pub fn save(&self, store: &ConfigStore) -> Result<()> {
        store.update_section("log", serde_json::to_value(self)?)
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器，超过上限时把当前文件改名为 `sync.log.old`
#[derive(Clone)]
pub struct SizeRotatingWriter {
    inner: Arc<RotatingFile>,
}

struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    file: Mutex<Option<BufWriter<File>>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join("sync.log");
        let max_size = u64::from(max_size_mb) * 1024 * 1024;

        let file = RotatingFile::open(&path, max_size)?;
        Ok(Self {
            inner: Arc::new(RotatingFile {
                path,
                max_size,
                file: Mutex::new(Some(file)),
            }),
        })
    }
}

impl RotatingFile {
    fn open(path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        if fs::metadata(path).map(|m| m.len() > max_size).unwrap_or(false) {
            Self::rotate(path)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn rotate(path: &Path) -> io::Result<()> {
        let backup = path.with_extension("log.old");
        if backup.exists() {
            fs::remove_file(&backup)?;
        }
        fs::rename(path, &backup)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());

        let oversized = fs::metadata(&self.path)
            .map(|m| m.len() > self.max_size)
            .unwrap_or(false);
        if oversized || guard.is_none() {
            if let Some(mut w) = guard.take() {
                let _ = w.flush();
            }
            *guard = Some(Self::open(&self.path, self.max_size)?);
        }

        match guard.as_mut() {
            Some(writer) => {
                let written = writer.write(buf)?;
                writer.flush()?;
                Ok(written)
            }
            None => Err(io::Error::new(io::ErrorKind::Other, "日志文件不可用")),
        }
    }
}

pub struct LogWriter {
    inner: Arc<RotatingFile>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.inner.file.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.inner.clone(),
        }
    }
}
