//! 日志相关命令

use crate::error::{Result, SyncError};
use crate::logging::{LogConfig, LogEntry};
use crate::AppState;

/// 活动日志，最新的在前
pub fn get_logs(state: &AppState) -> Vec<LogEntry> {
    state.activity.entries()
}

/// 获取日志配置
pub fn get_log_config(state: &AppState) -> LogConfig {
    LogConfig::load(&state.data_dir)
}

/// 设置日志配置，重启后生效
pub fn set_log_config(
    state: &AppState,
    enabled: Option<bool>,
    max_size_mb: Option<u32>,
    level: Option<String>,
) -> Result<LogConfig> {
    let mut config = LogConfig::load(&state.data_dir);

    if let Some(e) = enabled {
        config.enabled = e;
    }
    if let Some(size) = max_size_mb {
        // 限制范围 1-100 MB
        config.max_size_mb = size.clamp(1, 100);
    }
    if let Some(l) = level {
        let l = l.to_lowercase();
        if !LogConfig::VALID_LEVELS.contains(&l.as_str()) {
            return Err(SyncError::Configuration(format!("无效的日志级别: {}", l)));
        }
        config.level = l;
    }

    config.save(&state.config)?;
    Ok(config)
}
