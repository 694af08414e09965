//! 配置命令

use crate::config::{ConfigUpdate, SyncConfiguration};
use crate::error::{Result, SyncError};
use crate::AppState;

pub fn get_config(state: &AppState) -> Result<SyncConfiguration> {
    state.config.read()
}

/// 更新定时设置和忽略规则，未提供的字段保持不变。
/// 提供了定时设置时重新安排定时任务，只改忽略规则时现有定时任务照常运行
pub fn update_config(state: &AppState, update: ConfigUpdate) -> Result<SyncConfiguration> {
    if let Some(schedule) = &update.schedule {
        if schedule.interval == 0 {
            return Err(SyncError::Configuration("同步间隔必须大于 0".to_string()));
        }
    }

    let patterns = update.ignore_patterns.map(|patterns| {
        patterns
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
    });
    let schedule = update.schedule;

    let config = state.config.update(|config| {
        if let Some(schedule) = schedule.clone() {
            config.schedule = schedule;
        }
        if let Some(patterns) = patterns {
            config.ignore_patterns = patterns;
        }
    })?;

    if schedule.is_some() {
        state.apply_schedule(&config.schedule);
    }
    state.activity.info("配置已更新");
    Ok(config)
}
