//! 错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 存储凭据缺失、配置文件损坏等，操作不会开始
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("同步任务已在运行中")]
    AlreadyRunning,

    /// 初始列举远程对象失败，整次同步中止
    #[error("列举远程对象失败: {0}")]
    Listing(String),

    /// 单个文件传输失败，记录后继续下一个文件
    #[error("传输失败 {key}: {message}")]
    Transfer { key: String, message: String },

    #[error("无效的路径: {0}")]
    InvalidPath(String),

    #[error("路径不存在: {0}")]
    NotFound(String),

    #[error("同步工作线程不可用")]
    WorkerUnavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn transfer(key: &str, err: impl std::fmt::Display) -> Self {
        SyncError::Transfer {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
