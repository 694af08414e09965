pub mod operator;
pub mod oss;
pub mod s3;

use crate::config::{StorageConfig, StorageType};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub use operator::OperatorStore;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程对象（列举结果）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// 分片上传完成凭证，提交时按分片序号排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartToken {
    pub index: u32,
    pub token: String,
}

/// 对象存储抽象接口
///
/// 所有调用都可能失败，同步引擎在一次同步内不做重试。
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 列出全部对象
    async fn list_all(&self) -> Result<Vec<RemoteObject>>;

    /// 获取对象大小，不存在时返回 None
    async fn stat(&self, key: &str) -> Result<Option<u64>>;

    /// 一次性写入
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// 开始分片上传，返回会话 id
    async fn init_multipart(&self, key: &str) -> Result<String>;

    /// 上传一个分片，序号从 1 开始且必须连续
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        index: u32,
        data: Bytes,
    ) -> Result<PartToken>;

    /// 按序号顺序提交全部分片
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartToken>,
    ) -> Result<()>;

    /// 放弃分片上传，清理远端未完成的会话
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;

    /// 连接测试
    async fn probe(&self) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub fn create_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let store = match config.typ {
        StorageType::Oss => {
            tracing::info!(
                "初始化OSS存储: bucket={}, endpoint={}",
                config.bucket,
                config.endpoint
            );
            oss::build(config)?
        }
        StorageType::S3 => {
            tracing::info!(
                "初始化S3存储: bucket={}, region={:?}",
                config.bucket,
                config.region
            );
            s3::build(config)?
        }
    };
    Ok(Arc::new(store))
}
