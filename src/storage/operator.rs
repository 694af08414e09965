//! 基于 opendal `Operator` 的对象存储实现
//!
//! opendal 的分片写入器在底层使用服务端的 multipart 接口。这里把每个
//! 分片会话映射为一个按分片大小切块的 `Writer`，会话 id 为本地生成的 uuid。
//! 会话只保存在内存中，进程崩溃会在远端留下未完成的分片上传。

use super::{ObjectStore, PartToken, RemoteObject, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Builder, Metakey, Operator, Writer};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// 分片会话
struct MultipartSession {
    key: String,
    /// 上传分片期间被取出，完成后放回
    writer: Option<Writer>,
    next_index: u32,
    part_size: usize,
}

pub struct OperatorStore {
    operator: Operator,
    name: String,
    part_size: usize,
    sessions: Mutex<HashMap<String, MultipartSession>>,
}

impl OperatorStore {
    /// 创建带超时层的存储
    pub fn new<B: Builder>(builder: B, name: String, part_size: usize) -> Result<Self> {
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self {
            operator,
            name,
            part_size,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, MultipartSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 取出会话的写入器，校验对象 key
    fn take_writer(&self, key: &str, upload_id: &str) -> Result<(Writer, u32)> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!("分片会话不存在: {}", upload_id))?;
        if session.key != key {
            bail!("分片会话 {} 不属于 {}", upload_id, key);
        }
        let writer = session
            .writer
            .take()
            .ok_or_else(|| anyhow!("分片会话 {} 正在使用中", upload_id))?;
        Ok((writer, session.next_index))
    }
}

#[async_trait]
impl ObjectStore for OperatorStore {
    async fn list_all(&self) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();

        let mut lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::Mode | Metakey::Etag)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let meta = entry.metadata();
            let key = entry.path().trim_start_matches('/');

            // 跳过根目录和目录占位
            if key.is_empty() || meta.is_dir() {
                continue;
            }

            objects.push(RemoteObject {
                key: key.to_string(),
                size: meta.content_length(),
                etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
            });
        }

        Ok(objects)
    }

    async fn stat(&self, key: &str) -> Result<Option<u64>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Some(meta.content_length())),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.operator.write(key, data).await?;
        Ok(())
    }

    async fn init_multipart(&self, key: &str) -> Result<String> {
        let writer = self
            .operator
            .writer_with(key)
            .chunk(self.part_size)
            .await?;

        let upload_id = uuid::Uuid::new_v4().to_string();
        self.sessions().insert(
            upload_id.clone(),
            MultipartSession {
                key: key.to_string(),
                writer: Some(writer),
                next_index: 1,
                part_size: self.part_size,
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        index: u32,
        data: Bytes,
    ) -> Result<PartToken> {
        let (mut writer, expected) = self.take_writer(key, upload_id)?;
        if index != expected {
            if let Some(session) = self.sessions().get_mut(upload_id) {
                session.writer = Some(writer);
            }
            bail!("分片序号错误: 期望 {}，实际 {}", expected, index);
        }

        let len = data.len();
        let result = writer.write(data).await;

        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!("分片会话不存在: {}", upload_id))?;
        session.writer = Some(writer);
        result?;

        if len > session.part_size {
            tracing::debug!("分片 {} 大于分片大小 ({} > {})", index, len, session.part_size);
        }
        session.next_index += 1;

        Ok(PartToken {
            index,
            token: format!("{}:{}", index, len),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartToken>,
    ) -> Result<()> {
        let (mut writer, next_index) = self.take_writer(key, upload_id)?;
        self.sessions().remove(upload_id);

        let in_order = parts
            .iter()
            .enumerate()
            .all(|(i, part)| part.index as usize == i + 1);
        if !in_order || parts.len() as u32 + 1 != next_index {
            let _ = writer.abort().await;
            bail!("分片列表与已上传分片不一致: {}", key);
        }

        if let Err(e) = writer.close().await {
            // 会话已移除，之后的 abort_multipart 找不到它，这里直接放弃
            if let Err(abort_err) = writer.abort().await {
                tracing::warn!("放弃分片上传失败 {}: {}", key, abort_err);
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let session = self.sessions().remove(upload_id);
        match session {
            Some(MultipartSession {
                writer: Some(mut writer),
                ..
            }) => {
                writer.abort().await?;
                tracing::debug!("已放弃分片上传: {}", key);
                Ok(())
            }
            Some(_) => bail!("分片会话 {} 正在使用中", upload_id),
            None => Ok(()),
        }
    }

    async fn probe(&self) -> Result<()> {
        let mut lister = self.operator.lister_with("").await?;
        let _ = lister.try_next().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
