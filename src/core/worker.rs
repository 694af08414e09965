//! 同步工作线程
//!
//! 单槽队列 + 一个常驻工作任务，同一时间最多执行一次同步。停止是协作式的：
//! 只把配置中的同步状态改为 stopped，工作线程在每个文件开始前检查该标志，
//! 正在上传的文件总会正常完成或失败。

use crate::config::{ConfigStore, SyncState};
use crate::core::planner::{index_listing, SyncPlanner, TransferTask};
use crate::core::status::StatusStore;
use crate::core::uploader::{UploadConfig, Uploader};
use crate::error::{Result, SyncError};
use crate::logging::ActivityLog;
use crate::storage::ObjectStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 同步触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub outcome: RunOutcome,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_files: u64,
    pub processed_files: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_transferred: u64,
    pub errors: Vec<String>,
}

/// 一次同步请求
pub struct RunRequest {
    pub id: Uuid,
    pub trigger: Trigger,
    pub store: Arc<dyn ObjectStore>,
    /// 同步结束后收到报告
    pub done: Option<oneshot::Sender<RunReport>>,
}

/// 同步执行所需的共享资源
pub struct RunContext {
    pub source_root: PathBuf,
    pub status: Arc<StatusStore>,
    pub config: Arc<ConfigStore>,
    pub activity: Arc<ActivityLog>,
    pub upload: UploadConfig,
}

impl RunContext {
    /// 取消检查点：读配置失败也按停止处理
    fn keep_running(&self) -> bool {
        match self.config.is_running() {
            Ok(running) => running,
            Err(e) => {
                warn!("读取同步状态失败，停止同步: {}", e);
                false
            }
        }
    }
}

/// 执行过程中的计数
struct RunSummary {
    outcome: RunOutcome,
    uploaded: u64,
    skipped: u64,
    failed: u64,
    bytes: u64,
    errors: Vec<String>,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::Completed,
            uploaded: 0,
            skipped: 0,
            failed: 0,
            bytes: 0,
            errors: Vec::new(),
        }
    }

    fn cancelled(mut self) -> Self {
        self.outcome = RunOutcome::Cancelled;
        self
    }

    fn failed(mut self, message: String) -> Self {
        self.outcome = RunOutcome::Failed;
        self.errors.push(message);
        self
    }
}

/// 工作线程句柄
pub struct SyncWorker {
    tx: mpsc::Sender<RunRequest>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncWorker {
    pub fn spawn(ctx: Arc<RunContext>) -> Self {
        // 单槽队列：同一时间最多一个待执行请求
        let (tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(ctx, rx, shutdown.clone()));

        Self {
            tx,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// 放入队列，不等待。槽位已满时拒绝
    pub fn try_enqueue(&self, request: RunRequest) -> Result<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SyncError::AlreadyRunning,
            mpsc::error::TrySendError::Closed(_) => SyncError::WorkerUnavailable,
        })
    }

    /// 停止接收新请求，执行完队列中剩余的请求后退出
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("同步工作线程异常退出: {}", e);
            }
        }
    }
}

async fn worker_loop(
    ctx: Arc<RunContext>,
    mut rx: mpsc::Receiver<RunRequest>,
    shutdown: CancellationToken,
) {
    debug!("同步工作线程已启动");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                rx.close();
                while let Some(request) = rx.recv().await {
                    process(&ctx, request).await;
                }
                break;
            }
            request = rx.recv() => match request {
                Some(request) => process(&ctx, request).await,
                None => break,
            },
        }
    }
    debug!("同步工作线程已退出");
}

/// 执行一次同步并收尾。执行体在单独的任务里运行，即使 panic 也会写入结束状态
async fn process(ctx: &Arc<RunContext>, request: RunRequest) {
    let RunRequest {
        id,
        trigger,
        store,
        done,
    } = request;
    info!("开始执行同步 {} ({:?})", id, trigger);

    let summary = match tokio::spawn(execute(ctx.clone(), store)).await {
        Ok(summary) => summary,
        Err(e) => {
            let message = format!("同步过程出错: {}", e);
            ctx.activity.error(message.clone());
            RunSummary::new().failed(message)
        }
    };

    // 先写 stopped 再清除 isSyncing，之后新的启动请求才可能被接受
    if let Err(e) = ctx.config.set_sync_status(SyncState::Stopped) {
        error!("写入同步状态失败: {}", e);
    }
    ctx.status.finish(Utc::now());

    match summary.outcome {
        RunOutcome::Completed => ctx.activity.info(format!(
            "同步完成: 上传 {} 个, 跳过 {} 个, 失败 {} 个",
            summary.uploaded, summary.skipped, summary.failed
        )),
        RunOutcome::Cancelled => ctx.activity.info("同步已停止"),
        RunOutcome::Failed => {}
    }

    let snapshot = ctx.status.read();
    let report = RunReport {
        run_id: id,
        trigger,
        outcome: summary.outcome,
        start_time: snapshot.progress.start_time,
        end_time: snapshot.progress.end_time,
        total_files: snapshot.progress.total_files,
        processed_files: snapshot.progress.processed_files,
        uploaded: summary.uploaded,
        skipped: summary.skipped,
        failed: summary.failed,
        bytes_transferred: summary.bytes,
        errors: summary.errors,
    };
    debug!("同步 {} 结束: {:?}", id, report.outcome);

    if let Some(done) = done {
        let _ = done.send(report);
    }
}

async fn execute(ctx: Arc<RunContext>, store: Arc<dyn ObjectStore>) -> RunSummary {
    let mut summary = RunSummary::new();

    let config = match ctx.config.read() {
        Ok(config) => config,
        Err(e) => {
            let message = format!("读取配置失败: {}", e);
            ctx.activity.error(message.clone());
            return summary.failed(message);
        }
    };
    if config.sync_status != SyncState::Running {
        debug!("同步状态为 stopped，跳过本次同步");
        return summary.cancelled();
    }

    let root = ctx.source_root.clone();
    ctx.activity
        .info(format!("开始同步: {} -> {}", root.display(), store.name()));

    if !root.is_dir() {
        let message = format!("同步过程出错: 源目录不存在 {}", root.display());
        ctx.activity.error(message.clone());
        return summary.failed(message);
    }

    // 远程列表每次同步只取一次，失败即中止
    let listing = match store.list_all().await {
        Ok(listing) => listing,
        Err(e) => {
            let message = format!("同步过程出错: {}", SyncError::Listing(e.to_string()));
            ctx.activity.error(message.clone());
            return summary.failed(message);
        }
    };
    debug!("远程已有 {} 个对象", listing.len());
    let remote = index_listing(listing);

    // 忽略规则在这里复制一份，同步期间修改配置不影响本次计划
    let patterns = config.ignore_patterns;
    let plan_ctx = ctx.clone();
    let planned = tokio::task::spawn_blocking(move || {
        let mut plan =
            SyncPlanner::new(root, &patterns, remote, || plan_ctx.keep_running()).plan();
        let tasks: Vec<TransferTask> = plan.by_ref().collect();
        (tasks, plan.stats().clone())
    })
    .await;

    let (tasks, stats) = match planned {
        Ok(planned) => planned,
        Err(e) => {
            let message = format!("同步过程出错: 扫描源目录失败: {}", e);
            ctx.activity.error(message.clone());
            return summary.failed(message);
        }
    };
    summary.skipped = stats.skipped;
    debug!(
        "计划完成: {} 个待上传, {} 个跳过, 忽略 {} 个目录 {} 个文件",
        tasks.len(),
        stats.skipped,
        stats.ignored_dirs,
        stats.ignored_files
    );
    if stats.cancelled {
        return summary.cancelled();
    }

    let total = tasks.len() as u64;
    ctx.status.update(|s| s.progress.total_files = total);

    let mut uploader = Uploader::new(store.as_ref(), &ctx.status, ctx.upload);
    for task in &tasks {
        if !ctx.keep_running() {
            info!("检测到停止请求，结束同步");
            return summary.cancelled();
        }

        ctx.status
            .update(|s| s.progress.current_file = task.remote_key.clone());

        match uploader.upload(task).await {
            Ok(bytes) => {
                summary.uploaded += 1;
                summary.bytes += bytes;
                ctx.status.update(|s| {
                    s.progress.processed_files += 1;
                    s.network.total_bytes_transferred += bytes;
                    s.network.last_update = Some(Utc::now());
                });
                ctx.activity.info(format!("上传文件: {}", task.remote_key));
            }
            Err(e) => {
                // 失败的文件同样计入已处理
                summary.failed += 1;
                ctx.status.update(|s| s.progress.processed_files += 1);
                ctx.activity.error(format!("上传失败: {}", e));
                summary.errors.push(e.to_string());
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use std::fs;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        source: PathBuf,
        ctx: Arc<RunContext>,
        worker: SyncWorker,
    }

    fn fixture(patterns: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("host");
        let data = dir.path().join("data");
        fs::create_dir_all(&source).unwrap();

        let config = Arc::new(ConfigStore::open(&data).unwrap());
        config
            .update(|c| c.ignore_patterns = patterns.iter().map(|p| p.to_string()).collect())
            .unwrap();

        let ctx = Arc::new(RunContext {
            source_root: source.clone(),
            status: Arc::new(StatusStore::open(&data).unwrap()),
            config,
            activity: Arc::new(ActivityLog::open(&data).unwrap()),
            upload: UploadConfig::default(),
        });
        let worker = SyncWorker::spawn(ctx.clone());

        Fixture {
            _dir: dir,
            source,
            ctx,
            worker,
        }
    }

    fn write(root: &Path, rel: &str, len: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'z'; len]).unwrap();
    }

    /// 模拟控制面的启动流程
    async fn run(fx: &Fixture, store: Arc<MemoryStore>) -> RunReport {
        fx.ctx.status.try_begin(Utc::now()).unwrap();
        fx.ctx.config.set_sync_status(SyncState::Running).unwrap();
        let (done, rx) = oneshot::channel();
        fx.worker
            .try_enqueue(RunRequest {
                id: Uuid::new_v4(),
                trigger: Trigger::Manual,
                store,
                done: Some(done),
            })
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn uploads_only_unignored_files() {
        let fx = fixture(&[".git/", "*.tmp"]);
        write(&fx.source, "a.txt", 1024);
        write(&fx.source, ".git/config", 10);
        write(&fx.source, "tmp/x.tmp", 10);
        let store = Arc::new(MemoryStore::default());

        let report = run(&fx, store.clone()).await;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(store.uploaded_keys(), vec!["a.txt"]);
        assert_eq!(report.total_files, 1);
        assert_eq!(report.processed_files, 1);
        assert_eq!(report.bytes_transferred, 1024);

        let status = fx.ctx.status.read();
        assert!(!status.is_syncing);
        assert_eq!(status.progress.total_files, 1);
        assert_eq!(status.progress.processed_files, 1);
        assert_eq!(status.network.total_bytes_transferred, 1024);
        assert!(status.progress.end_time.unwrap() >= status.progress.start_time.unwrap());
        assert_eq!(fx.ctx.config.read().unwrap().sync_status, SyncState::Stopped);
    }

    #[tokio::test]
    async fn second_run_over_unchanged_tree_uploads_nothing() {
        let fx = fixture(&[]);
        write(&fx.source, "one.txt", 10);
        write(&fx.source, "dir/two.txt", 20);
        let store = Arc::new(MemoryStore::default());

        let first = run(&fx, store.clone()).await;
        assert_eq!(first.uploaded, 2);

        store.clear_calls();
        let second = run(&fx, store.clone()).await;
        assert_eq!(second.outcome, RunOutcome::Completed);
        assert!(store.uploaded_keys().is_empty());
        assert_eq!(second.skipped, 2);
        assert_eq!(second.total_files, 0);
        assert_eq!(second.processed_files, 0);
    }

    #[tokio::test]
    async fn existing_remote_objects_of_equal_size_are_skipped() {
        let fx = fixture(&[]);
        write(&fx.source, "same.txt", 16);
        write(&fx.source, "changed.txt", 32);
        let store = Arc::new(MemoryStore::default());
        store.insert("same.txt", vec![b'z'; 16]);
        store.insert("changed.txt", vec![b'z'; 8]);

        let report = run(&fx, store.clone()).await;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(store.uploaded_keys(), vec!["changed.txt"]);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total_files, 1);
        assert_eq!(store.object("changed.txt").unwrap().len(), 32);
    }

    #[tokio::test]
    async fn stop_during_upload_finishes_current_file_only() {
        let fx = fixture(&[]);
        for i in 0..5 {
            write(&fx.source, &format!("f{}.txt", i), 8);
        }
        let store = Arc::new(MemoryStore::default());
        let config = fx.ctx.config.clone();
        store.on_upload(move |_| {
            config.set_sync_status(SyncState::Stopped).unwrap();
        });

        let report = run(&fx, store.clone()).await;

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(store.uploaded_keys().len(), 1);
        assert_eq!(report.processed_files, 1);
        assert_eq!(report.total_files, 5);
        assert!(!fx.ctx.status.is_syncing());
    }

    #[tokio::test]
    async fn per_file_failure_is_counted_and_run_continues() {
        let fx = fixture(&[]);
        write(&fx.source, "bad.txt", 5);
        write(&fx.source, "good.txt", 5);
        let store = Arc::new(MemoryStore::default());
        store.fail_put("bad.txt");

        let report = run(&fx, store.clone()).await;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.processed_files, 2);
        assert_eq!(report.bytes_transferred, 5);
        assert!(store.object("good.txt").is_some());

        let logs = fx.ctx.activity.entries();
        assert!(logs
            .iter()
            .any(|l| l.level == crate::logging::LogLevel::Error && l.message.contains("bad.txt")));
    }

    #[tokio::test]
    async fn listing_failure_aborts_run() {
        let fx = fixture(&[]);
        write(&fx.source, "a.txt", 5);
        let store = Arc::new(MemoryStore::default());
        store.fail_list();

        let report = run(&fx, store.clone()).await;

        assert_eq!(report.outcome, RunOutcome::Failed);
        assert!(store.uploaded_keys().is_empty());
        assert!(!fx.ctx.status.is_syncing());
        assert_eq!(fx.ctx.config.read().unwrap().sync_status, SyncState::Stopped);
        assert!(report.errors[0].contains("connection refused"));
    }

    #[tokio::test]
    async fn run_dequeued_after_stop_does_nothing() {
        let fx = fixture(&[]);
        write(&fx.source, "a.txt", 5);
        let store = Arc::new(MemoryStore::default());

        fx.ctx.status.try_begin(Utc::now()).unwrap();
        // 未设置 running：模拟入队后立即被停止
        let (done, rx) = oneshot::channel();
        fx.worker
            .try_enqueue(RunRequest {
                id: Uuid::new_v4(),
                trigger: Trigger::Scheduled,
                store: store.clone(),
                done: Some(done),
            })
            .unwrap();
        let report = rx.await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(store.calls().is_empty());
        assert!(!fx.ctx.status.is_syncing());
    }

    #[tokio::test]
    async fn concurrent_reader_sees_monotonic_bounded_progress() {
        let fx = fixture(&[]);
        for i in 0..30 {
            write(&fx.source, &format!("d{}/f{}.bin", i % 3, i), 64);
        }
        let store = Arc::new(MemoryStore::default());

        let status = fx.ctx.status.clone();
        let stop = CancellationToken::new();
        let reader = {
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut last = 0;
                while !stop.is_cancelled() {
                    let s = status.read();
                    if s.progress.total_files > 0 {
                        assert!(s.progress.processed_files <= s.progress.total_files);
                    }
                    assert!(s.progress.processed_files >= last);
                    last = s.progress.processed_files;
                    tokio::task::yield_now().await;
                }
            })
        };

        let report = run(&fx, store).await;
        stop.cancel();
        reader.await.unwrap();

        assert_eq!(report.processed_files, 30);
        assert_eq!(report.total_files, 30);
    }

    #[tokio::test]
    async fn shutdown_drains_and_rejects_new_requests() {
        let fx = fixture(&[]);
        write(&fx.source, "a.txt", 5);
        let store = Arc::new(MemoryStore::default());

        fx.ctx.status.try_begin(Utc::now()).unwrap();
        fx.ctx.config.set_sync_status(SyncState::Running).unwrap();
        let (done, rx) = oneshot::channel();
        fx.worker
            .try_enqueue(RunRequest {
                id: Uuid::new_v4(),
                trigger: Trigger::Manual,
                store: store.clone(),
                done: Some(done),
            })
            .unwrap();

        fx.worker.shutdown().await;
        assert_eq!(rx.await.unwrap().outcome, RunOutcome::Completed);

        let err = fx
            .worker
            .try_enqueue(RunRequest {
                id: Uuid::new_v4(),
                trigger: Trigger::Manual,
                store,
                done: None,
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::WorkerUnavailable));
    }
}
