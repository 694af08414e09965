//! 定时触发
//!
//! 同一时间只有一个定时循环。每次应用新配置都会取消旧循环再按需启动新的，
//! 第一次触发发生在启动后一个间隔。

use crate::config::ScheduleConfig;
use crate::error::{Result, SyncError};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
pub struct Scheduler {
    current: Mutex<Option<CancellationToken>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置重新安排定时任务，返回是否已启用
    pub fn apply<F>(&self, schedule: &ScheduleConfig, trigger: F) -> bool
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        if schedule.enabled && schedule.interval > 0 {
            self.start(Duration::from_secs(schedule.interval), trigger);
            true
        } else {
            self.stop();
            false
        }
    }

    /// 取消现有循环并以新的间隔启动
    pub fn start<F>(&self, period: Duration, trigger: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock().replace(token.clone()) {
            previous.cancel();
        }

        info!("定时同步间隔: {:?}", period);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => match trigger() {
                        Ok(()) => debug!("定时同步已触发"),
                        Err(SyncError::AlreadyRunning) => debug!("同步正在进行，跳过本次定时触发"),
                        Err(e) => warn!("定时同步触发失败: {}", e),
                    },
                }
            }
            debug!("定时循环已退出");
        });
    }

    pub fn stop(&self) {
        if let Some(token) = self.lock().take() {
            token.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Result<()> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn first_tick_waits_one_interval() {
        let scheduler = Scheduler::new();
        let (count, trigger) = counter();

        scheduler.start(Duration::from_millis(200), trigger);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn reapplying_replaces_the_previous_loop() {
        let scheduler = Scheduler::new();
        let (old_count, old_trigger) = counter();
        let (new_count, new_trigger) = counter();

        scheduler.start(Duration::from_millis(20), old_trigger);
        scheduler.start(Duration::from_millis(20), new_trigger);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(old_count.load(Ordering::SeqCst), 0);
        assert!(new_count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn disabled_schedule_stops_triggering() {
        let scheduler = Scheduler::new();
        let (count, trigger) = counter();

        scheduler.start(Duration::from_millis(20), trigger);
        let enabled = scheduler.apply(
            &ScheduleConfig {
                enabled: false,
                interval: 3600,
            },
            || Ok(()),
        );
        assert!(!enabled);
        assert!(!scheduler.is_active());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn already_running_does_not_end_the_loop() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();

        scheduler.start(Duration::from_millis(20), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::AlreadyRunning)
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
