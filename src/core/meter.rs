//! 传输速度统计

use chrono::{DateTime, Utc};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, ReadBuf};

/// 两次瞬时速度采样之间的最小间隔
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// 瞬时速度计：累计字节，间隔不足时不出采样，避免频繁写状态
#[derive(Debug)]
pub struct TransferMeter {
    window_start: Instant,
    window_bytes: u64,
    min_interval: Duration,
}

impl TransferMeter {
    pub fn new(now: Instant) -> Self {
        Self::with_interval(now, SAMPLE_INTERVAL)
    }

    pub fn with_interval(now: Instant, min_interval: Duration) -> Self {
        Self {
            window_start: now,
            window_bytes: 0,
            min_interval,
        }
    }

    /// 丢弃当前窗口，从 `now` 重新开始计时
    pub fn restart(&mut self, now: Instant) {
        self.window_start = now;
        self.window_bytes = 0;
    }

    /// 记录新传输的字节，到达采样间隔时返回瞬时速度（字节/秒）并开启新窗口
    pub fn record_bytes(&mut self, delta: u64, now: Instant) -> Option<f64> {
        self.window_bytes += delta;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed.is_zero() || elapsed < self.min_interval {
            return None;
        }

        let speed = self.window_bytes as f64 / elapsed.as_secs_f64();
        self.window_start = now;
        self.window_bytes = 0;
        Some(speed)
    }
}

/// 平均速度，每次按总字节重新计算而不是累加
pub fn average_speed(total_bytes: u64, start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed = (now - start).num_milliseconds();
    if elapsed <= 0 {
        return 0.0;
    }
    total_bytes as f64 / (elapsed as f64 / 1000.0)
}

/// 读取计数包装：每次读取后把字节数交给回调
pub struct MeteredReader<R, F> {
    inner: R,
    on_read: F,
    bytes_read: u64,
}

impl<R, F> MeteredReader<R, F>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64) + Unpin,
{
    pub fn new(inner: R, on_read: F) -> Self {
        Self {
            inner,
            on_read,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R, F> AsyncRead for MeteredReader<R, F>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64) + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let n = (buf.filled().len() - before) as u64;
            if n > 0 {
                this.bytes_read += n;
                (this.on_read)(n);
            }
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn samples_only_after_interval() {
        let start = Instant::now();
        let mut meter = TransferMeter::new(start);

        assert_eq!(meter.record_bytes(1000, start), None);
        assert_eq!(meter.record_bytes(1000, start + Duration::from_millis(200)), None);

        let speed = meter
            .record_bytes(3000, start + Duration::from_millis(1000))
            .unwrap();
        assert!((speed - 5000.0).abs() < 1e-6);

        // 新窗口从上次采样开始
        assert_eq!(meter.record_bytes(10, start + Duration::from_millis(1100)), None);
        let speed = meter
            .record_bytes(0, start + Duration::from_millis(1500))
            .unwrap();
        assert!((speed - 20.0).abs() < 1e-6);
    }

    #[test]
    fn clock_going_backwards_yields_no_sample() {
        let start = Instant::now() + Duration::from_secs(5);
        let mut meter = TransferMeter::new(start);
        assert_eq!(meter.record_bytes(100, start - Duration::from_secs(1)), None);
    }

    #[test]
    fn average_speed_is_pure() {
        let start = Utc::now();
        assert_eq!(average_speed(1000, start, start), 0.0);
        assert_eq!(average_speed(1000, start, start - chrono::Duration::seconds(1)), 0.0);
        let avg = average_speed(4096, start, start + chrono::Duration::seconds(2));
        assert!((avg - 2048.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn metered_reader_counts_every_byte() {
        let data = vec![7u8; 100_000];
        let mut seen = 0u64;
        let mut reader = MeteredReader::new(&data[..], |n| seen += n);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(reader.bytes_read(), 100_000);
        drop(reader);

        assert_eq!(out.len(), 100_000);
        assert_eq!(seen, 100_000);
    }
}
