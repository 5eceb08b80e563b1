//! 定期清理已结束的任务

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::application::ports::JobManagerPort;

/// 每隔 `interval` 清理完成超过 `retention` 的任务
pub fn spawn_job_gc(
    job_manager: Arc<dyn JobManagerPort>,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        // 第一次 tick 立即返回
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = job_manager.purge_finished(retention);
            if purged > 0 {
                tracing::info!(purged, remaining = job_manager.len(), "Purged finished jobs");
            }
        }
    })
}
