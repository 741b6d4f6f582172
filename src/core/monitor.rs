//! 卡死文档巡检
//!
//! 固定间隔调用 CoordinationEngine::sweep_stuck，引擎关闭时退出。

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::CoordinationEngine;

pub struct StuckMonitor {
    engine: CoordinationEngine,
    interval: Duration,
    token: CancellationToken,
}

impl StuckMonitor {
    /// 使用配置中的 sweep_interval，并跟随引擎的关闭信号
    pub fn new(engine: CoordinationEngine) -> Self {
        let interval = engine.config().sweep_interval;
        let token = engine.shutdown_token();
        Self {
            engine,
            interval,
            token,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 额外的停止信号（与引擎关闭任一触发即退出）
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let engine_token = self.engine.shutdown_token();
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = self.interval.as_secs_f64(), "Stuck monitor started");

            loop {
                tokio::select! {
                    _ = self.token.cancelled() => break,
                    _ = engine_token.cancelled() => break,
                    _ = timer.tick() => {
                        let rescheduled = self.engine.sweep_stuck().await;
                        if rescheduled > 0 {
                            tracing::info!(rescheduled, "Stuck monitor rescheduled documents");
                        }
                    }
                }
            }
            tracing::info!("Stuck monitor stopped");
        })
    }
}
