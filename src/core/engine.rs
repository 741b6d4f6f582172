//! 协调引擎
//!
//! 负责文档在流水线中的全部状态转移：
//! - submit 建立初始状态并异步调度第一步，不阻塞调用方
//! - 每个文档同一时刻最多一个步骤循环（pending 集合），循环内逐步执行直到需要停下
//! - 每一步：转移表求目标阶段 → 注册表解析 Agent → 按优先级放行 → 带超时调用 → 记账 → 决策
//! - 人工操作（set_next_stage / reset_processing）递增 revision，并请求正在运行的循环再跑一步
//!
//! CoordinationEngine 是 Arc 句柄，可随意 clone 到后台任务中。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentExecutor, AgentOptions, AgentRegistry, AgentResult};
use crate::config::EngineConfig;
use crate::core::task_scheduler::{AdmissionQueue, PendingGuard, PendingSet};
use crate::core::{
    Clock, Document, DocumentId, EngineBuilder, StuckMonitor, DocumentProcessingState, DocumentTable, EngineError, Priority,
    ProcessingError, ProcessingHistoryEntry, ProcessingStage, RetryPolicy, StagePolicy,
    StepDecision, StepOutcome, STUCK_TIMEOUT,
};

/// 一步结束后循环该怎么走
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepFlow {
    Continue,
    RetryAfter(std::time::Duration),
    Stop,
}

/// 文档处理协调引擎
#[derive(Clone)]
pub struct CoordinationEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    policy: StagePolicy,
    retry: RetryPolicy,
    registry: Arc<AgentRegistry>,
    executor: AgentExecutor,
    clock: Arc<dyn Clock>,
    table: DocumentTable,
    pending: Arc<PendingSet>,
    admission: Arc<AdmissionQueue>,
    shutdown: CancellationToken,
}

impl CoordinationEngine {
    pub(crate) fn from_parts(
        config: EngineConfig,
        registry: Arc<AgentRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = StagePolicy::new().with_thresholds(&config.confidence_thresholds);
        let retry = RetryPolicy::new(config.max_retries);
        let executor = AgentExecutor::new(config.default_agent_timeout, config.agent_timeouts.clone());
        let admission = AdmissionQueue::new(config.max_concurrent_steps);
        Self {
            inner: Arc::new(EngineInner {
                config,
                policy,
                retry,
                registry,
                executor,
                clock,
                table: DocumentTable::new(),
                pending: Arc::new(PendingSet::default()),
                admission,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// 启动卡死巡检（间隔取 sweep_interval），引擎关闭时自行退出
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        StuckMonitor::new(self.clone()).spawn()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> &StagePolicy {
        &self.inner.policy
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.inner.registry
    }

    /// 引擎关闭信号（监控器等后台任务据此退出）
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// 提交文档：缺少 id 时生成 `doc_<uuid>`，初始化为 initial 并异步调度第一步
    pub async fn submit(
        &self,
        mut document: Document,
        priority: Option<Priority>,
    ) -> Result<DocumentId, EngineError> {
        if self.is_shut_down() {
            return Err(EngineError::ShuttingDown);
        }
        let id = document
            .id
            .clone()
            .unwrap_or_else(|| format!("doc_{}", Uuid::new_v4().simple()));
        document.id = Some(id.clone());
        let priority = priority.unwrap_or(self.inner.config.default_priority);
        let state = DocumentProcessingState::new(id.clone(), document, priority, self.inner.clock.now());
        self.inner.table.insert(state).await?;
        tracing::info!(document_id = %id, ?priority, "Document submitted");
        self.schedule_step(&id);
        Ok(id)
    }

    /// 接管一个外部保存的状态，不自动调度
    pub async fn restore(&self, state: DocumentProcessingState) -> Result<(), EngineError> {
        if self.is_shut_down() {
            return Err(EngineError::ShuttingDown);
        }
        if let Some(stage) = state.next_stage {
            if !self.inner.policy.accepts_target(stage) {
                return Err(EngineError::InvalidStage(stage));
            }
        }
        let id = state.document_id.clone();
        let stage = state.current_stage;
        self.inner.table.insert(state).await?;
        tracing::info!(document_id = %id, %stage, "Document restored");
        Ok(())
    }

    /// 启动该文档的步骤循环；已在执行中（或引擎已关闭）时什么都不做，返回 false
    pub fn schedule_step(&self, id: &str) -> bool {
        if self.is_shut_down() {
            return false;
        }
        let Some(guard) = self.inner.pending.try_begin(id) else {
            tracing::debug!(document_id = %id, "Step already pending");
            return false;
        };
        self.spawn_loop(guard);
        true
    }

    fn spawn_loop(&self, guard: PendingGuard) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive(guard).await });
    }

    /// 只读快照
    pub async fn status(&self, id: &str) -> Option<DocumentProcessingState> {
        self.inner.table.snapshot(id).await
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.pending.contains(id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// 人工指定下一阶段；completed、未知文档或无默认 Agent 的阶段返回 false
    pub async fn set_next_stage(&self, id: &str, stage: ProcessingStage) -> bool {
        if !self.inner.policy.accepts_target(stage) {
            tracing::warn!(document_id = %id, %stage, "Rejected manual target stage");
            return false;
        }
        let Some(cell) = self.inner.table.get(id).await else {
            return false;
        };
        {
            let mut state = cell.lock().await;
            if state.current_stage.is_terminal() {
                tracing::warn!(document_id = %id, "Document already completed; next stage not set");
                return false;
            }
            state.next_stage = Some(stage);
            state.touch_manual(self.inner.clock.now());
        }
        tracing::info!(document_id = %id, %stage, "Manual next stage set");
        self.kick(id);
        true
    }

    /// 优先级上调一级，已是最高时不变
    pub async fn increase_priority(&self, id: &str) -> bool {
        let Some(cell) = self.inner.table.get(id).await else {
            return false;
        };
        let mut state = cell.lock().await;
        let raised = state.priority.raised();
        if raised != state.priority {
            tracing::info!(document_id = %id, from = ?state.priority, to = ?raised, "Priority increased");
        }
        state.priority = raised;
        true
    }

    /// 清空 next_stage / assigned_agent / retry_count / error，回到 initial 并重新调度
    pub async fn reset_processing(&self, id: &str) -> bool {
        let Some(cell) = self.inner.table.get(id).await else {
            return false;
        };
        {
            let mut state = cell.lock().await;
            state.next_stage = None;
            state.assigned_agent = None;
            state.retry_count = 0;
            state.error = None;
            state.current_stage = ProcessingStage::Initial;
            state.touch_manual(self.inner.clock.now());
        }
        self.inner.pending.cancel_retry_timer(id);
        tracing::info!(document_id = %id, "Processing reset");
        self.kick(id);
        true
    }

    /// 未完成的文档，按优先级从高到低、再按开始时间排序
    pub async fn list_active(&self) -> Vec<DocumentProcessingState> {
        let mut active: Vec<_> = self
            .inner
            .table
            .snapshots()
            .await
            .into_iter()
            .filter(|s| s.is_active())
            .collect();
        active.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.start_time.cmp(&b.start_time))
        });
        active
    }

    pub async fn document_count(&self) -> usize {
        self.inner.table.len().await
    }

    /// 在执行中则请求再跑一步，否则直接启动
    fn kick(&self, id: &str) {
        if !self.inner.pending.request_rerun(id) {
            self.schedule_step(id);
        }
    }

    /// 卡死巡检：未完成、不在旁路状态、不在执行中且超过 stuck_timeout 未更新的文档，
    /// 预算未耗尽则 retry_count + 1 后重新调度，否则留给人工。返回重新调度的数量
    pub async fn sweep_stuck(&self) -> usize {
        if self.is_shut_down() {
            return 0;
        }
        let now = self.inner.clock.now();
        let timeout = self.inner.config.stuck_timeout;
        let mut rescheduled = 0;

        for (id, cell) in self.inner.table.cells().await {
            if self.inner.pending.contains(&id) {
                continue;
            }
            let guard = {
                let mut state = cell.lock().await;
                if state.current_stage.is_terminal() || state.current_stage.is_escape() {
                    continue;
                }
                let stuck = matches!((now - state.last_updated).to_std(), Ok(idle) if idle > timeout);
                if !stuck {
                    continue;
                }
                if !self.inner.retry.has_budget(state.retry_count) {
                    tracing::warn!(
                        document_id = %id,
                        stage = %state.current_stage,
                        retry_count = state.retry_count,
                        "Document stuck with no retries left; needs manual intervention"
                    );
                    continue;
                }
                // 占用失败说明刚好有循环启动，交给它
                let Some(guard) = self.inner.pending.try_begin(&id) else {
                    continue;
                };
                state.retry_count += 1;
                state.error = Some(ProcessingError::retryable(
                    STUCK_TIMEOUT,
                    format!("no progress since {}", state.last_updated.to_rfc3339()),
                ));
                tracing::warn!(
                    document_id = %id,
                    stage = %state.current_stage,
                    retry_count = state.retry_count,
                    code = STUCK_TIMEOUT,
                    "Stuck document rescheduled"
                );
                guard
            };
            self.spawn_loop(guard);
            rescheduled += 1;
        }

        tracing::debug!(rescheduled, "Stuck sweep finished");
        rescheduled
    }

    /// 关闭：拒绝新的提交与调度，停止监控，通知所有 Agent
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        tracing::info!(pending = self.pending_count(), "Engine shutting down");
        self.inner.registry.shutdown_all().await;
    }
}

/// 执行前从状态中取出的一份输入
struct StepPlan {
    target: ProcessingStage,
    snapshot: DocumentProcessingState,
}

impl EngineInner {
    /// 步骤循环：持有 pending 凭证，直到需要停下且没有待处理的 rerun 请求
    async fn drive(self: Arc<Self>, guard: PendingGuard) {
        let id = guard.id().to_string();
        let mut guard = guard;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            guard.arm_retry_timer();
            let flow = match self.execute_step(&id).await {
                Ok(flow) => flow,
                Err(e) => {
                    tracing::warn!(document_id = %id, error = %e, "Step aborted");
                    StepFlow::Stop
                }
            };
            match flow {
                StepFlow::Continue => continue,
                StepFlow::RetryAfter(delay) => {
                    tokio::select! {
                        completed = guard.wait_retry(delay) => {
                            if !completed {
                                tracing::debug!(document_id = %id, "Retry wait cancelled");
                            }
                        }
                        _ = self.shutdown.cancelled() => break,
                    }
                }
                StepFlow::Stop => match guard.finish() {
                    Some(next) => guard = next,
                    None => return,
                },
            }
        }
    }

    async fn execute_step(&self, id: &str) -> Result<StepFlow, EngineError> {
        let cell = self
            .table
            .get(id)
            .await
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let plan = {
            let state = cell.lock().await;
            if state.current_stage.is_terminal() {
                return Ok(StepFlow::Stop);
            }
            match self.policy.next_stage(state.current_stage, state.next_stage) {
                Some(target) => StepPlan {
                    target,
                    snapshot: state.clone(),
                },
                None => {
                    tracing::debug!(document_id = %id, stage = %state.current_stage, "No automatic successor");
                    return Ok(StepFlow::Stop);
                }
            }
        };
        let target = plan.target;
        let revision = plan.snapshot.revision;
        let priority = plan.snapshot.priority;

        let Some(fallback) = self.policy.default_agent(target) else {
            return Err(EngineError::InvalidStage(target));
        };

        let started_at = self.clock.now();
        let resolved = self
            .registry
            .resolve(target, &plan.snapshot.document, Some(fallback))
            .await;
        let (agent_type, agent_name, result) = match resolved {
            Some(agent) => {
                let agent_type = agent.agent_type();
                let agent_name = agent.name().to_string();
                let document = plan.snapshot.document.clone();
                let options = AgentOptions {
                    stage: target,
                    timeout: self.executor.timeout_for(agent_type),
                    required_confidence: self.policy.threshold(target),
                    state: plan.snapshot,
                };
                let _permit = self.admission.acquire(priority).await;
                let result = self.executor.invoke(agent, document, options).await;
                (agent_type, agent_name, result)
            }
            None => {
                tracing::warn!(document_id = %id, %target, "No agent registered for stage");
                (
                    fallback,
                    String::new(),
                    AgentResult::failure(ProcessingError::no_agent(target)),
                )
            }
        };
        let finished_at = self.clock.now();

        let mut state = cell.lock().await;
        let output = result.output();
        let outcome = match &result {
            AgentResult::Success(out) => StepOutcome::Succeeded {
                data: out.data.clone(),
                confidence: out.confidence,
            },
            AgentResult::Failure { error, .. } => StepOutcome::Failed {
                error: error.clone(),
            },
        };
        state.record(ProcessingHistoryEntry {
            stage: target,
            agent: agent_type,
            agent_name,
            started_at,
            finished_at,
            outcome,
        });

        if state.revision != revision {
            tracing::info!(document_id = %id, %target, "State changed manually during step; decision skipped");
            return Ok(StepFlow::Continue);
        }

        if let Some(data) = &output.data {
            state.document.merge_data(target, data);
        }
        state.merge_metadata(&output.metadata);
        state.assigned_agent = Some(agent_type);

        let decision = self
            .retry
            .decide(&result, target, state.retry_count, self.policy.threshold(target));
        Ok(self.apply(&mut state, target, decision))
    }

    fn apply(
        &self,
        state: &mut DocumentProcessingState,
        target: ProcessingStage,
        decision: StepDecision,
    ) -> StepFlow {
        let id = state.document_id.clone();
        match decision {
            StepDecision::Fail { error, retry_count } => {
                tracing::warn!(
                    document_id = %id,
                    %target,
                    code = %error.code,
                    retry_count,
                    "Step failed; document moved to error"
                );
                state.retry_count = retry_count;
                state.current_stage = ProcessingStage::Error;
                // 失败的人工目标不保留，error 只能由 reset 或新的 set_next_stage 离开
                state.next_stage = None;
                state.error = Some(error);
                StepFlow::Stop
            }
            StepDecision::Retry { error, retry_count } => {
                tracing::info!(
                    document_id = %id,
                    %target,
                    code = %error.code,
                    retry_count,
                    "Step failed; retrying"
                );
                state.retry_count = retry_count;
                state.error = Some(error);
                StepFlow::RetryAfter(self.config.retry_delay)
            }
            StepDecision::Escalate { confidence, threshold } => {
                tracing::info!(
                    document_id = %id,
                    %target,
                    confidence,
                    threshold,
                    "Low confidence; escalated to human review"
                );
                state.current_stage = ProcessingStage::HumanReview;
                state.next_stage = None;
                state.error = None;
                StepFlow::Stop
            }
            StepDecision::Complete => {
                tracing::info!(document_id = %id, "Document completed");
                state.current_stage = ProcessingStage::Completed;
                state.next_stage = None;
                state.error = None;
                StepFlow::Stop
            }
            StepDecision::Advance(stage) => {
                tracing::info!(document_id = %id, from = %state.current_stage, to = %stage, "Advanced");
                state.current_stage = stage;
                state.next_stage = None;
                state.error = None;
                StepFlow::Continue
            }
        }
    }
}
