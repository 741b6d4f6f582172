//! 脚本化 Agent（用于测试与演示，无需外部系统）
//!
//! 按顺序吐出预设结果，用完后返回默认结果；可设置延迟、按阶段脚本、或在调用时 panic。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{Agent, AgentLoad, AgentOptions, AgentOutput, AgentResult, AgentStatus};
use crate::core::{AgentType, Document, ProcessingStage};

pub struct ScriptedAgent {
    name: String,
    agent_type: AgentType,
    handles: Vec<ProcessingStage>,
    script: Mutex<VecDeque<AgentResult>>,
    per_stage: Mutex<HashMap<ProcessingStage, VecDeque<AgentResult>>>,
    default: AgentResult,
    delay: Option<Duration>,
    panic_on_call: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<ProcessingStage>>,
    load: AgentLoad,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            name: name.into(),
            agent_type,
            handles: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            per_stage: Mutex::new(HashMap::new()),
            default: AgentResult::Success(AgentOutput::default().with_confidence(1.0)),
            delay: None,
            panic_on_call: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            load: AgentLoad::default(),
        }
    }

    /// 声明 can_handle 为真的阶段
    pub fn handles(mut self, stages: &[ProcessingStage]) -> Self {
        self.handles = stages.to_vec();
        self
    }

    /// 追加一条按调用顺序返回的结果
    pub fn then(self, result: AgentResult) -> Self {
        lock(&self.script).push_back(result);
        self
    }

    /// 追加一条仅在目标阶段为 stage 时返回的结果（优先于通用脚本）
    pub fn then_for(self, stage: ProcessingStage, result: AgentResult) -> Self {
        lock(&self.per_stage).entry(stage).or_default().push_back(result);
        self
    }

    pub fn with_default(mut self, result: AgentResult) -> Self {
        self.default = result;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_call = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用的目标阶段
    pub fn stages_seen(&self) -> Vec<ProcessingStage> {
        lock(&self.seen).clone()
    }

    pub fn is_shut_down(&self) -> bool {
        !self.load.status().available
    }

    fn next_result(&self, stage: ProcessingStage) -> AgentResult {
        if let Some(result) = lock(&self.per_stage).get_mut(&stage).and_then(VecDeque::pop_front) {
            return result;
        }
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn can_handle(&self, stage: ProcessingStage, _document: &Document) -> bool {
        self.handles.contains(&stage)
    }

    async fn process(&self, _document: &Document, options: &AgentOptions) -> AgentResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.seen).push(options.stage);
        let _guard = match self.load.enter(&self.name) {
            Ok(guard) => guard,
            Err(e) => return AgentResult::failure(e),
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_call {
            panic!("scripted agent '{}' panicked", self.name);
        }
        self.next_result(options.stage)
    }

    fn status(&self) -> AgentStatus {
        self.load.status()
    }

    async fn shutdown(&self) {
        self.load.close();
    }
}
