//! 步骤调度：pending 集合、可取消的重试计时、按优先级放行
//!
//! - 每个文档同一时刻最多一个步骤循环；PendingGuard 在 drop 时一定把文档移出 pending 集合。
//! - 文档在执行中时，人工操作只能请求「再跑一步」（rerun），由正在运行的循环在结束前接手。
//! - 重试等待可按文档取消（reset 时）。
//! - 跨文档的步骤经过有界放行队列：满载时高优先级先放行，同优先级先来先到。

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::{DocumentId, Priority};

struct PendingEntry {
    rerun: bool,
    retry_timer: CancellationToken,
}

/// pending 集合
#[derive(Default)]
pub struct PendingSet {
    entries: Mutex<HashMap<DocumentId, PendingEntry>>,
}

impl PendingSet {
    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentId, PendingEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 尝试占用；已在执行中时返回 None
    pub fn try_begin(self: &Arc<Self>, id: &str) -> Option<PendingGuard> {
        let mut entries = self.lock();
        if entries.contains_key(id) {
            return None;
        }
        entries.insert(
            id.to_string(),
            PendingEntry {
                rerun: false,
                retry_timer: CancellationToken::new(),
            },
        );
        Some(PendingGuard {
            set: Arc::clone(self),
            id: id.to_string(),
            released: false,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 文档在执行中则标记 rerun 并返回 true；否则返回 false，由调用方自行启动
    pub fn request_rerun(&self, id: &str) -> bool {
        match self.lock().get_mut(id) {
            Some(entry) => {
                entry.rerun = true;
                true
            }
            None => false,
        }
    }

    /// 取消该文档正在进行的重试等待
    pub fn cancel_retry_timer(&self, id: &str) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.retry_timer.cancel();
        }
    }
}

/// 占用凭证：drop 时移出 pending 集合
pub struct PendingGuard {
    set: Arc<PendingSet>,
    id: DocumentId,
    released: bool,
}

impl PendingGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 循环准备退出时调用：期间有人请求 rerun 则清掉标记并交回凭证（继续跑），
    /// 否则移出 pending 集合；判断与移出在同一把锁内完成，不会丢失请求
    pub fn finish(mut self) -> Option<PendingGuard> {
        let rerun = {
            let mut entries = self.set.lock();
            let rerun = entries.get(&self.id).is_some_and(|entry| entry.rerun);
            if rerun {
                if let Some(entry) = entries.get_mut(&self.id) {
                    entry.rerun = false;
                }
            } else {
                entries.remove(&self.id);
            }
            rerun
        };
        if rerun {
            return Some(self);
        }
        self.released = true;
        None
    }

    /// 上一次的重试计时器已被取消时换一个新的
    pub fn arm_retry_timer(&self) {
        if let Some(entry) = self.set.lock().get_mut(&self.id) {
            if entry.retry_timer.is_cancelled() {
                entry.retry_timer = CancellationToken::new();
            }
        }
    }

    /// 等待重试间隔；被取消时返回 false，并换上新的计时器
    pub async fn wait_retry(&self, delay: Duration) -> bool {
        let token = match self.set.lock().get(&self.id) {
            Some(entry) => entry.retry_timer.clone(),
            None => return false,
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = token.cancelled() => {
                if let Some(entry) = self.set.lock().get_mut(&self.id) {
                    entry.retry_timer = CancellationToken::new();
                }
                false
            }
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.released {
            self.set.lock().remove(&self.id);
        }
    }
}

struct Waiter {
    priority: Priority,
    seq: u64,
    tx: oneshot::Sender<AdmissionPermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // 优先级高者大；同优先级 seq 小者大（先来先到）
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct AdmissionState {
    available: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

/// 按优先级放行的有界并发队列
pub struct AdmissionQueue {
    state: Mutex<AdmissionState>,
}

/// 放行许可，drop 时交给下一个等待者或归还
pub struct AdmissionPermit {
    queue: Arc<AdmissionQueue>,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AdmissionState {
                available: capacity.max(1),
                next_seq: 0,
                waiters: BinaryHeap::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn available(&self) -> usize {
        self.lock().available
    }

    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    pub async fn acquire(self: &Arc<Self>, priority: Priority) -> AdmissionPermit {
        loop {
            let rx = {
                let mut state = self.lock();
                if state.available > 0 && state.waiters.is_empty() {
                    state.available -= 1;
                    return AdmissionPermit {
                        queue: Arc::clone(self),
                    };
                }
                let (tx, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiters.push(Waiter { priority, seq, tx });
                rx
            };
            // 发送端未发送就被丢弃时重新排队
            if let Ok(permit) = rx.await {
                return permit;
            }
        }
    }

    fn release(self: &Arc<Self>) {
        let waiter = {
            let mut state = self.lock();
            match state.waiters.pop() {
                Some(waiter) => waiter,
                None => {
                    state.available += 1;
                    return;
                }
            }
        };
        // 等待者已放弃时 send 失败，许可随返回值 drop，再次进入 release 交给下一个
        let _ = waiter.tx.send(AdmissionPermit {
            queue: Arc::clone(self),
        });
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.queue.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_guard_is_exclusive_and_released_on_drop() {
        let set = Arc::new(PendingSet::default());
        let guard = set.try_begin("doc-1").unwrap();
        assert!(set.try_begin("doc-1").is_none());
        assert!(set.try_begin("doc-2").is_some());
        assert!(set.contains("doc-1"));
        drop(guard);
        assert!(!set.contains("doc-1"));
    }

    #[test]
    fn test_rerun_request_is_consumed_once() {
        let set = Arc::new(PendingSet::default());
        assert!(!set.request_rerun("doc-1"));
        let guard = set.try_begin("doc-1").unwrap();
        assert!(set.request_rerun("doc-1"));
        let guard = guard.finish().expect("rerun keeps the guard");
        assert!(set.contains("doc-1"));
        assert!(guard.finish().is_none());
        assert!(!set.contains("doc-1"));
        // 释放后的新占用不受旧凭证影响
        let _next = set.try_begin("doc-1").unwrap();
        assert!(set.contains("doc-1"));
    }

    #[test]
    fn test_finish_without_rerun_releases_the_slot() {
        let set = Arc::new(PendingSet::default());
        let guard = set.try_begin("doc-1").unwrap();
        assert!(guard.finish().is_none());
        assert_eq!(set.len(), 0);
        // 释放后的人工操作不再挂到旧循环上
        assert!(!set.request_rerun("doc-1"));
        assert!(set.try_begin("doc-1").is_some());
    }

    #[tokio::test]
    async fn test_retry_timer_can_be_cancelled() {
        let set = Arc::new(PendingSet::default());
        let guard = set.try_begin("doc-1").unwrap();
        let set2 = Arc::clone(&set);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            set2.cancel_retry_timer("doc-1");
        });
        assert!(!guard.wait_retry(Duration::from_secs(30)).await);
        // 取消后计时器已更换，下一次等待正常完成
        assert!(guard.wait_retry(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_admission_prefers_higher_priority() {
        let queue = AdmissionQueue::new(1);
        let held = queue.acquire(Priority::Normal).await;
        assert_eq!(queue.available(), 0);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (i, priority) in [Priority::Low, Priority::Urgent, Priority::Normal].into_iter().enumerate() {
            let q = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = q.acquire(priority).await;
                order.lock().unwrap().push(priority);
            }));
            // 保证入队顺序
            while queue.waiting() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(held);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(
            *order.lock().unwrap(),
            vec![Priority::Urgent, Priority::Normal, Priority::Low]
        );
        assert_eq!(queue.available(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_leak_capacity() {
        let queue = AdmissionQueue::new(1);
        let held = queue.acquire(Priority::Normal).await;
        let q2 = Arc::clone(&queue);
        let abandoned = tokio::spawn(async move {
            let _permit = q2.acquire(Priority::High).await;
        });
        while queue.waiting() < 1 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        let _ = abandoned.await;
        drop(held);
        assert_eq!(queue.available(), 1);
    }
}
