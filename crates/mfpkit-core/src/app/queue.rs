//! TaskQueue / QueueEntry - ワーカーが消費する FIFO キュー
//!
//! # 学習ポイント
//! - tokio Mutex + Notify による async blocking pop
//! - キャンセル安全な pop（select! の中で使える）
//! - close 後の push は拒否し、entry を呼び出し側に返す

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::comm::{LockScope, SessionLock};
use crate::domain::{EntryId, TaskPayload, WebApiError};
use crate::typed::{DynTask, TaskContext};

/// QueueEntry は task と payload、セッションロックの組
///
/// The lock is taken out of its slot on release, so it is released at most once
/// no matter which path (success, error, abort) gets there first.
pub struct QueueEntry {
    id: EntryId,
    task: Box<dyn DynTask>,
    ctx: TaskContext,
    payload: Option<TaskPayload>,
    lock: Mutex<Option<SessionLock>>,
}

impl QueueEntry {
    pub fn new(task: Box<dyn DynTask>, ctx: TaskContext, payload: Option<TaskPayload>) -> Self {
        Self {
            id: EntryId::new(),
            task,
            ctx,
            payload,
            lock: Mutex::new(None),
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn task(&self) -> &dyn DynTask {
        self.task.as_ref()
    }

    pub fn ctx(&self) -> &TaskContext {
        &self.ctx
    }

    pub fn payload(&self) -> Option<&TaskPayload> {
        self.payload.as_ref()
    }

    pub fn dispatched_at(&self) -> f64 {
        self.ctx.dispatched_at()
    }

    pub async fn is_locked(&self) -> bool {
        self.lock.lock().await.is_some()
    }

    /// Acquires a background session lock for the task's origin session.
    pub async fn lock_session(&self) -> Result<(), WebApiError> {
        let lock = SessionLock::acquire(
            self.ctx.api().clone(),
            self.ctx.api_token(),
            LockScope::Background,
        )
        .await?;
        *self.lock.lock().await = Some(lock);
        Ok(())
    }

    /// Releases the session lock if it is still held. Failures are logged.
    pub async fn unlock_session(&self) {
        let lock = self.lock.lock().await.take();
        let Some(mut lock) = lock else {
            return;
        };
        if let Err(e) = lock.release().await {
            warn!(entry_id = %self.id, error = %e, "session lock release failed");
        }
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("id", &self.id)
            .field("task_type", &self.task.task_type())
            .field("dispatched_at", &self.dispatched_at())
            .finish_non_exhaustive()
    }
}

struct QueueState {
    items: VecDeque<Arc<QueueEntry>>,
    closed: bool,
}

pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends an entry. A closed queue hands the entry back.
    pub async fn push(&self, entry: Arc<QueueEntry>) -> Result<(), Arc<QueueEntry>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(entry);
        }
        state.items.push_back(entry);
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// Waits for the next entry.
    ///
    /// Cancel-safe: an entry is only removed in the same poll that returns it.
    pub async fn pop(&self) -> Arc<QueueEntry> {
        loop {
            // 空チェックより先に waiter として登録しておく（push の通知を取りこぼさない）
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.state.lock().await.items.pop_front() {
                return entry;
            }
            notified.await;
        }
    }

    /// Closes the queue and takes every waiting entry out of it.
    pub async fn close_and_drain(&self) -> Vec<Arc<QueueEntry>> {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.items.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
