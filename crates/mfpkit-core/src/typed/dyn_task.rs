//! DynTask - object-safe な Task の抽象化
//!
//! # 学習ポイント
//! - Object-safe trait (DynTask)
//! - Type erasure パターン (TypedTask<T> → Box<dyn DynTask>)

use async_trait::async_trait;

use super::task::{Task, TaskContext};
use crate::domain::{TaskError, TaskPayload};

/// DynTask は型消去された Task
///
/// The worker pool only sees `Box<dyn DynTask>`; the concrete type stays behind
/// [`TypedTask`]. Tests and adapters may implement it directly.
#[async_trait]
pub trait DynTask: Send + Sync {
    fn task_type(&self) -> &str;

    async fn execute(
        &self,
        ctx: &TaskContext,
        payload: Option<&TaskPayload>,
    ) -> Result<(), TaskError>;

    async fn on_enqueued(&self, ctx: &TaskContext, payload: Option<&TaskPayload>);

    async fn on_error(&self, ctx: &TaskContext, error: &TaskError) -> Result<(), TaskError>;

    async fn on_aborted(&self, ctx: &TaskContext) -> Result<(), TaskError>;
}

pub struct TypedTask<T: Task> {
    task: T,
}

impl<T: Task> TypedTask<T> {
    pub fn new(task: T) -> Self {
        Self { task }
    }

    pub fn boxed(task: T) -> Box<dyn DynTask> {
        Box::new(Self::new(task))
    }

    pub fn inner(&self) -> &T {
        &self.task
    }
}

#[async_trait]
impl<T: Task> DynTask for TypedTask<T> {
    fn task_type(&self) -> &str {
        T::TYPE
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        payload: Option<&TaskPayload>,
    ) -> Result<(), TaskError> {
        self.task.execute(ctx, payload).await
    }

    async fn on_enqueued(&self, ctx: &TaskContext, payload: Option<&TaskPayload>) {
        self.task.on_enqueued(ctx, payload).await
    }

    async fn on_error(&self, ctx: &TaskContext, error: &TaskError) -> Result<(), TaskError> {
        self.task.on_error(ctx, error).await
    }

    async fn on_aborted(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        self.task.on_aborted(ctx).await
    }
}
