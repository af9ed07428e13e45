//! TaskRegistry - Task 型の登録と生成
//!
//! The background resolves task type names against this closed table instead of
//! loading code by path. Each registered type can be rebuilt two ways:
//!
//! - `decode`: from the business fields of a task object built in the foreground
//! - `instantiate`: a fresh `Default` instance for by-class dispatch
//!
//! # 学習ポイント
//! - HashMap での型消去された factory の管理
//! - `PhantomData<fn() -> T>` で Send + Sync を保ったまま型だけを持つ

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use super::dyn_task::{DynTask, TypedTask};
use super::task::Task;

/// RegistryError は TaskRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Task type '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Task type '{0}' is not registered")]
    NotRegistered(String),

    #[error("Request handler '{0}' is already registered")]
    HandlerAlreadyRegistered(String),

    #[error("Task type '{task_type}' cannot be decoded: {source}")]
    Decode {
        task_type: String,
        #[source]
        source: serde_json::Error,
    },
}

trait TaskFactory: Send + Sync {
    fn decode(&self, fields: Value) -> Result<Box<dyn DynTask>, serde_json::Error>;
    fn instantiate(&self) -> Box<dyn DynTask>;
}

struct TypedFactory<T: Task> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task> TaskFactory for TypedFactory<T> {
    fn decode(&self, fields: Value) -> Result<Box<dyn DynTask>, serde_json::Error> {
        let task: T = serde_json::from_value(fields)?;
        Ok(TypedTask::boxed(task))
    }

    fn instantiate(&self) -> Box<dyn DynTask> {
        TypedTask::boxed(T::default())
    }
}

/// TaskRegistry は型付き Task を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<UploadTask>()?;
///
/// let task = registry.instantiate("tasks.upload.UploadTask")?;
/// ```
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, Arc<dyn TaskFactory>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<T: Task>(&mut self) -> Result<(), RegistryError> {
        let task_type = T::TYPE.to_string();
        if self.factories.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        let factory = TypedFactory::<T> {
            _marker: PhantomData,
        };
        self.factories.insert(task_type, Arc::new(factory));
        Ok(())
    }

    /// Rebuilds a task object from its business fields.
    pub fn decode(&self, task_type: &str, fields: Value) -> Result<Box<dyn DynTask>, RegistryError> {
        let factory = self.factory(task_type)?;
        factory
            .decode(fields)
            .map_err(|source| RegistryError::Decode {
                task_type: task_type.to_string(),
                source,
            })
    }

    /// Creates a fresh task instance by type name.
    pub fn instantiate(&self, task_type: &str) -> Result<Box<dyn DynTask>, RegistryError> {
        Ok(self.factory(task_type)?.instantiate())
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    fn factory(&self, task_type: &str) -> Result<&Arc<dyn TaskFactory>, RegistryError> {
        self.factories
            .get(task_type)
            .ok_or_else(|| RegistryError::NotRegistered(task_type.to_string()))
    }
}
