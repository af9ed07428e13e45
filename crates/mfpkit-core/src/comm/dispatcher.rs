//! Dispatcher - バックグラウンドへの task 送信
//!
//! Two ways to hand work to the background app:
//!
//! - [`Dispatcher::dispatch_task`]: a task object built here, sent as its type tag
//!   plus business fields (`RunTask`)
//! - [`Dispatcher::dispatch`]: only a task class name and a detached payload
//!   (`RunTaskByClass`); the background builds a fresh instance
//!
//! Both stamp the dispatch time and the locale of the dispatching session.

use std::sync::Arc;

use tracing::info;

use super::client::ChannelRegistry;
use super::session::get_locale;
use crate::domain::{
    CodecError, CommunicationError, DispatchError, TASK_HANDLER_PATH, TASK_PAYLOAD_HANDLER_PATH,
    TaskMessage, TaskPayload,
};
use crate::ports::Clock;
use crate::typed::Task;

#[derive(Clone)]
pub struct Dispatcher {
    channels: Arc<ChannelRegistry>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(channels: Arc<ChannelRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { channels, clock }
    }

    /// Sends `task_class` with `payload` to run in the background.
    pub async fn dispatch(
        &self,
        api_token: &str,
        task_class: &str,
        payload: TaskPayload,
    ) -> Result<(), DispatchError> {
        info!(task_class, "task is dispatched by class");
        self.send(api_token, TASK_PAYLOAD_HANDLER_PATH, |dispatched_at, locale| {
            TaskMessage::RunTaskByClass {
                task_class: task_class.to_string(),
                payload,
                dispatched_at,
                locale,
            }
        })
        .await
    }

    /// Sends a task object to run in the background.
    ///
    /// The background must have `T` registered under `T::TYPE`.
    pub async fn dispatch_task<T: Task>(
        &self,
        api_token: &str,
        task: &T,
    ) -> Result<(), DispatchError> {
        let fields = serde_json::to_value(task)
            .map_err(|e| CommunicationError::from(CodecError::from(e)))?;

        info!(task_type = T::TYPE, "task is dispatched");
        self.send(api_token, TASK_HANDLER_PATH, |dispatched_at, locale| {
            TaskMessage::RunTask {
                task_type: T::TYPE.to_string(),
                fields,
                dispatched_at,
                locale,
            }
        })
        .await
    }

    async fn send(
        &self,
        api_token: &str,
        handler_path: &str,
        build: impl FnOnce(f64, String) -> TaskMessage,
    ) -> Result<(), DispatchError> {
        let client = self.channels.connect(api_token, false).await?;

        let locale = get_locale(self.channels.api().as_ref(), api_token)
            .await
            .map_err(DispatchError::Session)?;
        let message = build(self.clock.timestamp(), locale);

        let body = serde_json::to_value(&message)
            .map_err(|e| CommunicationError::from(CodecError::from(e)))?;
        client.request(handler_path, body).await?;
        Ok(())
    }
}
