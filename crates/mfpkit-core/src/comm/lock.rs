//! SessionLock - デバイスセッションの保持
//!
//! A lock keeps the originating user session alive on the device while
//! asynchronous work depends on it. There is no renewal: the lock lives until
//! `release` is called.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::domain::WebApiError;
use crate::ports::DeviceApi;
use crate::ports::device_api::response_str;

/// Which device endpoint holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// Held by the worker pool while a task is queued or running.
    Background,
    /// Held by a job listener across the asynchronous tail of a device job.
    HomeApp,
}

impl LockScope {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Background => "/app/communication/server/lock",
            Self::HomeApp => "/app/homeapp/lock",
        }
    }
}

pub struct SessionLock {
    api: Arc<dyn DeviceApi>,
    api_token: String,
    scope: LockScope,
    lock_id: Option<String>,
}

impl SessionLock {
    /// Acquires a new lock for `api_token`'s session.
    pub async fn acquire(
        api: Arc<dyn DeviceApi>,
        api_token: &str,
        scope: LockScope,
    ) -> Result<Self, WebApiError> {
        let response = api.post(scope.path(), api_token, None).await?;
        let lock_id = response_str(&response, "lock_id")?;
        info!(%lock_id, ?scope, "session is locked");

        Ok(Self {
            api,
            api_token: api_token.to_string(),
            scope,
            lock_id: Some(lock_id),
        })
    }

    pub fn lock_id(&self) -> Option<&str> {
        self.lock_id.as_deref()
    }

    pub fn is_locked(&self) -> bool {
        self.lock_id.is_some()
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    /// Releases the lock. Calling it again afterwards does nothing.
    ///
    /// The id is forgotten before the device call, so a failed release is not retried.
    pub async fn release(&mut self) -> Result<(), WebApiError> {
        let Some(lock_id) = self.lock_id.take() else {
            return Ok(());
        };

        self.api
            .delete(
                self.scope.path(),
                &self.api_token,
                Some(json!({ "lock_id": lock_id })),
            )
            .await?;
        info!(%lock_id, scope = ?self.scope, "session lock is released");
        Ok(())
    }
}

impl std::fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLock")
            .field("scope", &self.scope)
            .field("lock_id", &self.lock_id)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Some(lock_id) = &self.lock_id {
            warn!(%lock_id, scope = ?self.scope, "session lock dropped without release");
        }
    }
}
