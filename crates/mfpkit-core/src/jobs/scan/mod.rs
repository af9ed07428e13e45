//! Scan - scan-to-app ジョブ
//!
//! - [`ScanJob`]: ジョブの開始と実行中ジョブ ([`RunningScanJob`])
//! - [`ScanJobListener`]: イベント状態機械。クライアントへ通知する
//! - [`ScanCompletionHook`]: 成功時の後続処理（例: background task の dispatch）

pub mod hook;
pub mod job;
pub mod listener;

pub use self::hook::{
    NoopHook, ScanCompletionHook, ScanJobFailure, ScanJobResult, TaskDispatchingHook,
};
pub use self::job::{RunningScanJob, ScanJob};
pub use self::listener::{SCAN_JOB_TYPE, ScanJobListener};
