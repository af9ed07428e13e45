//! Jobs - デバイスジョブ
//!
//! ジョブの開始、ジョブ単位のイベント振り分け、app ジョブの完了待ち、
//! スキャンジョブの状態機械。

pub mod app_job;
pub mod job;
pub mod scan;

pub use self::app_job::{AppJobListener, DEFAULT_APP_JOB_TIMEOUT};
pub use self::job::{JobEventHandler, JobListener, start_job};
