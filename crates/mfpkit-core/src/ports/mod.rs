//! Ports - 抽象化レイヤー
//!
//! 外部システム（デバイスの Web API、クライアントへのプッシュ、時刻）への
//! インターフェース。実装は `impls` に置く。

pub mod clock;
pub mod device_api;
pub mod endpoint;
pub mod notifier;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::device_api::{DeviceApi, HttpMethod};
pub use self::endpoint::ChannelEndpoint;
pub use self::notifier::{ClientNotification, ClientNotifier};
