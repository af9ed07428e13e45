//! Events - デバイスイベントストリーム

pub mod subscriber;

pub use self::subscriber::{EventHandler, EventSubscriber, Subscription};
