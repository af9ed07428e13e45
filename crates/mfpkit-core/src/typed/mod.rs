//! Typed - 型付き Task API
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait - 型安全、アプリケーションが実装する
//! - **内部（Dyn）**: `DynTask` trait - object-safe, type erasure。ワーカーが扱う
//!
//! `TaskRegistry` が両者をつなぎ、`EnvelopeCodec` がプロセス境界を越える。

pub mod codec;
pub mod dyn_task;
pub mod registry;
pub mod task;

pub use self::codec::EnvelopeCodec;
pub use self::dyn_task::{DynTask, TypedTask};
pub use self::registry::{RegistryError, TaskRegistry};
pub use self::task::{Task, TaskContext};
