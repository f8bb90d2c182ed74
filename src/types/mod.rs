//! Core identity and error types shared across the runtime.

mod error;
mod identity;

pub use error::{ApplicationError, CoreError, FrameworkError, FrameworkErrorCode};
pub use identity::{ActorId, ActorType, NodeName};
