//! Message handlers: pluggable sinks dispatched by the pipeline.
//!
//! A handler is anything implementing [`Handler`]; the pipeline stores them
//! by [`Handler::name`] and only dispatches to handlers whose
//! [`Handler::enabled`] returns true at dispatch time.

mod console;
mod notification;
mod speech;

pub use console::ConsoleHandler;
pub use notification::NotificationHandler;
pub use speech::SpeechHandler;

use async_trait::async_trait;

use crate::error::AppError;
use crate::message::Message;

/// The capability contract every handler satisfies.
///
/// `handle` receives a borrowed message and must not retain it past
/// returning. Implementations must be `Send + Sync`: the pipeline holds
/// them behind `Arc` and runs them concurrently.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Registry key. Stable for the lifetime of the handler.
    fn name(&self) -> &str;

    /// Checked at each dispatch; a disabled handler is skipped, not removed.
    fn enabled(&self) -> bool;

    async fn handle(&self, message: &Message) -> Result<(), AppError>;
}
