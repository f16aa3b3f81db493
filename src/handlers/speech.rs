//! Text-to-speech handler. Placeholder: holds the configured speech
//! command but performs no side effect yet.

use async_trait::async_trait;
use tracing::debug;

use crate::error::AppError;
use crate::message::Message;

use super::Handler;

pub const DEFAULT_SPEECH_COMMAND: &str = "say";

pub struct SpeechHandler {
    enabled: bool,
    command: String,
}

impl SpeechHandler {
    pub fn new(enabled: bool, command: impl Into<String>) -> Self {
        Self { enabled, command: command.into() }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Handler for SpeechHandler {
    fn name(&self) -> &str {
        "speech"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn handle(&self, message: &Message) -> Result<(), AppError> {
        debug!(team = %message.team, command = %self.command, "speech handler invoked");
        Ok(())
    }
}
