//! Desktop notification handler. Placeholder: carries the capability
//! surface so the pipeline can be exercised with several handlers, but
//! performs no side effect yet.

use async_trait::async_trait;
use tracing::debug;

use crate::error::AppError;
use crate::message::Message;

use super::Handler;

pub struct NotificationHandler {
    enabled: bool,
}

impl NotificationHandler {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl Handler for NotificationHandler {
    fn name(&self) -> &str {
        "notification"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn handle(&self, message: &Message) -> Result<(), AppError> {
        debug!(team = %message.team, "notification handler invoked");
        Ok(())
    }
}
