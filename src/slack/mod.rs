//! Production transport: Slack socket mode plus the Web API directory.
//!
//! [`SlackPlatform`] builds one [`api::SlackApi`] per team (it serves as
//! the [`Directory`](crate::transport::Directory)) and one
//! [`socket::SocketTransport`] driving the streaming session over the
//! same API client.

pub mod api;
pub mod socket;

use std::sync::Arc;

use crate::config::TeamConfig;
use crate::transport::{ApiError, Directory, Platform, Transport};

use api::SlackApi;
use socket::SocketTransport;

#[derive(Default)]
pub struct SlackPlatform;

impl SlackPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for SlackPlatform {
    fn session(
        &self,
        team: &TeamConfig,
    ) -> Result<(Arc<dyn Transport>, Arc<dyn Directory>), ApiError> {
        let api = Arc::new(SlackApi::new(&team.app_token, &team.bot_token)?);
        let transport = Arc::new(SocketTransport::new(team.name.clone(), api.clone()));
        Ok((transport, api))
    }
}
