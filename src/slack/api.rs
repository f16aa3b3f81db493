//! Slack Web API client: the directory side of the transport pair.
//!
//! Every call posts form-encoded parameters and reads a JSON envelope with
//! an `ok` flag. `ok: false` surfaces the platform result code; HTTP and
//! network failures surface the status so the classification layer can
//! tell auth failures, rate limits and timeouts apart.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::transport::{ApiError, ChannelInfo, Directory, UserInfo};

const API_BASE: &str = "https://slack.com/api";
const HTTP_TIMEOUT_SECS: u64 = 30;

pub struct SlackApi {
    http: reqwest::Client,
    app_token: String,
    bot_token: String,
}

impl SlackApi {
    pub fn new(app_token: &str, bot_token: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::new(format!("cannot build http client: {e}")))?;
        Ok(Self {
            http,
            app_token: app_token.to_string(),
            bot_token: bot_token.to_string(),
        })
    }

    /// Open a socket-mode session and return its wss URL. Authenticated
    /// with the app-level token; everything else uses the bot token.
    pub async fn connections_open(&self) -> Result<String, ApiError> {
        let body: ConnectionsOpenResponse =
            self.call("apps.connections.open", &self.app_token, &[]).await?;
        body.url
            .ok_or_else(|| ApiError::new("apps.connections.open returned no url"))
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        token: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{API_BASE}/{method}");
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .form(params)
            .send()
            .await
            .map_err(|e| request_error(method, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::new(format!("{method} failed with HTTP {status}"))
                .with_status(status.as_u16()));
        }

        // The envelope is checked before the typed payload is trusted.
        let text = response
            .text()
            .await
            .map_err(|e| request_error(method, e))?;
        let envelope: Envelope = serde_json::from_str(&text)
            .map_err(|e| ApiError::new(format!("{method} returned invalid JSON: {e}")))?;
        if !envelope.ok {
            let code = envelope.error.unwrap_or_else(|| "unknown_error".into());
            return Err(ApiError::new(format!("{method} failed: {code}"))
                .with_code(code)
                .with_status(status.as_u16()));
        }

        serde_json::from_str(&text)
            .map_err(|e| ApiError::new(format!("{method} payload did not parse: {e}")))
    }
}

fn request_error(method: &str, e: reqwest::Error) -> ApiError {
    let mut err = if e.is_timeout() {
        ApiError::new(format!("{method} timed out: {e}"))
    } else {
        ApiError::new(format!("{method} request failed: {e}"))
    };
    if let Some(status) = e.status() {
        err = err.with_status(status.as_u16());
        if status == StatusCode::UNAUTHORIZED {
            err = err.with_code("invalid_auth");
        }
    }
    err
}

#[async_trait]
impl Directory for SlackApi {
    async fn channel(&self, id: &str) -> Result<ChannelInfo, ApiError> {
        let body: ChannelResponse = self
            .call("conversations.info", &self.bot_token, &[("channel", id)])
            .await?;
        let channel = body
            .channel
            .ok_or_else(|| ApiError::new("conversations.info returned no channel"))?;
        Ok(ChannelInfo {
            id: channel.id,
            name: channel.name,
            is_member: channel.is_member,
        })
    }

    async fn user(&self, id: &str) -> Result<UserInfo, ApiError> {
        let body: UserResponse =
            self.call("users.info", &self.bot_token, &[("user", id)]).await?;
        let user = body
            .user
            .ok_or_else(|| ApiError::new("users.info returned no user"))?;
        let display_name = user.profile.and_then(|p| p.display_name);
        Ok(UserInfo {
            id: user.id,
            display_name,
            real_name: user.real_name,
            login: user.name,
        })
    }
}

// ── wire shapes ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ConnectionsOpenResponse {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct ChannelResponse {
    #[serde(default)]
    channel: Option<RawChannel>,
}

#[derive(Deserialize)]
struct RawChannel {
    id: String,
    name: String,
    #[serde(default)]
    is_member: bool,
}

#[derive(Deserialize)]
struct UserResponse {
    #[serde(default)]
    user: Option<RawUser>,
}

#[derive(Deserialize)]
struct RawUser {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<RawProfile>,
}

#[derive(Deserialize)]
struct RawProfile {
    #[serde(default)]
    display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_error_shape_parses() {
        let env: Envelope = serde_json::from_str(r#"{"ok":false,"error":"invalid_auth"}"#).unwrap();
        assert!(!env.ok);
        assert_eq!(env.error.as_deref(), Some("invalid_auth"));
    }

    #[test]
    fn channel_payload_parses() {
        let body: ChannelResponse = serde_json::from_str(
            r#"{"ok":true,"channel":{"id":"C1234567890","name":"general","is_member":true}}"#,
        )
        .unwrap();
        let channel = body.channel.unwrap();
        assert_eq!(channel.name, "general");
        assert!(channel.is_member);
    }

    #[test]
    fn user_payload_tolerates_missing_profile() {
        let body: UserResponse =
            serde_json::from_str(r#"{"ok":true,"user":{"id":"U01","name":"alice"}}"#).unwrap();
        let user = body.user.unwrap();
        assert_eq!(user.name.as_deref(), Some("alice"));
        assert!(user.profile.is_none());
    }
}
