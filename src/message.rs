//! The immutable message record produced by team clients and consumed by
//! handlers.

/// One accepted chat message, ready for dispatch.
///
/// `ts` is the platform's own timestamp string, kept verbatim; `wall_time`
/// is the derived epoch-seconds instant every ordering decision uses.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub team: String,
    pub channel_name: String,
    pub channel_id: String,
    pub user: String,
    pub text: String,
    pub ts: String,
    pub wall_time: f64,
}

impl Message {
    pub fn new(
        team: impl Into<String>,
        channel_name: impl Into<String>,
        channel_id: impl Into<String>,
        user: impl Into<String>,
        text: impl Into<String>,
        ts: impl Into<String>,
    ) -> Self {
        let ts = ts.into();
        let wall_time = wall_time_from_ts(&ts);
        Self {
            team: team.into(),
            channel_name: channel_name.into(),
            channel_id: channel_id.into(),
            user: user.into(),
            text: text.into(),
            ts,
            wall_time,
        }
    }
}

/// Epoch seconds from a platform timestamp like `"1690000000.123456"`.
///
/// Malformed timestamps resolve to `0.0` so they order first,
/// deterministically, instead of poisoning the sort.
pub(crate) fn wall_time_from_ts(ts: &str) -> f64 {
    ts.trim().parse().unwrap_or(0.0)
}
