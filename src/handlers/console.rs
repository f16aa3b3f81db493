//! Console handler: renders each message as one line on stdout.
//!
//! Line format is `{team}/{channel}/{user} > {text}`. The text runs through
//! sanitize (strip control bytes) and collapse (newlines and whitespace runs
//! become single spaces) before formatting. Highlight matching runs against
//! the original, untransformed text; a hit wraps the whole line in red-bold
//! ANSI escapes.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::AppError;
use crate::highlight::HighlightMatcher;
use crate::message::Message;

use super::Handler;

const ANSI_RED_BOLD: &str = "\x1b[1;31m";
const ANSI_RESET: &str = "\x1b[0m";

pub struct ConsoleHandler {
    enabled: bool,
    highlight: Option<Arc<HighlightMatcher>>,
    /// Locked per line so concurrent dispatches interleave only at line
    /// boundaries.
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleHandler {
    pub fn new(enabled: bool, highlight: Option<Arc<HighlightMatcher>>) -> Self {
        Self::with_writer(enabled, highlight, Box::new(std::io::stdout()))
    }

    /// Same handler with an injected output stream. Used by tests; also the
    /// seam for redirecting the feed.
    pub fn with_writer(
        enabled: bool,
        highlight: Option<Arc<HighlightMatcher>>,
        out: Box<dyn Write + Send>,
    ) -> Self {
        Self { enabled, highlight, out: Mutex::new(out) }
    }

    fn writer(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.out.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The exact line `handle` writes, escapes included.
    pub fn render(&self, message: &Message) -> String {
        let text = collapse(&sanitize(&message.text));
        let line = format!(
            "{}/{}/{} > {}",
            message.team, message.channel_name, message.user, text
        );
        let matched = self
            .highlight
            .as_ref()
            .is_some_and(|hl| hl.matches_any(&message.text));
        if matched {
            format!("{ANSI_RED_BOLD}{line}{ANSI_RESET}")
        } else {
            line
        }
    }
}

#[async_trait]
impl Handler for ConsoleHandler {
    fn name(&self) -> &str {
        "console"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn handle(&self, message: &Message) -> Result<(), AppError> {
        let line = self.render(message);
        debug!(team = %message.team, channel = %message.channel_name, "rendering message");
        let mut out = self.writer();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

/// Drop ASCII control bytes except `\t`, `\n` and `\r`.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            !matches!(c,
                '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
        })
        .collect()
}

/// Newlines become single spaces, whitespace runs collapse to one space,
/// ends are trimmed.
fn collapse(text: &str) -> String {
    let unfolded = text.replace("\r\n", " ").replace('\n', " ");
    let mut out = String::with_capacity(unfolded.len());
    let mut in_whitespace = false;
    for c in unfolded.trim().chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push(' ');
            }
            in_whitespace = true;
        } else {
            out.push(c);
            in_whitespace = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> Message {
        Message::new("team", "channel", "C1234567890", "user", text, "100.0")
    }

    #[test]
    fn renders_plain_line() {
        let h = ConsoleHandler::new(true, None);
        assert_eq!(h.render(&msg("hello world")), "team/channel/user > hello world");
    }

    #[test]
    fn control_bytes_are_stripped() {
        let h = ConsoleHandler::new(true, None);
        let text: String = (0x00u8..=0x08)
            .chain([0x0B, 0x0C])
            .chain(0x0Eu8..=0x1F)
            .chain([0x7F])
            .map(char::from)
            .chain("ok".chars())
            .collect();
        let line = h.render(&msg(&text));
        assert_eq!(line, "team/channel/user > ok");
        for b in (0x00u8..=0x08).chain([0x0B, 0x0C]).chain(0x0Eu8..=0x1F).chain([0x7F]) {
            assert!(!line.contains(char::from(b)), "byte {b:#04x} leaked into output");
        }
    }

    #[test]
    fn tab_survives_sanitize_then_collapses() {
        assert_eq!(sanitize("a\tb"), "a\tb");
        let h = ConsoleHandler::new(true, None);
        assert_eq!(h.render(&msg("a\tb")), "team/channel/user > a b");
    }

    #[test]
    fn newlines_collapse_to_single_spaces() {
        let h = ConsoleHandler::new(true, None);
        assert_eq!(h.render(&msg("a\nb\r\nc")), "team/channel/user > a b c");
        assert_eq!(h.render(&msg("  a   b  ")), "team/channel/user > a b");
        assert_eq!(h.render(&msg("a \n\n b")), "team/channel/user > a b");
    }

    #[test]
    fn highlight_wraps_line_in_escapes() {
        let hl = Arc::new(HighlightMatcher::new(&["/php/i".into()]).unwrap());
        let h = ConsoleHandler::new(true, Some(hl));
        let line = h.render(&msg("some PHP code"));
        assert!(line.starts_with(ANSI_RED_BOLD));
        assert!(line.ends_with(ANSI_RESET));
    }

    #[test]
    fn highlight_matches_original_not_collapsed_text() {
        // The pattern only matches while the newline is present; collapse
        // would erase the match, so this proves matching runs first.
        let hl = Arc::new(HighlightMatcher::new(&["/^php$/m".into()]).unwrap());
        let h = ConsoleHandler::new(true, Some(hl));
        let line = h.render(&msg("Hello\nphp\nworld"));
        assert_eq!(line, format!("{ANSI_RED_BOLD}team/channel/user > Hello php world{ANSI_RESET}"));
    }

    #[test]
    fn no_highlight_without_match() {
        let hl = Arc::new(HighlightMatcher::new(&["/php/".into()]).unwrap());
        let h = ConsoleHandler::new(true, Some(hl));
        let line = h.render(&msg("plain rust"));
        assert!(!line.contains(ANSI_RED_BOLD));
    }

    #[tokio::test]
    async fn handle_writes_one_line() {
        #[derive(Clone)]
        struct Capture(Arc<Mutex<Vec<u8>>>);

        impl Write for Capture {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let h = ConsoleHandler::with_writer(true, None, Box::new(Capture(buffer.clone())));
        h.handle(&msg("hi")).await.unwrap();

        let written = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "team/channel/user > hi\n");
    }
}
