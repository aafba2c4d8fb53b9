//! Command detection over inbound message segments.

use crate::error::Result;
use crate::{InboundMessage, Segment};
use async_trait::async_trait;

/// A detected command, attached to the run context during preprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
    /// Original text the command was parsed from.
    pub raw: String,
}

/// Command parsing and execution collaborator.
///
/// Permission policy and the individual handlers live behind this seam.
#[async_trait]
pub trait CommandRegistry: Send + Sync {
    /// Parse candidate text into a command, or None when the text is not a
    /// command at all.
    fn parse(&self, text: &str) -> Option<ParsedCommand>;

    /// Execute a parsed command, optionally producing reply text.
    async fn execute(
        &self,
        command: &ParsedCommand,
        message: &InboundMessage,
    ) -> Result<Option<String>>;
}

/// Candidate command text: the structured segments with reply and mention
/// markers stripped, preferentially over the raw content.
pub fn command_text(message: &InboundMessage) -> String {
    if message.segments.is_empty() {
        return message.content.trim().to_string();
    }
    let mut text = String::new();
    for segment in &message.segments {
        if let Segment::Text { text: part } = segment {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(part.trim());
        }
    }
    text.trim().to_string()
}

/// Parse `prefix`-led text into a name and whitespace-separated args.
pub fn parse_prefixed(text: &str, prefix: &str) -> Option<ParsedCommand> {
    let rest = text.strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_string();
    let args = parts.map(str::to_string).collect();
    Some(ParsedCommand {
        name,
        args,
        raw: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn message_with_segments(content: &str, segments: Vec<Segment>) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            group_id: Some(Arc::from("g1")),
            sender_id: 7,
            content: content.into(),
            segments,
            addressed_bot: false,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn segments_strip_reply_and_mention_markers() {
        let message = message_with_segments(
            "@bot /weather tokyo",
            vec![
                Segment::Reply {
                    message_id: "m0".into(),
                },
                Segment::Mention { user_id: 0 },
                Segment::Text {
                    text: " /weather tokyo ".into(),
                },
            ],
        );
        assert_eq!(command_text(&message), "/weather tokyo");
    }

    #[test]
    fn raw_content_is_used_without_segments() {
        let message = message_with_segments("  /ping  ", Vec::new());
        assert_eq!(command_text(&message), "/ping");
    }

    #[test]
    fn parses_name_and_args() {
        let command = parse_prefixed("/weather tokyo friday", "/").expect("parses");
        assert_eq!(command.name, "weather");
        assert_eq!(command.args, ["tokyo", "friday"]);
        assert_eq!(command.raw, "/weather tokyo friday");
    }

    #[test]
    fn non_prefixed_text_is_not_a_command() {
        assert!(parse_prefixed("weather tokyo", "/").is_none());
        assert!(parse_prefixed("/", "/").is_none());
    }
}
