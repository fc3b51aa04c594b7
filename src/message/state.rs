//! Per-message progress.

/// Where a message is in its exchange.
///
/// `Idle → HeaderSent → BodyStreaming → Complete`; any I/O failure moves to
/// `Failed`. Receiving goes `Idle → BodyStreaming → Complete` because the
/// header is received before the message is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageState {
    #[default]
    Idle,
    HeaderSent,
    BodyStreaming,
    Complete,
    Failed,
}

impl MessageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageState::Complete | MessageState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Idle => "idle",
            MessageState::HeaderSent => "header_sent",
            MessageState::BodyStreaming => "body_streaming",
            MessageState::Complete => "complete",
            MessageState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
