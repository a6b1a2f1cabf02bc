//! Chat transcript types
//!
//! The transcript is an ordered list of turns. It only grows, except that the
//! trailing assistant turn is extended in place while a reply streams in.

use serde::{Deserialize, Serialize};

/// Greeting the transcript is seeded with at startup
pub const GREETING: &str = "Hello! How are you?";

/// The role of a chat turn's author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    /// Label shown above a turn in the transcript pane
    pub fn label(&self) -> &'static str {
        match self {
            ChatRole::User => "You:",
            ChatRole::Assistant => "Bot:",
        }
    }
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == ChatRole::Assistant
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript as it looks when a session starts: a single greeting
    pub fn seeded() -> Self {
        Self {
            turns: vec![ChatTurn::assistant(GREETING)],
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    /// True when the trailing turn is the user's and still has no reply
    pub fn awaiting_reply(&self) -> bool {
        matches!(self.last(), Some(turn) if turn.role == ChatRole::User)
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn::user(content));
    }

    /// Fold a streamed fragment into the trailing assistant turn, or start one.
    ///
    /// Empty fragments are dropped. Returns whether the transcript changed.
    pub fn append_assistant(&mut self, fragment: &str) -> bool {
        if fragment.is_empty() {
            return false;
        }

        match self.turns.last_mut() {
            Some(turn) if turn.is_assistant() => turn.content.push_str(fragment),
            _ => self.turns.push(ChatTurn::assistant(fragment)),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_adjacent_assistants(transcript: &Transcript) -> bool {
        transcript
            .turns()
            .windows(2)
            .all(|pair| !(pair[0].is_assistant() && pair[1].is_assistant()))
    }

    #[test]
    fn seeded_transcript_holds_only_the_greeting() {
        let transcript = Transcript::seeded();
        assert_eq!(transcript.turns(), &[ChatTurn::assistant("Hello! How are you?")]);
        assert!(!transcript.awaiting_reply());
    }

    #[test]
    fn user_turn_marks_transcript_as_awaiting() {
        let mut transcript = Transcript::seeded();
        transcript.push_user("Hello");
        assert!(transcript.awaiting_reply());
        assert_eq!(transcript.last(), Some(&ChatTurn::user("Hello")));
    }

    #[test]
    fn fragments_accumulate_into_one_assistant_turn() {
        let mut transcript = Transcript::seeded();
        transcript.push_user("Hi there");

        for fragment in ["Hel", "lo", "!", " How", " can I help?"] {
            assert!(transcript.append_assistant(fragment));
        }

        assert_eq!(transcript.len(), 3);
        assert_eq!(
            transcript.last(),
            Some(&ChatTurn::assistant("Hello! How can I help?"))
        );
        assert!(no_adjacent_assistants(&transcript));
    }

    #[test]
    fn empty_fragment_changes_nothing() {
        let mut transcript = Transcript::seeded();
        transcript.push_user("Hi");
        let before = transcript.clone();

        assert!(!transcript.append_assistant(""));
        assert_eq!(transcript, before);
        assert!(transcript.awaiting_reply());
    }

    #[test]
    fn fragment_after_greeting_extends_greeting() {
        // No user turn in between: the greeting is the trailing assistant turn
        let mut transcript = Transcript::seeded();
        transcript.append_assistant(" Nice day.");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.turns()[0].content, "Hello! How are you? Nice day.");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatTurn::user("x")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"x"}"#);
        assert_eq!(ChatRole::Assistant.as_str(), "assistant");
    }
}
