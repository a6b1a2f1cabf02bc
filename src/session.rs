//! Conversation state machine
//!
//! `ChatSession` owns the transcript and tracks the one model request that
//! may be in flight. Stream events are tagged with the `RequestId` handed out
//! by `begin_request`; anything from an older request is ignored.

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use crate::transcript::{ChatTurn, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Nothing in flight
    Idle,
    /// Request sent, no fragment received yet
    Awaiting(RequestId),
    /// At least one fragment merged
    Streaming(RequestId),
    /// Last request failed; stays here until the next submission
    Failed(String),
}

/// Events produced by a request task, consumed on the UI task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(RequestId, String),
    Done(RequestId),
    Failed(RequestId, String),
}

#[derive(Debug)]
pub struct ChatSession {
    transcript: Transcript,
    phase: Phase,
    next_id: u64,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::with_transcript(Transcript::seeded())
    }

    pub fn with_transcript(transcript: Transcript) -> Self {
        Self {
            transcript,
            phase: Phase::Idle,
            next_id: 1,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn in_flight(&self) -> bool {
        matches!(self.phase, Phase::Awaiting(_) | Phase::Streaming(_))
    }

    /// Waiting for the first fragment of a reply
    pub fn is_awaiting(&self) -> bool {
        matches!(self.phase, Phase::Awaiting(_))
    }

    pub fn last_error(&self) -> Option<&str> {
        match &self.phase {
            Phase::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// Append a user turn. Rejected while a reply is still streaming.
    pub fn submit(&mut self, text: impl Into<String>) -> Result<()> {
        if self.in_flight() {
            bail!("still waiting for the current reply");
        }

        let text = text.into();
        debug!(chars = text.chars().count(), "user turn submitted");
        self.transcript.push_user(text);
        self.phase = Phase::Idle;
        Ok(())
    }

    /// A request should be issued: trailing turn is the user's and nothing is pending
    pub fn needs_request(&self) -> bool {
        self.phase == Phase::Idle && self.transcript.awaiting_reply()
    }

    /// Start a request, returning its id and the conversation to send.
    ///
    /// Returns `None` when no request is needed.
    pub fn begin_request(&mut self) -> Option<(RequestId, Vec<ChatTurn>)> {
        if !self.needs_request() {
            return None;
        }

        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.phase = Phase::Awaiting(id);
        info!(request = %id, turns = self.transcript.len(), "starting completion request");
        Some((id, self.transcript.turns().to_vec()))
    }

    fn is_current(&self, id: RequestId) -> bool {
        matches!(self.phase, Phase::Awaiting(current) | Phase::Streaming(current) if current == id)
    }

    /// Fold one fragment into the transcript. Returns whether anything changed.
    pub fn merge_fragment(&mut self, id: RequestId, fragment: &str) -> bool {
        if !self.is_current(id) {
            debug!(request = %id, "dropping fragment from stale request");
            return false;
        }
        if !self.transcript.append_assistant(fragment) {
            return false;
        }
        self.phase = Phase::Streaming(id);
        true
    }

    /// Stream exhausted. A stream that ended without any content counts as a
    /// failure so the unanswered user turn does not trigger another request.
    pub fn finish(&mut self, id: RequestId) {
        match self.phase {
            Phase::Streaming(current) if current == id => {
                info!(request = %id, "completion stream finished");
                self.phase = Phase::Idle;
            }
            Phase::Awaiting(current) if current == id => {
                self.fail(id, "model returned an empty reply");
            }
            _ => {}
        }
    }

    pub fn fail(&mut self, id: RequestId, message: impl Into<String>) {
        if self.is_current(id) {
            let message = message.into();
            warn!(request = %id, error = %message, "completion request failed");
            self.phase = Phase::Failed(message);
        }
    }

    /// Apply a stream event. Returns whether the transcript changed.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::Fragment(id, fragment) => self.merge_fragment(id, &fragment),
            StreamEvent::Done(id) => {
                self.finish(id);
                false
            }
            StreamEvent::Failed(id, message) => {
                self.fail(id, message);
                false
            }
        }
    }
}
