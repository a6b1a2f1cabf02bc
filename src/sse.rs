//! Server-sent event line decoder
//!
//! Completion servers stream `data: <json>` lines. Network chunks line up
//! neither with those lines nor with UTF-8 boundaries, so the decoder keeps the
//! raw bytes of the partial tail between pushes.

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    /// Upper bound on buffered bytes without a newline
    const MAX_PENDING: usize = 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and take every complete `data` frame it finishes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(frame) = SseFrame::from_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }

        if self.pending.len() > Self::MAX_PENDING {
            tracing::warn!(bytes = self.pending.len(), "discarding oversized SSE line");
            self.pending.clear();
        }

        frames
    }

    /// Flush a final line the server did not terminate with a newline
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.pending);
        SseFrame::from_line(&String::from_utf8_lossy(&rest))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Payload of one `data:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub data: String,
}

impl SseFrame {
    fn from_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        // Blank separators, comments and non-data fields carry no content
        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);
        Some(Self {
            data: data.to_string(),
        })
    }

    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data)
            .map_err(|e| anyhow!("malformed SSE payload ({}): {}", e, self.preview()))
    }

    fn preview(&self) -> String {
        let preview: String = self.data.chars().take(120).collect();
        if preview.len() < self.data.len() {
            format!("{}...", preview)
        } else {
            preview
        }
    }
}
