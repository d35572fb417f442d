use serde::Deserialize;

use modelgate_provider_core::{FinishReason, StreamChunk, TokenUsage};

/// Incremental buffer over a byte stream of line-delimited SSE-shaped
/// events: `data: {json}\n\n`, terminated by the sentinel `data: [DONE]`.
/// Malformed lines are skipped, never surfaced as errors.
#[derive(Default)]
pub struct SseLineBuffer {
    buf: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkChoice {
    delta: ChatChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChatChunkChoice>,
    #[serde(default)]
    usage: Option<ChatChunkUsage>,
}

pub enum SseEvent {
    Chunk(StreamChunk),
    Done,
    /// Line was not a `data: ` event, or failed to parse; caller should poll again.
    Skip,
}

impl SseLineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Pops and parses the next complete line, if any.
    pub fn pop_event(&mut self) -> Option<SseEvent> {
        let newline = self.buf.find('\n')?;
        let line: String = self.buf.drain(..=newline).collect();
        let line = line.trim_end_matches(['\r', '\n']);

        let Some(payload) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
            return Some(SseEvent::Skip);
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Some(SseEvent::Skip);
        }
        if payload == "[DONE]" {
            return Some(SseEvent::Done);
        }

        match serde_json::from_str::<ChatChunk>(payload) {
            Ok(parsed) => Some(SseEvent::Chunk(to_stream_chunk(parsed))),
            Err(_) => Some(SseEvent::Skip),
        }
    }
}

fn to_stream_chunk(parsed: ChatChunk) -> StreamChunk {
    let choice = parsed.choices.into_iter().next();
    match choice.as_ref().and_then(|c| c.finish_reason.as_deref()) {
        Some(reason) => StreamChunk::Done {
            finish_reason: parse_finish_reason(reason),
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        },
        None => StreamChunk::Delta {
            content: choice
                .and_then(|c| c.delta.content)
                .unwrap_or_default(),
        },
    }
}

fn parse_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delta_then_done_then_sentinel() {
        let mut buf = SseLineBuffer::default();
        buf.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n");
        buf.push(b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2,\"total_tokens\":3}}\n");
        buf.push(b"data: [DONE]\n");

        assert!(matches!(buf.pop_event(), Some(SseEvent::Chunk(StreamChunk::Delta { content })) if content == "hi"));
        assert!(matches!(buf.pop_event(), Some(SseEvent::Chunk(StreamChunk::Done { .. }))));
        assert!(matches!(buf.pop_event(), Some(SseEvent::Done)));
        assert!(buf.pop_event().is_none());
    }

    #[test]
    fn skips_malformed_lines() {
        let mut buf = SseLineBuffer::default();
        buf.push(b"not a data line\n");
        buf.push(b"data: {not json}\n");
        assert!(matches!(buf.pop_event(), Some(SseEvent::Skip)));
        assert!(matches!(buf.pop_event(), Some(SseEvent::Skip)));
    }
}
