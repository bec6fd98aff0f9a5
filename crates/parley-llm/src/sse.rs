use serde::Deserialize;
use serde_json::Value;

use parley_core::errors::GatewayError;
use parley_core::ids::ToolCallId;
use parley_core::messages::{Message, ToolCall};
use parley_core::stream::{StopReason, StreamEvent};

/// Accumulates Gemini `streamGenerateContent` chunks into stream events.
///
/// Every chunk is a full `GenerateContentResponse` carrying only the new
/// parts. The final chunk has a `finishReason`; function calls arrive whole.
#[derive(Default)]
pub struct SseParser {
    started: bool,
    finished: bool,
    text: String,
    tool_calls: Vec<ToolCall>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one SSE event and return zero or more StreamEvents.
    pub fn parse_event(&mut self, event_type: &str, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished || event_type != "message" || data.trim().is_empty() {
            return events;
        }

        let chunk: ChunkPayload = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.finished = true;
                events.push(StreamEvent::Error {
                    error: GatewayError::StreamInterrupted(format!("malformed chunk: {e}")),
                });
                return events;
            }
        };

        if let Some(err) = chunk.error {
            self.finished = true;
            events.push(StreamEvent::Error {
                error: classify_error(&err),
            });
            return events;
        }

        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start);
        }

        if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
            self.finished = true;
            events.push(StreamEvent::Error {
                error: GatewayError::InvalidRequest(format!("prompt blocked: {reason}")),
            });
            return events;
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return events;
        };

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                let tool_call = ToolCall {
                    call_id: call.id.map(ToolCallId::from_raw).unwrap_or_default(),
                    name: call.name,
                    arguments: call.args.unwrap_or_else(|| Value::Object(Default::default())),
                };
                self.tool_calls.push(tool_call.clone());
                events.push(StreamEvent::ToolCallEnd { tool_call });
            } else if let Some(text) = part.text {
                if part.thought || text.is_empty() {
                    continue;
                }
                self.text.push_str(&text);
                events.push(StreamEvent::TextDelta { delta: text });
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finished = true;
            let stop_reason = self.stop_reason(&reason);
            events.push(StreamEvent::Done {
                message: Message::assistant_with_calls(
                    std::mem::take(&mut self.text),
                    std::mem::take(&mut self.tool_calls),
                ),
                stop_reason,
            });
        }

        events
    }

    /// Called when the byte stream ends. A response that never reached a
    /// finish reason is reported as interrupted.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![StreamEvent::Error {
            error: GatewayError::StreamInterrupted("stream ended before a finish reason".into()),
        }]
    }

    fn stop_reason(&self, finish_reason: &str) -> StopReason {
        if !self.tool_calls.is_empty() {
            return StopReason::ToolUse;
        }
        match finish_reason {
            "MAX_TOKENS" => StopReason::MaxTokens,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => StopReason::Safety,
            _ => StopReason::EndTurn,
        }
    }
}

fn classify_error(err: &ErrorPayload) -> GatewayError {
    match err.status.as_deref() {
        Some("UNAVAILABLE") => GatewayError::ServiceUnavailable(err.message.clone()),
        Some("RESOURCE_EXHAUSTED") => GatewayError::RateLimited,
        Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED") => {
            GatewayError::AuthenticationFailed(err.message.clone())
        }
        _ => GatewayError::from_status(err.code.unwrap_or(500), err.message.clone()),
    }
}

/// Map a non-success HTTP response to a gateway error, using the message
/// from Gemini's JSON error envelope when present.
pub fn error_from_response(status: u16, body: &str) -> GatewayError {
    match serde_json::from_str::<ChunkPayload>(body).ok().and_then(|c| c.error) {
        Some(err) => classify_error(&ErrorPayload {
            code: Some(status),
            ..err
        }),
        None => GatewayError::from_status(status, body.to_string()),
    }
}

/// Parse raw SSE text into (event_type, data) pairs. Events without an
/// `event:` line are typed "message"; multi-line data is joined with `\n`.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            flush_event(&mut events, &mut current_event, &mut data_lines);
        } else if let Some(event) = line.strip_prefix("event:") {
            current_event = event.trim_start().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        }
        // Comments (":") and other fields are ignored.
    }
    flush_event(&mut events, &mut current_event, &mut data_lines);

    events
}

fn flush_event(events: &mut Vec<(String, String)>, event: &mut String, data: &mut Vec<&str>) {
    if !data.is_empty() {
        let kind = if event.is_empty() {
            "message".to_string()
        } else {
            std::mem::take(event)
        };
        events.push((kind, data.join("\n")));
    }
    event.clear();
    data.clear();
}

// --- Deserialization types for Gemini stream chunks ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkPayload {
    #[serde(default)]
    candidates: Vec<CandidatePayload>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ErrorPayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePayload {
    content: Option<ContentPayload>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentPayload {
    #[serde(default)]
    parts: Vec<PartPayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartPayload {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    function_call: Option<FunctionCallPayload>,
}

#[derive(Deserialize)]
struct FunctionCallPayload {
    id: Option<String>,
    name: String,
    args: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    code: Option<u16>,
    #[serde(default)]
    message: String,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_text_stream() {
        let mut parser = SseParser::new();

        let events = parser.parse_event(
            "message",
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}],"role":"model"}}]}"#,
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Start));
        assert!(matches!(&events[1], StreamEvent::TextDelta { delta } if delta == "Hello"));

        let events = parser.parse_event(
            "message",
            r#"{"candidates":[{"content":{"parts":[{"text":" world!"}],"role":"model"},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":5}}"#,
        );
        assert_eq!(events.len(), 2);
        match &events[1] {
            StreamEvent::Done { message, stop_reason } => {
                assert_eq!(message.content, "Hello world!");
                assert!(message.tool_calls.is_empty());
                assert_eq!(*stop_reason, StopReason::EndTurn);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn parse_function_calls() {
        let mut parser = SseParser::new();
        let events = parser.parse_event(
            "message",
            r#"{"candidates":[{"content":{"parts":[
                {"functionCall":{"name":"calculator","args":{"first_num":4,"second_num":5,"operation":"mul"}}},
                {"functionCall":{"name":"get_stock_price","args":{"symbol":"AAPL"}}}
            ],"role":"model"},"finishReason":"STOP"}]}"#,
        );
        let done = events.last().unwrap();
        match done {
            StreamEvent::Done { message, stop_reason } => {
                assert_eq!(*stop_reason, StopReason::ToolUse);
                assert_eq!(message.tool_calls.len(), 2);
                assert_eq!(message.tool_calls[0].name, "calculator");
                assert_eq!(message.tool_calls[0].arguments["operation"], "mul");
                assert_eq!(message.tool_calls[1].arguments["symbol"], "AAPL");
                assert_ne!(message.tool_calls[0].call_id, message.tool_calls[1].call_id);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        let ends = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCallEnd { .. }))
            .count();
        assert_eq!(ends, 2);
    }

    #[test]
    fn provider_call_ids_are_kept() {
        let mut parser = SseParser::new();
        let events = parser.parse_event(
            "message",
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"id":"fc-1","name":"web_search","args":{"query":"rust"}}}]},"finishReason":"STOP"}]}"#,
        );
        match events.last() {
            Some(StreamEvent::Done { message, .. }) => {
                assert_eq!(message.tool_calls[0].call_id.as_str(), "fc-1");
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn thought_parts_are_skipped() {
        let mut parser = SseParser::new();
        let events = parser.parse_event(
            "message",
            r#"{"candidates":[{"content":{"parts":[{"text":"pondering","thought":true},{"text":"42"}]},"finishReason":"STOP"}]}"#,
        );
        match events.last() {
            Some(StreamEvent::Done { message, .. }) => assert_eq!(message.content, "42"),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn in_stream_unavailable_error() {
        let mut parser = SseParser::new();
        let events = parser.parse_event(
            "message",
            r#"{"error":{"code":503,"message":"The model is overloaded. Please try again later.","status":"UNAVAILABLE"}}"#,
        );
        match &events[..] {
            [StreamEvent::Error { error }] => assert!(error.is_service_unavailable()),
            other => panic!("expected single Error, got {other:?}"),
        }
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let mut parser = SseParser::new();
        let events = parser.parse_event("message", r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error { error: GatewayError::InvalidRequest(msg) }) if msg.contains("SAFETY")
        ));
    }

    #[test]
    fn truncated_stream_reports_interruption() {
        let mut parser = SseParser::new();
        parser.parse_event("message", r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#);
        match &parser.finish()[..] {
            [StreamEvent::Error { error: GatewayError::StreamInterrupted(_) }] => {}
            other => panic!("expected interruption, got {other:?}"),
        }
    }

    #[test]
    fn malformed_chunk() {
        let mut parser = SseParser::new();
        let events = parser.parse_event("message", "{nope");
        assert!(matches!(&events[..], [StreamEvent::Error { .. }]));
    }

    #[test]
    fn error_from_http_body() {
        let err = error_from_response(
            503,
            r#"{"error":{"code":503,"message":"overloaded","status":"UNAVAILABLE"}}"#,
        );
        assert!(err.is_service_unavailable());

        let err = error_from_response(400, r#"{"error":{"code":400,"message":"bad schema","status":"INVALID_ARGUMENT"}}"#);
        assert!(matches!(err, GatewayError::InvalidRequest(m) if m == "bad schema"));

        let err = error_from_response(502, "<html>bad gateway</html>");
        assert!(matches!(err, GatewayError::ServerError { status: 502, .. }));
    }

    #[test]
    fn sse_lines_without_event_field() {
        let raw = "data: {\"a\":1}\r\n\r\ndata: {\"b\":\ndata: 2}\n\n: keepalive\n\ndata: tail";
        let events = parse_sse_lines(raw);
        assert_eq!(
            events,
            vec![
                ("message".to_string(), "{\"a\":1}".to_string()),
                ("message".to_string(), "{\"b\":\n2}".to_string()),
                ("message".to_string(), "tail".to_string()),
            ]
        );
    }

    #[test]
    fn sse_lines_with_event_field() {
        let events = parse_sse_lines("event: ping\ndata: {}\n\n");
        assert_eq!(events, vec![("ping".to_string(), "{}".to_string())]);
    }
}
