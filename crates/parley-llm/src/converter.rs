use serde_json::{json, Value};

use parley_core::context::LlmContext;
use parley_core::messages::{Message, Role};
use parley_core::provider::StreamOptions;
use parley_core::tools::ToolResult;

/// Convert a full LlmContext into a Gemini `generateContent` request body.
pub fn build_request_body(context: &LlmContext, options: &StreamOptions) -> Value {
    let mut body = json!({
        "contents": convert_messages(&context.messages),
    });

    if let Some(system) = context.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }

    if !context.tools.is_empty() {
        let declarations: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema,
                })
            })
            .collect();
        body["tools"] = json!([{"functionDeclarations": declarations}]);
    }

    let mut generation = serde_json::Map::new();
    if let Some(temp) = options.temperature {
        generation.insert("temperature".into(), json!(temp));
    }
    if let Some(max) = options.max_tokens {
        generation.insert("maxOutputTokens".into(), json!(max));
    }
    if !generation.is_empty() {
        body["generationConfig"] = Value::Object(generation);
    }

    body
}

/// Convert the transcript to Gemini `contents`. Consecutive tool results are
/// folded into a single user turn, which is how Gemini expects the answers
/// to a multi-call model turn.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::User => {
                result.push(json!({"role": "user", "parts": [{"text": msg.content}]}));
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                if !msg.content.is_empty() {
                    parts.push(json!({"text": msg.content}));
                }
                for call in &msg.tool_calls {
                    parts.push(json!({
                        "functionCall": {"name": call.name, "args": call.arguments}
                    }));
                }
                if !parts.is_empty() {
                    result.push(json!({"role": "model", "parts": parts}));
                }
            }
            Role::Tool => {
                let part = convert_tool_result(msg);
                let folded = result
                    .last_mut()
                    .filter(|last| is_function_response_turn(last))
                    .and_then(|last| last["parts"].as_array_mut());
                match folded {
                    Some(parts) => parts.push(part),
                    None => result.push(json!({"role": "user", "parts": [part]})),
                }
            }
        }
    }

    result
}

fn is_function_response_turn(content: &Value) -> bool {
    content["role"] == "user"
        && content["parts"]
            .as_array()
            .is_some_and(|parts| parts.iter().all(|p| p.get("functionResponse").is_some()))
}

/// `functionResponse.response` must be an object; other payloads are wrapped.
fn convert_tool_result(msg: &Message) -> Value {
    let response = match ToolResult::from_content(&msg.content).to_value() {
        obj @ Value::Object(_) => obj,
        other => json!({"result": other}),
    };
    json!({
        "functionResponse": {
            "name": msg.name.as_deref().unwrap_or_default(),
            "response": response,
        }
    })
}
