//! Maps both ingress shapes onto one [`GenerationRequest`].

use base64::Engine as _;

use crate::config::GenerationConfig;
use crate::error::GatewayError;
use crate::protocol::canonical::{
    FunctionCall, GenerationOptions, GenerationRequest, IngressApi, Message, Role, ToolCall,
    ToolChoice, ToolSpec,
};
use crate::protocol::legacy::GenerateRequest;
use crate::protocol::ollama::arguments_to_string;
use crate::protocol::openai_chat::{
    ChatContent, ChatMessage, ChatRequest, ChatToolCallIn, ChatToolChoice,
};
use crate::util::next_call_id;

const DATA_URL_BASE64_MARKER: &str = ";base64,";

fn invalid(message: impl Into<String>) -> GatewayError {
    GatewayError::Validation(message.into())
}

fn resolve_model(
    explicit: Option<String>,
    field: &str,
    config: &GenerationConfig,
) -> Result<String, GatewayError> {
    match explicit.map(|model| model.trim().to_string()) {
        Some(model) if !model.is_empty() => Ok(model),
        _ => config
            .default_model
            .clone()
            .ok_or_else(|| invalid(format!("'{field}' is required"))),
    }
}

/// Normalize a `POST /api/v1/generate` body into a one-message chat request.
///
/// # Errors
///
/// Returns [`GatewayError::Validation`] when `prompt` is missing or empty, or
/// no model was given and no default is configured.
pub fn normalize_legacy(
    body: GenerateRequest,
    config: &GenerationConfig,
    request_id: uuid::Uuid,
) -> Result<GenerationRequest, GatewayError> {
    let prompt = match body.prompt {
        Some(prompt) if !prompt.trim().is_empty() => prompt,
        _ => return Err(invalid("'prompt' is required")),
    };
    let model = resolve_model(body.model_name, "model_name", config)?;

    Ok(GenerationRequest {
        request_id,
        ingress: IngressApi::LegacyGenerate,
        model,
        messages: vec![Message::user(prompt)],
        options: GenerationOptions::default(),
        tools: Vec::new(),
        tool_choice: None,
        stream: body.stream,
        think: body.think,
    })
}

/// Normalize a `POST /api/v2/chat` body.
///
/// # Errors
///
/// Returns [`GatewayError::Validation`] for a missing model, an empty or
/// malformed message list, an oversized image, or a `tool_choice` that does
/// not match the declared tools.
pub fn normalize_chat(
    body: ChatRequest,
    config: &GenerationConfig,
    request_id: uuid::Uuid,
) -> Result<GenerationRequest, GatewayError> {
    let model = resolve_model(body.model, "model", config)?;
    if body.messages.is_empty() {
        return Err(invalid("'messages' must contain at least one message"));
    }

    let messages = body
        .messages
        .into_iter()
        .enumerate()
        .map(|(index, message)| normalize_message(index, message, config.max_image_bytes))
        .collect::<Result<Vec<_>, _>>()?;

    let tools = body.tools.unwrap_or_default();
    validate_tools(&tools)?;
    let tool_choice = body
        .tool_choice
        .map(|choice| normalize_tool_choice(choice, &tools))
        .transpose()?;

    Ok(GenerationRequest {
        request_id,
        ingress: IngressApi::Chat,
        model,
        messages,
        options: GenerationOptions {
            temperature: body.temperature,
            top_p: body.top_p,
            top_k: body.top_k,
            max_tokens: body.max_tokens,
            stop: body.stop.map(|stop| stop.into_vec()).unwrap_or_default(),
            extra: body.options.unwrap_or_default(),
        },
        tools,
        tool_choice,
        stream: body.stream.unwrap_or(false),
        think: body.think,
    })
}

/// Wrap a legacy body as the equivalent single-message chat body.
#[must_use]
pub fn legacy_as_chat(body: &GenerateRequest) -> ChatRequest {
    ChatRequest {
        model: body.model_name.clone(),
        messages: vec![ChatMessage {
            role: Role::User.as_str().to_string(),
            content: body.prompt.clone().map(ChatContent::Text),
            ..ChatMessage::default()
        }],
        stream: Some(body.stream),
        think: body.think,
        ..ChatRequest::default()
    }
}

fn parse_role(index: usize, role: &str) -> Result<Role, GatewayError> {
    match role {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        "" => Err(invalid(format!("messages[{index}].role is required"))),
        other => Err(invalid(format!(
            "messages[{index}].role '{other}' is not one of system, user, assistant, tool"
        ))),
    }
}

fn normalize_message(
    index: usize,
    message: ChatMessage,
    max_image_bytes: usize,
) -> Result<Message, GatewayError> {
    let role = parse_role(index, &message.role)?;
    let mut images = message.images.unwrap_or_default();

    let content = match message.content {
        None => None,
        Some(ChatContent::Text(text)) => Some(text),
        Some(ChatContent::Parts(parts)) => {
            let mut texts = Vec::with_capacity(parts.len());
            for part in parts {
                match part.part_type.as_str() {
                    "text" => texts.push(part.text.unwrap_or_default()),
                    "image_url" => {
                        let url = part.image_url.as_ref().map_or("", |url| url.url());
                        images.push(image_payload(index, url)?);
                    }
                    other => {
                        return Err(invalid(format!(
                            "messages[{index}] has unsupported content part type '{other}'"
                        )))
                    }
                }
            }
            Some(texts.join("\n"))
        }
    };

    for (position, image) in images.iter().enumerate() {
        check_image(index, position, image, max_image_bytes)?;
    }

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(normalize_tool_call)
        .collect();

    Ok(Message {
        role: Some(role),
        content,
        images,
        tool_calls,
        tool_call_id: message.tool_call_id,
        name: message.name,
    })
}

fn image_payload(index: usize, url: &str) -> Result<String, GatewayError> {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some(pos) = rest.find(DATA_URL_BASE64_MARKER) {
            return Ok(rest[pos + DATA_URL_BASE64_MARKER.len()..].to_string());
        }
    }
    Err(invalid(format!(
        "messages[{index}] image_url must be a base64 data URL"
    )))
}

/// Images must be valid standard base64 whose decoded size fits the cap.
fn check_image(
    index: usize,
    position: usize,
    payload: &str,
    max_image_bytes: usize,
) -> Result<(), GatewayError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|err| {
            invalid(format!(
                "messages[{index}] image {position} is not valid base64: {err}"
            ))
        })?;
    if decoded.len() > max_image_bytes {
        return Err(invalid(format!(
            "messages[{index}] image {position} decodes to {} bytes, which exceeds {max_image_bytes} bytes",
            decoded.len()
        )));
    }
    Ok(())
}

fn normalize_tool_call(call: ChatToolCallIn) -> ToolCall {
    let arguments = call
        .function
        .arguments
        .as_ref()
        .map_or_else(|| "{}".to_string(), arguments_to_string);
    ToolCall {
        id: call.id.unwrap_or_else(next_call_id),
        call_type: "function".to_string(),
        function: FunctionCall {
            name: call.function.name,
            arguments,
        },
    }
}

fn validate_tools(tools: &[ToolSpec]) -> Result<(), GatewayError> {
    for (index, tool) in tools.iter().enumerate() {
        if tool.tool_type != "function" {
            return Err(invalid(format!(
                "tools[{index}].type must be 'function'"
            )));
        }
        if tool.function.name.trim().is_empty() {
            return Err(invalid(format!("tools[{index}].function.name is required")));
        }
    }
    Ok(())
}

fn normalize_tool_choice(
    choice: ChatToolChoice,
    tools: &[ToolSpec],
) -> Result<ToolChoice, GatewayError> {
    match choice {
        ChatToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Ok(ToolChoice::Auto),
            "none" => Ok(ToolChoice::None),
            "required" => {
                if tools.is_empty() {
                    Err(invalid("tool_choice 'required' needs at least one tool"))
                } else {
                    Ok(ToolChoice::Required)
                }
            }
            other => Err(invalid(format!(
                "tool_choice '{other}' is not one of auto, none, required"
            ))),
        },
        ChatToolChoice::Function(call) => {
            let name = call.function.name;
            if tools.iter().any(|tool| tool.function.name == name) {
                Ok(ToolChoice::Function(name))
            } else {
                Err(invalid(format!(
                    "tool_choice names function '{name}' which is not in tools"
                )))
            }
        }
    }
}
