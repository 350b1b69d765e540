//! Conversation history normalization
//!
//! Turns the client's ordered turns, the new message and its classified
//! attachments into either native `contents` or OpenAI-style `messages`.

use assistant_protocol::{
    assistant::{Attachment, ConversationTurn, Role},
    chat::{ChatMessage, ChatRole, ContentPart},
    google::{Content, Part},
};
use tracing::debug;

use crate::{
    attachments::{detect_kind, normalize_image, AttachmentKind, ClassifiedAttachments},
    config::HistoryOptions,
    routers::{
        error::GatewayError,
        models::{Feature, ProviderModel},
    },
};

/// Everything a chat adapter needs once preprocessing is done.
#[derive(Debug, Clone, Default)]
pub struct PreparedChat {
    pub history: Vec<ConversationTurn>,
    pub new_message: String,
    pub attachments: ClassifiedAttachments,
    pub system_instruction: Option<String>,
    pub use_web_search: bool,
}

impl PreparedChat {
    /// The new message followed by the extracted text blocks, blank-line separated.
    pub fn final_text(&self) -> String {
        let message = self.new_message.trim();
        std::iter::once(message)
            .chain(self.attachments.text_blocks.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn instruction(&self) -> Option<&str> {
        self.system_instruction
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Final text with the system instruction prepended, for models that
    /// have no dedicated slot for it.
    fn final_text_with_inline_instruction(&self, model: &ProviderModel) -> String {
        let text = self.final_text();
        match self.instruction() {
            Some(instruction) if !model.supports(Feature::SystemInstruction) => {
                if text.is_empty() {
                    instruction.to_string()
                } else {
                    format!("{instruction}\n\n{text}")
                }
            }
            _ => text,
        }
    }
}

/// History with a trailing copy of the new message removed.
pub fn dedupe_trailing_turn(
    history: &[ConversationTurn],
    new_message: &str,
    options: HistoryOptions,
) -> Vec<ConversationTurn> {
    let mut turns = history.to_vec();
    if !options.dedupe_trailing_user_turn {
        return turns;
    }
    let new_message = new_message.trim();
    let duplicate = turns
        .last()
        .is_some_and(|t| t.role == Role::User && !new_message.is_empty() && t.text.trim() == new_message);
    if duplicate {
        debug!("Dropping trailing history turn that repeats the new message");
        turns.pop();
    }
    turns
}

/// Images of a past turn, normalized like current-turn images.
fn replayable_images(turn: &ConversationTurn) -> impl Iterator<Item = Attachment> + '_ {
    turn.attachments
        .iter()
        .filter(|a| detect_kind(a) == AttachmentKind::Image)
        .map(normalize_image)
        .filter(|a| !a.data.is_empty())
}

// ============================================================================
// Native multimodal
// ============================================================================

/// Native `contents` plus the optional `systemInstruction`.
pub fn to_native(prepared: &PreparedChat, model: &ProviderModel) -> (Vec<Content>, Option<Content>) {
    let replay = model.supports(Feature::AttachmentReplay);
    let mut contents = Vec::with_capacity(prepared.history.len() + 1);

    for turn in &prepared.history {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        let mut parts = Vec::new();
        if replay {
            parts.extend(replayable_images(turn).map(|a| Part::inline(a.mime_type, a.data)));
        }
        let text = turn.text.trim();
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        if !parts.is_empty() {
            contents.push(Content::new(role, parts));
        }
    }

    let mut parts: Vec<Part> = prepared
        .attachments
        .images()
        .map(|a| Part::inline(&a.mime_type, &a.data))
        .collect();
    let text = prepared.final_text_with_inline_instruction(model);
    if !text.is_empty() {
        parts.push(Part::text(text));
    }
    contents.push(Content::new("user", parts));

    let system_instruction = prepared
        .instruction()
        .filter(|_| model.supports(Feature::SystemInstruction))
        .map(Content::instruction);

    (contents, system_instruction)
}

// ============================================================================
// OpenAI-compatible
// ============================================================================

/// OpenAI-style `messages`, system prompt first.
///
/// Fails with `ValidationError` when images are attached for a model that
/// cannot take image input.
pub fn to_openai(prepared: &PreparedChat, model: &ProviderModel) -> Result<Vec<ChatMessage>, GatewayError> {
    if prepared.attachments.has_images() && !model.supports(Feature::ImageInput) {
        return Err(GatewayError::validation(format!(
            "Model {} does not accept image attachments",
            model.requested_name
        )));
    }

    let replay = model.supports(Feature::AttachmentReplay) && model.supports(Feature::ImageInput);
    let mut messages = Vec::with_capacity(prepared.history.len() + 2);

    if let Some(instruction) = prepared
        .instruction()
        .filter(|_| model.supports(Feature::SystemInstruction))
    {
        messages.push(ChatMessage::text(ChatRole::System, instruction));
    }

    for turn in &prepared.history {
        let role = match turn.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        };
        let text = turn.text.trim();
        let images: Vec<Attachment> = if replay {
            replayable_images(turn).collect()
        } else {
            Vec::new()
        };

        if images.is_empty() {
            if !text.is_empty() {
                messages.push(ChatMessage::text(role, text));
            }
            continue;
        }

        let mut parts = Vec::with_capacity(images.len() + 1);
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        parts.extend(images.iter().map(|a| ContentPart::image_data(&a.mime_type, &a.data)));
        messages.push(ChatMessage::parts(role, parts));
    }

    let text = prepared.final_text_with_inline_instruction(model);
    let attachments = &prepared.attachments;
    if attachments.has_images() {
        let mut parts = Vec::with_capacity(attachments.secondary_images.len() + 2);
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        parts.extend(
            attachments
                .primary_image
                .iter()
                .chain(attachments.secondary_images.iter())
                .map(|a| ContentPart::image_data(&a.mime_type, &a.data)),
        );
        messages.push(ChatMessage::parts(ChatRole::User, parts));
    } else {
        messages.push(ChatMessage::text(ChatRole::User, text));
    }

    Ok(messages)
}
