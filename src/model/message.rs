//! Message documents (partitioned by conversation id)

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::text::normalize_search_text;
use crate::error::{HistoryError, Result};
use crate::types::{now, rfc3339_micros};

/// Entity confidence above which values count as search keywords
const KEYWORD_ENTITY_CONFIDENCE: f64 = 0.7;

/// Role of the message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    #[default]
    User,
    Assistant,
    System,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::User => "user",
            SenderRole::Assistant => "assistant",
            SenderRole::System => "system",
        }
    }
}

impl std::fmt::Display for SenderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SenderRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(SenderRole::User),
            "assistant" => Ok(SenderRole::Assistant),
            "system" => Ok(SenderRole::System),
            _ => Err(format!("Unknown sender role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub role: SenderRole,
}

impl MessageSender {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>, role: SenderRole) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Image,
    File,
    Code,
}

fn default_language() -> String {
    "ja".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub text: String,
    /// Text as first received; defaults to `text`
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub searchable_text: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default = "default_language")]
    pub language: String,
}

impl MessageContent {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            original_text: text.clone(),
            searchable_text: normalize_search_text(&text),
            text,
            content_type: ContentType::Text,
            language: default_language(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Technical and analysis metadata attached to a message.
///
/// Every field is optional on the wire; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageMetadata {
    pub mode: String,
    pub effort: String,
    /// Seconds spent producing the message
    pub duration: f64,
    pub tokens: u64,
    pub model: String,
    pub temperature: f64,
    pub intent: String,
    pub sentiment: Sentiment,
    pub urgency: Urgency,
    pub extracted_entities: Vec<ExtractedEntity>,
    pub topics: Vec<String>,
    pub action_items: Vec<String>,
}

impl MessageMetadata {
    /// Build metadata from loosely shaped JSON such as `{"tokens": 3}`
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|e| HistoryError::InvalidInput(format!("Invalid message metadata: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadInfo {
    pub parent_message_id: Option<String>,
    pub reply_to_message_id: Option<String>,
    pub thread_depth: u32,
    pub has_replies: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "type")]
    pub reaction_type: String,
    #[serde(with = "rfc3339_micros")]
    pub timestamp: DateTime<Utc>,
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Partition key
    pub conversation_id: String,
    pub tenant_id: String,
    pub sender: MessageSender,
    pub content: MessageContent,
    #[serde(with = "rfc3339_micros")]
    pub timestamp: DateTime<Utc>,
    /// Position within the conversation, starting at 1. Never reassigned.
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub thread_info: ThreadInfo,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl Message {
    /// Assemble a complete message document in memory
    pub fn new(
        conversation_id: impl Into<String>,
        tenant_id: impl Into<String>,
        sender: MessageSender,
        text: &str,
        sequence_number: u64,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4()),
            conversation_id: conversation_id.into(),
            tenant_id: tenant_id.into(),
            sender,
            content: MessageContent::new(text),
            timestamp: now(),
            sequence_number,
            metadata,
            thread_info: ThreadInfo::default(),
            attachments: Vec::new(),
            reactions: Vec::new(),
            ttl: None,
        }
    }

    /// Replace the message text, keeping the original text
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.content.text = text.into();
        self.update_search_text();
    }

    pub fn update_search_text(&mut self) {
        if self.content.original_text.is_empty() {
            self.content.original_text = self.content.text.clone();
        }
        self.content.searchable_text = normalize_search_text(&self.content.text);
    }

    pub fn add_entity(&mut self, entity_type: &str, value: &str, confidence: f64) {
        self.metadata.extracted_entities.push(ExtractedEntity {
            entity_type: entity_type.to_string(),
            value: value.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        });
    }

    pub fn add_topic(&mut self, topic: &str) {
        if !self.metadata.topics.iter().any(|t| t == topic) {
            self.metadata.topics.push(topic.to_string());
        }
    }

    pub fn add_action_item(&mut self, action: &str) {
        if !self.metadata.action_items.iter().any(|a| a == action) {
            self.metadata.action_items.push(action.to_string());
        }
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    /// Record a reaction; a user holds at most one, the newest wins
    pub fn add_reaction(&mut self, user_id: &str, reaction_type: &str, display_name: &str) {
        let reaction = Reaction {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            reaction_type: reaction_type.to_string(),
            timestamp: now(),
        };

        match self.reactions.iter_mut().find(|r| r.user_id == user_id) {
            Some(existing) => *existing = reaction,
            None => self.reactions.push(reaction),
        }
    }

    pub fn remove_reaction(&mut self, user_id: &str) -> bool {
        let before = self.reactions.len();
        self.reactions.retain(|r| r.user_id != user_id);
        self.reactions.len() != before
    }

    pub fn set_as_reply(&mut self, parent_message_id: &str, thread_depth: u32) {
        self.thread_info.parent_message_id = Some(parent_message_id.to_string());
        self.thread_info.reply_to_message_id = Some(parent_message_id.to_string());
        self.thread_info.thread_depth = thread_depth;
    }

    pub fn mark_has_replies(&mut self) {
        self.thread_info.has_replies = true;
    }

    /// Keywords drawn from content, confident entities and topics
    pub fn search_keywords(&self) -> Vec<String> {
        let mut keywords: BTreeSet<String> = self
            .content
            .searchable_text
            .split_whitespace()
            .filter(|w| w.chars().count() >= 2)
            .map(str::to_string)
            .collect();

        keywords.extend(
            self.metadata
                .extracted_entities
                .iter()
                .filter(|e| e.confidence > KEYWORD_ENTITY_CONFIDENCE)
                .map(|e| e.value.to_lowercase()),
        );
        keywords.extend(self.metadata.topics.iter().map(|t| t.to_lowercase()));

        keywords.into_iter().collect()
    }

    pub fn is_from_user(&self, user_id: &str) -> bool {
        self.sender.user_id == user_id
    }

    pub fn is_assistant_message(&self) -> bool {
        self.sender.role == SenderRole::Assistant
    }

    pub fn is_recent(&self, hours: i64) -> bool {
        self.timestamp > Utc::now() - Duration::hours(hours)
    }

    pub fn has_high_confidence_entities(&self, min_confidence: f64) -> bool {
        self.metadata
            .extracted_entities
            .iter()
            .any(|e| e.confidence >= min_confidence)
    }
}
