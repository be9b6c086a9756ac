//! Conversation documents (partitioned by tenant id)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{Message, SenderRole};
use super::text::{normalize_search_text, preview};
use crate::types::{now, rfc3339_micros};

/// Classification confidence treated as reliable
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Prefix of conversation document ids
const DOCUMENT_ID_PREFIX: &str = "conv_";

/// Length of the short conversation id
const SHORT_ID_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    #[default]
    User,
    Assistant,
    System,
    Admin,
}

impl From<SenderRole> for ParticipantRole {
    fn from(role: SenderRole) -> Self {
        match role {
            SenderRole::User => ParticipantRole::User,
            SenderRole::Assistant => ParticipantRole::Assistant,
            SenderRole::System => ParticipantRole::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub role: ParticipantRole,
    #[serde(with = "rfc3339_micros")]
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    #[default]
    Manual,
    AiClassification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub category_id: String,
    pub category_name: String,
    /// Classification confidence in `[0, 1]`
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub source: CategorySource,
}

impl Category {
    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= HIGH_CONFIDENCE_THRESHOLD
    }
}

/// Denormalized counters kept current by the history manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationMetrics {
    pub message_count: u64,
    pub participant_count: u64,
    pub total_tokens: u64,
    /// Mean assistant response duration in seconds
    pub avg_response_time: f64,
    #[serde(rename = "conversationDuration")]
    pub total_duration: f64,
    /// Assistant replies contributing to `avg_response_time`
    pub response_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    #[serde(with = "rfc3339_micros")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "rfc3339_micros")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "rfc3339_micros")]
    pub last_message_at: DateTime<Utc>,
    #[serde(default)]
    pub first_message_preview: String,
    #[serde(default)]
    pub last_message_preview: String,
}

impl Timeline {
    fn starting_at(ts: DateTime<Utc>) -> Self {
        Self {
            created_at: ts,
            updated_at: ts,
            last_message_at: ts,
            first_message_preview: String::new(),
            last_message_preview: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Private,
    Shared,
    Public,
}

/// A chat conversation.
///
/// Fields feeding `searchableText` are private so that every change goes
/// through a setter that refreshes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    /// Partition key
    pub tenant_id: String,
    pub conversation_id: String,
    title: String,
    #[serde(default)]
    participants: Vec<Participant>,
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    searchable_text: String,
    #[serde(default)]
    pub metrics: ConversationMetrics,
    pub timeline: Timeline,
    #[serde(default)]
    pub status: ConversationStatus,
    #[serde(default)]
    pub privacy: Privacy,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl Conversation {
    /// Document id for a short conversation id
    pub fn document_id(conversation_id: &str) -> String {
        format!("{}{}", DOCUMENT_ID_PREFIX, conversation_id)
    }

    /// Assemble a new conversation with its creator as sole participant
    pub fn new(
        tenant_id: &str,
        title: &str,
        creator_user_id: &str,
        creator_display_name: &str,
        initial_category: Option<&str>,
    ) -> Self {
        let conversation_id: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(SHORT_ID_LEN)
            .collect();
        let created = now();
        let display_name = if creator_display_name.is_empty() {
            creator_user_id
        } else {
            creator_display_name
        };

        let mut conversation = Self {
            id: Self::document_id(&conversation_id),
            tenant_id: tenant_id.to_string(),
            conversation_id,
            title: title.to_string(),
            participants: vec![Participant {
                user_id: creator_user_id.to_string(),
                display_name: display_name.to_string(),
                role: ParticipantRole::User,
                joined_at: created,
            }],
            categories: Vec::new(),
            tags: Vec::new(),
            summary: String::new(),
            searchable_text: String::new(),
            metrics: ConversationMetrics {
                participant_count: 1,
                ..Default::default()
            },
            timeline: Timeline::starting_at(created),
            status: ConversationStatus::Active,
            privacy: Privacy::Private,
            archived: false,
            bookmarked: false,
            ttl: None,
        };

        if let Some(category) = initial_category {
            conversation.add_category(category, category, 1.0, CategorySource::Manual);
        }
        conversation.update_searchable_text();
        conversation
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn searchable_text(&self) -> &str {
        &self.searchable_text
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
        self.update_searchable_text();
    }

    pub fn set_summary(&mut self, summary: &str) {
        self.summary = summary.to_string();
        self.update_searchable_text();
    }

    /// Add a participant; returns false if the user already takes part
    pub fn add_participant(&mut self, user_id: &str, display_name: &str, role: ParticipantRole) -> bool {
        if self.is_participant(user_id) {
            return false;
        }

        self.participants.push(Participant {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            role,
            joined_at: now(),
        });
        self.metrics.participant_count = self.participants.len() as u64;
        self.update_searchable_text();
        true
    }

    /// Add a category; returns false if the id is already present
    pub fn add_category(
        &mut self,
        category_id: &str,
        category_name: &str,
        confidence: f64,
        source: CategorySource,
    ) -> bool {
        if self.has_category(category_id) {
            return false;
        }

        self.categories.push(Category {
            category_id: category_id.to_string(),
            category_name: category_name.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
        });
        self.update_searchable_text();
        true
    }

    /// Add a tag; blank and duplicate tags are ignored
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        self.update_searchable_text();
        true
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        let removed = self.tags.len() != before;
        if removed {
            self.update_searchable_text();
        }
        removed
    }

    /// Recompute `searchableText` from title, summary, participants, categories and tags
    pub fn update_searchable_text(&mut self) {
        let participants = self
            .participants
            .iter()
            .map(|p| p.display_name.as_str())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let categories = self
            .categories
            .iter()
            .map(|c| c.category_name.as_str())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let tags = self.tags.join(" ");

        let full_text = [
            self.title.as_str(),
            self.summary.as_str(),
            &participants,
            &categories,
            &tags,
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

        self.searchable_text = normalize_search_text(&full_text);
    }

    /// Update the timeline from a message sent at `at`
    pub fn update_from_message(&mut self, content: &str, at: DateTime<Utc>, is_first_message: bool) {
        let text = preview(content);
        if is_first_message {
            self.timeline.first_message_preview = text.clone();
        }
        self.timeline.last_message_preview = text;
        self.timeline.last_message_at = at;
        self.timeline.updated_at = at;
        self.update_searchable_text();
    }

    /// Fold a freshly stored message into metrics, timeline and participants
    pub fn apply_message(&mut self, message: &Message) {
        self.metrics.message_count += 1;
        self.metrics.total_tokens += message.metadata.tokens;
        self.metrics.total_duration += message.metadata.duration;

        if message.is_assistant_message() && message.metadata.duration > 0.0 {
            let n = self.metrics.response_count as f64;
            self.metrics.avg_response_time =
                (self.metrics.avg_response_time * n + message.metadata.duration) / (n + 1.0);
            self.metrics.response_count += 1;
        }

        self.add_participant(
            &message.sender.user_id,
            &message.sender.display_name,
            message.sender.role.into(),
        );
        self.update_from_message(
            &message.content.text,
            message.timestamp,
            message.sequence_number == 1,
        );
    }

    /// Rebuild metrics and timeline previews from a complete message list
    pub fn recompute_metrics(&mut self, messages: &[Message]) {
        let responses: Vec<f64> = messages
            .iter()
            .filter(|m| m.is_assistant_message() && m.metadata.duration > 0.0)
            .map(|m| m.metadata.duration)
            .collect();

        self.metrics.message_count = messages.len() as u64;
        self.metrics.participant_count = self.participants.len() as u64;
        self.metrics.total_tokens = messages.iter().map(|m| m.metadata.tokens).sum();
        self.metrics.total_duration = messages.iter().map(|m| m.metadata.duration).sum();
        self.metrics.response_count = responses.len() as u64;
        self.metrics.avg_response_time = if responses.is_empty() {
            0.0
        } else {
            responses.iter().sum::<f64>() / responses.len() as f64
        };

        let mut ordered: Vec<&Message> = messages.iter().collect();
        ordered.sort_by_key(|m| m.sequence_number);
        if let Some(first) = ordered.first() {
            self.timeline.first_message_preview = preview(&first.content.text);
        }
        if let Some(last) = ordered.last() {
            self.timeline.last_message_preview = preview(&last.content.text);
            self.timeline.last_message_at = last.timestamp;
        }
    }

    pub fn participant_names(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.display_name.as_str()).collect()
    }

    pub fn category_names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.category_name.as_str()).collect()
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn has_category(&self, category_id: &str) -> bool {
        self.categories.iter().any(|c| c.category_id == category_id)
    }

    pub fn archive(&mut self) {
        self.status = ConversationStatus::Archived;
        self.archived = true;
    }

    /// Logical deletion: the document stays, flagged deleted and archived
    pub fn soft_delete(&mut self) {
        self.status = ConversationStatus::Deleted;
        self.archived = true;
    }

    pub fn set_bookmarked(&mut self, bookmarked: bool) {
        self.bookmarked = bookmarked;
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ConversationStatus::Deleted
    }
}

impl std::fmt::Display for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Conversation(id={}, title='{}', participants={})",
            self.id,
            self.title,
            self.participants.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::{MessageMetadata, MessageSender};

    fn math_help() -> Conversation {
        Conversation::new("tenant", "Math Help", "u1", "Alice", None)
    }

    #[test]
    fn test_new_conversation() {
        let conv = Conversation::new("tenant", "Math Help", "u1", "", Some("education"));
        assert_eq!(conv.id, format!("conv_{}", conv.conversation_id));
        assert_eq!(conv.conversation_id.len(), 12);
        assert_eq!(conv.participants().len(), 1);
        assert_eq!(conv.participants()[0].display_name, "u1");
        assert_eq!(conv.metrics.participant_count, 1);
        assert!(conv.has_category("education"));
        assert_eq!(conv.categories()[0].confidence, 1.0);
        assert_eq!(conv.searchable_text(), "math help u1 education");
    }

    #[test]
    fn test_setters_refresh_searchable_text() {
        let mut conv = math_help();
        conv.add_tag("Homework!");
        conv.add_category("c1", "Arithmetic", 0.9, CategorySource::AiClassification);
        conv.add_participant("u2", "Bob", ParticipantRole::User);
        conv.set_summary("Basic sums");

        let text = conv.searchable_text();
        for token in ["math", "help", "homework", "arithmetic", "bob", "basic", "sums"] {
            assert!(text.contains(token), "missing {} in {}", token, text);
        }
        assert!(!text.contains('!'));

        conv.remove_tag("Homework!");
        assert!(!conv.searchable_text().contains("homework"));
    }

    #[test]
    fn test_dedup_rules() {
        let mut conv = math_help();
        assert!(!conv.add_participant("u1", "Alice again", ParticipantRole::Admin));
        assert!(conv.add_category("c1", "One", 2.5, CategorySource::Manual));
        assert!(!conv.add_category("c1", "Other name", 0.1, CategorySource::Manual));
        assert_eq!(conv.categories()[0].confidence, 1.0);
        assert!(conv.add_tag("x"));
        assert!(!conv.add_tag("x"));
        assert!(!conv.add_tag("   "));
        assert_eq!(conv.tags(), &["x".to_string()]);
    }

    #[test]
    fn test_apply_message_updates_metrics() {
        let mut conv = math_help();
        let first = Message::new(
            &conv.conversation_id,
            "tenant",
            MessageSender::new("u1", "Alice", SenderRole::User),
            "What is 2+2?",
            1,
            MessageMetadata::default(),
        );
        conv.apply_message(&first);

        let reply = Message::new(
            &conv.conversation_id,
            "tenant",
            MessageSender::new("assistant", "Assistant", SenderRole::Assistant),
            "4",
            2,
            MessageMetadata {
                tokens: 3,
                duration: 1.5,
                ..Default::default()
            },
        );
        conv.apply_message(&reply);

        assert_eq!(conv.metrics.message_count, 2);
        assert_eq!(conv.metrics.total_tokens, 3);
        assert_eq!(conv.metrics.avg_response_time, 1.5);
        assert_eq!(conv.metrics.participant_count, 2);
        assert_eq!(conv.timeline.first_message_preview, "What is 2+2?");
        assert_eq!(conv.timeline.last_message_preview, "4");
        assert_eq!(conv.timeline.last_message_at, reply.timestamp);
        assert!(conv.is_participant("assistant"));

        let mut rebuilt = conv.clone();
        rebuilt.metrics = ConversationMetrics::default();
        rebuilt.recompute_metrics(&[reply.clone(), first.clone()]);
        assert_eq!(rebuilt.metrics, conv.metrics);
        assert_eq!(rebuilt.timeline.first_message_preview, "What is 2+2?");
    }

    #[test]
    fn test_soft_delete_flags() {
        let mut conv = math_help();
        conv.soft_delete();
        assert!(conv.is_deleted());
        assert!(conv.archived);
    }

    #[test]
    fn test_wire_field_names() {
        let mut conv = math_help();
        conv.add_category("c1", "Arithmetic", 0.5, CategorySource::AiClassification);
        conv.ttl = Some(-1);
        let doc = serde_json::to_value(&conv).unwrap();

        assert_eq!(doc["tenantId"], "tenant");
        assert_eq!(doc["participants"][0]["userId"], "u1");
        assert_eq!(doc["categories"][0]["source"], "ai_classification");
        assert_eq!(doc["metrics"]["messageCount"], 0);
        assert!(doc["metrics"].get("conversationDuration").is_some());
        assert!(doc["timeline"]["lastMessageAt"].is_string());
        assert_eq!(doc["status"], "active");
        assert_eq!(doc["ttl"], -1);

        let back: Conversation = serde_json::from_value(doc).unwrap();
        assert_eq!(back, conv);
    }
}
