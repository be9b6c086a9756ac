//! Read-only aggregates over fetched documents

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::model::{Conversation, ConversationStatus, Message, SenderRole};
use crate::types::rfc3339_micros;

/// Upper bound on documents fetched for one aggregate
pub const STATS_FETCH_LIMIT: usize = 1000;

const TOP_N: usize = 10;
const RECENT_DAYS: i64 = 30;

/// Per-conversation statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationStats {
    pub conversation_id: String,
    pub title: String,
    pub message_count: usize,
    pub participant_count: usize,
    pub user_message_count: usize,
    pub assistant_message_count: usize,
    pub system_message_count: usize,
    /// Mean text length in characters
    pub avg_message_length: f64,
    pub total_tokens: u64,
    /// Seconds, over assistant messages
    pub avg_response_time: f64,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    #[serde(with = "rfc3339_micros")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "rfc3339_micros")]
    pub last_message_at: DateTime<Utc>,
}

impl ConversationStats {
    pub fn compute(conversation: &Conversation, messages: &[Message]) -> Self {
        let count_role = |role: SenderRole| messages.iter().filter(|m| m.sender.role == role).count();
        let assistant_message_count = count_role(SenderRole::Assistant);

        let avg_message_length = if messages.is_empty() {
            0.0
        } else {
            messages
                .iter()
                .map(|m| m.content.text.chars().count())
                .sum::<usize>() as f64
                / messages.len() as f64
        };

        let response_total: f64 = messages
            .iter()
            .filter(|m| m.is_assistant_message() && m.metadata.duration > 0.0)
            .map(|m| m.metadata.duration)
            .sum();

        Self {
            conversation_id: conversation.conversation_id.clone(),
            title: conversation.title().to_string(),
            message_count: messages.len(),
            participant_count: conversation.participants().len(),
            user_message_count: count_role(SenderRole::User),
            assistant_message_count,
            system_message_count: count_role(SenderRole::System),
            avg_message_length,
            total_tokens: messages.iter().map(|m| m.metadata.tokens).sum(),
            avg_response_time: response_total / assistant_message_count.max(1) as f64,
            categories: conversation
                .category_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            tags: conversation.tags().to_vec(),
            created_at: conversation.timeline.created_at,
            last_message_at: conversation.timeline.last_message_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantActivity {
    pub user_id: String,
    pub display_name: String,
    pub conversation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentActivity {
    /// Conversations with a message in the last 30 days
    pub last_30_days: usize,
    pub most_active_participants: Vec<ParticipantActivity>,
}

/// Statistics over one tenant's conversations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantStats {
    pub tenant_id: String,
    pub total_conversations: usize,
    pub active_conversations: usize,
    pub archived_conversations: usize,
    pub top_categories: Vec<CategoryCount>,
    pub recent_activity: RecentActivity,
}

impl TenantStats {
    pub fn compute(tenant_id: &str, conversations: &[Conversation], now: DateTime<Utc>) -> Self {
        let mut category_counts: HashMap<&str, usize> = HashMap::new();
        for conversation in conversations {
            for name in conversation.category_names() {
                *category_counts.entry(name).or_default() += 1;
            }
        }
        let mut top_categories: Vec<CategoryCount> = category_counts
            .into_iter()
            .map(|(name, count)| CategoryCount {
                name: name.to_string(),
                count,
            })
            .collect();
        top_categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        top_categories.truncate(TOP_N);

        let cutoff = now - Duration::days(RECENT_DAYS);
        let last_30_days = conversations
            .iter()
            .filter(|c| c.timeline.last_message_at >= cutoff)
            .count();

        Self {
            tenant_id: tenant_id.to_string(),
            total_conversations: conversations.len(),
            active_conversations: conversations
                .iter()
                .filter(|c| c.status == ConversationStatus::Active)
                .count(),
            archived_conversations: conversations.iter().filter(|c| c.archived).count(),
            top_categories,
            recent_activity: RecentActivity {
                last_30_days,
                most_active_participants: most_active_participants(conversations),
            },
        }
    }
}

fn most_active_participants(conversations: &[Conversation]) -> Vec<ParticipantActivity> {
    let mut by_user: HashMap<&str, ParticipantActivity> = HashMap::new();
    for conversation in conversations {
        for participant in conversation.participants() {
            by_user
                .entry(participant.user_id.as_str())
                .or_insert_with(|| ParticipantActivity {
                    user_id: participant.user_id.clone(),
                    display_name: participant.display_name.clone(),
                    conversation_count: 0,
                })
                .conversation_count += 1;
        }
    }

    let mut ranked: Vec<ParticipantActivity> = by_user.into_values().collect();
    ranked.sort_by(|a, b| {
        b.conversation_count
            .cmp(&a.conversation_count)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    ranked.truncate(TOP_N);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CategorySource, MessageMetadata, MessageSender, ParticipantRole};

    fn message(conv: &Conversation, role: SenderRole, text: &str, seq: u64, duration: f64, tokens: u64) -> Message {
        Message::new(
            &conv.conversation_id,
            &conv.tenant_id,
            MessageSender::new(role.as_str(), role.as_str(), role),
            text,
            seq,
            MessageMetadata {
                duration,
                tokens,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_conversation_stats() {
        let mut conv = Conversation::new("t", "Math Help", "u1", "Alice", Some("math"));
        conv.add_tag("homework");
        let messages = vec![
            message(&conv, SenderRole::User, "abcd", 1, 0.0, 0),
            message(&conv, SenderRole::Assistant, "ab", 2, 2.0, 5),
            message(&conv, SenderRole::Assistant, "abcdef", 3, 0.0, 7),
        ];

        let stats = ConversationStats::compute(&conv, &messages);
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.user_message_count, 1);
        assert_eq!(stats.assistant_message_count, 2);
        assert_eq!(stats.system_message_count, 0);
        assert_eq!(stats.avg_message_length, 4.0);
        assert_eq!(stats.total_tokens, 12);
        // Zero durations count in the denominator but add nothing
        assert_eq!(stats.avg_response_time, 1.0);
        assert_eq!(stats.categories, vec!["math"]);
        assert_eq!(stats.tags, vec!["homework"]);
    }

    #[test]
    fn test_conversation_stats_without_messages() {
        let conv = Conversation::new("t", "Empty", "u1", "Alice", None);
        let stats = ConversationStats::compute(&conv, &[]);
        assert_eq!(stats.message_count, 0);
        assert_eq!(stats.avg_message_length, 0.0);
        assert_eq!(stats.avg_response_time, 0.0);
    }

    #[test]
    fn test_tenant_stats() {
        let now = Utc::now();
        let mut a = Conversation::new("t", "A", "u1", "Alice", Some("math"));
        a.add_participant("u2", "Bob", ParticipantRole::User);
        let mut b = Conversation::new("t", "B", "u1", "Alice", Some("math"));
        b.add_category("science", "science", 0.9, CategorySource::AiClassification);
        b.archive();
        let mut c = Conversation::new("t", "C", "u3", "Carol", None);
        c.timeline.last_message_at = now - Duration::days(45);

        let stats = TenantStats::compute("t", &[a, b, c], now);
        assert_eq!(stats.total_conversations, 3);
        assert_eq!(stats.active_conversations, 2);
        assert_eq!(stats.archived_conversations, 1);
        assert_eq!(
            stats.top_categories,
            vec![
                CategoryCount { name: "math".to_string(), count: 2 },
                CategoryCount { name: "science".to_string(), count: 1 },
            ]
        );
        assert_eq!(stats.recent_activity.last_30_days, 2);

        let top = &stats.recent_activity.most_active_participants;
        assert_eq!(top[0].user_id, "u1");
        assert_eq!(top[0].conversation_count, 2);
        assert_eq!(top.len(), 3);
    }
}
