//! Document paths used by queries and indexes

pub const ID: &str = "id";
pub const TENANT_ID: &str = "tenantId";
pub const CONVERSATION_ID: &str = "conversationId";

pub mod conversation {
    pub const TITLE: &str = "title";
    pub const SUMMARY: &str = "summary";
    pub const SEARCHABLE_TEXT: &str = "searchableText";
    pub const PARTICIPANTS: &str = "participants";
    pub const CATEGORIES: &str = "categories";
    pub const TAGS: &str = "tags";
    pub const ARCHIVED: &str = "archived";
    pub const CREATED_AT: &str = "timeline.createdAt";
    pub const UPDATED_AT: &str = "timeline.updatedAt";
    pub const LAST_MESSAGE_AT: &str = "timeline.lastMessageAt";
    pub const MESSAGE_COUNT: &str = "metrics.messageCount";

    /// Fields of participant elements
    pub const USER_ID: &str = "userId";
    pub const DISPLAY_NAME: &str = "displayName";

    /// Fields of category elements
    pub const CATEGORY_ID: &str = "categoryId";
    pub const CATEGORY_NAME: &str = "categoryName";
    pub const CONFIDENCE: &str = "confidence";
}

pub mod message {
    pub const SEQUENCE_NUMBER: &str = "sequenceNumber";
    pub const TIMESTAMP: &str = "timestamp";
    pub const SEARCHABLE_TEXT: &str = "content.searchableText";
    pub const SENDER_USER_ID: &str = "sender.userId";
    pub const SENDER_DISPLAY_NAME: &str = "sender.displayName";
    pub const SENDER_ROLE: &str = "sender.role";
    pub const TOPICS: &str = "metadata.topics";
}
