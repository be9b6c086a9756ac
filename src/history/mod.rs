//! History manager: the only writer of conversations and messages
//!
//! Owns the invariants spanning both containers:
//! - message sequence numbers are allocated per conversation, starting at 1
//! - conversation metrics, timeline and participants follow every new message
//! - every document is written with the partition key of its container
//!
//! Appends to one conversation are serialized by an in-process lock keyed by
//! conversation id. This holds for a single instance only; several instances
//! writing the same conversation can still allocate the same sequence number.

mod stats;

pub use stats::{
    CategoryCount, ConversationStats, ParticipantActivity, RecentActivity, TenantStats,
    STATS_FETCH_LIMIT,
};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ChatHistoryConfig;
use crate::error::{HistoryError, Result};
use crate::model::paths::{self, conversation as conv_paths, message as msg_paths};
use crate::model::{Conversation, Message, MessageMetadata, MessageSender, SenderRole};
use crate::storage::{
    run_blocking, DocumentContainer, FeedOptions, Projection, QueryBuilder, QuerySpec, StoreClient,
};
use crate::types::{now, SortOrder};

/// One page of documents plus the token for the next one
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation_token: Option<String>,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.continuation_token.is_some()
    }
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

pub(crate) fn from_document<T: DeserializeOwned>(document: Value) -> Result<T> {
    Ok(serde_json::from_value(document)?)
}

pub(crate) fn from_documents<T: DeserializeOwned>(documents: Vec<Value>) -> Result<Vec<T>> {
    documents.into_iter().map(from_document).collect()
}

/// Conversation and message CRUD for one tenant
pub struct HistoryManager {
    tenant_id: String,
    config: ChatHistoryConfig,
    conversations: Arc<dyn DocumentContainer>,
    messages: Arc<dyn DocumentContainer>,
    append_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl HistoryManager {
    /// Bind to a ready store client; fails if the client is not initialized
    pub fn new(client: &StoreClient, config: ChatHistoryConfig) -> Result<Self> {
        if !client.is_ready() {
            return Err(HistoryError::Storage(
                "store client is not ready".to_string(),
            ));
        }

        info!(tenant_id = %config.tenant_id, "History manager initialized");

        Ok(Self {
            tenant_id: config.tenant_id.clone(),
            conversations: client.get_conversations_container()?,
            messages: client.get_messages_container()?,
            config,
            append_locks: DashMap::new(),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// Create a conversation with the creator as sole participant
    pub async fn create_conversation(
        &self,
        title: &str,
        creator_user_id: &str,
        creator_display_name: &str,
        initial_category: Option<&str>,
    ) -> Result<Conversation> {
        let mut conversation = Conversation::new(
            &self.tenant_id,
            title,
            creator_user_id,
            creator_display_name,
            initial_category,
        );
        conversation.ttl = Some(self.config.conversation_ttl());

        let document = to_document(&conversation)?;
        let container = self.conversations.clone();
        let created = run_blocking(move || container.create_item(&document))
            .await
            .map_err(|e| {
                error!("Failed to create conversation: {}", e);
                e
            })?;

        info!(conversation_id = %conversation.conversation_id, "Conversation created");
        from_document(created)
    }

    /// Fetch a conversation by its short id; `None` if absent
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let id = Conversation::document_id(conversation_id);
        let tenant = self.tenant_id.clone();
        let container = self.conversations.clone();

        let document = run_blocking(move || container.read_item(&id, &tenant))
            .await
            .map_err(|e| {
                error!("Failed to get conversation {}: {}", conversation_id, e);
                e
            })?;

        match document {
            Some(document) => Ok(Some(from_document(document)?)),
            None => {
                warn!("Conversation not found: {}", conversation_id);
                Ok(None)
            }
        }
    }

    fn conversation_list_query(&self, user_id: Option<&str>, include_archived: bool) -> Result<QuerySpec> {
        let mut q = QueryBuilder::new();
        q.eq(paths::TENANT_ID, "tenant_id", self.tenant_id.as_str())?;
        if let Some(user_id) = user_id {
            q.array_contains_field(conv_paths::PARTICIPANTS, conv_paths::USER_ID, "user_id", user_id)?;
        }
        if !include_archived {
            q.false_or_undefined(conv_paths::ARCHIVED)?;
        }
        q.order_by(conv_paths::LAST_MESSAGE_AT, SortOrder::Desc)?;
        q.order_by(paths::ID, SortOrder::Desc)?;
        Ok(q.build())
    }

    /// List conversations, most recent activity first.
    ///
    /// `offset` discards leading rows of an `offset + limit` fetch; prefer
    /// [`HistoryManager::list_conversations_page`] for deep paging.
    pub async fn list_conversations(
        &self,
        user_id: Option<&str>,
        limit: usize,
        offset: usize,
        include_archived: bool,
    ) -> Result<Vec<Conversation>> {
        let query = self.conversation_list_query(user_id, include_archived)?;
        let options = FeedOptions::single_partition(self.tenant_id.clone())
            .with_max_item_count(offset.saturating_add(limit));

        let container = self.conversations.clone();
        let page = run_blocking(move || container.query_items(&query, &options))
            .await
            .map_err(|e| {
                error!("Failed to list conversations: {}", e);
                e
            })?;

        from_documents(page.items.into_iter().skip(offset).collect())
    }

    /// List conversations one page at a time
    pub async fn list_conversations_page(
        &self,
        user_id: Option<&str>,
        include_archived: bool,
        page_size: usize,
        continuation_token: Option<String>,
    ) -> Result<Page<Conversation>> {
        let query = self.conversation_list_query(user_id, include_archived)?;
        let options = FeedOptions::single_partition(self.tenant_id.clone())
            .with_max_item_count(page_size.max(1))
            .with_continuation(continuation_token);

        let container = self.conversations.clone();
        let page = run_blocking(move || container.query_items(&query, &options)).await?;

        Ok(Page {
            items: from_documents(page.items)?,
            continuation_token: page.continuation,
        })
    }

    /// Replace the whole conversation document (last write wins)
    pub async fn update_conversation(&self, mut conversation: Conversation) -> Result<Conversation> {
        conversation.update_searchable_text();
        if conversation.tenant_id != self.tenant_id {
            return Err(HistoryError::InvalidInput(format!(
                "conversation {} belongs to tenant '{}'",
                conversation.conversation_id, conversation.tenant_id
            )));
        }

        let document = to_document(&conversation)?;
        let id = conversation.id.clone();
        let container = self.conversations.clone();
        let updated = run_blocking(move || container.replace_item(&id, &document))
            .await
            .map_err(|e| {
                error!("Failed to update conversation {}: {}", conversation.conversation_id, e);
                e
            })?;

        info!(conversation_id = %conversation.conversation_id, "Conversation updated");
        from_document(updated)
    }

    /// Soft-delete: status `deleted`, archived; false if not found
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let lock = self.append_lock(conversation_id);
        let result = {
            let _guard = lock.lock().await;
            self.soft_delete_conversation(conversation_id).await
        };
        self.release_append_lock(conversation_id, lock);

        if !result? {
            return Ok(false);
        }
        info!(conversation_id = %conversation_id, "Conversation deleted");
        Ok(true)
    }

    async fn soft_delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let Some(mut conversation) = self.get_conversation(conversation_id).await? else {
            return Ok(false);
        };
        conversation.soft_delete();
        self.update_conversation(conversation).await?;
        Ok(true)
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Append a message to an existing conversation.
    ///
    /// Fails with `ConversationNotFound` before anything is written if the
    /// conversation does not exist. Once the message is stored the call
    /// succeeds even if updating the conversation afterwards fails.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        sender_user_id: &str,
        sender_display_name: &str,
        content: &str,
        sender_role: SenderRole,
        metadata: Option<MessageMetadata>,
    ) -> Result<Message> {
        let lock = self.append_lock(conversation_id);
        let result = {
            let _guard = lock.lock().await;
            self.append_message(
                conversation_id,
                MessageSender::new(sender_user_id, sender_display_name, sender_role),
                content,
                metadata.unwrap_or_default(),
            )
            .await
        };

        self.release_append_lock(conversation_id, lock);

        result.map_err(|e| {
            error!("Failed to add message to {}: {}", conversation_id, e);
            e
        })
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender: MessageSender,
        content: &str,
        metadata: MessageMetadata,
    ) -> Result<Message> {
        let conversation = self
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| HistoryError::ConversationNotFound(conversation_id.to_string()))?;

        let sequence_number = self.next_sequence_number(conversation_id).await?;

        let mut message = Message::new(
            conversation_id,
            &self.tenant_id,
            sender,
            content,
            sequence_number,
            metadata,
        );
        message.ttl = Some(self.config.message_ttl());

        let document = to_document(&message)?;
        let container = self.messages.clone();
        let created: Message =
            from_document(run_blocking(move || container.create_item(&document)).await?)?;

        if let Err(e) = self.apply_to_conversation(conversation, &created).await {
            warn!(
                "Failed to update conversation {} from message {}: {}",
                conversation_id, created.id, e
            );
        }

        info!(
            conversation_id = %conversation_id,
            message_id = %created.id,
            sequence_number,
            "Message added"
        );
        Ok(created)
    }

    async fn next_sequence_number(&self, conversation_id: &str) -> Result<u64> {
        let mut q = QueryBuilder::new();
        q.eq(paths::CONVERSATION_ID, "conversation_id", conversation_id)?;
        let query = q
            .build()
            .with_projection(Projection::Max(msg_paths::SEQUENCE_NUMBER.to_string()));

        let partition = conversation_id.to_string();
        let container = self.messages.clone();
        let max = run_blocking(move || container.query_scalar(&query, Some(&partition))).await?;

        Ok(max.and_then(|v| v.as_u64()).unwrap_or(0) + 1)
    }

    async fn apply_to_conversation(&self, mut conversation: Conversation, message: &Message) -> Result<()> {
        conversation.apply_message(message);
        self.update_conversation(conversation).await?;
        Ok(())
    }

    fn message_list_query(&self, conversation_id: &str, ascending: bool) -> Result<QuerySpec> {
        let order = if ascending { SortOrder::Asc } else { SortOrder::Desc };
        let mut q = QueryBuilder::new();
        q.eq(paths::CONVERSATION_ID, "conversation_id", conversation_id)?;
        q.order_by(msg_paths::SEQUENCE_NUMBER, order)?;
        Ok(q.build())
    }

    /// Messages of one conversation ordered by sequence number
    pub async fn get_conversation_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
        ascending: bool,
    ) -> Result<Vec<Message>> {
        let query = self.message_list_query(conversation_id, ascending)?;
        let options = FeedOptions::single_partition(conversation_id)
            .with_max_item_count(offset.saturating_add(limit));

        let container = self.messages.clone();
        let page = run_blocking(move || container.query_items(&query, &options))
            .await
            .map_err(|e| {
                error!("Failed to get messages for conversation {}: {}", conversation_id, e);
                e
            })?;

        from_documents(page.items.into_iter().skip(offset).collect())
    }

    /// Messages of one conversation, one page at a time
    pub async fn get_conversation_messages_page(
        &self,
        conversation_id: &str,
        ascending: bool,
        page_size: usize,
        continuation_token: Option<String>,
    ) -> Result<Page<Message>> {
        let query = self.message_list_query(conversation_id, ascending)?;
        let options = FeedOptions::single_partition(conversation_id)
            .with_max_item_count(page_size.max(1))
            .with_continuation(continuation_token);

        let container = self.messages.clone();
        let page = run_blocking(move || container.query_items(&query, &options)).await?;

        Ok(Page {
            items: from_documents(page.items)?,
            continuation_token: page.continuation,
        })
    }

    pub async fn get_message(&self, message_id: &str, conversation_id: &str) -> Result<Option<Message>> {
        let id = message_id.to_string();
        let partition = conversation_id.to_string();
        let container = self.messages.clone();

        match run_blocking(move || container.read_item(&id, &partition)).await? {
            Some(document) => Ok(Some(from_document(document)?)),
            None => {
                warn!("Message not found: {}", message_id);
                Ok(None)
            }
        }
    }

    /// Replace a message document, refreshing its searchable text first.
    ///
    /// The stored sequence number, conversation and tenant are fixed; an
    /// edit that changes any of them is rejected.
    pub async fn update_message(&self, mut message: Message) -> Result<Message> {
        let Some(stored) = self
            .get_message(&message.id, &message.conversation_id)
            .await?
        else {
            return Err(HistoryError::NotFound(format!("message {}", message.id)));
        };
        if stored.sequence_number != message.sequence_number {
            return Err(HistoryError::InvalidInput(format!(
                "sequence number of message {} is {} and cannot change",
                message.id, stored.sequence_number
            )));
        }
        if stored.tenant_id != message.tenant_id {
            return Err(HistoryError::InvalidInput(format!(
                "message {} belongs to tenant {}",
                message.id, stored.tenant_id
            )));
        }

        message.update_search_text();

        let document = to_document(&message)?;
        let id = message.id.clone();
        let container = self.messages.clone();
        let updated = run_blocking(move || container.replace_item(&id, &document))
            .await
            .map_err(|e| {
                error!("Failed to update message {}: {}", message.id, e);
                e
            })?;

        info!(message_id = %message.id, "Message updated");
        from_document(updated)
    }

    /// Hard delete; false if the message did not exist
    pub async fn delete_message(&self, message_id: &str, conversation_id: &str) -> Result<bool> {
        let id = message_id.to_string();
        let partition = conversation_id.to_string();
        let container = self.messages.clone();

        let deleted = run_blocking(move || container.delete_item(&id, &partition)).await?;
        if deleted {
            info!(message_id = %message_id, "Message deleted");
        } else {
            warn!("Message not found for deletion: {}", message_id);
        }
        Ok(deleted)
    }

    // ========================================================================
    // Reconciliation and statistics
    // ========================================================================

    /// Recompute a conversation's metrics from its message partition.
    ///
    /// Repairs counts lost to concurrent writers or failed propagation.
    pub async fn reconcile_conversation_metrics(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let lock = self.append_lock(conversation_id);
        let result = {
            let _guard = lock.lock().await;
            self.recompute_conversation(conversation_id).await
        };
        self.release_append_lock(conversation_id, lock);

        let Some((before, updated)) = result? else {
            return Ok(None);
        };
        if before != updated.metrics.message_count {
            info!(
                conversation_id = %conversation_id,
                before,
                after = updated.metrics.message_count,
                "Reconciled message count"
            );
        } else {
            debug!(conversation_id = %conversation_id, "Metrics already consistent");
        }
        Ok(Some(updated))
    }

    async fn recompute_conversation(&self, conversation_id: &str) -> Result<Option<(u64, Conversation)>> {
        let Some(mut conversation) = self.get_conversation(conversation_id).await? else {
            return Ok(None);
        };
        let messages = self
            .get_conversation_messages(conversation_id, STATS_FETCH_LIMIT, 0, true)
            .await?;

        let before = conversation.metrics.message_count;
        conversation.recompute_metrics(&messages);
        Ok(Some((before, self.update_conversation(conversation).await?)))
    }

    fn append_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.append_locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no other task holds or waits on it
    fn release_append_lock(&self, conversation_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.append_locks
            .remove_if(conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub async fn get_conversation_stats(&self, conversation_id: &str) -> Result<Option<ConversationStats>> {
        let Some(conversation) = self.get_conversation(conversation_id).await? else {
            return Ok(None);
        };
        let messages = self
            .get_conversation_messages(conversation_id, STATS_FETCH_LIMIT, 0, true)
            .await?;

        Ok(Some(ConversationStats::compute(&conversation, &messages)))
    }

    pub async fn get_tenant_stats(&self) -> Result<TenantStats> {
        let conversations = self
            .list_conversations(None, STATS_FETCH_LIMIT, 0, true)
            .await?;
        Ok(TenantStats::compute(&self.tenant_id, &conversations, now()))
    }
}
