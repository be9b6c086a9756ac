//! Compile a [`SearchQuery`] into a parameterized [`QuerySpec`]
//!
//! One compiler per container. Every filter value is bound; list-valued
//! filters become one OR-group with a parameter per value.

use super::SearchQuery;
use crate::error::{HistoryError, Result};
use crate::model::conversation::HIGH_CONFIDENCE_THRESHOLD;
use crate::model::paths::{self, conversation as conv, message as msg};
use crate::storage::{Comparison, FeedOptions, QueryBuilder, QuerySpec};
use crate::types::{format_timestamp, SortField};

/// A compiled query plus the partition it is pinned to, if any
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub spec: QuerySpec,
    pub partition_key: Option<String>,
}

impl CompiledQuery {
    pub fn feed_options(&self, page_size: usize, continuation: Option<String>) -> FeedOptions {
        let options = match &self.partition_key {
            Some(pk) => FeedOptions::single_partition(pk.clone()),
            None => FeedOptions::cross_partition(),
        };
        options
            .with_max_item_count(page_size)
            .with_continuation(continuation)
    }
}

fn conversation_sort_path(field: SortField) -> &'static str {
    match field {
        SortField::Timestamp => conv::LAST_MESSAGE_AT,
        SortField::CreatedAt => conv::CREATED_AT,
        SortField::UpdatedAt => conv::UPDATED_AT,
        SortField::MessageCount => conv::MESSAGE_COUNT,
        SortField::Title => conv::TITLE,
    }
}

fn check_date_range(query: &SearchQuery) -> Result<()> {
    if let Some(range) = &query.date_range {
        if range.start > range.end {
            return Err(HistoryError::InvalidInput(format!(
                "date range start {} is after end {}",
                format_timestamp(&range.start),
                format_timestamp(&range.end)
            )));
        }
    }
    Ok(())
}

fn date_range(q: &mut QueryBuilder, query: &SearchQuery, path: &str) -> Result<()> {
    if let Some(range) = &query.date_range {
        q.compare(path, Comparison::Gte, "start_date", format_timestamp(&range.start))?;
        q.compare(path, Comparison::Lte, "end_date", format_timestamp(&range.end))?;
    }
    Ok(())
}

fn keyword(query: &SearchQuery) -> Option<&str> {
    query
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// Conversations container; pinned to the tenant partition when a tenant is given
pub fn compile_conversation_query(query: &SearchQuery) -> Result<CompiledQuery> {
    check_date_range(query)?;
    let mut q = QueryBuilder::new();

    if let Some(tenant_id) = &query.tenant_id {
        q.eq(paths::TENANT_ID, "tenant_id", tenant_id.as_str())?;
    }

    if let Some(keyword) = keyword(query) {
        q.any_of(|g| {
            g.contains_ci(conv::TITLE, "keyword", keyword)?;
            g.contains_ci(conv::SUMMARY, "keyword", keyword)?;
            g.contains_ci(conv::SEARCHABLE_TEXT, "keyword", keyword)?;
            Ok(())
        })?;
    }

    q.any_of(|g| {
        for user_id in &query.participant_ids {
            g.array_contains_field(conv::PARTICIPANTS, conv::USER_ID, "user_id", user_id.as_str())?;
        }
        Ok(())
    })?;
    q.any_of(|g| {
        for name in &query.participant_names {
            g.array_contains_field(conv::PARTICIPANTS, conv::DISPLAY_NAME, "participant_name", name.as_str())?;
        }
        Ok(())
    })?;
    q.any_of(|g| {
        for category_id in &query.category_ids {
            g.array_contains_field(conv::CATEGORIES, conv::CATEGORY_ID, "category_id", category_id.as_str())?;
        }
        Ok(())
    })?;
    q.any_of(|g| {
        for name in &query.category_names {
            g.array_contains_field(conv::CATEGORIES, conv::CATEGORY_NAME, "category_name", name.as_str())?;
        }
        Ok(())
    })?;
    q.any_of(|g| {
        for tag in &query.tags {
            g.array_contains(conv::TAGS, "tag", tag.as_str())?;
        }
        Ok(())
    })?;

    date_range(&mut q, query, conv::LAST_MESSAGE_AT)?;

    if !query.include_archived {
        q.false_or_undefined(conv::ARCHIVED)?;
    }
    if query.high_confidence_only {
        q.array_any_field_gte(
            conv::CATEGORIES,
            conv::CONFIDENCE,
            "min_confidence",
            HIGH_CONFIDENCE_THRESHOLD,
        )?;
    }

    q.order_by(conversation_sort_path(query.sort_by), query.sort_order)?;
    q.order_by(paths::ID, query.sort_order)?;

    Ok(CompiledQuery {
        spec: q.build(),
        partition_key: query.tenant_id.clone(),
    })
}

/// Messages container; pinned to one partition when a conversation id is given
pub fn compile_message_query(query: &SearchQuery) -> Result<CompiledQuery> {
    check_date_range(query)?;
    let mut q = QueryBuilder::new();

    if let Some(tenant_id) = &query.tenant_id {
        q.eq(paths::TENANT_ID, "tenant_id", tenant_id.as_str())?;
    }
    if let Some(conversation_id) = &query.conversation_id {
        q.eq(paths::CONVERSATION_ID, "conversation_id", conversation_id.as_str())?;
    }

    if let Some(keyword) = keyword(query) {
        q.contains_ci(msg::SEARCHABLE_TEXT, "keyword", keyword)?;
    }

    q.any_of(|g| {
        for user_id in &query.participant_ids {
            g.eq(msg::SENDER_USER_ID, "user_id", user_id.as_str())?;
        }
        Ok(())
    })?;
    q.any_of(|g| {
        for name in &query.participant_names {
            g.contains_ci(msg::SENDER_DISPLAY_NAME, "sender_name", name)?;
        }
        Ok(())
    })?;
    q.any_of(|g| {
        for tag in &query.tags {
            g.array_contains(msg::TOPICS, "topic", tag.as_str())?;
        }
        Ok(())
    })?;
    q.any_of(|g| {
        for role in &query.sender_roles {
            g.eq(msg::SENDER_ROLE, "role", role.as_str())?;
        }
        Ok(())
    })?;

    date_range(&mut q, query, msg::TIMESTAMP)?;

    // Messages carry one time axis
    q.order_by(msg::TIMESTAMP, query.sort_order)?;
    q.order_by(paths::ID, query.sort_order)?;

    Ok(CompiledQuery {
        spec: q.build(),
        partition_key: query.conversation_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SenderRole;
    use crate::search::DateRange;
    use crate::types::SortOrder;
    use chrono::{Duration, Utc};

    #[test]
    fn test_empty_query_only_filters_archived() {
        let compiled = compile_conversation_query(&SearchQuery::default()).unwrap();
        assert!(compiled.partition_key.is_none());
        assert!(compiled.spec.params.is_empty());
        assert!(compiled.spec.filter.contains("archived"));
        assert_eq!(compiled.spec.order_by.len(), 2);
        assert_eq!(compiled.spec.order_by[0].path, conv::LAST_MESSAGE_AT);
        assert_eq!(compiled.spec.order_by[1].path, paths::ID);
        assert_eq!(compiled.spec.order_by[1].order, SortOrder::Desc);
    }

    #[test]
    fn test_list_filters_get_unique_params() {
        let query = SearchQuery {
            tenant_id: Some("t1".to_string()),
            participant_ids: vec!["u1".to_string(), "u2".to_string(), "u3".to_string()],
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let compiled = compile_conversation_query(&query).unwrap();
        assert_eq!(compiled.partition_key.as_deref(), Some("t1"));
        assert_eq!(
            compiled.spec.param_names(),
            vec![":tenant_id", ":user_id", ":user_id_1", ":user_id_2", ":tag", ":tag_1"]
        );
        assert_eq!(compiled.spec.filter.matches(" OR ").count(), 3);
    }

    #[test]
    fn test_keyword_is_bound_lowercase() {
        let query = SearchQuery {
            keyword: Some("  Robert'); DROP TABLE documents;-- ".to_string()),
            ..Default::default()
        };
        let compiled = compile_conversation_query(&query).unwrap();
        assert!(!compiled.spec.filter.contains("DROP"));
        assert!(!compiled.spec.filter.contains('\''));
        let (_, value) = &compiled.spec.params[0];
        assert_eq!(
            value,
            &crate::storage::QueryValue::Text("robert'); drop table documents;--".to_string())
        );
    }

    #[test]
    fn test_blank_keyword_adds_nothing() {
        let query = SearchQuery {
            keyword: Some("   ".to_string()),
            ..Default::default()
        };
        let compiled = compile_message_query(&query).unwrap();
        assert!(compiled.spec.params.is_empty());
        assert_eq!(compiled.spec.filter, "");
    }

    #[test]
    fn test_invalid_date_range_rejected() {
        let now = Utc::now();
        let query = SearchQuery {
            date_range: Some(DateRange {
                start: now,
                end: now - Duration::days(1),
            }),
            ..Default::default()
        };
        assert!(matches!(
            compile_conversation_query(&query),
            Err(HistoryError::InvalidInput(_))
        ));
        assert!(matches!(
            compile_message_query(&query),
            Err(HistoryError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_message_query_pins_conversation() {
        let query = SearchQuery {
            conversation_id: Some("abc".to_string()),
            sender_roles: vec![SenderRole::Assistant],
            sort_by: SortField::Title,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let compiled = compile_message_query(&query).unwrap();
        assert_eq!(compiled.partition_key.as_deref(), Some("abc"));
        assert_eq!(compiled.spec.param_names(), vec![":conversation_id", ":role"]);
        assert_eq!(compiled.spec.order_by[0].path, msg::TIMESTAMP);
        assert_eq!(compiled.spec.order_by[0].order, SortOrder::Asc);
        // Archived flag does not apply to messages
        assert!(!compiled.spec.filter.contains("archived"));
    }

    #[test]
    fn test_sort_mapping() {
        for (field, path) in [
            (SortField::Timestamp, conv::LAST_MESSAGE_AT),
            (SortField::CreatedAt, conv::CREATED_AT),
            (SortField::UpdatedAt, conv::UPDATED_AT),
            (SortField::MessageCount, conv::MESSAGE_COUNT),
            (SortField::Title, conv::TITLE),
        ] {
            let query = SearchQuery {
                sort_by: field,
                ..Default::default()
            };
            let compiled = compile_conversation_query(&query).unwrap();
            assert_eq!(compiled.spec.order_by[0].path, path);
        }
    }
}
