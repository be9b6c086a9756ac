//! Search over conversations and messages
//!
//! Implements:
//! - Filtered, sorted, paginated conversation and message search
//! - Combined search with per-branch failure isolation
//! - Result caching keyed by (collection, query)
//! - Facets and title suggestions for filter UIs

mod compiler;
mod result_cache;

pub use compiler::{compile_conversation_query, compile_message_query, CompiledQuery};
pub use result_cache::{CacheConfig, CacheStatsResponse, CachedPage, SearchResultCache};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::config::SearchSettings;
use crate::error::{HistoryError, Result};
use crate::history::from_documents;
use crate::model::paths::{self, conversation as conv_paths};
use crate::model::{Conversation, Message, SenderRole};
use crate::storage::{
    run_blocking, DocumentContainer, FeedOptions, FeedPage, Projection, QueryBuilder, StoreClient,
};
use crate::types::{SortField, SortOrder};

/// Minimum partial-text length for title suggestions
pub const MIN_SUGGESTION_CHARS: usize = 2;

/// Rows scanned when collecting distinct title suggestions
const SUGGESTION_SCAN_LIMIT: usize = 100;

/// Inclusive time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Declarative search request shared by both compilers.
///
/// Fields that do not apply to a container are ignored by its compiler
/// (`sender_roles` and `conversation_id` for conversations; category,
/// archived and confidence filters for messages).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub keyword: Option<String>,
    pub tenant_id: Option<String>,
    pub conversation_id: Option<String>,
    pub participant_ids: Vec<String>,
    pub participant_names: Vec<String>,
    pub category_ids: Vec<String>,
    pub category_names: Vec<String>,
    pub tags: Vec<String>,
    pub date_range: Option<DateRange>,
    pub sender_roles: Vec<SenderRole>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub page_size: Option<usize>,
    pub continuation_token: Option<String>,
    pub include_archived: bool,
    pub high_confidence_only: bool,
}

impl SearchQuery {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Default::default()
        }
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }
}

/// What was sent to the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryInfo {
    pub query_text: String,
    pub parameter_names: Vec<String>,
    pub total_results: usize,
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult<T> {
    pub items: Vec<T>,
    pub continuation_token: Option<String>,
    pub has_more: bool,
    pub search_time_ms: f64,
    pub query_info: QueryInfo,
}

impl<T> Default for SearchResult<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            continuation_token: None,
            has_more: false,
            search_time_ms: 0.0,
            query_info: QueryInfo::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedSearchResult {
    pub conversations: SearchResult<Conversation>,
    pub messages: SearchResult<Message>,
    /// Slower of the two branches
    pub combined_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FacetValue {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFacets {
    pub categories: Vec<FacetValue>,
    pub participants: Vec<FacetValue>,
    pub tags: Vec<String>,
}

/// Search engine over the two containers of a [`StoreClient`]
pub struct SearchEngine {
    conversations: Arc<dyn DocumentContainer>,
    messages: Arc<dyn DocumentContainer>,
    settings: SearchSettings,
    cache: Option<SearchResultCache>,
}

impl SearchEngine {
    pub fn new(client: &StoreClient, settings: SearchSettings) -> Result<Self> {
        let cache = settings
            .enable_cache
            .then(|| SearchResultCache::new(CacheConfig::from(&settings)));

        Ok(Self {
            conversations: client.get_conversations_container()?,
            messages: client.get_messages_container()?,
            settings,
            cache,
        })
    }

    /// Effective page size: default when unset, clamped to `[1, max_page_size]`
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.settings.default_page_size)
            .clamp(1, self.settings.max_page_size.max(1))
    }

    pub async fn search_conversations(&self, query: &SearchQuery) -> Result<SearchResult<Conversation>> {
        let compiled = compile_conversation_query(query)?;
        self.execute(self.conversations.clone(), compiled, query)
            .await
            .map_err(|e| {
                error!("Conversation search failed: {}", e);
                HistoryError::search(self.conversations.name(), e)
            })
    }

    pub async fn search_messages(&self, query: &SearchQuery) -> Result<SearchResult<Message>> {
        let compiled = compile_message_query(query)?;
        self.execute(self.messages.clone(), compiled, query)
            .await
            .map_err(|e| {
                error!("Message search failed: {}", e);
                HistoryError::search(self.messages.name(), e)
            })
    }

    /// Both searches concurrently; a failing branch yields an empty result.
    ///
    /// Returns the first page of each branch. A continuation token on the
    /// query is ignored since each container keeps its own offset; page
    /// further with `search_conversations` or `search_messages`.
    pub async fn search_combined(&self, query: &SearchQuery) -> CombinedSearchResult {
        let first_page = SearchQuery {
            continuation_token: None,
            ..query.clone()
        };
        let (conversations, messages) = tokio::join!(
            self.search_conversations(&first_page),
            self.search_messages(&first_page)
        );

        let conversations = conversations.unwrap_or_else(|e| {
            warn!("Conversation branch of combined search degraded: {}", e);
            SearchResult::default()
        });
        let messages = messages.unwrap_or_else(|e| {
            warn!("Message branch of combined search degraded: {}", e);
            SearchResult::default()
        });

        CombinedSearchResult {
            combined_time_ms: conversations.search_time_ms.max(messages.search_time_ms),
            conversations,
            messages,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        container: Arc<dyn DocumentContainer>,
        compiled: CompiledQuery,
        query: &SearchQuery,
    ) -> Result<SearchResult<T>> {
        let started = Instant::now();
        let query_text = compiled.spec.query_text();
        let parameter_names = compiled.spec.param_names();
        debug!(container = %container.name(), query = %query_text, "Executing search");

        let cache_key = SearchResultCache::cache_key(container.name(), query);
        let cached = self.cache.as_ref().and_then(|cache| cache.get(&cache_key));

        let page = match cached {
            Some(page) => {
                debug!(container = %container.name(), "Search cache hit");
                page
            }
            None => {
                let options =
                    compiled.feed_options(self.page_size(query.page_size), query.continuation_token.clone());
                let spec = compiled.spec;
                let page: FeedPage =
                    run_blocking(move || container.query_items(&spec, &options)).await?;
                if let Some(cache) = &self.cache {
                    cache.put(cache_key, page.clone());
                }
                page
            }
        };

        let items: Vec<T> = from_documents(page.items)?;
        Ok(SearchResult {
            has_more: page.continuation.is_some(),
            continuation_token: page.continuation,
            search_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            query_info: QueryInfo {
                query_text,
                parameter_names,
                total_results: items.len(),
            },
            items,
        })
    }

    /// Distinct categories, participants and tags of a tenant; failures yield empty lists
    pub async fn get_search_facets(&self, tenant_id: &str) -> SearchFacets {
        let categories = self
            .facet_pairs(
                tenant_id,
                conv_paths::CATEGORIES,
                conv_paths::CATEGORY_ID,
                conv_paths::CATEGORY_NAME,
            )
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to get category facets: {}", e);
                Vec::new()
            });
        let participants = self
            .facet_pairs(
                tenant_id,
                conv_paths::PARTICIPANTS,
                conv_paths::USER_ID,
                conv_paths::DISPLAY_NAME,
            )
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to get participant facets: {}", e);
                Vec::new()
            });
        let tags = self.tag_facets(tenant_id).await.unwrap_or_else(|e| {
            warn!("Failed to get tag facets: {}", e);
            Vec::new()
        });

        SearchFacets {
            categories,
            participants,
            tags,
        }
    }

    async fn distinct_elements(
        &self,
        tenant_id: &str,
        array: &str,
        fields: &[&str],
    ) -> Result<Vec<serde_json::Value>> {
        let mut q = QueryBuilder::new();
        q.eq(paths::TENANT_ID, "tenant_id", tenant_id)?;
        let spec = q.build().with_projection(Projection::DistinctElements {
            array: array.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        let options = FeedOptions::single_partition(tenant_id);

        let container = self.conversations.clone();
        let page = run_blocking(move || container.query_items(&spec, &options)).await?;
        Ok(page.items)
    }

    async fn facet_pairs(
        &self,
        tenant_id: &str,
        array: &str,
        id_field: &str,
        name_field: &str,
    ) -> Result<Vec<FacetValue>> {
        let rows = self
            .distinct_elements(tenant_id, array, &[id_field, name_field])
            .await?;

        let mut values: Vec<FacetValue> = rows
            .iter()
            .filter_map(|row| {
                Some(FacetValue {
                    id: row.get(id_field)?.as_str()?.to_string(),
                    name: row.get(name_field)?.as_str()?.to_string(),
                })
            })
            .collect();
        values.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        values.dedup();
        Ok(values)
    }

    async fn tag_facets(&self, tenant_id: &str) -> Result<Vec<String>> {
        let rows = self
            .distinct_elements(tenant_id, conv_paths::TAGS, &[])
            .await?;

        let mut tags: Vec<String> = rows
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    /// Distinct titles containing `partial`, most recent activity first.
    ///
    /// Input shorter than two characters returns nothing without a store call.
    pub async fn get_search_suggestions(&self, tenant_id: &str, partial: &str, limit: usize) -> Vec<String> {
        let partial = partial.trim();
        if partial.chars().count() < MIN_SUGGESTION_CHARS || limit == 0 {
            return Vec::new();
        }

        self.title_suggestions(tenant_id, partial, limit)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to get search suggestions: {}", e);
                Vec::new()
            })
    }

    async fn title_suggestions(&self, tenant_id: &str, partial: &str, limit: usize) -> Result<Vec<String>> {
        let mut q = QueryBuilder::new();
        q.eq(paths::TENANT_ID, "tenant_id", tenant_id)?;
        q.contains_ci(conv_paths::TITLE, "partial", partial)?;
        q.false_or_undefined(conv_paths::ARCHIVED)?;
        q.order_by(conv_paths::LAST_MESSAGE_AT, SortOrder::Desc)?;
        let spec = q.build();
        let options = FeedOptions::single_partition(tenant_id)
            .with_max_item_count(SUGGESTION_SCAN_LIMIT.max(limit));

        let container = self.conversations.clone();
        let page = run_blocking(move || container.query_items(&spec, &options)).await?;

        let mut seen = HashSet::new();
        let titles = page
            .items
            .iter()
            .filter_map(|doc| doc.get(conv_paths::TITLE)?.as_str())
            .filter(|title| seen.insert(title.to_string()))
            .take(limit)
            .map(str::to_string)
            .collect();
        Ok(titles)
    }

    /// Drop every cached result
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStatsResponse> {
        self.cache.as_ref().map(|cache| cache.stats())
    }
}
