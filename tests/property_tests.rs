//! Property-based tests for threadstore
//!
//! These tests verify invariants that must hold for all inputs:
//! - Search-text normalization keeps only the searchable alphabet
//! - Conversation searchable text tracks title, tags and categories
//! - Filter values never reach query text
//! - Reactions stay one per user
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// TEXT NORMALIZATION TESTS
// ============================================================================

mod normalization_tests {
    use super::*;
    use threadstore::model::text::is_searchable_char;
    use threadstore::model::{normalize_search_text, preview, PREVIEW_CHARS};

    proptest! {
        /// Invariant: normalization never panics
        #[test]
        fn never_panics(s in ".*") {
            let _ = normalize_search_text(&s);
        }

        /// Invariant: output only holds preserved characters and single spaces
        #[test]
        fn output_charset(s in "\\PC{0,200}") {
            let normalized = normalize_search_text(&s);
            prop_assert!(normalized.chars().all(is_searchable_char));
            prop_assert!(!normalized.contains("  "));
            prop_assert_eq!(normalized.trim(), normalized.as_str());
        }

        /// Invariant: normalizing twice changes nothing
        #[test]
        fn idempotent(s in "[a-zA-Z0-9 ,.!?_ぁ-んァ-ン一-龯-]{0,80}") {
            let once = normalize_search_text(&s);
            prop_assert_eq!(normalize_search_text(&once), once);
        }

        /// Invariant: previews are bounded
        #[test]
        fn preview_bounded(s in "\\PC{0,300}") {
            let p = preview(&s);
            prop_assert!(p.chars().count() <= PREVIEW_CHARS + 3);
            if s.chars().count() <= PREVIEW_CHARS {
                prop_assert_eq!(p, s);
            }
        }
    }
}

// ============================================================================
// SEARCHABLE TEXT FRESHNESS TESTS
// ============================================================================

mod searchable_text_tests {
    use super::*;
    use std::collections::HashSet;
    use threadstore::model::{normalize_search_text, CategorySource, Conversation, ParticipantRole};

    fn tokens(text: &str) -> HashSet<String> {
        normalize_search_text(text)
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    proptest! {
        /// Invariant: every title token, tag and category name is searchable
        #[test]
        fn tracks_every_mutation(
            title in "[A-Za-z]{1,10}( [A-Za-z]{1,10}){0,3}",
            tags in prop::collection::vec("[a-z]{1,8}", 0..5),
            categories in prop::collection::vec("[A-Z][a-z]{1,8}", 0..4),
            participant in "[A-Z][a-z]{1,8}",
        ) {
            let mut conv = Conversation::new("t", &title, "u1", "Alice", None);
            for tag in &tags {
                conv.add_tag(tag);
            }
            for (i, name) in categories.iter().enumerate() {
                conv.add_category(&format!("c{}", i), name, 0.5, CategorySource::Manual);
            }
            conv.add_participant("u2", &participant, ParticipantRole::User);

            let searchable: HashSet<String> =
                conv.searchable_text().split_whitespace().map(str::to_string).collect();
            let mut expected = tokens(&title);
            for text in tags.iter().chain(categories.iter()) {
                expected.extend(tokens(text));
            }
            prop_assert!(expected.is_subset(&searchable));
            prop_assert_eq!(normalize_search_text(conv.searchable_text()), conv.searchable_text());
        }
    }
}

// ============================================================================
// QUERY SAFETY TESTS
// ============================================================================

mod query_safety_tests {
    use super::*;
    use serde_json::json;
    use threadstore::search::{compile_conversation_query, compile_message_query, SearchQuery};
    use threadstore::storage::{
        create_database, ContainerProperties, DocumentContainer, FeedOptions, IndexingPolicy,
        SqliteContainer, Storage, ThroughputMode,
    };

    fn hostile() -> impl Strategy<Value = String> {
        "[a-z]{1,5}['\";\\x00-\\x1f]{1,3}[a-z]{1,5}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Invariant: hostile values only travel as bound parameters
        #[test]
        fn values_never_in_query_text(
            keyword in hostile(),
            tag in hostile(),
            user in hostile(),
            name in hostile(),
        ) {
            let query = SearchQuery {
                keyword: Some(keyword.clone()),
                tenant_id: Some(user.clone()),
                participant_ids: vec![user.clone()],
                participant_names: vec![name.clone()],
                category_names: vec![name.clone()],
                tags: vec![tag.clone()],
                ..Default::default()
            };

            for compiled in [
                compile_conversation_query(&query).unwrap(),
                compile_message_query(&query).unwrap(),
            ] {
                let text = compiled.spec.query_text();
                for value in [&keyword, &tag, &user, &name] {
                    prop_assert!(!text.contains(value.as_str()));
                }
            }
        }

        /// Invariant: hostile values execute as ordinary data
        #[test]
        fn hostile_values_execute(tag in "[a-z]{1,5}['\";\\x01-\\x1f]{1,3}[a-z]{1,5}") {
            let storage = Storage::open_in_memory().unwrap();
            create_database(&storage, "db", ThroughputMode::Serverless, None).unwrap();
            let container = SqliteContainer::create(
                &storage,
                "db",
                &ContainerProperties {
                    name: "conversations".to_string(),
                    partition_key_path: "tenantId".to_string(),
                    indexing_policy: IndexingPolicy::conversations(),
                },
            )
            .unwrap();
            container
                .create_item(&json!({"id": "conv_1", "tenantId": "t", "title": "x", "tags": [tag.clone()]}))
                .unwrap();

            let query = SearchQuery {
                tenant_id: Some("t".to_string()),
                tags: vec![tag],
                ..Default::default()
            };
            let compiled = compile_conversation_query(&query).unwrap();
            let page = container
                .query_items(&compiled.spec, &FeedOptions::single_partition("t"))
                .unwrap();
            prop_assert_eq!(page.items.len(), 1);
            prop_assert_eq!(container.count_documents().unwrap(), 1);
        }
    }
}

// ============================================================================
// REACTION TESTS
// ============================================================================

mod reaction_tests {
    use super::*;
    use threadstore::model::{Message, MessageMetadata, MessageSender, SenderRole};

    proptest! {
        /// Invariant: repeated reactions from one user leave one, the latest
        #[test]
        fn one_reaction_per_user(
            user in "[a-z]{1,8}",
            types in prop::collection::vec("[a-z]{1,8}", 1..6),
        ) {
            let mut msg = Message::new(
                "c",
                "t",
                MessageSender::new("u", "U", SenderRole::User),
                "hello",
                1,
                MessageMetadata::default(),
            );
            for reaction_type in &types {
                msg.add_reaction(&user, reaction_type, "Name");
            }

            let mine: Vec<_> = msg.reactions.iter().filter(|r| r.user_id == user).collect();
            prop_assert_eq!(mine.len(), 1);
            prop_assert_eq!(&mine[0].reaction_type, types.last().unwrap());
        }
    }
}
