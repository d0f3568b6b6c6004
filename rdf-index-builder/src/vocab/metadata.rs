//! Facts about the merged vocabulary gathered while the merge emits words.

use std::collections::BTreeMap;

use rdf_index_core::special::{
    HAS_WORD_PREDICATE, INTERNAL_IRI_PREFIX, LANGUAGE_PREDICATE, LANGUAGE_TAGGED_PREDICATE_PREFIX,
};
use rdf_index_core::{Id, SpecialIds};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Contiguous range of Global IDs whose words share a prefix.
///
/// Words arrive in sorted order, so all words with one prefix are adjacent
/// and the range only ever grows at its end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRangeForPrefix {
    prefix: String,
    /// Inclusive `(first, last)`; `None` until the first matching word.
    range: Option<(Id, Id)>,
}

impl IdRangeForPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            range: None,
        }
    }

    /// Record `word` with `id` if it has the prefix. Returns whether it did.
    pub fn add_if_word_matches(&mut self, word: &str, id: Id) -> bool {
        if !word.starts_with(&self.prefix) {
            return false;
        }
        self.range = match self.range {
            None => Some((id, id)),
            Some((first, _)) => Some((first, id)),
        };
        true
    }

    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        self.range
            .is_some_and(|(first, last)| first <= id && id <= last)
    }

    pub fn range(&self) -> Option<(Id, Id)> {
        self.range
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Summary of a finished global merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyMetaData {
    /// Distinct non-blank-node words (= next word Global ID).
    pub num_words_total: u64,
    /// Distinct blank nodes (= next blank-node index).
    pub num_blank_nodes_total: u64,
    pub internal_entities: IdRangeForPrefix,
    pub lang_tagged_predicates: IdRangeForPrefix,
    /// Global id of every special IRI that occurred in the input.
    pub special_id_mapping: BTreeMap<String, Id>,
    /// The special-IDs table plus the derived-triple predicates.
    #[serde(skip)]
    special_iris: FxHashSet<String>,
}

impl VocabularyMetaData {
    pub fn new(specials: &SpecialIds) -> Self {
        Self {
            num_words_total: 0,
            num_blank_nodes_total: 0,
            internal_entities: IdRangeForPrefix::new(INTERNAL_IRI_PREFIX),
            lang_tagged_predicates: IdRangeForPrefix::new(LANGUAGE_TAGGED_PREDICATE_PREFIX),
            special_id_mapping: BTreeMap::new(),
            special_iris: specials
                .iter()
                .map(|(iri, _)| iri)
                .chain([HAS_WORD_PREDICATE, LANGUAGE_PREDICATE])
                .map(str::to_string)
                .collect(),
        }
    }

    /// Assign the next word Global ID to `word` and update the trackers.
    pub(crate) fn add_word(&mut self, word: &str) -> Id {
        let id = Id::vocab(self.num_words_total);
        self.num_words_total += 1;
        self.internal_entities.add_if_word_matches(word, id);
        self.lang_tagged_predicates.add_if_word_matches(word, id);
        if self.special_iris.contains(word) {
            self.special_id_mapping.insert(word.to_string(), id);
        }
        id
    }

    /// Assign the next blank-node index.
    pub(crate) fn next_blank_node(&mut self) -> Id {
        let id = Id::blank_node(self.num_blank_nodes_total);
        self.num_blank_nodes_total += 1;
        id
    }

    /// True if `id` belongs to a word this builder derived itself.
    #[inline]
    pub fn is_internal_id(&self, id: Id) -> bool {
        self.internal_entities.contains(id) || self.lang_tagged_predicates.contains(id)
    }

    /// Global id of a special IRI, once merged.
    pub fn special_id(&self, iri: &str) -> Option<Id> {
        self.special_id_mapping.get(iri).copied()
    }
}
