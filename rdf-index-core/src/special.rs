//! Internal IRIs and the special-IDs table.
//!
//! The builder derives triples that use predicates and entities of its own
//! (has-word, language tag, default graph). All of them live under
//! [`INTERNAL_IRI_PREFIX`] so that, after the global merge, they occupy one
//! contiguous Global ID range. Language-tagged predicates (`@en@<p>`) share
//! the [`LANGUAGE_TAGGED_PREDICATE_PREFIX`] and form a second range.

use crate::id::Id;

pub const INTERNAL_IRI_PREFIX: &str = "<urn:rdf-index:internal:";
pub const LANGUAGE_TAGGED_PREDICATE_PREFIX: &str = "@";

pub const DEFAULT_GRAPH_IRI: &str = "<urn:rdf-index:internal:default-graph>";
pub const HAS_WORD_PREDICATE: &str = "<urn:rdf-index:internal:has-word>";
pub const LANGUAGE_PREDICATE: &str = "<urn:rdf-index:internal:langtag>";

/// Placeholder for the default graph in [`SpecialIds::default`].
pub const DEFAULT_GRAPH_PLACEHOLDER: Id = Id::special_placeholder(1);
/// Placeholder for the has-word predicate in [`SpecialIds::default`].
pub const HAS_WORD_PLACEHOLDER: Id = Id::special_placeholder(2);
/// Placeholder for the language-tag predicate in [`SpecialIds::default`].
pub const LANGUAGE_PREDICATE_PLACEHOLDER: Id = Id::special_placeholder(3);

/// `<urn:rdf-index:internal:@en>` for `lang = "en"`.
pub fn language_tag_entity(lang: &str) -> String {
    format!("{INTERNAL_IRI_PREFIX}@{lang}>")
}

/// `@en@<http://x/p>` for `lang = "en"` and predicate word `<http://x/p>`.
pub fn language_tagged_predicate(lang: &str, predicate_word: &str) -> String {
    format!("{LANGUAGE_TAGGED_PREDICATE_PREFIX}{lang}@{predicate_word}")
}

#[inline]
pub fn is_internal_word(word: &str) -> bool {
    word.starts_with(INTERNAL_IRI_PREFIX)
}

// ============================================================================
// SpecialIds
// ============================================================================

/// Process-wide table of special IRIs and the `Undefined`-tagged placeholder
/// ids that stand for them in the input.
///
/// Every worker-local assigner registers all IRIs of this table at
/// construction. A `Term::Id` carrying one of the placeholders is then
/// resolved to the worker's id for that IRI.
#[derive(Clone, Debug)]
pub struct SpecialIds {
    /// Slot `i` holds the IRI of placeholder `i + 1`.
    iris: Vec<String>,
}

impl SpecialIds {
    pub fn empty() -> Self {
        Self { iris: Vec::new() }
    }

    /// Register an IRI (normalized word form, with angle brackets) and return
    /// its placeholder. Registering the same IRI twice returns the first
    /// placeholder.
    pub fn register(&mut self, iri: impl Into<String>) -> Id {
        let iri = iri.into();
        if let Some(id) = self.placeholder_for(&iri) {
            return id;
        }
        self.iris.push(iri);
        Id::special_placeholder(self.iris.len() as u64)
    }

    pub fn placeholder_for(&self, iri: &str) -> Option<Id> {
        self.iris
            .iter()
            .position(|s| s == iri)
            .map(|i| Id::special_placeholder(i as u64 + 1))
    }

    /// IRI for a placeholder id. `None` for ids that are not placeholders of
    /// this table.
    pub fn iri_for(&self, id: Id) -> Option<&str> {
        if !id.is_undefined() || id.payload() == 0 {
            return None;
        }
        self.iris.get(id.payload() as usize - 1).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Id)> {
        self.iris
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), Id::special_placeholder(i as u64 + 1)))
    }

    pub fn len(&self) -> usize {
        self.iris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iris.is_empty()
    }
}

impl Default for SpecialIds {
    fn default() -> Self {
        let mut t = Self::empty();
        t.register(DEFAULT_GRAPH_IRI);
        t.register(HAS_WORD_PREDICATE);
        t.register(LANGUAGE_PREDICATE);
        t
    }
}
