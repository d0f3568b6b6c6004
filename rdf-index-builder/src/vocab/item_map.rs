//! Worker-local id assignment.
//!
//! Each of the N batch workers owns one [`WorkerIdAssigner`] per batch. It
//! maps a term's normalized word to a worker-local id, minting
//! `range_base + len()` on first sight. Ranges are disjoint across workers
//! (`worker_index * capacity`), so workers mint without coordination.
//!
//! Word bytes live in one [`WordArena`]. The reverse map is keyed by
//! `xxh3_128(word)` and points at arena entries, so the whole worker state is
//! a handful of flat allocations released together when the batch's partial
//! vocabulary has been written.

use std::sync::Arc;

use rdf_index_core::special::{HAS_WORD_PREDICATE, LANGUAGE_PREDICATE};
use rdf_index_core::{Datatype, Id, SpecialIds, Term};
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{IndexBuildError, Result};

// ============================================================================
// WordArena
// ============================================================================

/// Append-only byte arena. Words are addressed by index.
#[derive(Debug, Default)]
pub struct WordArena {
    bytes: Vec<u8>,
    /// `(start, len)` into `bytes`, one per word.
    spans: Vec<(usize, u32)>,
}

impl WordArena {
    pub fn with_capacity(words: usize, bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            spans: Vec::with_capacity(words),
        }
    }

    /// Store `word`, returning its index.
    pub fn push(&mut self, word: &str) -> usize {
        let start = self.bytes.len();
        self.bytes.extend_from_slice(word.as_bytes());
        self.spans.push((start, word.len() as u32));
        self.spans.len() - 1
    }

    /// Word at `idx`.
    ///
    /// # Panics
    /// If `idx` is out of range.
    #[inline]
    pub fn get(&self, idx: usize) -> &str {
        let (start, len) = self.spans[idx];
        let bytes = &self.bytes[start..start + len as usize];
        // Only whole `&str`s are ever pushed.
        std::str::from_utf8(bytes).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Bytes held by the arena.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

// ============================================================================
// WorkerIdAssigner
// ============================================================================

/// Per-worker, per-batch deduplicating map from word to worker-local id.
pub struct WorkerIdAssigner {
    worker: usize,
    range_base: u64,
    capacity: u64,
    arena: WordArena,
    /// Indexed like the arena. OR of the external hints seen for the word.
    external: Vec<bool>,
    /// xxh3_128(word) -> arena index.
    reverse: FxHashMap<u128, u32>,
    specials: Arc<SpecialIds>,
    /// Worker-local id of special slot `i + 1`.
    special_local: Vec<Id>,
    has_word: Id,
    language_predicate: Id,
}

impl WorkerIdAssigner {
    /// Create the assigner of `worker`, whose range holds `capacity` ids.
    /// Registers every special IRI plus the has-word and language-tag
    /// predicates before returning.
    pub fn new(worker: usize, capacity: u64, specials: Arc<SpecialIds>) -> Result<Self> {
        let mut me = Self {
            worker,
            range_base: worker as u64 * capacity,
            capacity,
            arena: WordArena::default(),
            external: Vec::new(),
            reverse: FxHashMap::default(),
            special_local: Vec::with_capacity(specials.len()),
            specials: Arc::clone(&specials),
            has_word: Id::UNDEFINED,
            language_predicate: Id::UNDEFINED,
        };
        for (iri, _) in specials.iter() {
            let id = me.get_word_id(iri, false)?;
            me.special_local.push(id);
        }
        me.has_word = me.get_word_id(HAS_WORD_PREDICATE, false)?;
        me.language_predicate = me.get_word_id(LANGUAGE_PREDICATE, false)?;
        Ok(me)
    }

    /// Id for `term`.
    ///
    /// Words are looked up or minted. An `Undefined` [`Term::Id`] must be a
    /// placeholder of the special-IDs table and resolves to this worker's id
    /// for that IRI. Inline ids (`Int`) pass through unchanged. Vocabulary
    /// and blank-node ids are rejected: the global numbering does not exist
    /// yet, and a worker-local id would be mistaken for one of this worker's
    /// words.
    pub fn get_id(&mut self, term: &Term) -> Result<Id> {
        match term {
            Term::Id(id) if id.is_undefined() => self.resolve_special(*id),
            Term::Id(id) => match id.datatype() {
                Datatype::VocabIndex | Datatype::BlankNodeIndex => Err(IndexBuildError::Corrupt(
                    format!("pre-resolved {id:?} cannot pass through vocabulary assignment"),
                )),
                _ => Ok(*id),
            },
            other => match other.to_word() {
                Some(word) => self.get_word_id(&word, other.is_external()),
                None => Err(IndexBuildError::Corrupt(format!(
                    "term without vocabulary word: {other:?}"
                ))),
            },
        }
    }

    /// Id for an already-normalized word.
    pub fn get_word_id(&mut self, word: &str, is_external: bool) -> Result<Id> {
        let hash = xxh3_128(word.as_bytes());
        if let Some(&idx) = self.reverse.get(&hash) {
            if is_external {
                self.external[idx as usize] = true;
            }
            return Ok(self.local_id(idx as usize));
        }

        let next = self.arena.len() as u64;
        if next >= self.capacity {
            return Err(IndexBuildError::WorkerIdRangeExhausted {
                worker: self.worker,
                capacity: self.capacity,
            });
        }
        let idx = self.arena.push(word);
        self.external.push(is_external);
        self.reverse.insert(hash, idx as u32);
        Ok(self.local_id(idx))
    }

    fn resolve_special(&self, placeholder: Id) -> Result<Id> {
        if self.specials.iri_for(placeholder).is_none() {
            return Err(IndexBuildError::Corrupt(format!(
                "undefined id {placeholder:?} is not in the special-IDs table"
            )));
        }
        Ok(self.special_local[placeholder.payload() as usize - 1])
    }

    #[inline]
    fn local_id(&self, idx: usize) -> Id {
        Id::vocab(self.range_base + idx as u64)
    }

    /// Worker-local id of the has-word predicate.
    pub fn has_word_predicate(&self) -> Id {
        self.has_word
    }

    /// Worker-local id of the language-tag predicate.
    pub fn language_predicate(&self) -> Id {
        self.language_predicate
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Release the hash index and hand the words over for the partial
    /// vocabulary writer.
    pub fn into_words(self) -> WorkerWords {
        WorkerWords {
            range_base: self.range_base,
            arena: self.arena,
            external: self.external,
        }
    }
}

/// The words one worker minted in one batch, in minting order.
#[derive(Debug)]
pub struct WorkerWords {
    range_base: u64,
    arena: WordArena,
    external: Vec<bool>,
}

impl WorkerWords {
    /// `(word, worker-local id, is_external)` in minting order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Id, bool)> + '_ {
        (0..self.arena.len()).map(move |i| {
            (
                self.arena.get(i),
                Id::vocab(self.range_base + i as u64),
                self.external[i],
            )
        })
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdf_index_core::special::{DEFAULT_GRAPH_IRI, DEFAULT_GRAPH_PLACEHOLDER};

    fn assigner(worker: usize) -> WorkerIdAssigner {
        WorkerIdAssigner::new(worker, 1000, Arc::new(SpecialIds::default())).unwrap()
    }

    #[test]
    fn test_same_term_same_id() {
        let mut a = assigner(0);
        let x = a.get_id(&Term::iri("http://x/a")).unwrap();
        let y = a.get_id(&Term::iri("http://x/b")).unwrap();
        assert_ne!(x, y);
        assert_eq!(a.get_id(&Term::iri("http://x/a")).unwrap(), x);
        assert_eq!(a.get_word_id("<http://x/a>", false).unwrap(), x);
    }

    #[test]
    fn test_disjoint_worker_ranges() {
        let mut a = assigner(0);
        let mut b = assigner(1);
        let ia = a.get_id(&Term::literal("a")).unwrap();
        let ib = b.get_id(&Term::literal("a")).unwrap();
        assert_ne!(ia, ib);
        assert!(ia.vocab_index().unwrap() < 1000);
        assert!(ib.vocab_index().unwrap() >= 1000);
    }

    #[test]
    fn test_specials_preregistered() {
        let w = assigner(2).into_words();
        let registered: Vec<&str> = w.iter().map(|(s, _, _)| s).collect();
        assert!(registered.contains(&HAS_WORD_PREDICATE));
        assert!(registered.contains(&LANGUAGE_PREDICATE));
        assert!(registered.contains(&DEFAULT_GRAPH_IRI));
        // no duplicate registration of the predicates already in the table
        assert_eq!(registered.len(), SpecialIds::default().len());
    }

    #[test]
    fn test_placeholder_resolves_and_passthrough() {
        let mut a = assigner(0);
        let g = a.get_id(&Term::Id(DEFAULT_GRAPH_PLACEHOLDER)).unwrap();
        assert_eq!(a.get_word_id(DEFAULT_GRAPH_IRI, false).unwrap(), g);
        assert_eq!(a.get_id(&Term::Id(Id::int(5))).unwrap(), Id::int(5));
        assert!(a.get_id(&Term::Id(Id::UNDEFINED)).is_err());
        assert!(a.get_id(&Term::Id(Id::special_placeholder(42))).is_err());
    }

    #[test]
    fn test_resolved_vocabulary_ids_rejected() {
        let mut a = assigner(0);
        for id in [Id::vocab(0), Id::blank_node(3)] {
            let err = a.get_id(&Term::Id(id)).unwrap_err();
            assert!(matches!(err, IndexBuildError::Corrupt(_)), "{id:?}");
        }
        // nothing was minted for them
        assert_eq!(a.len(), SpecialIds::default().len());
    }

    #[test]
    fn test_external_flag_is_ored() {
        let mut a = assigner(0);
        a.get_id(&Term::iri("http://x/e")).unwrap();
        a.get_id(&Term::iri("http://x/e").externalized()).unwrap();
        a.get_id(&Term::iri("http://x/e")).unwrap();
        let w = a.into_words();
        let (_, _, ext) = w.iter().find(|(s, _, _)| *s == "<http://x/e>").unwrap();
        assert!(ext);
    }

    #[test]
    fn test_range_exhausted() {
        let specials = Arc::new(SpecialIds::default());
        let mut a = WorkerIdAssigner::new(1, 4, specials).unwrap();
        a.get_word_id("<a>", false).unwrap();
        let err = a.get_word_id("<b>", false).unwrap_err();
        assert!(matches!(
            err,
            IndexBuildError::WorkerIdRangeExhausted { worker: 1, capacity: 4 }
        ));
    }

    #[test]
    fn test_arena_spans() {
        let mut arena = WordArena::default();
        let a = arena.push("héllo");
        let b = arena.push("");
        let c = arena.push("x");
        assert_eq!(arena.get(a), "héllo");
        assert_eq!(arena.get(b), "");
        assert_eq!(arena.get(c), "x");
        assert_eq!(arena.byte_len(), "héllo".len() + 1);
    }
}
