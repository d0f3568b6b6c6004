//! Batch orchestration: parsed triples to worker-local ID-triples.
//!
//! A batch is split into contiguous chunks, one per worker. Each worker owns
//! a fresh [`WorkerIdAssigner`] for the batch, so chunks are processed in
//! parallel without sharing any map. Besides the primary triple, a worker
//! derives:
//!
//! - for a language-tagged object: `(s, @lang@<p>, o, g)` and
//!   `(o, <…:langtag>, <…:@lang>, g)`
//! - with full-text indexing, for a literal object: one
//!   `(o, <…:has-word>, "word", g)` per distinct word, carrying the word's
//!   term frequency in the `payload` column

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use rdf_index_core::special::{
    language_tag_entity, language_tagged_predicate, DEFAULT_GRAPH_PLACEHOLDER,
};
use rdf_index_core::{Id, SpecialIds, Term};

use crate::error::Result;
use crate::triples::IdTriple;
use crate::vocab::item_map::{WorkerIdAssigner, WorkerWords};

/// A triple as delivered by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTriple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    /// `None` for the default graph.
    pub graph: Option<Term>,
}

impl ParsedTriple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph: None,
        }
    }

    pub fn in_graph(mut self, graph: Term) -> Self {
        self.graph = Some(graph);
        self
    }
}

/// Output of one batch: the workers' words and the batch's ID-triples, all
/// in worker-local ids.
#[derive(Debug)]
pub struct ProcessedBatch {
    pub index: usize,
    pub workers: Vec<WorkerWords>,
    pub triples: Vec<IdTriple>,
    /// Parsed triples that went in.
    pub num_parsed: usize,
}

/// Fans batches out to worker-local assigners.
#[derive(Clone)]
pub struct BatchOrchestrator {
    num_workers: usize,
    worker_capacity: u64,
    fulltext: bool,
    specials: Arc<SpecialIds>,
}

impl BatchOrchestrator {
    pub fn new(
        num_workers: usize,
        worker_capacity: u64,
        fulltext: bool,
        specials: Arc<SpecialIds>,
    ) -> Self {
        Self {
            num_workers: num_workers.max(1),
            worker_capacity,
            fulltext,
            specials,
        }
    }

    pub fn process_batch(&self, index: usize, triples: Vec<ParsedTriple>) -> Result<ProcessedBatch> {
        let num_parsed = triples.len();
        let chunk = num_parsed.div_ceil(self.num_workers).max(1);

        let per_worker: Vec<Result<(WorkerWords, Vec<IdTriple>)>> = (0..self.num_workers)
            .into_par_iter()
            .map(|worker| {
                let start = (worker * chunk).min(num_parsed);
                let end = (start + chunk).min(num_parsed);
                self.run_worker(worker, &triples[start..end])
            })
            .collect();

        let mut workers = Vec::with_capacity(self.num_workers);
        let mut out = Vec::with_capacity(num_parsed);
        for res in per_worker {
            let (words, worker_triples) = res?;
            workers.push(words);
            out.extend(worker_triples);
        }

        tracing::debug!(
            batch = index,
            parsed = num_parsed,
            id_triples = out.len(),
            "batch assigned"
        );
        Ok(ProcessedBatch {
            index,
            workers,
            triples: out,
            num_parsed,
        })
    }

    fn run_worker(
        &self,
        worker: usize,
        triples: &[ParsedTriple],
    ) -> Result<(WorkerWords, Vec<IdTriple>)> {
        let mut ids =
            WorkerIdAssigner::new(worker, self.worker_capacity, Arc::clone(&self.specials))?;
        let mut out = Vec::with_capacity(triples.len());
        for t in triples {
            self.derive(&mut ids, t, &mut out)?;
        }
        Ok((ids.into_words(), out))
    }

    fn derive(
        &self,
        ids: &mut WorkerIdAssigner,
        t: &ParsedTriple,
        out: &mut Vec<IdTriple>,
    ) -> Result<()> {
        let s = ids.get_id(&t.subject)?;
        let p = ids.get_id(&t.predicate)?;
        let o = ids.get_id(&t.object)?;
        let g = match &t.graph {
            Some(graph) => ids.get_id(graph)?,
            None => ids.get_id(&Term::Id(DEFAULT_GRAPH_PLACEHOLDER))?,
        };
        out.push(IdTriple::new(s, p, o, g));

        if let Some(lang) = t.object.language_tag() {
            // Only IRI predicates get a tagged twin.
            if let Some(predicate_word) = t.predicate.to_word() {
                let tagged = ids.get_word_id(&language_tagged_predicate(lang, &predicate_word), false)?;
                out.push(IdTriple::new(s, tagged, o, g));
            }
            let tag = ids.get_word_id(&language_tag_entity(lang), false)?;
            out.push(IdTriple::new(o, ids.language_predicate(), tag, g));
        }

        if self.fulltext {
            if let Some(lexical) = t.object.lexical() {
                let has_word = ids.has_word_predicate();
                for (word, tf) in tokenize(lexical) {
                    let w = ids.get_word_id(&format!("\"{word}\""), false)?;
                    out.push(IdTriple::with_payload(o, has_word, w, g, Id::int(tf)));
                }
            }
        }
        Ok(())
    }
}

/// Distinct lowercase alphanumeric words of `text` with their frequencies,
/// in word order.
pub fn tokenize(text: &str) -> BTreeMap<String, u64> {
    let mut words = BTreeMap::new();
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        *words.entry(token.to_lowercase()).or_insert(0) += 1;
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexBuildError;
    use rdf_index_core::special::{HAS_WORD_PREDICATE, LANGUAGE_PREDICATE};

    fn orchestrator(workers: usize, fulltext: bool) -> BatchOrchestrator {
        BatchOrchestrator::new(workers, 1_000, fulltext, Arc::new(SpecialIds::default()))
    }

    fn words_of(batch: &ProcessedBatch) -> BTreeMap<Id, String> {
        batch
            .workers
            .iter()
            .flat_map(|w| w.iter().map(|(s, id, _)| (id, s.to_string())))
            .collect()
    }

    #[test]
    fn test_tokenize() {
        let t = tokenize("The cat, the HAT; the-end");
        assert_eq!(t.get("the"), Some(&3));
        assert_eq!(t.get("cat"), Some(&1));
        assert_eq!(t.get("hat"), Some(&1));
        assert_eq!(t.get("end"), Some(&1));
        assert_eq!(t.len(), 4);
        assert!(tokenize("  ,, ").is_empty());
    }

    #[test]
    fn test_primary_triple_and_default_graph() {
        let o = orchestrator(1, false);
        let batch = o
            .process_batch(
                0,
                vec![ParsedTriple::new(
                    Term::iri("http://x/s"),
                    Term::iri("http://x/p"),
                    Term::literal("v"),
                )],
            )
            .unwrap();
        assert_eq!(batch.triples.len(), 1);
        let words = words_of(&batch);
        let t = batch.triples[0];
        assert_eq!(words[&t.s], "<http://x/s>");
        assert_eq!(words[&t.o], "\"v\"");
        assert_eq!(words[&t.g], rdf_index_core::special::DEFAULT_GRAPH_IRI);
        assert_eq!(t.payload, Id::UNDEFINED);
    }

    #[test]
    fn test_resolved_vocabulary_object_rejected() {
        let o = orchestrator(1, false);
        let err = o
            .process_batch(
                0,
                vec![ParsedTriple::new(
                    Term::iri("http://x/s"),
                    Term::iri("http://x/p"),
                    Term::Id(Id::vocab(0)),
                )],
            )
            .unwrap_err();
        assert!(matches!(err, IndexBuildError::Corrupt(_)));

        let ok = o
            .process_batch(
                1,
                vec![ParsedTriple::new(
                    Term::iri("http://x/s"),
                    Term::iri("http://x/p"),
                    Term::Id(Id::int(42)),
                )],
            )
            .unwrap();
        assert_eq!(ok.triples[0].o, Id::int(42));
    }

    #[test]
    fn test_language_tag_triples() {
        let o = orchestrator(1, false);
        let batch = o
            .process_batch(
                0,
                vec![ParsedTriple::new(
                    Term::iri("http://x/s"),
                    Term::iri("http://x/label"),
                    Term::lang_literal("chat", "fr"),
                )
                .in_graph(Term::iri("http://x/g"))],
            )
            .unwrap();
        assert_eq!(batch.triples.len(), 3);
        let words = words_of(&batch);
        let [primary, tagged, tag] = [batch.triples[0], batch.triples[1], batch.triples[2]];
        assert_eq!(words[&tagged.p], "@fr@<http://x/label>");
        assert_eq!((tagged.s, tagged.o, tagged.g), (primary.s, primary.o, primary.g));
        assert_eq!(tag.s, primary.o);
        assert_eq!(words[&tag.p], LANGUAGE_PREDICATE);
        assert_eq!(words[&tag.o], "<urn:rdf-index:internal:@fr>");
        assert_eq!(words[&tag.g], "<http://x/g>");
    }

    #[test]
    fn test_fulltext_payload() {
        let o = orchestrator(1, true);
        let batch = o
            .process_batch(
                0,
                vec![ParsedTriple::new(
                    Term::iri("http://x/s"),
                    Term::iri("http://x/p"),
                    Term::literal("to be or not to be"),
                )],
            )
            .unwrap();
        let words = words_of(&batch);
        let has_word: Vec<&IdTriple> = batch
            .triples
            .iter()
            .filter(|t| words.get(&t.p).map(String::as_str) == Some(HAS_WORD_PREDICATE))
            .collect();
        assert_eq!(has_word.len(), 4);
        let tf: BTreeMap<&str, u64> = has_word
            .iter()
            .map(|t| (words[&t.o].as_str(), t.payload.int_value().unwrap()))
            .collect();
        assert_eq!(tf["\"to\""], 2);
        assert_eq!(tf["\"not\""], 1);
        // the graph column is left alone
        assert!(has_word.iter().all(|t| t.g == batch.triples[0].g));
    }

    #[test]
    fn test_fulltext_skips_non_literals() {
        let o = orchestrator(1, true);
        let batch = o
            .process_batch(
                0,
                vec![ParsedTriple::new(
                    Term::iri("http://x/s"),
                    Term::iri("http://x/p"),
                    Term::iri("http://x/o"),
                )],
            )
            .unwrap();
        assert_eq!(batch.triples.len(), 1);
    }

    #[test]
    fn test_split_across_workers_keeps_order() {
        let o = orchestrator(3, false);
        let input: Vec<ParsedTriple> = (0..10)
            .map(|i| {
                ParsedTriple::new(
                    Term::iri(format!("http://x/s{i}")),
                    Term::iri("http://x/p"),
                    Term::literal("a"),
                )
            })
            .collect();
        let batch = o.process_batch(4, input).unwrap();
        assert_eq!(batch.index, 4);
        assert_eq!(batch.workers.len(), 3);
        let words = words_of(&batch);
        let subjects: Vec<&str> = batch.triples.iter().map(|t| words[&t.s].as_str()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("<http://x/s{i}>")).collect();
        assert_eq!(subjects, expected);
        // "a" is minted by every worker under its own id
        let a_ids: std::collections::BTreeSet<Id> = batch.triples.iter().map(|t| t.o).collect();
        assert_eq!(a_ids.len(), 3);
    }

    #[test]
    fn test_more_workers_than_triples() {
        let o = orchestrator(8, false);
        let batch = o
            .process_batch(
                0,
                vec![ParsedTriple::new(
                    Term::iri("a"),
                    Term::iri("b"),
                    Term::iri("c"),
                )],
            )
            .unwrap();
        assert_eq!(batch.workers.len(), 8);
        assert_eq!(batch.triples.len(), 1);
    }
}
