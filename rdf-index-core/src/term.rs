//! Parsed RDF terms and their vocabulary representation.
//!
//! Every term that reaches the vocabulary is reduced to one normalized string
//! (its *word*). Dedup and ordering only ever look at that string:
//!
//! | Term             | Word                       |
//! |------------------|----------------------------|
//! | IRI              | `<http://x/y>`             |
//! | plain literal    | `"text"`                   |
//! | lang literal     | `"text"@en`                |
//! | typed literal    | `"5"^^<http://…#integer>`  |
//! | blank node       | `_:b0`                     |

use std::borrow::Cow;

use crate::id::Id;

/// Prefix of every blank-node word.
pub const BLANK_NODE_PREFIX: &str = "_:";

/// True if `word` is the normalized form of a blank node.
#[inline]
pub fn is_blank_node_word(word: &str) -> bool {
    word.starts_with(BLANK_NODE_PREFIX)
}

/// A term as produced by the parser, or an id injected by the system.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    Iri {
        /// IRI without angle brackets.
        iri: String,
        external: bool,
    },
    Literal {
        lexical: String,
        lang: Option<String>,
        /// Datatype IRI without angle brackets. Ignored when `lang` is set.
        datatype: Option<String>,
        external: bool,
    },
    BlankNode(String),
    /// Already resolved. Passed through by the assigners unless it carries
    /// the `Undefined` datatype (see `SpecialIds`).
    Id(Id),
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri {
            iri: iri.into(),
            external: false,
        }
    }

    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            lang: None,
            datatype: None,
            external: false,
        }
    }

    pub fn lang_literal(lexical: impl Into<String>, lang: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            lang: Some(lang.into()),
            datatype: None,
            external: false,
        }
    }

    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            lang: None,
            datatype: Some(datatype.into()),
            external: false,
        }
    }

    pub fn blank_node(label: impl Into<String>) -> Self {
        Term::BlankNode(label.into())
    }

    /// Mark an IRI or literal for the external vocabulary. No effect on
    /// blank nodes and ids.
    pub fn externalized(mut self) -> Self {
        match &mut self {
            Term::Iri { external, .. } | Term::Literal { external, .. } => *external = true,
            Term::BlankNode(_) | Term::Id(_) => {}
        }
        self
    }

    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Term::Iri { external: true, .. } | Term::Literal { external: true, .. }
        )
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// Language tag of a literal, if any.
    pub fn language_tag(&self) -> Option<&str> {
        match self {
            Term::Literal { lang, .. } => lang.as_deref(),
            _ => None,
        }
    }

    /// Lexical form of a literal.
    pub fn lexical(&self) -> Option<&str> {
        match self {
            Term::Literal { lexical, .. } => Some(lexical),
            _ => None,
        }
    }

    /// Normalized vocabulary word. `None` for [`Term::Id`].
    pub fn to_word(&self) -> Option<Cow<'_, str>> {
        match self {
            Term::Iri { iri, .. } => Some(Cow::Owned(format!("<{iri}>"))),
            Term::Literal {
                lexical,
                lang: Some(lang),
                ..
            } => Some(Cow::Owned(format!("\"{lexical}\"@{lang}"))),
            Term::Literal {
                lexical,
                datatype: Some(dt),
                ..
            } => Some(Cow::Owned(format!("\"{lexical}\"^^<{dt}>"))),
            Term::Literal { lexical, .. } => Some(Cow::Owned(format!("\"{lexical}\""))),
            Term::BlankNode(label) => Some(Cow::Owned(format!("{BLANK_NODE_PREFIX}{label}"))),
            Term::Id(_) => None,
        }
    }
}

impl From<Id> for Term {
    fn from(id: Id) -> Self {
        Term::Id(id)
    }
}
