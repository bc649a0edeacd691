//! Term Store data model (spec §3, §4.1).
//!
//! The polymorphic IRI/BlankNode/Literal hierarchy maps to a tagged
//! variant (spec §9); pattern scans elsewhere operate on [`TermId`]s and
//! never need to dispatch on the variant.

use std::sync::Arc;

/// Stable identity of an interned [`Term`]. Never reused or reassigned for
/// the lifetime of the store (spec §3 invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(pub(crate) u32);

impl TermId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An interned IRI namespace. Namespaces are themselves deduplicated so
/// IRIs sharing a prefix share one `Arc<str>` (spec §3 "namespaces can be
/// shared structurally").
pub type Namespace = Arc<str>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Iri { namespace: Namespace, local: Arc<str> },
    BlankNode { label: Arc<str> },
    Literal {
        lexical: Arc<str>,
        lang: Option<Arc<str>>,
        datatype: Option<Arc<str>>,
    },
}

pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

impl Term {
    pub fn iri(namespace: impl Into<Namespace>, local: impl Into<Arc<str>>) -> Self {
        Term::Iri {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    pub fn blank(label: impl Into<Arc<str>>) -> Self {
        Term::BlankNode { label: label.into() }
    }

    pub fn literal(lexical: impl Into<Arc<str>>, lang: Option<Arc<str>>, datatype: Option<Arc<str>>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            lang: lang.map(|l| Arc::from(l.to_lowercase())),
            datatype,
        }
    }

    /// Total IRI string, for terms supplied externally without a
    /// namespace/local split (spec §3: "equality with an externally
    /// supplied IRI that is not split compares by total string").
    pub fn iri_string(&self) -> Option<String> {
        match self {
            Term::Iri { namespace, local } => Some(format!("{namespace}{local}")),
            _ => None,
        }
    }

    pub fn is_empty_iri(&self) -> bool {
        matches!(self, Term::Iri { namespace, local } if namespace.is_empty() && local.is_empty())
    }
}
