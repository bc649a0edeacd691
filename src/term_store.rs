//! Deduplicating, canonicalising interning table for [`Term`]s (spec §4.1).
//!
//! Callers are responsible for holding the appropriate [`crate::lock::LockManager`]
//! guard: interning (a mutation) requires the write lock, `lookup`/`get` may
//! run under the read lock. `TermStore` itself holds no lock - it mirrors the
//! plain, lock-free `HashMap` wrapped by the surrounding `RwLock` in
//! `locking_tx_datastore`'s index types rather than re-deriving its own
//! synchronisation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, TermError};
use crate::term::{Namespace, Term, TermId, RDF_LANG_STRING};

#[derive(Default)]
pub struct TermStore {
    terms: Vec<Term>,
    by_term: HashMap<Term, TermId>,
    namespaces: HashMap<Arc<str>, Namespace>,
}

impl TermStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TermId) -> Option<&Term> {
        self.terms.get(id.index())
    }

    pub fn lookup(&self, term: &Term) -> Option<TermId> {
        self.by_term.get(term).copied()
    }

    /// Returns the canonical namespace `Arc<str>` for `ns`, reusing an
    /// existing one if this namespace string was already interned (spec
    /// §3/§4.1: "namespaces are themselves interned (structural sharing)").
    fn intern_namespace(&mut self, ns: &str) -> Namespace {
        if let Some(existing) = self.namespaces.get(ns) {
            return existing.clone();
        }
        let arc: Namespace = Arc::from(ns);
        self.namespaces.insert(arc.clone(), arc.clone());
        arc
    }

    fn insert_new(&mut self, term: Term) -> TermId {
        let id = TermId(self.terms.len() as u32);
        self.terms.push(term.clone());
        self.by_term.insert(term, id);
        id
    }

    pub fn intern_iri(&mut self, namespace: &str, local: &str) -> Result<TermId> {
        if Term::iri(namespace, local).is_empty_iri() {
            return Err(TermError::EmptyIri.into());
        }
        let namespace = self.intern_namespace(namespace);
        let candidate = Term::iri(namespace, local);
        if let Some(id) = self.by_term.get(&candidate) {
            return Ok(*id);
        }
        Ok(self.insert_new(candidate))
    }

    /// Looks up an IRI supplied as a single, unsplit string, comparing by
    /// total string rather than by namespace/local structure (spec §3:
    /// "equality with an externally supplied IRI that is not split
    /// compares by total string"). Does not intern; `None` if absent.
    pub fn lookup_iri_str(&self, iri: &str) -> Option<TermId> {
        self.terms
            .iter()
            .position(|term| term.iri_string().as_deref() == Some(iri))
            .map(|i| TermId(i as u32))
    }

    pub fn intern_blank(&mut self, label: &str) -> TermId {
        let candidate = Term::blank(label);
        if let Some(id) = self.by_term.get(&candidate) {
            return *id;
        }
        self.insert_new(candidate)
    }

    /// Generates a blank node with a store-unique label.
    pub fn fresh_blank(&mut self) -> TermId {
        let label = format!("b{}", self.terms.len());
        self.intern_blank(&label)
    }

    pub fn intern_literal(&mut self, lex: &str, lang: Option<&str>, datatype: Option<&str>) -> Result<TermId> {
        if let (Some(_), Some(dt)) = (lang, datatype) {
            if dt != RDF_LANG_STRING {
                return Err(TermError::LangWithNonLangStringDatatype {
                    lang: lang.unwrap().to_string(),
                    datatype: dt.to_string(),
                }
                .into());
            }
        }
        let candidate = Term::literal(lex, lang.map(Arc::from), datatype.map(Arc::from));
        if let Some(id) = self.by_term.get(&candidate) {
            return Ok(*id);
        }
        Ok(self.insert_new(candidate))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TermId, &Term)> {
        self.terms.iter().enumerate().map(|(i, t)| (TermId(i as u32), t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut store = TermStore::new();
        let a = store.intern_iri("http://ex/", "a").unwrap();
        let b = store.intern_iri("http://ex/", "a").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn namespaces_are_structurally_shared() {
        let mut store = TermStore::new();
        let a = store.intern_iri("http://ex/", "a").unwrap();
        let b = store.intern_iri("http://ex/", "b").unwrap();
        let Term::Iri { namespace: ns_a, .. } = store.get(a).unwrap() else {
            panic!("expected iri")
        };
        let Term::Iri { namespace: ns_b, .. } = store.get(b).unwrap() else {
            panic!("expected iri")
        };
        assert!(Arc::ptr_eq(ns_a, ns_b));
    }

    #[test]
    fn empty_iri_is_rejected() {
        let mut store = TermStore::new();
        assert!(store.intern_iri("", "").is_err());
    }

    #[test]
    fn lookup_iri_str_finds_a_split_iri_by_its_total_string() {
        let mut store = TermStore::new();
        let a = store.intern_iri("http://ex/", "a").unwrap();
        assert_eq!(store.lookup_iri_str("http://ex/a"), Some(a));
        assert_eq!(store.lookup_iri_str("http://ex/does-not-exist"), None);
    }

    #[test]
    fn literal_lang_and_foreign_datatype_is_rejected() {
        let mut store = TermStore::new();
        let err = store.intern_literal("hi", Some("en"), Some("http://ex/customType"));
        assert!(err.is_err());
    }

    #[test]
    fn literal_lang_string_datatype_is_allowed() {
        let mut store = TermStore::new();
        let id = store.intern_literal("hi", Some("en"), Some(RDF_LANG_STRING)).unwrap();
        assert!(store.get(id).is_some());
    }

    #[test]
    fn literal_language_tags_are_case_normalised() {
        let mut store = TermStore::new();
        let a = store.intern_literal("hi", Some("EN"), Some(RDF_LANG_STRING)).unwrap();
        let b = store.intern_literal("hi", Some("en"), Some(RDF_LANG_STRING)).unwrap();
        assert_eq!(a, b);
    }
}
