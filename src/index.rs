//! Statement Index (spec §4.3): per-term inverted lists by role, plus a
//! hash index for dedup/removal lookup.
//!
//! Grounded on `hash_index.rs`'s `HashIdx`/`seek`/`scan` shape for the hash
//! index, generalised to a composite `(s, p, o, c, explicit)` key. The
//! inverted lists are plain `HashMap` entries populated on first use: under
//! the store-wide write lock that already serialises every mutation here,
//! the "double-checked lazy initialisation" design note (spec §9) collapses
//! to an ordinary entry-or-insert, so no `OnceCell` is needed per list.

use std::collections::HashMap;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::statement::{RecordId, Statement, StatementList, StatementRecord};
use crate::term::TermId;

/// A pattern constraining zero or more roles of a statement. `context =
/// None` means unconstrained; `context = Some(None)` constrains to the
/// default graph; `context = Some(Some(id))` constrains to a named graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pattern {
    pub subject: Option<TermId>,
    pub predicate: Option<TermId>,
    pub object: Option<TermId>,
    pub context: Option<Option<TermId>>,
}

impl Pattern {
    pub fn matches(&self, s: &Statement) -> bool {
        self.subject.map_or(true, |t| t == s.subject)
            && self.predicate.map_or(true, |t| t == s.predicate)
            && self.object.map_or(true, |t| t == s.object)
            && self.context.map_or(true, |c| c == s.context)
    }
}

type InvertedList = SmallVec<[RecordId; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HashKey {
    subject: TermId,
    predicate: TermId,
    object: TermId,
    context: Option<TermId>,
    explicit: bool,
}

impl HashKey {
    fn of(s: &Statement, explicit: bool) -> Self {
        HashKey {
            subject: s.subject,
            predicate: s.predicate,
            object: s.object,
            context: s.context,
            explicit,
        }
    }
}

#[derive(Default)]
pub struct StatementIndex {
    by_subject: HashMap<TermId, InvertedList>,
    by_predicate: HashMap<TermId, InvertedList>,
    by_object: HashMap<TermId, InvertedList>,
    // Keyed by `Some(ctx)` for named graphs and a single shared bucket
    // (`None`) for the default graph.
    by_context: HashMap<Option<TermId>, InvertedList>,
    hash: IndexMap<HashKey, RecordId>,
}

impl StatementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: RecordId, record: &StatementRecord) {
        let s = &record.statement;
        self.by_subject.entry(s.subject).or_default().push(id);
        self.by_predicate.entry(s.predicate).or_default().push(id);
        self.by_object.entry(s.object).or_default().push(id);
        self.by_context.entry(s.context).or_default().push(id);
        self.hash.insert(HashKey::of(s, record.explicit), id);
    }

    /// Locates the current record for `(s, p, o, c, explicit)`, live or
    /// pending, used by the MVCC engine to detect duplicate adds and to
    /// find the record to mark removed (spec §4.3, §4.6).
    pub fn probe(&self, s: &Statement, explicit: bool) -> Option<RecordId> {
        self.hash.get(&HashKey::of(s, explicit)).copied()
    }

    /// Runs a pattern scan at `snapshot`, choosing the smallest constrained
    /// inverted list as driver and filtering the rest (spec §4.3).
    pub fn scan<'a>(
        &'a self,
        list: &'a StatementList,
        pattern: Pattern,
        snapshot: u64,
    ) -> Box<dyn Iterator<Item = (RecordId, &'a StatementRecord)> + 'a> {
        let candidates: [Option<&InvertedList>; 4] = [
            pattern.subject.and_then(|t| self.by_subject.get(&t)),
            pattern.predicate.and_then(|t| self.by_predicate.get(&t)),
            pattern.object.and_then(|t| self.by_object.get(&t)),
            pattern.context.and_then(|c| self.by_context.get(&c)),
        ];
        let driver = candidates.into_iter().flatten().min_by_key(|l| l.len());

        match driver {
            Some(ids) => Box::new(ids.iter().copied().filter_map(move |id| {
                let record = list.get(id)?;
                (record.visible_at(snapshot) && pattern.matches(&record.statement)).then_some((id, record))
            })),
            None => Box::new(
                list.iterate_at(snapshot)
                    .filter(move |(_, record)| pattern.matches(&record.statement)),
            ),
        }
    }

    /// Patches every stored [`RecordId`] after [`StatementList::compact`]
    /// rewrote the underlying array, dropping references to records that
    /// were physically reclaimed.
    pub fn apply_remap(&mut self, remap: &[Option<RecordId>]) {
        let fix = |list: &mut InvertedList| {
            list.retain_mut(|id| match remap.get(id.0 as usize).copied().flatten() {
                Some(new_id) => {
                    *id = new_id;
                    true
                }
                None => false,
            });
        };
        for list in self.by_subject.values_mut() {
            fix(list);
        }
        for list in self.by_predicate.values_mut() {
            fix(list);
        }
        for list in self.by_object.values_mut() {
            fix(list);
        }
        for list in self.by_context.values_mut() {
            fix(list);
        }
        self.hash.retain(|_, id| match remap.get(id.0 as usize).copied().flatten() {
            Some(new_id) => {
                *id = new_id;
                true
            }
            None => false,
        });
    }
}
