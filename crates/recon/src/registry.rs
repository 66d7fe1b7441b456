//! In-memory curated registry.
//!
//! Serves member-accession queries for the matcher and accepts reconciled
//! plans through [`PlanSink`]. The CLI loads it from CSV exports.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::error::ReconError;
use crate::matcher::ComplexRegistry;
use crate::model::{ComplexPlan, ComplexRef, CuratedComplex};
use crate::reconcile::apply_plan;

/// Destination for reconciled plans.
pub trait PlanSink: Sync {
    /// Apply a plan. Returns the accession the plan was applied to.
    fn apply(&self, plan: &ComplexPlan) -> Result<String, ReconError>;
}

#[derive(Default)]
struct Inner {
    complexes: BTreeMap<String, CuratedComplex>,
    by_member: HashMap<String, BTreeSet<String>>,
    /// Candidate key to accession assigned when its complex was created.
    created: HashMap<String, String>,
    next_id: u64,
}

impl Inner {
    fn index(&mut self, complex: &CuratedComplex) {
        for member in &complex.member_accessions {
            self.by_member.entry(member.clone()).or_default().insert(complex.accession.clone());
        }
    }
}

pub struct InMemoryRegistry {
    prefix: String,
    inner: RwLock<Inner>,
}

impl InMemoryRegistry {
    /// `prefix` is used for accessions of complexes created by plans,
    /// e.g. `CPX-PRED-` gives `CPX-PRED-1`, `CPX-PRED-2`, ...
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), inner: RwLock::new(Inner { next_id: 1, ..Default::default() }) }
    }

    pub fn with_complexes(prefix: impl Into<String>, complexes: Vec<CuratedComplex>) -> Self {
        let registry = Self::new(prefix);
        for complex in complexes {
            registry.insert(complex);
        }
        registry
    }

    /// Insert or replace a complex.
    pub fn insert(&self, complex: CuratedComplex) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.complexes.remove(&complex.accession) {
            for member in &old.member_accessions {
                if let Some(acs) = inner.by_member.get_mut(member) {
                    acs.remove(&old.accession);
                }
            }
        }
        inner.index(&complex);
        inner.complexes.insert(complex.accession.clone(), complex);
    }

    pub fn get(&self, accession: &str) -> Option<CuratedComplex> {
        self.inner.read().complexes.get(accession).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().complexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().complexes.is_empty()
    }

    /// All complexes, ordered by accession.
    pub fn snapshot(&self) -> Vec<CuratedComplex> {
        self.inner.read().complexes.values().cloned().collect()
    }
}

impl ComplexRegistry for InMemoryRegistry {
    fn complexes_containing(&self, accession: &str) -> Result<Vec<CuratedComplex>, ReconError> {
        let inner = self.inner.read();
        let Some(acs) = inner.by_member.get(accession) else {
            return Ok(Vec::new());
        };
        Ok(acs.iter().filter_map(|ac| inner.complexes.get(ac).cloned()).collect())
    }
}

impl PlanSink for InMemoryRegistry {
    fn apply(&self, plan: &ComplexPlan) -> Result<String, ReconError> {
        let mut inner = self.inner.write();
        let accession = match &plan.complex {
            ComplexRef::Existing(ac) => {
                if !inner.complexes.contains_key(ac) {
                    return Err(ReconError::malformed(ac, "plan targets a complex missing from the registry"));
                }
                ac.clone()
            }
            ComplexRef::New(key) => match inner.created.get(key).cloned() {
                Some(ac) => ac,
                None => {
                    let ac = format!("{}{}", self.prefix, inner.next_id);
                    inner.next_id += 1;
                    let mut complex = CuratedComplex::new(ac.clone(), plan.candidate.member_accessions.iter().cloned());
                    complex.is_predicted = true;
                    inner.index(&complex);
                    inner.complexes.insert(ac.clone(), complex);
                    inner.created.insert(key.clone(), ac.clone());
                    log::info!("created complex {ac} for candidate {key}");
                    ac
                }
            },
        };

        if let Some(complex) = inner.complexes.get_mut(&accession) {
            apply_plan(complex, plan);
        }
        Ok(accession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateComplex, MatchType, XrefAction, XrefKind, XrefOperation};

    fn plan(complex: ComplexRef, members: &[&str]) -> ComplexPlan {
        let candidate = CandidateComplex::new(["H1"], members.iter().copied());
        ComplexPlan {
            xref_ops: vec![XrefOperation {
                complex: complex.clone(),
                kind: XrefKind::Identity,
                action: XrefAction::Add {
                    database: "MI:2424".into(),
                    qualifier: "MI:0356".into(),
                    identifier: "H1".into(),
                },
            }],
            annotation_ops: vec![],
            match_type: MatchType::NoMatch,
            candidate,
            complex,
        }
    }

    #[test]
    fn member_index() {
        let reg = InMemoryRegistry::with_complexes(
            "CPX-PRED-",
            vec![CuratedComplex::new("CPX-1", ["P1", "P2"]), CuratedComplex::new("CPX-2", ["P2", "P3"])],
        );
        let acs = |m: &str| -> Vec<String> {
            reg.complexes_containing(m).unwrap().into_iter().map(|c| c.accession).collect()
        };
        assert_eq!(acs("P2"), vec!["CPX-1", "CPX-2"]);
        assert_eq!(acs("P3"), vec!["CPX-2"]);
        assert!(acs("P9").is_empty());
    }

    #[test]
    fn replacing_reindexes() {
        let reg = InMemoryRegistry::new("X-");
        reg.insert(CuratedComplex::new("CPX-1", ["P1", "P2"]));
        reg.insert(CuratedComplex::new("CPX-1", ["P3"]));
        assert!(reg.complexes_containing("P1").unwrap().is_empty());
        assert_eq!(reg.complexes_containing("P3").unwrap().len(), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn new_plan_creates_predicted_complex_once() {
        let reg = InMemoryRegistry::new("CPX-PRED-");
        let p = plan(ComplexRef::New("H1".into()), &["P1", "P2"]);
        let first = reg.apply(&p).unwrap();
        let second = reg.apply(&p).unwrap();
        assert_eq!(first, "CPX-PRED-1");
        assert_eq!(first, second);
        assert_eq!(reg.len(), 1);

        let created = reg.get(&first).unwrap();
        assert!(created.is_predicted);
        assert_eq!(created.xrefs.len(), 1);
        assert_eq!(reg.complexes_containing("P2").unwrap()[0].accession, first);
    }

    #[test]
    fn existing_plan_updates_xrefs() {
        let reg = InMemoryRegistry::with_complexes("X-", vec![CuratedComplex::new("CPX-1", ["P1"])]);
        reg.apply(&plan(ComplexRef::Existing("CPX-1".into()), &["P1"])).unwrap();
        assert_eq!(reg.get("CPX-1").unwrap().xrefs[0].identifier, "H1");

        let err = reg.apply(&plan(ComplexRef::Existing("CPX-9".into()), &["P1"])).unwrap_err();
        assert!(err.is_item_level());
    }
}
