//! Cross-reference reconciliation.
//!
//! Turns a [`MatchResult`] into the identity / subset / cluster xref
//! operations (plus confidence annotation operations) that bring a curated
//! complex in line with the latest candidate data. Every decision compares
//! required state against existing state, so feeding the same candidate
//! back after its plan was applied yields no operations.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::config::SourcePolicy;
use crate::error::{LookupKind, ReconError};
use crate::model::{
    Annotation, AnnotationAction, AnnotationOperation, CandidateComplex, ComplexPlan, ComplexRef,
    CuratedComplex, MatchResult, MatchType, Xref, XrefAction, XrefKind, XrefOperation,
};

// ---------------------------------------------------------------------------
// Controlled vocabulary
// ---------------------------------------------------------------------------

/// Resolves controlled-vocabulary ids to their display names.
pub trait TermLookup: Sync {
    fn term_name(&self, id: &str) -> Option<String>;
}

impl TermLookup for HashMap<String, String> {
    fn term_name(&self, id: &str) -> Option<String> {
        self.get(id).cloned()
    }
}

/// Term names already resolved by one reconciler, keyed by `(kind, id)`.
#[derive(Debug, Default)]
pub struct TermCache {
    entries: RwLock<HashMap<(LookupKind, String), String>>,
}

impl TermCache {
    /// Name of the term, from the cache or `lookup`.
    pub fn get_or_resolve<T>(&self, kind: LookupKind, id: &str, lookup: &T) -> Result<String, ReconError>
    where
        T: TermLookup + ?Sized,
    {
        let key = (kind, id.to_string());
        if let Some(name) = self.entries.read().get(&key) {
            return Ok(name.clone());
        }
        let name = lookup.term_name(id).ok_or_else(|| ReconError::not_found(kind, id))?;
        log::debug!("{kind} {id} resolved as '{name}'");
        self.entries.write().insert(key, name.clone());
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler<T> {
    policy: SourcePolicy,
    terms: T,
    cache: TermCache,
}

impl<T: TermLookup> Reconciler<T> {
    pub fn new(policy: SourcePolicy, terms: T) -> Self {
        Self { policy, terms, cache: TermCache::default() }
    }

    pub fn policy(&self) -> &SourcePolicy {
        &self.policy
    }

    pub fn cache(&self) -> &TermCache {
        &self.cache
    }

    fn require_term(&self, kind: LookupKind, id: &str) -> Result<(), ReconError> {
        self.cache.get_or_resolve(kind, id, &self.terms).map(|_| ())
    }

    /// Operations needed for `candidate` given how it matched.
    ///
    /// Returns one plan per complex that needs at least one operation.
    /// Multiple exact matches are left for curators and produce nothing.
    pub fn reconcile(
        &self,
        result: &MatchResult,
        candidate: &CandidateComplex,
    ) -> Result<Vec<ComplexPlan>, ReconError> {
        self.require_term(LookupKind::Database, &self.policy.database_id)?;
        self.require_term(LookupKind::EvidenceType, &self.policy.evidence_type)?;

        let plans = match result.match_type {
            MatchType::NoMatch => vec![self.plan_new(candidate)?],
            MatchType::ExactMatch => {
                let mut plans = Vec::new();
                if let Some(matched) = result.matched.first() {
                    plans.push(self.plan_existing(
                        &matched.complex,
                        candidate,
                        result.match_type,
                        Some(XrefKind::Identity),
                    )?);
                }
                plans
            }
            MatchType::MultipleExactMatches => Vec::new(),
            MatchType::PartialMatch => {
                let cluster = cluster_members(result, candidate);
                let mut plans = Vec::with_capacity(result.matched.len());
                for matched in &result.matched {
                    let required = if matched.metrics.candidate_is_subset() {
                        Some(XrefKind::Subset)
                    } else if cluster.contains(matched.complex.accession.as_str()) {
                        Some(XrefKind::Cluster)
                    } else {
                        None
                    };
                    plans.push(self.plan_existing(
                        &matched.complex,
                        candidate,
                        result.match_type,
                        required,
                    )?);
                }
                plans
            }
        };

        Ok(plans.into_iter().filter(|p| !p.is_empty()).collect())
    }

    fn plan_new(&self, candidate: &CandidateComplex) -> Result<ComplexPlan, ReconError> {
        let qualifier = &self.policy.identity_qualifier;
        self.require_term(LookupKind::Qualifier, qualifier)?;

        let complex = ComplexRef::New(candidate.key().to_string());
        let xref_ops = candidate
            .ids
            .iter()
            .map(|id| XrefOperation {
                complex: complex.clone(),
                kind: XrefKind::Identity,
                action: XrefAction::Add {
                    database: self.policy.database_id.clone(),
                    qualifier: qualifier.clone(),
                    identifier: id.clone(),
                },
            })
            .collect();

        let annotation_ops = self.annotation_ops(&complex, &[], candidate)?;

        Ok(ComplexPlan {
            candidate: candidate.clone(),
            match_type: MatchType::NoMatch,
            complex,
            xref_ops,
            annotation_ops,
        })
    }

    fn plan_existing(
        &self,
        curated: &CuratedComplex,
        candidate: &CandidateComplex,
        match_type: MatchType,
        required: Option<XrefKind>,
    ) -> Result<ComplexPlan, ReconError> {
        let complex = ComplexRef::Existing(curated.accession.clone());
        let required_qualifier = match required {
            Some(kind) => {
                let q = self.policy.qualifier_for(kind);
                self.require_term(LookupKind::Qualifier, q)?;
                Some((kind, q))
            }
            None => None,
        };

        let mut xref_ops = Vec::new();
        for id in &candidate.ids {
            // Only xrefs this source owns: our database, our qualifiers.
            let existing: Vec<(&Xref, XrefKind)> = curated
                .xrefs
                .iter()
                .filter(|x| x.database == self.policy.database_id && &x.identifier == id)
                .filter_map(|x| self.policy.kind_for_qualifier(&x.qualifier).map(|k| (x, k)))
                .collect();

            match required_qualifier {
                Some((kind, qualifier)) => {
                    let satisfied = existing.iter().any(|(x, _)| x.qualifier == qualifier);
                    let mut stale = existing.iter().filter(|(x, _)| x.qualifier != qualifier);

                    if !satisfied {
                        match stale.next() {
                            Some((x, _)) => xref_ops.push(XrefOperation {
                                complex: complex.clone(),
                                kind,
                                action: XrefAction::Update {
                                    existing: (*x).clone(),
                                    new_qualifier: qualifier.to_string(),
                                },
                            }),
                            None => xref_ops.push(XrefOperation {
                                complex: complex.clone(),
                                kind,
                                action: XrefAction::Add {
                                    database: self.policy.database_id.clone(),
                                    qualifier: qualifier.to_string(),
                                    identifier: id.clone(),
                                },
                            }),
                        }
                    }
                    for (x, old_kind) in stale {
                        xref_ops.push(XrefOperation {
                            complex: complex.clone(),
                            kind: *old_kind,
                            action: XrefAction::Remove { existing: (*x).clone() },
                        });
                    }
                }
                None => {
                    for (x, old_kind) in existing {
                        xref_ops.push(XrefOperation {
                            complex: complex.clone(),
                            kind: old_kind,
                            action: XrefAction::Remove { existing: x.clone() },
                        });
                    }
                }
            }
        }

        let annotation_ops = if required.is_some() {
            self.annotation_ops(&complex, &curated.annotations, candidate)?
        } else {
            Vec::new()
        };

        Ok(ComplexPlan {
            candidate: candidate.clone(),
            match_type,
            complex,
            xref_ops,
            annotation_ops,
        })
    }

    /// Confidence annotations are compared as formatted text, not numerically.
    fn annotation_ops(
        &self,
        complex: &ComplexRef,
        existing: &[Annotation],
        candidate: &CandidateComplex,
    ) -> Result<Vec<AnnotationOperation>, ReconError> {
        let (Some(topic), Some(confidence)) = (&self.policy.confidence_topic, candidate.confidence) else {
            return Ok(Vec::new());
        };
        self.require_term(LookupKind::Topic, topic)?;

        let text = self.policy.confidence_format.format(confidence);
        let mut same_topic = existing.iter().filter(|a| &a.topic == topic);
        if existing.iter().any(|a| &a.topic == topic && a.text == text) {
            return Ok(Vec::new());
        }

        let action = match same_topic.next() {
            Some(old) => AnnotationAction::Update { existing: old.clone(), new_text: text },
            None => AnnotationAction::Add { topic: topic.clone(), text },
        };
        Ok(vec![AnnotationOperation { complex: complex.clone(), action }])
    }
}

/// Partial matches fully contained in the candidate that jointly cover it.
/// Empty unless at least two complexes are needed.
fn cluster_members<'a>(result: &'a MatchResult, candidate: &CandidateComplex) -> BTreeSet<&'a str> {
    let contained: Vec<&CuratedComplex> = result
        .matched
        .iter()
        .filter(|m| m.metrics.complex_is_contained())
        .map(|m| &m.complex)
        .collect();
    if contained.len() < 2 {
        return BTreeSet::new();
    }

    let covered: BTreeSet<&String> = contained.iter().flat_map(|c| c.member_accessions.iter()).collect();
    if candidate.member_accessions.iter().all(|m| covered.contains(m)) {
        contained.iter().map(|c| c.accession.as_str()).collect()
    } else {
        BTreeSet::new()
    }
}

/// Apply a plan to a registry entry. Operations already reflected in the
/// entry are no-ops.
pub fn apply_plan(complex: &mut CuratedComplex, plan: &ComplexPlan) {
    for op in &plan.xref_ops {
        match &op.action {
            XrefAction::Add { database, qualifier, identifier } => {
                let xref = Xref {
                    database: database.clone(),
                    qualifier: qualifier.clone(),
                    identifier: identifier.clone(),
                };
                if !complex.xrefs.contains(&xref) {
                    complex.xrefs.push(xref);
                }
            }
            XrefAction::Update { existing, new_qualifier } => {
                if let Some(x) = complex.xrefs.iter_mut().find(|x| *x == existing) {
                    x.qualifier = new_qualifier.clone();
                }
            }
            XrefAction::Remove { existing } => complex.xrefs.retain(|x| x != existing),
        }
    }

    for op in &plan.annotation_ops {
        match &op.action {
            AnnotationAction::Add { topic, text } => {
                let annotation = Annotation { topic: topic.clone(), text: text.clone() };
                if !complex.annotations.contains(&annotation) {
                    complex.annotations.push(annotation);
                }
            }
            AnnotationAction::Update { existing, new_text } => {
                if let Some(a) = complex.annotations.iter_mut().find(|a| *a == existing) {
                    a.text = new_text.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfidenceFormat;
    use crate::model::MatchedComplex;
    use crate::matcher::similarity_metrics;

    fn policy() -> SourcePolicy {
        SourcePolicy {
            name: "huMAP".into(),
            database_id: "MI:2424".into(),
            identity_qualifier: "MI:0356".into(),
            subset_qualifier: "MI:1344".into(),
            cluster_qualifier: "MI:2386".into(),
            evidence_type: "ECO:0005547".into(),
            confidence_topic: Some("MI:1221".into()),
            confidence_format: ConfidenceFormat::Decimal { precision: 2 },
        }
    }

    fn terms() -> HashMap<String, String> {
        [
            ("MI:2424", "humap"),
            ("MI:0356", "identity"),
            ("MI:1344", "subset"),
            ("MI:2386", "complex-cluster"),
            ("ECO:0005547", "biological system reconstruction evidence"),
            ("MI:1221", "author-based confidence"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn reconciler() -> Reconciler<HashMap<String, String>> {
        Reconciler::new(policy(), terms())
    }

    fn matched(result_type: MatchType, cand: &CandidateComplex, complexes: Vec<CuratedComplex>) -> MatchResult {
        MatchResult {
            match_type: result_type,
            matched: complexes
                .into_iter()
                .map(|complex| MatchedComplex {
                    metrics: similarity_metrics(&cand.member_accessions, &complex.member_accessions),
                    complex,
                })
                .collect(),
        }
    }

    fn xref(qualifier: &str, id: &str) -> Xref {
        Xref { database: "MI:2424".into(), qualifier: qualifier.into(), identifier: id.into() }
    }

    /// Apply every plan to the complexes it targets and rebuild the match.
    fn applied(result: &MatchResult, plans: &[ComplexPlan]) -> Vec<CuratedComplex> {
        result
            .complexes()
            .cloned()
            .map(|mut c| {
                let target = ComplexRef::Existing(c.accession.clone());
                for plan in plans.iter().filter(|p| p.complex == target) {
                    apply_plan(&mut c, plan);
                }
                c
            })
            .collect()
    }

    #[test]
    fn no_match_creates_identity_xrefs() {
        let cand = CandidateComplex::new(["H1", "H2"], ["P1", "P2"]).with_confidence(0.8731);
        let plans = reconciler().reconcile(&MatchResult::no_match(), &cand).unwrap();
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert!(plan.is_new_complex());
        assert_eq!(plan.xref_ops.len(), 2);
        assert!(plan.xref_ops.iter().all(|op| op.kind == XrefKind::Identity));
        assert_eq!(
            plan.annotation_ops[0].action,
            AnnotationAction::Add { topic: "MI:1221".into(), text: "0.87".into() }
        );
    }

    #[test]
    fn exact_match_adds_missing_identity_only() {
        let cand = CandidateComplex::new(["H1", "H2"], ["P1", "P2"]);
        let mut cur = CuratedComplex::new("CPX-1", ["P1", "P2"]);
        cur.xrefs.push(xref("MI:0356", "H1"));
        let result = matched(MatchType::ExactMatch, &cand, vec![cur]);
        let plans = reconciler().reconcile(&result, &cand).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].xref_ops.len(), 1);
        assert_eq!(
            plans[0].xref_ops[0].action,
            XrefAction::Add {
                database: "MI:2424".into(),
                qualifier: "MI:0356".into(),
                identifier: "H2".into()
            }
        );
    }

    #[test]
    fn exact_match_upgrades_stale_subset() {
        let cand = CandidateComplex::new(["H1"], ["P1", "P2"]);
        let mut cur = CuratedComplex::new("CPX-1", ["P1", "P2"]);
        cur.xrefs.push(xref("MI:1344", "H1"));
        let result = matched(MatchType::ExactMatch, &cand, vec![cur]);
        let plans = reconciler().reconcile(&result, &cand).unwrap();
        assert_eq!(
            plans[0].xref_ops[0].action,
            XrefAction::Update { existing: xref("MI:1344", "H1"), new_qualifier: "MI:0356".into() }
        );
    }

    #[test]
    fn subset_candidate_gets_subset_xref() {
        let cand = CandidateComplex::new(["H1"], ["P1", "P2"]);
        let cur = CuratedComplex::new("CPX-1", ["P1", "P2", "P3"]);
        let result = matched(MatchType::PartialMatch, &cand, vec![cur]);
        let plans = reconciler().reconcile(&result, &cand).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].xref_ops[0].kind, XrefKind::Subset);
    }

    #[test]
    fn partial_never_adds_identity_and_drops_stale() {
        let cand = CandidateComplex::new(["H1"], ["P1", "P4"]);
        let mut cur = CuratedComplex::new("CPX-1", ["P1", "P2"]);
        cur.xrefs.push(xref("MI:0356", "H1"));
        cur.xrefs.push(Xref { database: "MI:0469".into(), qualifier: "MI:0356".into(), identifier: "H1".into() });
        let result = matched(MatchType::PartialMatch, &cand, vec![cur]);
        let plans = reconciler().reconcile(&result, &cand).unwrap();
        assert_eq!(plans[0].xref_ops.len(), 1);
        assert_eq!(plans[0].xref_ops[0].action, XrefAction::Remove { existing: xref("MI:0356", "H1") });
        assert!(plans[0].annotation_ops.is_empty());
    }

    #[test]
    fn cluster_xref_when_two_complexes_cover_candidate() {
        let cand = CandidateComplex::new(["H1"], ["P1", "P2", "P3", "P4"]);
        let a = CuratedComplex::new("CPX-A", ["P1", "P2"]);
        let b = CuratedComplex::new("CPX-B", ["P3", "P4"]);
        let c = CuratedComplex::new("CPX-C", ["P4", "P9"]);
        let result = matched(MatchType::PartialMatch, &cand, vec![a, b, c]);
        let plans = reconciler().reconcile(&result, &cand).unwrap();
        let targets: Vec<String> = plans.iter().map(|p| p.complex.to_string()).collect();
        assert_eq!(targets, vec!["CPX-A", "CPX-B"]);
        assert!(plans.iter().all(|p| p.xref_ops[0].kind == XrefKind::Cluster));
    }

    #[test]
    fn no_cluster_when_coverage_incomplete() {
        let cand = CandidateComplex::new(["H1"], ["P1", "P2", "P3", "P5"]);
        let a = CuratedComplex::new("CPX-A", ["P1", "P2"]);
        let b = CuratedComplex::new("CPX-B", ["P3"]);
        let result = matched(MatchType::PartialMatch, &cand, vec![a, b]);
        assert!(reconciler().reconcile(&result, &cand).unwrap().is_empty());
    }

    #[test]
    fn multiple_exact_produces_nothing() {
        let cand = CandidateComplex::new(["H1"], ["P1"]);
        let result = matched(
            MatchType::MultipleExactMatches,
            &cand,
            vec![CuratedComplex::new("CPX-1", ["P1"]), CuratedComplex::new("CPX-2", ["P1"])],
        );
        assert!(reconciler().reconcile(&result, &cand).unwrap().is_empty());
    }

    #[test]
    fn annotation_compared_as_formatted_text() {
        let cand = CandidateComplex::new(["H1"], ["P1", "P2"]).with_confidence(0.501);
        let mut cur = CuratedComplex::new("CPX-1", ["P1", "P2"]);
        cur.xrefs.push(xref("MI:0356", "H1"));
        // 0.501 formats as "0.50" at precision 2: already satisfied.
        cur.annotations.push(Annotation { topic: "MI:1221".into(), text: "0.50".into() });
        let result = matched(MatchType::ExactMatch, &cand, vec![cur.clone()]);
        assert!(reconciler().reconcile(&result, &cand).unwrap().is_empty());

        // "0.5" is numerically equal but a different string, so it is updated.
        cur.annotations[0].text = "0.5".into();
        let result = matched(MatchType::ExactMatch, &cand, vec![cur]);
        let plans = reconciler().reconcile(&result, &cand).unwrap();
        assert_eq!(
            plans[0].annotation_ops[0].action,
            AnnotationAction::Update {
                existing: Annotation { topic: "MI:1221".into(), text: "0.5".into() },
                new_text: "0.50".into()
            }
        );
    }

    #[test]
    fn reapplying_is_idempotent() {
        let cand = CandidateComplex::new(["H1", "H2"], ["P1", "P2", "P3", "P4"]).with_confidence(0.9);
        let mut a = CuratedComplex::new("CPX-A", ["P1", "P2"]);
        a.xrefs.push(xref("MI:0356", "H2"));
        let b = CuratedComplex::new("CPX-B", ["P3", "P4"]);
        let result = matched(MatchType::PartialMatch, &cand, vec![a, b]);

        let rec = reconciler();
        let first = rec.reconcile(&result, &cand).unwrap();
        assert!(!first.is_empty());

        let updated = applied(&result, &first);
        let again = matched(MatchType::PartialMatch, &cand, updated);
        assert!(rec.reconcile(&again, &cand).unwrap().is_empty());
    }

    #[test]
    fn applying_a_plan_twice_changes_nothing() {
        let cand = CandidateComplex::new(["H1"], ["P1", "P2"]).with_confidence(0.75);
        let curated = CuratedComplex::new("CPX-1", ["P1", "P2"]);
        let result = matched(MatchType::ExactMatch, &cand, vec![curated.clone()]);
        let plans = reconciler().reconcile(&result, &cand).unwrap();

        let mut once = curated;
        apply_plan(&mut once, &plans[0]);
        let mut twice = once.clone();
        apply_plan(&mut twice, &plans[0]);
        assert_eq!(once, twice);
        assert_eq!(twice.xrefs.len(), 1);
        assert_eq!(twice.annotations.len(), 1);
    }

    #[test]
    fn missing_term_is_item_level() {
        let mut t = terms();
        t.remove("MI:1344");
        let rec = Reconciler::new(policy(), t);
        let cand = CandidateComplex::new(["H1"], ["P1"]);
        let result = matched(MatchType::PartialMatch, &cand, vec![CuratedComplex::new("CPX-1", ["P1", "P2"])]);
        let err = rec.reconcile(&result, &cand).unwrap_err();
        assert!(err.is_item_level());
        assert!(err.to_string().contains("MI:1344"));
    }

    #[test]
    fn terms_are_cached() {
        let rec = reconciler();
        let cand = CandidateComplex::new(["H1"], ["P1"]);
        rec.reconcile(&MatchResult::no_match(), &cand).unwrap();
        let cached = rec.cache().len();
        assert!(cached >= 3);
        assert_eq!(
            rec.cache().get_or_resolve(LookupKind::Qualifier, "MI:0356", &HashMap::<String, String>::new()).unwrap(),
            "identity"
        );
        rec.reconcile(&MatchResult::no_match(), &cand).unwrap();
        assert_eq!(rec.cache().len(), cached);
    }
}
