use std::collections::{BTreeMap, HashMap};
use std::cmp::Ordering;

use crate::model::CandidateComplex;

/// Collapse candidates sharing any id into one candidate per connected group.
///
/// Groups are folded in input order with [`merge_pair`]; output is sorted by
/// candidate key. Re-running over the output is a no-op since ids are then
/// pairwise disjoint.
pub fn merge_candidates(candidates: Vec<CandidateComplex>) -> Vec<CandidateComplex> {
    let mut parent: Vec<usize> = (0..candidates.len()).collect();
    let mut owner: HashMap<&str, usize> = HashMap::new();

    for (idx, candidate) in candidates.iter().enumerate() {
        for id in &candidate.ids {
            match owner.get(id.as_str()) {
                Some(&other) => union(&mut parent, other, idx),
                None => {
                    owner.insert(id, idx);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..candidates.len() {
        let root = find(&mut parent, idx);
        groups.entry(root).or_default().push(idx);
    }

    let mut slots: Vec<Option<CandidateComplex>> = candidates.into_iter().map(Some).collect();
    let mut merged: Vec<CandidateComplex> = groups
        .into_values()
        .filter_map(|members| {
            members
                .into_iter()
                .filter_map(|i| slots[i].take())
                .reduce(merge_pair)
        })
        .collect();

    merged.sort_by(|a, b| a.key().cmp(b.key()));
    merged
}

/// Merge two candidates known to denote the same complex.
///
/// Ids are unioned. Confidence is the max of what is present. Name prefers
/// the left side. Exactly one side's member set is kept: the higher
/// confidence wins, then the larger set, then the left side.
pub fn merge_pair(left: CandidateComplex, right: CandidateComplex) -> CandidateComplex {
    let keep_left = match compare_confidence(left.confidence, right.confidence) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => right.member_accessions.len() <= left.member_accessions.len(),
    };

    log::info!(
        "merging candidate [{}] into [{}]",
        right.ids_joined(),
        left.ids_joined()
    );

    let (kept, dropped) = if keep_left {
        (left.member_accessions, right.member_accessions)
    } else {
        (right.member_accessions, left.member_accessions)
    };
    if kept != dropped {
        let discarded: Vec<&str> = dropped.difference(&kept).map(String::as_str).collect();
        log::warn!(
            "member sets disagree while merging ids {:?}/{:?}; discarding [{}]",
            left.ids,
            right.ids,
            discarded.join(" ")
        );
    }

    let mut ids = left.ids;
    ids.extend(right.ids);

    let confidence = match (left.confidence, right.confidence) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    CandidateComplex {
        ids,
        member_accessions: kept,
        confidence,
        name: left.name.or(right.name),
    }
}

fn compare_confidence(left: Option<f64>, right: Option<f64>) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    // Lower index stays root so folding follows input order.
    match ra.cmp(&rb) {
        Ordering::Less => parent[rb] = ra,
        Ordering::Greater => parent[ra] = rb,
        Ordering::Equal => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn overlapping_ids_merge() {
        let a = CandidateComplex::new(["A"], ["P1"]);
        let b = CandidateComplex::new(["A", "B"], ["P1", "P2"]);
        let merged = merge_candidates(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ids, set(&["A", "B"]));
        // Neither side has confidence, so the larger member set wins.
        assert_eq!(merged[0].member_accessions, set(&["P1", "P2"]));
    }

    #[test]
    fn disjoint_candidates_untouched() {
        let a = CandidateComplex::new(["X"], ["P1"]);
        let b = CandidateComplex::new(["W"], ["P2"]);
        let merged = merge_candidates(vec![a.clone(), b.clone()]);
        assert_eq!(merged, vec![b, a]);
    }

    #[test]
    fn transitive_chain_collapses() {
        let a = CandidateComplex::new(["A"], ["P1"]);
        let b = CandidateComplex::new(["C"], ["P3"]);
        let c = CandidateComplex::new(["B", "C"], ["P2"]);
        let d = CandidateComplex::new(["A", "B"], ["P1"]);
        let merged = merge_candidates(vec![a, b, c, d]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ids, set(&["A", "B", "C"]));
    }

    #[test]
    fn confidence_takes_max_and_its_members() {
        let a = CandidateComplex::new(["A"], ["P1", "P2", "P3"]).with_confidence(0.4);
        let b = CandidateComplex::new(["A"], ["P1"]).with_confidence(0.9);
        let merged = merge_pair(a, b);
        assert_eq!(merged.confidence, Some(0.9));
        assert_eq!(merged.member_accessions, set(&["P1"]));
    }

    #[test]
    fn present_confidence_beats_absent() {
        let a = CandidateComplex::new(["A"], ["P1", "P2"]);
        let b = CandidateComplex::new(["A"], ["P9"]).with_confidence(0.1);
        let merged = merge_pair(a, b);
        assert_eq!(merged.confidence, Some(0.1));
        assert_eq!(merged.member_accessions, set(&["P9"]));
    }

    #[test]
    fn left_name_preferred() {
        let a = CandidateComplex::new(["A"], ["P1"]);
        let b = CandidateComplex::new(["A"], ["P1"]).with_name("right");
        assert_eq!(merge_pair(a.clone().with_name("left"), b.clone()).name.as_deref(), Some("left"));
        assert_eq!(merge_pair(a, b).name.as_deref(), Some("right"));
    }

    #[test]
    fn equal_tie_keeps_left_members() {
        let a = CandidateComplex::new(["A"], ["P1", "P2"]).with_confidence(0.5);
        let b = CandidateComplex::new(["A"], ["P3", "P4"]).with_confidence(0.5);
        assert_eq!(merge_pair(a, b).member_accessions, set(&["P1", "P2"]));
    }
}
