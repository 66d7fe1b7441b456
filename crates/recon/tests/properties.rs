// Property-based tests for merging, similarity and covariation.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;

use complexrecon::covariation::{build_covariation, PairKey};
use complexrecon::matcher::{jaccard, similarity_metrics};
use complexrecon::merge::merge_candidates;
use complexrecon::model::CandidateComplex;

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Accessions from a small alphabet so sets overlap often.
fn arb_accessions(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    proptest::collection::btree_set(r"P[0-9]{1,2}", 0..=max)
}

fn arb_candidate() -> impl Strategy<Value = CandidateComplex> {
    (
        proptest::collection::btree_set(r"H[0-9]{1,2}", 1..=3),
        proptest::collection::btree_set(r"P[0-9]{1,2}", 1..=6),
        proptest::option::of(0.0..1.0f64),
    )
        .prop_map(|(ids, members, confidence)| CandidateComplex {
            ids,
            member_accessions: members,
            confidence,
            name: None,
        })
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn merge_yields_disjoint_ids_and_keeps_every_id(
        candidates in proptest::collection::vec(arb_candidate(), 0..20),
    ) {
        let all_ids: BTreeSet<String> = candidates.iter().flat_map(|c| c.ids.iter().cloned()).collect();
        let merged = merge_candidates(candidates.clone());

        let mut seen = BTreeSet::new();
        for c in &merged {
            for id in &c.ids {
                prop_assert!(seen.insert(id.clone()), "id {} in two merged candidates", id);
            }
        }
        prop_assert_eq!(seen, all_ids);
        prop_assert!(merged.len() <= candidates.len());

        // Output is sorted by key
        for pair in merged.windows(2) {
            prop_assert!(pair[0].key() <= pair[1].key());
        }
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn merge_is_idempotent(
        candidates in proptest::collection::vec(arb_candidate(), 0..20),
    ) {
        let once = merge_candidates(candidates);
        let twice = merge_candidates(once.clone());
        prop_assert_eq!(once, twice);
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn merged_confidence_is_group_max(
        candidates in proptest::collection::vec(arb_candidate(), 1..12),
    ) {
        let merged = merge_candidates(candidates.clone());
        for m in &merged {
            let expected = candidates
                .iter()
                .filter(|c| !c.ids.is_disjoint(&m.ids))
                .filter_map(|c| c.confidence)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
            prop_assert_eq!(m.confidence, expected);
        }
    }
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn jaccard_is_symmetric_and_bounded(
        a in arb_accessions(10),
        b in arb_accessions(10),
    ) {
        let ab = jaccard(&a, &b);
        let ba = jaccard(&b, &a);
        prop_assert_eq!(ab, ba);
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert_eq!(ab == 1.0, a == b);
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn metrics_partition_the_union(
        candidate in arb_accessions(10),
        curated in arb_accessions(10),
    ) {
        let m = similarity_metrics(&candidate, &curated);
        let union: BTreeSet<&String> = candidate.union(&curated).collect();
        prop_assert_eq!(m.proteins_in_common + m.extra_in_complex + m.missing_in_complex, union.len());
        prop_assert_eq!(m.is_exact(), candidate == curated);
        prop_assert!((m.similarity - jaccard(&candidate, &curated)).abs() < 1e-12);
    }
}

// ---------------------------------------------------------------------------
// Covariation
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn matrix_is_symmetric_with_unit_diagonal(
        proteins in arb_accessions(8),
        scores in proptest::collection::vec((r"P[0-9]{1,2}", r"P[0-9]{1,2}", 0.0..1.0f64), 0..30),
    ) {
        // First score per unordered pair wins
        let mut table: HashMap<PairKey, f64> = HashMap::new();
        for (a, b, p) in &scores {
            table.entry(PairKey::new(a, b)).or_insert(*p);
        }
        let lookup = |a: &str, b: &str| table.get(&PairKey::new(a, b)).copied();
        let cov = build_covariation(&proteins, &lookup);

        let n = proteins.len();
        prop_assert_eq!(cov.matrix.len(), n);
        for i in 0..n {
            prop_assert_eq!(cov.matrix[i].len(), n);
            prop_assert_eq!(cov.matrix[i][i], 1.0);
            for j in 0..n {
                prop_assert_eq!(cov.matrix[i][j], cov.matrix[j][i]);
            }
        }
        prop_assert_eq!(cov.total_pairs, n * n.saturating_sub(1) / 2);
        match cov.coverage {
            None => prop_assert!(n < 2),
            Some(c) => prop_assert!((0.0..=1.0).contains(&c)),
        }
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn full_coverage_iff_every_pair_scored(
        proteins in arb_accessions(8),
        // One slot per upper-triangle pair of up to 8 proteins; None leaves a gap
        slots in proptest::collection::vec(proptest::option::weighted(0.9, 0.0..1.0f64), 28),
    ) {
        let ids: Vec<&String> = proteins.iter().collect();
        let mut table: HashMap<PairKey, f64> = HashMap::new();
        let mut slot = slots.iter();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                if let Some(Some(p)) = slot.next() {
                    table.insert(PairKey::new(ids[i], ids[j]), *p);
                }
            }
        }
        let lookup = |a: &str, b: &str| table.get(&PairKey::new(a, b)).copied();
        let cov = build_covariation(&proteins, &lookup);

        prop_assert_eq!(cov.pairs_with_score, table.len());
        prop_assert_eq!(
            cov.coverage == Some(1.0),
            ids.len() >= 2 && cov.pairs_with_score == cov.total_pairs
        );

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                match table.get(&PairKey::new(ids[i], ids[j])) {
                    Some(p) => {
                        prop_assert_eq!(cov.matrix[i][j], *p);
                        prop_assert_eq!(cov.matrix[j][i], *p);
                    }
                    None => {
                        prop_assert_eq!(cov.matrix[i][j], 0.0);
                        prop_assert_eq!(cov.matrix[j][i], 0.0);
                    }
                }
            }
        }
    }
}
