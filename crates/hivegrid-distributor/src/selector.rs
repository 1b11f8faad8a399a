//! Rarity-aware candidate prefilter.
//!
//! Before ordering candidates by load, the distributor prunes nodes whose
//! capabilities are scarce: if a request for chrome could be served by one
//! of many chrome-only nodes, the lone edge-capable node should not burn a
//! slot on it. Buckets group candidates by advertised browser name; the
//! filter removes whole buckets, smallest first, until the remaining
//! buckets are balanced.
//!
//! Pure and deterministic given the candidate set and the requested
//! browser; the distributor applies it under its directory lock.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

/// Prune scarce-capability candidates.
///
/// `candidates` pairs each node key with the distinct browser names across
/// the node's advertised stereotypes. Returns the surviving keys in their
/// original order, or all of them when no balanced subset exists.
pub fn prioritize<T: Copy + Eq + Hash + Ord>(
    candidates: &[(T, BTreeSet<String>)],
    requested_browser: &str,
) -> Vec<T> {
    let original: Vec<T> = candidates.iter().map(|(key, _)| *key).collect();
    let browsers: HashMap<T, &BTreeSet<String>> = candidates
        .iter()
        .map(|(key, browsers)| (*key, browsers))
        .collect();

    let buckets = bucketize(&original, &browsers);
    if all_same_size(&buckets) {
        return original;
    }

    // Fix the removal order up front: smallest bucket first, ties broken
    // by browser name so the result is stable.
    let mut order: Vec<(&str, usize)> = buckets
        .iter()
        .map(|(browser, members)| (*browser, members.len()))
        .collect();
    order.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let mut working = original.clone();
    for (browser, _) in order {
        if browser == requested_browser {
            continue;
        }
        working.retain(|key| !browsers[key].contains(browser));
        if working.is_empty() {
            break;
        }
        if all_same_size(&bucketize(&working, &browsers)) {
            return working;
        }
    }

    // Never balanced: fall back to the unfiltered set.
    original
}

fn bucketize<'a, T: Copy + Eq + Hash>(
    keys: &[T],
    browsers: &HashMap<T, &'a BTreeSet<String>>,
) -> HashMap<&'a str, HashSet<T>> {
    let mut buckets: HashMap<&str, HashSet<T>> = HashMap::new();
    for key in keys {
        for browser in browsers[key] {
            buckets.entry(browser.as_str()).or_default().insert(*key);
        }
    }
    buckets
}

fn all_same_size<T>(buckets: &HashMap<&str, HashSet<T>>) -> bool {
    let mut sizes = buckets.values().map(HashSet::len);
    match sizes.next() {
        Some(first) => sizes.all(|size| size == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browsers(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn candidates(entries: &[(u32, &[&str])]) -> Vec<(u32, BTreeSet<String>)> {
        entries
            .iter()
            .map(|(key, names)| (*key, browsers(names)))
            .collect()
    }

    #[test]
    fn empty_set_passes_through() {
        assert!(prioritize::<u32>(&[], "chrome").is_empty());
    }

    #[test]
    fn balanced_buckets_return_everything() {
        let set = candidates(&[(1, &["chrome"]), (2, &["firefox"]), (3, &["edge"])]);
        let mut result = prioritize(&set, "chrome");
        result.sort_unstable();
        assert_eq!(result, vec![1, 2, 3]);
    }

    #[test]
    fn scarce_browser_is_excluded_from_abundant_request() {
        // One edge node, three chrome nodes; chrome requests must not land
        // on the edge node.
        let set = candidates(&[
            (1, &["edge"]),
            (2, &["chrome"]),
            (3, &["chrome"]),
            (4, &["chrome"]),
        ]);
        let mut result = prioritize(&set, "chrome");
        result.sort_unstable();
        assert_eq!(result, vec![2, 3, 4]);
    }

    #[test]
    fn scarce_browser_request_keeps_its_node() {
        let set = candidates(&[
            (1, &["edge"]),
            (2, &["chrome"]),
            (3, &["chrome"]),
            (4, &["chrome"]),
        ]);
        // All four pass the capacity filter only when they can actually
        // serve edge; here only node 1 would, but the policy itself must
        // still keep it when edge is requested.
        let result = prioritize(&set[..1], "edge");
        assert_eq!(result, vec![1]);
    }

    #[test]
    fn multi_browser_node_is_pruned_via_its_scarce_bucket() {
        // Node 1 serves both edge and chrome; the edge bucket is scarcer,
        // so node 1 leaves the chrome pool.
        let set = candidates(&[
            (1, &["edge", "chrome"]),
            (2, &["chrome"]),
            (3, &["chrome"]),
        ]);
        let mut result = prioritize(&set, "chrome");
        result.sort_unstable();
        assert_eq!(result, vec![2, 3]);
    }

    #[test]
    fn shrinks_to_a_single_balanced_bucket() {
        let set = candidates(&[
            (1, &["chrome", "firefox"]),
            (2, &["chrome", "firefox"]),
            (3, &["chrome"]),
        ]);
        // Removing the firefox bucket leaves only node 3, a trivially
        // balanced single bucket.
        assert_eq!(prioritize(&set, "chrome"), vec![3]);
    }

    #[test]
    fn falls_back_to_original_when_removal_empties_the_set() {
        // Every candidate advertises firefox, so removing that bucket
        // would leave nothing; the policy falls back to the full set.
        let set = candidates(&[
            (1, &["chrome", "firefox"]),
            (2, &["chrome", "firefox"]),
            (3, &["firefox"]),
        ]);
        let mut result = prioritize(&set, "chrome");
        result.sort_unstable();
        assert_eq!(result, vec![1, 2, 3]);
    }

    #[test]
    fn prefilter_is_idempotent() {
        let set = candidates(&[
            (1, &["edge"]),
            (2, &["chrome"]),
            (3, &["chrome"]),
            (4, &["firefox"]),
            (5, &["firefox"]),
        ]);
        let once = prioritize(&set, "chrome");

        let again_input: Vec<(u32, BTreeSet<String>)> = set
            .iter()
            .filter(|(key, _)| once.contains(key))
            .cloned()
            .collect();
        let twice = prioritize(&again_input, "chrome");
        assert_eq!(once, twice);
    }

    #[test]
    fn result_preserves_candidate_order() {
        let set = candidates(&[
            (9, &["chrome"]),
            (1, &["edge"]),
            (4, &["chrome"]),
            (2, &["chrome"]),
        ]);
        assert_eq!(prioritize(&set, "chrome"), vec![9, 4, 2]);
    }

    #[test]
    fn requested_bucket_is_never_the_removal_victim() {
        // chrome is the scarcest bucket here, but a chrome request must
        // not remove chrome nodes.
        let set = candidates(&[
            (1, &["chrome"]),
            (2, &["firefox"]),
            (3, &["firefox"]),
        ]);
        let result = prioritize(&set, "chrome");
        assert!(result.contains(&1));
    }
}
