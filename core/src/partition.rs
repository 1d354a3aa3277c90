//! Workload partitioning
//!
//! Splits the crawl result into N disjoint chunks, one per instance, so no
//! two instances audit the same element. Site-wide elements (shared forms,
//! logout links) appear on many pages but land in exactly one chunk.

use crate::element::{ElementId, ElementIdMap};
use crate::page::Page;

/// Split URLs into `n` disjoint chunks whose sizes differ by at most one.
pub fn partition_urls(urls: Vec<String>, n: usize) -> Vec<Vec<String>> {
    assert!(n > 0, "chunk count must be positive");
    let mut chunks: Vec<Vec<String>> = vec![Vec::new(); n];
    for (index, url) in urls.into_iter().enumerate() {
        chunks[index % n].push(url);
    }
    chunks
}

/// Assign every distinct element id to exactly one of `n` chunks.
///
/// Greedy least-loaded assignment, ties broken by lowest chunk index. Ids
/// are visited in sorted order so the output is deterministic for a given
/// map.
pub fn partition_elements(map: &ElementIdMap, n: usize) -> Vec<Vec<ElementId>> {
    assert!(n > 0, "chunk count must be positive");
    let mut chunks: Vec<Vec<ElementId>> = vec![Vec::new(); n];
    for id in map.all_ids() {
        let target = chunks
            .iter()
            .enumerate()
            .min_by_key(|(index, chunk)| (chunk.len(), *index))
            .map(|(index, _)| index)
            .unwrap_or(0);
        chunks[target].push(id);
    }
    chunks
}

/// Split pages into `n` chunks by round-robin over insertion order.
pub fn partition_pages(pages: Vec<Page>, n: usize) -> Vec<Vec<Page>> {
    assert!(n > 0, "chunk count must be positive");
    let mut chunks: Vec<Vec<Page>> = vec![Vec::new(); n];
    for (index, page) in pages.into_iter().enumerate() {
        chunks[index % n].push(page);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn urls(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("http://t/{i}")).collect()
    }

    #[test]
    fn url_chunks_are_disjoint_and_balanced() {
        for (count, n) in [(10, 3), (7, 2), (1, 4), (0, 2), (12, 12)] {
            let input = urls(count);
            let chunks = partition_urls(input.clone(), n);
            assert_eq!(chunks.len(), n);

            let merged: BTreeSet<_> = chunks.iter().flatten().cloned().collect();
            assert_eq!(merged.len(), count);
            assert_eq!(merged, input.into_iter().collect::<BTreeSet<_>>());

            let max = chunks.iter().map(Vec::len).max().unwrap();
            let min = chunks.iter().map(Vec::len).min().unwrap();
            assert!(max - min <= 1, "skew {max}-{min} for {count}/{n}");
        }
    }

    #[test]
    fn every_element_lands_in_exactly_one_chunk() {
        let mut map = ElementIdMap::new();
        map.record("u1", vec!["e1".into(), "e2".into()]);
        map.record("u2", vec!["e2".into(), "e3".into()]);
        map.record("u3", vec!["e1".into(), "e4".into(), "e5".into()]);

        let chunks = partition_elements(&map, 2);
        let mut seen = BTreeSet::new();
        for chunk in &chunks {
            for id in chunk {
                assert!(seen.insert(id.clone()), "{id} assigned twice");
            }
        }
        assert_eq!(seen, map.all_ids());

        let max = chunks.iter().map(Vec::len).max().unwrap();
        let min = chunks.iter().map(Vec::len).min().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn element_partition_is_deterministic() {
        let mut map = ElementIdMap::new();
        map.record("u1", vec!["b".into(), "a".into(), "c".into()]);

        let first = partition_elements(&map, 2);
        let second = partition_elements(&map, 2);
        assert_eq!(first, second);
    }

    #[test]
    fn pages_round_robin_over_insertion_order() {
        let pages: Vec<Page> = (0..5).map(|i| Page::new(format!("http://t/{i}"), vec![])).collect();
        let chunks = partition_pages(pages, 2);
        let first: Vec<_> = chunks[0].iter().map(|p| p.url.as_str()).collect();
        let second: Vec<_> = chunks[1].iter().map(|p| p.url.as_str()).collect();
        assert_eq!(first, ["http://t/0", "http://t/2", "http://t/4"]);
        assert_eq!(second, ["http://t/1", "http://t/3"]);
    }
}
