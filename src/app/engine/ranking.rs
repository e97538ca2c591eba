//! Candidate preference order
//!
//! Popularity rank first (ranked before unranked, lower rank first), then
//! smaller files first so a fixed byte budget holds as many items as
//! possible, then the most recently modified, then path for a total order.

use std::cmp::{Ordering, Reverse};

use crate::app::models::Candidate;

/// Compare two candidates; `Ordering::Less` means `a` is preferred
pub fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    rank_key(a)
        .cmp(&rank_key(b))
        .then_with(|| size_key(a).cmp(&size_key(b)))
        .then_with(|| recency_key(a).cmp(&recency_key(b)))
        .then_with(|| a.source_path.cmp(&b.source_path))
}

/// Sort candidates into preference order (stable)
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(compare_candidates);
}

fn rank_key(c: &Candidate) -> (bool, Option<u32>) {
    (c.rank.is_none(), c.rank)
}

fn size_key(c: &Candidate) -> (bool, Option<u64>) {
    (c.size_bytes.is_none(), c.size_bytes)
}

fn recency_key(c: &Candidate) -> (bool, Reverse<Option<chrono::DateTime<chrono::Utc>>>) {
    (c.modified.is_none(), Reverse(c.modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::path::PathBuf;

    fn candidate(name: &str, size: Option<u64>) -> Candidate {
        Candidate {
            source_path: PathBuf::from(format!("/nas/{}", name)),
            relative_path: PathBuf::from(name),
            size_bytes: size,
            modified: None,
            rank: None,
        }
    }

    fn names(candidates: &[Candidate]) -> Vec<String> {
        candidates
            .iter()
            .map(|c| c.relative_path.display().to_string())
            .collect()
    }

    #[test]
    fn test_smaller_files_preferred_without_rank() {
        let mut candidates = vec![
            candidate("big", Some(300)),
            candidate("small", Some(10)),
            candidate("mid", Some(100)),
            candidate("unknown", None),
        ];
        rank_candidates(&mut candidates);
        assert_eq!(names(&candidates), ["small", "mid", "big", "unknown"]);
    }

    #[test]
    fn test_rank_beats_size() {
        let mut candidates = vec![
            candidate("small-unranked", Some(1)),
            candidate("big-second", Some(500)).with_rank(1),
            candidate("big-first", Some(900)).with_rank(0),
        ];
        rank_candidates(&mut candidates);
        assert_eq!(
            names(&candidates),
            ["big-first", "big-second", "small-unranked"]
        );
    }

    #[test]
    fn test_recency_breaks_size_ties() {
        let now = Utc::now();
        let mut candidates = vec![
            candidate("no-mtime", Some(10)),
            candidate("old", Some(10)).with_modified(now - Duration::days(10)),
            candidate("new", Some(10)).with_modified(now),
        ];
        rank_candidates(&mut candidates);
        assert_eq!(names(&candidates), ["new", "old", "no-mtime"]);
    }

    #[test]
    fn test_path_is_final_tiebreak() {
        let a = candidate("a", Some(10));
        let b = candidate("b", Some(10));
        assert_eq!(compare_candidates(&a, &b), Ordering::Less);
        assert_eq!(compare_candidates(&b, &a), Ordering::Greater);
        assert_eq!(compare_candidates(&a, &a), Ordering::Equal);
    }
}
