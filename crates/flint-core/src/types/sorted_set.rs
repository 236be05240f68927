//! Sorted set: unique members with float scores, dual-indexed.
//!
//! A `HashMap` gives O(1) member→score lookups; the span-carrying
//! [`SkipList`] gives O(log n) ordered access by rank and score. The
//! two indices always agree: every mutation goes through methods that
//! update both.

use std::collections::HashMap;

use super::border::ScoreBorder;
use super::skiplist::SkipList;

/// A collection of unique members, each carrying an `f64` score,
/// ordered by (score, member).
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    dict: HashMap<String, f64>,
    list: SkipList,
}

impl SortedSet {
    pub fn new() -> Self {
        Self {
            dict: HashMap::new(),
            list: SkipList::new(),
        }
    }

    /// Number of members.
    pub fn len(&self) -> i64 {
        self.dict.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Adds a member or updates its score. Returns `true` iff the
    /// member was new. An existing member keeps its skiplist node
    /// unless the score actually changed.
    pub fn add(&mut self, member: &str, score: f64) -> bool {
        match self.dict.insert(member.to_owned(), score) {
            Some(old) => {
                if old != score {
                    self.list.remove(member, old);
                    self.list.insert(member.to_owned(), score);
                }
                false
            }
            None => {
                self.list.insert(member.to_owned(), score);
                true
            }
        }
    }

    /// Returns the score of a member.
    pub fn score(&self, member: &str) -> Option<f64> {
        self.dict.get(member).copied()
    }

    /// Removes a member. Returns `true` if it existed.
    pub fn remove(&mut self, member: &str) -> bool {
        match self.dict.remove(member) {
            Some(score) => {
                self.list.remove(member, score);
                true
            }
            None => false,
        }
    }

    /// Returns the 0-based rank of a member, ascending by default,
    /// descending when `desc`. Missing members rank −1.
    pub fn rank(&self, member: &str, desc: bool) -> i64 {
        let Some(&score) = self.dict.get(member) else {
            return -1;
        };
        let r = self.list.rank_of(member, score);
        if desc {
            self.list.len() - r
        } else {
            r - 1
        }
    }

    /// Visits members with ranks in the half-open window [start, stop),
    /// ascending or descending. Out-of-bounds windows are clamped.
    pub fn for_each(
        &self,
        start: i64,
        stop: i64,
        desc: bool,
        consumer: impl FnMut(&str, f64) -> bool,
    ) {
        self.list.for_each_by_rank(start, stop, desc, consumer);
    }

    /// Returns members with ranks in [start, stop).
    pub fn range(&self, start: i64, stop: i64, desc: bool) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        self.for_each(start, stop, desc, |member, score| {
            out.push((member.to_owned(), score));
            true
        });
        out
    }

    /// Counts members whose score falls inside the borders.
    pub fn count(&self, min: &ScoreBorder, max: &ScoreBorder) -> i64 {
        let mut n = 0;
        self.list
            .for_each_in_score_range(min, max, 0, -1, false, |_, _| {
                n += 1;
                true
            });
        n
    }

    /// Returns members whose score falls inside the borders, skipping
    /// `offset` and returning at most `limit` (negative = no limit).
    pub fn range_by_score(
        &self,
        min: &ScoreBorder,
        max: &ScoreBorder,
        offset: i64,
        limit: i64,
        desc: bool,
    ) -> Vec<(String, f64)> {
        if limit == 0 || offset < 0 {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.list
            .for_each_in_score_range(min, max, offset, limit, desc, |member, score| {
                out.push((member.to_owned(), score));
                true
            });
        out
    }

    /// Removes members whose score falls inside the borders. Returns
    /// the number removed.
    pub fn remove_by_score(&mut self, min: &ScoreBorder, max: &ScoreBorder) -> i64 {
        let removed = self.list.remove_range_by_score(min, max);
        for (member, _) in &removed {
            self.dict.remove(member);
        }
        removed.len() as i64
    }

    /// Removes members with 0-based ranks in the half-open window
    /// [start, stop). Returns the number removed.
    pub fn remove_by_rank(&mut self, start: i64, stop: i64) -> i64 {
        let removed = self.list.remove_range_by_rank(start + 1, stop + 1);
        for (member, _) in &removed {
            self.dict.remove(member);
        }
        removed.len() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(members: &[(&str, f64)]) -> SortedSet {
        let mut set = SortedSet::new();
        for (member, score) in members {
            set.add(member, *score);
        }
        set
    }

    fn names(pairs: &[(String, f64)]) -> Vec<&str> {
        pairs.iter().map(|(m, _)| m.as_str()).collect()
    }

    #[test]
    fn add_returns_true_only_for_new_members() {
        let mut set = SortedSet::new();
        assert!(set.add("a", 1.0));
        assert!(!set.add("a", 2.0));
        assert_eq!(set.score("a"), Some(2.0));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn add_same_score_is_a_noop_reorder() {
        let mut set = build(&[("a", 1.0), ("b", 2.0)]);
        assert!(!set.add("a", 1.0));
        assert_eq!(set.rank("a", false), 0);
    }

    #[test]
    fn rank_ascending_and_descending() {
        let set = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(set.rank("a", false), 0);
        assert_eq!(set.rank("c", false), 2);
        assert_eq!(set.rank("a", true), 2);
        assert_eq!(set.rank("c", true), 0);
        assert_eq!(set.rank("missing", false), -1);
        assert_eq!(set.rank("missing", true), -1);
    }

    #[test]
    fn score_ties_break_on_member() {
        let set = build(&[("b", 2.0), ("c", 2.0), ("a", 1.0)]);
        assert_eq!(names(&set.range(0, 3, false)), vec!["a", "b", "c"]);
    }

    #[test]
    fn update_score_changes_rank() {
        let mut set = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        set.add("a", 9.0);
        assert_eq!(set.rank("a", false), 2);
        assert_eq!(set.rank("b", false), 0);
    }

    #[test]
    fn rank_consistency_after_mutations() {
        // rank(m) == r implies range(r, r+1) == [m]
        let mut set = build(&[("a", 5.0), ("b", 3.0), ("c", 8.0), ("d", 3.0)]);
        set.remove("b");
        set.add("e", 1.0);
        set.add("c", 0.5);

        for member in ["a", "c", "d", "e"] {
            let r = set.rank(member, false);
            assert!(r >= 0);
            let window = set.range(r, r + 1, false);
            assert_eq!(names(&window), vec![member], "rank {r} of {member}");
        }
    }

    #[test]
    fn range_windows() {
        let set = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        assert_eq!(names(&set.range(0, 4, false)), vec!["a", "b", "c", "d"]);
        assert_eq!(names(&set.range(1, 3, false)), vec!["b", "c"]);
        assert_eq!(names(&set.range(0, 2, true)), vec!["d", "c"]);
        assert!(set.range(4, 8, false).is_empty());
        assert!(set.range(2, 2, false).is_empty());
    }

    #[test]
    fn count_respects_borders() {
        let set = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(
            set.count(&ScoreBorder::inclusive(1.0), &ScoreBorder::inclusive(3.0)),
            3
        );
        assert_eq!(
            set.count(
                &ScoreBorder {
                    value: 1.0,
                    exclude: true
                },
                &ScoreBorder::inclusive(3.0)
            ),
            2
        );
        assert_eq!(set.count(&ScoreBorder::NEG_INF, &ScoreBorder::POS_INF), 3);
    }

    #[test]
    fn range_by_score_with_limit() {
        let set = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        let got = set.range_by_score(
            &ScoreBorder::inclusive(2.0),
            &ScoreBorder::POS_INF,
            0,
            2,
            false,
        );
        assert_eq!(names(&got), vec!["b", "c"]);

        // negative limit means everything
        let got = set.range_by_score(&ScoreBorder::NEG_INF, &ScoreBorder::POS_INF, 1, -1, true);
        assert_eq!(names(&got), vec!["c", "b", "a"]);

        // zero limit short-circuits
        assert!(set
            .range_by_score(&ScoreBorder::NEG_INF, &ScoreBorder::POS_INF, 0, 0, false)
            .is_empty());
    }

    #[test]
    fn remove_by_score_drops_both_indices() {
        let mut set = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let removed = set.remove_by_score(
            &ScoreBorder::inclusive(2.0),
            &ScoreBorder::inclusive(3.0),
        );
        assert_eq!(removed, 2);
        assert_eq!(set.len(), 1);
        assert_eq!(set.score("b"), None);
        assert_eq!(set.rank("a", false), 0);
    }

    #[test]
    fn remove_by_rank_half_open() {
        let mut set = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        let removed = set.remove_by_rank(1, 3);
        assert_eq!(removed, 2);
        assert_eq!(names(&set.range(0, 9, false)), vec!["a", "d"]);
    }

    #[test]
    fn infinity_scores_sort_at_the_edges() {
        let set = build(&[
            ("mid", 0.0),
            ("top", f64::INFINITY),
            ("bottom", f64::NEG_INFINITY),
        ]);
        assert_eq!(names(&set.range(0, 3, false)), vec!["bottom", "mid", "top"]);
    }
}
