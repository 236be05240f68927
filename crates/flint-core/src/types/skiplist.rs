//! Span-carrying probabilistic skiplist, the ordered index behind
//! [`super::SortedSet`].
//!
//! Total order is (score, member): ties in score break on the member
//! string. Each node stores, per level, a forward link and a *span* —
//! the number of level-0 nodes the link skips — so rank queries and
//! rank ranges run in O(log n).
//!
//! Nodes live in an arena (`Vec<Node>`) and links are indices into it.
//! Slot 0 is the header sentinel; freed slots are recycled through a
//! free list. Indices stay stable for as long as a node is linked,
//! which keeps forward/backward links valid without `unsafe` or
//! reference counting.

use rand::Rng;

/// Height cap for any node.
pub const MAX_LEVEL: usize = 16;

/// Branching probability 0.25, expressed against a 16-bit draw.
const BRANCH_THRESHOLD: u16 = u16::MAX / 4;

/// Arena index of the header sentinel.
const HEADER: usize = 0;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    forward: Option<usize>,
    span: i64,
}

#[derive(Debug, Clone)]
struct Node {
    member: String,
    score: f64,
    backward: Option<usize>,
    links: Vec<Link>,
}

impl Node {
    fn new(member: String, score: f64, level: usize) -> Self {
        Self {
            member,
            score,
            backward: None,
            links: vec![Link::default(); level],
        }
    }
}

/// The skiplist. Length and rank arithmetic use `i64` to match the
/// command layer, which deals in signed ranks.
#[derive(Debug, Clone)]
pub struct SkipList {
    arena: Vec<Node>,
    free: Vec<usize>,
    tail: Option<usize>,
    length: i64,
    level: usize,
}

/// Draws a level in [1, MAX_LEVEL] with P(level > k) = 0.25^k.
fn random_level() -> usize {
    let mut rng = rand::rng();
    let mut level = 1;
    while level < MAX_LEVEL && rng.random::<u16>() < BRANCH_THRESHOLD {
        level += 1;
    }
    level
}

impl SkipList {
    pub fn new() -> Self {
        Self {
            arena: vec![Node::new(String::new(), 0.0, MAX_LEVEL)],
            free: Vec::new(),
            tail: None,
            length: 0,
            level: 1,
        }
    }

    pub fn len(&self) -> i64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// True if `(score, member)` sorts before the node at `id`.
    fn precedes(&self, id: usize, score: f64, member: &str) -> bool {
        let n = &self.arena[id];
        n.score < score || (n.score == score && n.member.as_str() < member)
    }

    fn alloc(&mut self, member: String, score: f64, level: usize) -> usize {
        match self.free.pop() {
            Some(id) => {
                self.arena[id] = Node::new(member, score, level);
                id
            }
            None => {
                self.arena.push(Node::new(member, score, level));
                self.arena.len() - 1
            }
        }
    }

    /// Inserts a member. The caller guarantees the member is not
    /// already present (the sorted set's dict enforces uniqueness).
    pub fn insert(&mut self, member: String, score: f64) {
        let mut update = [HEADER; MAX_LEVEL];
        let mut rank = [0i64; MAX_LEVEL];

        // find the insertion point, accumulating traversed spans so
        // rank[i] is the rank of update[i]
        let mut node = HEADER;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.arena[node].links[i].forward {
                if !self.precedes(next, score, &member) {
                    break;
                }
                rank[i] += self.arena[node].links[i].span;
                node = next;
            }
            update[i] = node;
        }

        let level = random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = HEADER;
                self.arena[HEADER].links[i].span = self.length;
            }
            self.level = level;
        }

        let id = self.alloc(member, score, level);
        for i in 0..level {
            let prev = update[i];
            let prev_link = self.arena[prev].links[i];
            let skipped = rank[0] - rank[i];

            self.arena[id].links[i] = Link {
                forward: prev_link.forward,
                span: prev_link.span - skipped,
            };
            self.arena[prev].links[i] = Link {
                forward: Some(id),
                span: skipped + 1,
            };
        }

        // levels above the new node just skip one more node
        for i in level..self.level {
            self.arena[update[i]].links[i].span += 1;
        }

        self.arena[id].backward = if update[0] == HEADER {
            None
        } else {
            Some(update[0])
        };
        if let Some(next) = self.arena[id].links[0].forward {
            self.arena[next].backward = Some(id);
        } else {
            self.tail = Some(id);
        }
        self.length += 1;
    }

    /// Removes the node matching `(score, member)` exactly. Returns
    /// `true` if it was present.
    pub fn remove(&mut self, member: &str, score: f64) -> bool {
        let mut update = [HEADER; MAX_LEVEL];
        let mut node = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[node].links[i].forward {
                if !self.precedes(next, score, member) {
                    break;
                }
                node = next;
            }
            update[i] = node;
        }

        match self.arena[node].links[0].forward {
            Some(target)
                if self.arena[target].score == score && self.arena[target].member == member =>
            {
                self.remove_node(target, &update);
                true
            }
            _ => false,
        }
    }

    /// Unlinks `node` from every level, given the per-level
    /// predecessors in `update`.
    fn remove_node(&mut self, node: usize, update: &[usize; MAX_LEVEL]) {
        for i in 0..self.level {
            if self.arena[update[i]].links[i].forward == Some(node) {
                let removed = self.arena[node].links[i];
                let prev = &mut self.arena[update[i]].links[i];
                prev.span += removed.span - 1;
                prev.forward = removed.forward;
            } else {
                self.arena[update[i]].links[i].span -= 1;
            }
        }

        if let Some(next) = self.arena[node].links[0].forward {
            self.arena[next].backward = self.arena[node].backward;
        } else {
            self.tail = self.arena[node].backward;
        }

        while self.level > 1 && self.arena[HEADER].links[self.level - 1].forward.is_none() {
            self.level -= 1;
        }
        self.length -= 1;
        self.free.push(node);
    }

    /// Returns the 1-based rank of `(member, score)`, or 0 when not
    /// found. Rank 0 is reserved for "missing" — the header.
    pub fn rank_of(&self, member: &str, score: f64) -> i64 {
        let mut rank = 0;
        let mut node = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[node].links[i].forward {
                let n = &self.arena[next];
                let advance =
                    n.score < score || (n.score == score && n.member.as_str() <= member);
                if !advance {
                    break;
                }
                rank += self.arena[node].links[i].span;
                node = next;
            }
            if node != HEADER && self.arena[node].member == member {
                return rank;
            }
        }
        0
    }

    /// Returns the node at a 1-based rank.
    fn node_at_rank(&self, rank: i64) -> Option<usize> {
        let mut traversed = 0;
        let mut node = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[node].links[i].forward {
                if traversed + self.arena[node].links[i].span > rank {
                    break;
                }
                traversed += self.arena[node].links[i].span;
                node = next;
            }
            if traversed == rank && node != HEADER {
                return Some(node);
            }
        }
        None
    }

    /// Returns `(member, score)` at a 1-based rank.
    pub fn element_at_rank(&self, rank: i64) -> Option<(&str, f64)> {
        self.node_at_rank(rank)
            .map(|id| (self.arena[id].member.as_str(), self.arena[id].score))
    }

    /// True if some node's score falls inside `[min, max]`.
    fn has_in_range(&self, min: &super::ScoreBorder, max: &super::ScoreBorder) -> bool {
        // empty range
        if min.value > max.value || (min.value == max.value && (min.exclude || max.exclude)) {
            return false;
        }
        // min above the greatest score
        let Some(tail) = self.tail else {
            return false;
        };
        if !min.less(self.arena[tail].score) {
            return false;
        }
        // max below the smallest score
        let Some(first) = self.arena[HEADER].links[0].forward else {
            return false;
        };
        max.greater(self.arena[first].score)
    }

    /// First node (ascending) whose score is inside the range.
    fn first_in_range(&self, min: &super::ScoreBorder, max: &super::ScoreBorder) -> Option<usize> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut node = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[node].links[i].forward {
                if min.less(self.arena[next].score) {
                    break;
                }
                node = next;
            }
        }
        // the range is non-empty, so the successor exists
        let first = self.arena[node].links[0].forward?;
        if max.greater(self.arena[first].score) {
            Some(first)
        } else {
            None
        }
    }

    /// Last node (ascending) whose score is inside the range.
    fn last_in_range(&self, min: &super::ScoreBorder, max: &super::ScoreBorder) -> Option<usize> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut node = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[node].links[i].forward {
                if !max.greater(self.arena[next].score) {
                    break;
                }
                node = next;
            }
        }
        if node != HEADER && min.less(self.arena[node].score) {
            Some(node)
        } else {
            None
        }
    }

    /// Walks nodes whose scores fall inside the border range,
    /// ascending or descending, skipping `offset` and visiting at most
    /// `limit` (negative = unlimited). The consumer returns `false` to
    /// stop early.
    pub fn for_each_in_score_range(
        &self,
        min: &super::ScoreBorder,
        max: &super::ScoreBorder,
        offset: i64,
        limit: i64,
        desc: bool,
        mut consumer: impl FnMut(&str, f64) -> bool,
    ) {
        let mut cursor = if desc {
            self.last_in_range(min, max)
        } else {
            self.first_in_range(min, max)
        };

        let mut skip = offset;
        while skip > 0 {
            let Some(id) = cursor else { return };
            cursor = self.step(id, desc);
            skip -= 1;
        }

        let mut visited = 0;
        while let Some(id) = cursor {
            if limit >= 0 && visited >= limit {
                break;
            }
            let node = &self.arena[id];
            // stop at the first node out of range
            if !min.less(node.score) || !max.greater(node.score) {
                break;
            }
            if !consumer(&node.member, node.score) {
                break;
            }
            visited += 1;
            cursor = self.step(id, desc);
        }
    }

    fn step(&self, id: usize, desc: bool) -> Option<usize> {
        if desc {
            self.arena[id].backward
        } else {
            self.arena[id].links[0].forward
        }
    }

    /// Visits ranks [start, stop) ascending (0-based). The caller
    /// clamps the window to `[0, len]`.
    pub fn for_each_by_rank(
        &self,
        start: i64,
        stop: i64,
        desc: bool,
        mut consumer: impl FnMut(&str, f64) -> bool,
    ) {
        if start < 0 || stop <= start || start >= self.length {
            return;
        }
        let stop = stop.min(self.length);

        let mut cursor = if desc {
            self.node_at_rank(self.length - start)
        } else {
            self.node_at_rank(start + 1)
        };

        for _ in 0..(stop - start) {
            let Some(id) = cursor else { return };
            let node = &self.arena[id];
            if !consumer(&node.member, node.score) {
                return;
            }
            cursor = self.step(id, desc);
        }
    }

    /// Removes every node with a score inside the border range,
    /// returning the removed `(member, score)` pairs in ascending
    /// order.
    pub fn remove_range_by_score(
        &mut self,
        min: &super::ScoreBorder,
        max: &super::ScoreBorder,
    ) -> Vec<(String, f64)> {
        let mut update = [HEADER; MAX_LEVEL];
        let mut node = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[node].links[i].forward {
                if min.less(self.arena[next].score) {
                    break;
                }
                node = next;
            }
            update[i] = node;
        }

        let mut removed = Vec::new();
        let mut cursor = self.arena[node].links[0].forward;
        while let Some(id) = cursor {
            if !max.greater(self.arena[id].score) {
                break;
            }
            cursor = self.arena[id].links[0].forward;
            removed.push((self.arena[id].member.clone(), self.arena[id].score));
            self.remove_node(id, &update);
        }
        removed
    }

    /// Removes nodes with 1-based ranks in [start, stop), returning
    /// the removed `(member, score)` pairs in ascending order.
    pub fn remove_range_by_rank(&mut self, start: i64, stop: i64) -> Vec<(String, f64)> {
        let mut traversed = 0;
        let mut update = [HEADER; MAX_LEVEL];
        let mut node = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[node].links[i].forward {
                if traversed + self.arena[node].links[i].span >= start {
                    break;
                }
                traversed += self.arena[node].links[i].span;
                node = next;
            }
            update[i] = node;
        }

        let mut rank = traversed + 1;
        let mut removed = Vec::new();
        let mut cursor = self.arena[node].links[0].forward;
        while let Some(id) = cursor {
            if rank >= stop {
                break;
            }
            cursor = self.arena[id].links[0].forward;
            removed.push((self.arena[id].member.clone(), self.arena[id].score));
            self.remove_node(id, &update);
            rank += 1;
        }
        removed
    }

    /// Sums spans along the chain at `level`, including the tail
    /// link's span to the end, for invariant checks. The total must
    /// equal the list length at every active level.
    #[cfg(test)]
    fn span_sum(&self, level: usize) -> i64 {
        let mut sum = 0;
        let mut node = HEADER;
        loop {
            sum += self.arena[node].links[level].span;
            match self.arena[node].links[level].forward {
                Some(next) => node = next,
                None => return sum,
            }
        }
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}
