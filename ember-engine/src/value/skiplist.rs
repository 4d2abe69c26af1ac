//! # Skiplist
//!
//! Purpose: Rank-indexed skiplist ordering sorted-set members by
//! (score ascending, member ascending). Each level link carries a span (the
//! number of level-0 steps it covers), which makes rank queries and
//! rank-range scans O(log n).
//!
//! ## Design Principles
//!
//! 1. **Index-Based Arena**: Nodes live in a dense `Vec` with a free-list
//!    (pattern); links are indices, not pointers, keeping the structure safe
//!    and cache-friendly.
//! 2. **Head Sentinel**: Slot 0 is a permanent header node that is never
//!    compared, so traversal needs no Option-of-head special cases.
//! 3. **Span Accounting**: Every link update keeps spans exact; rank math
//!    follows the classic zslInsert/zslDelete bookkeeping.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const MAX_LEVEL: usize = 32;
/// Probability of promoting a node one more level.
const LEVEL_P: f64 = 0.25;

#[derive(Debug, Clone)]
struct Link {
    forward: Option<usize>,
    /// Level-0 steps covered by `forward`; meaningless when forward is None.
    span: usize,
}

#[derive(Debug, Clone)]
struct Node {
    member: Vec<u8>,
    score: f64,
    backward: Option<usize>,
    links: Vec<Link>,
}

/// Rank-indexed skiplist keyed by (score, member).
#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    level: usize,
    len: usize,
    rng: SmallRng,
}

impl Default for SkipList {
    fn default() -> Self {
        SkipList::new()
    }
}

impl SkipList {
    /// Creates an empty skiplist.
    pub fn new() -> SkipList {
        let head = Node {
            member: Vec::new(),
            score: 0.0,
            backward: None,
            links: (0..MAX_LEVEL)
                .map(|_| Link {
                    forward: None,
                    span: 0,
                })
                .collect(),
        };
        SkipList {
            nodes: vec![Some(head)],
            free: Vec::new(),
            level: 1,
            len: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Number of elements (the header does not count).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the list holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, idx: usize) -> &Node {
        self.nodes[idx].as_ref().expect("live skiplist node")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.nodes[idx].as_mut().expect("live skiplist node")
    }

    /// Returns true when node `idx` orders strictly before (score, member).
    fn precedes(&self, idx: usize, score: f64, member: &[u8]) -> bool {
        let node = self.node(idx);
        match node.score.partial_cmp(&score) {
            Some(std::cmp::Ordering::Less) => true,
            Some(std::cmp::Ordering::Equal) => node.member.as_slice() < member,
            _ => false,
        }
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && self.rng.gen::<f64>() < LEVEL_P {
            level += 1;
        }
        level
    }

    /// Inserts a (member, score) pair. The caller (the sorted-set dict)
    /// guarantees the member is not already present.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) {
        let mut update = [0usize; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = 0;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.node(x).links[i].forward {
                if self.precedes(next, score, &member) {
                    rank[i] += self.node(x).links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let node_level = self.random_level();
        if node_level > self.level {
            for i in self.level..node_level {
                rank[i] = 0;
                update[i] = 0;
                self.node_mut(0).links[i].span = self.len;
            }
            self.level = node_level;
        }

        let idx = self.alloc(Node {
            member,
            score,
            backward: None,
            links: (0..node_level)
                .map(|_| Link {
                    forward: None,
                    span: 0,
                })
                .collect(),
        });

        for i in 0..node_level {
            let prev = update[i];
            let prev_forward = self.node(prev).links[i].forward;
            let prev_span = self.node(prev).links[i].span;

            self.node_mut(idx).links[i].forward = prev_forward;
            self.node_mut(idx).links[i].span = prev_span - (rank[0] - rank[i]);
            self.node_mut(prev).links[i].forward = Some(idx);
            self.node_mut(prev).links[i].span = rank[0] - rank[i] + 1;
        }
        // Levels above the new node get one more step to skip.
        for i in node_level..self.level {
            self.node_mut(update[i]).links[i].span += 1;
        }

        self.node_mut(idx).backward = if update[0] == 0 { None } else { Some(update[0]) };
        if let Some(next) = self.node(idx).links[0].forward {
            self.node_mut(next).backward = Some(idx);
        }
        self.len += 1;
    }

    /// Removes a (member, score) pair; returns false when absent.
    pub fn remove(&mut self, member: &[u8], score: f64) -> bool {
        let mut update = [0usize; MAX_LEVEL];
        let mut x = 0;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(x).links[i].forward {
                if self.precedes(next, score, member) {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let Some(target) = self.node(update[0]).links[0].forward else {
            return false;
        };
        {
            let node = self.node(target);
            if node.score != score || node.member != member {
                return false;
            }
        }

        for i in 0..self.level {
            let prev = update[i];
            if self.node(prev).links[i].forward == Some(target) {
                let removed_span = self.node(target).links.get(i).map(|l| l.span).unwrap_or(0);
                let removed_forward = self.node(target).links.get(i).and_then(|l| l.forward);
                let link = &mut self.node_mut(prev).links[i];
                link.span = link.span + removed_span - 1;
                link.forward = removed_forward;
            } else {
                self.node_mut(prev).links[i].span -= 1;
            }
        }

        let target_backward = self.node(target).backward;
        if let Some(next) = self.node(target).links[0].forward {
            self.node_mut(next).backward = target_backward;
        }

        while self.level > 1 && self.node(0).links[self.level - 1].forward.is_none() {
            self.level -= 1;
        }

        self.nodes[target] = None;
        self.free.push(target);
        self.len -= 1;
        true
    }

    /// 0-based rank of (member, score); None when absent.
    pub fn rank_of(&self, member: &[u8], score: f64) -> Option<usize> {
        let mut rank = 0;
        let mut x = 0;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(x).links[i].forward {
                let node = self.node(next);
                let ordered = match node.score.partial_cmp(&score) {
                    Some(std::cmp::Ordering::Less) => true,
                    Some(std::cmp::Ordering::Equal) => node.member.as_slice() <= member,
                    _ => false,
                };
                if ordered {
                    rank += self.node(x).links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            if x != 0 && self.node(x).member == member && self.node(x).score == score {
                return Some(rank - 1);
            }
        }
        None
    }

    /// Node at a 0-based rank.
    pub fn get_by_rank(&self, target: usize) -> Option<(&[u8], f64)> {
        if target >= self.len {
            return None;
        }
        let want = target + 1;
        let mut traversed = 0;
        let mut x = 0;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(x).links[i].forward {
                if traversed + self.node(x).links[i].span <= want {
                    traversed += self.node(x).links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            if traversed == want {
                let node = self.node(x);
                return Some((&node.member, node.score));
            }
        }
        None
    }

    /// Number of elements whose score orders strictly before `score`
    /// (`exclusive` false) or before-or-equal (`exclusive` true). This is
    /// the rank of the first element outside the bound, which turns
    /// score-range counting into two O(log n) queries.
    pub fn count_below(&self, score: f64, inclusive: bool) -> usize {
        let mut rank = 0;
        let mut x = 0;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(x).links[i].forward {
                let node = self.node(next);
                let below = if inclusive {
                    node.score <= score
                } else {
                    node.score < score
                };
                if below {
                    rank += self.node(x).links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
        }
        rank
    }

    /// In-order iterator over (member, score) starting at a 0-based rank.
    pub fn iter_from_rank(&self, rank: usize) -> SkipIter<'_> {
        let start = if rank >= self.len {
            None
        } else {
            // Walk to the rank via spans, then hand off to level-0 links.
            let mut want = rank + 1;
            let mut x = 0;
            let mut i = self.level;
            while i > 0 {
                i -= 1;
                while let Some(next) = self.node(x).links[i].forward {
                    if self.node(x).links[i].span <= want {
                        want -= self.node(x).links[i].span;
                        x = next;
                    } else {
                        break;
                    }
                    if want == 0 {
                        break;
                    }
                }
                if want == 0 {
                    break;
                }
            }
            if want == 0 { Some(x) } else { None }
        };
        SkipIter { list: self, at: start }
    }

    /// In-order iterator over all (member, score) pairs.
    pub fn iter(&self) -> SkipIter<'_> {
        self.iter_from_rank(0)
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }
}

/// In-order skiplist iterator.
pub struct SkipIter<'a> {
    list: &'a SkipList,
    at: Option<usize>,
}

impl<'a> Iterator for SkipIter<'a> {
    type Item = (&'a [u8], f64);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.at?;
        let node = self.list.nodes[idx].as_ref().expect("live skiplist node");
        self.at = node.links[0].forward;
        Some((&node.member, node.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(pairs: &[(&str, f64)]) -> SkipList {
        let mut list = SkipList::new();
        for (member, score) in pairs {
            list.insert(member.as_bytes().to_vec(), *score);
        }
        list
    }

    #[test]
    fn orders_by_score_then_member() {
        let list = build(&[("b", 2.0), ("a", 1.0), ("c", 2.0), ("d", 0.5)]);
        let order: Vec<&[u8]> = list.iter().map(|(m, _)| m).collect();
        assert_eq!(order, vec![&b"d"[..], b"a", b"b", b"c"]);
    }

    #[test]
    fn ranks_match_in_order_position() {
        let list = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(list.rank_of(b"a", 1.0), Some(0));
        assert_eq!(list.rank_of(b"b", 2.0), Some(1));
        assert_eq!(list.rank_of(b"c", 3.0), Some(2));
        assert_eq!(list.rank_of(b"b", 9.0), None);
        assert_eq!(list.rank_of(b"missing", 1.0), None);
    }

    #[test]
    fn get_by_rank_round_trips() {
        let pairs: Vec<(String, f64)> = (0..200).map(|i| (format!("m{i:03}"), i as f64)).collect();
        let mut list = SkipList::new();
        for (member, score) in &pairs {
            list.insert(member.as_bytes().to_vec(), *score);
        }
        for rank in [0usize, 1, 50, 123, 199] {
            let (member, score) = list.get_by_rank(rank).unwrap();
            assert_eq!(member, pairs[rank].0.as_bytes());
            assert_eq!(score, pairs[rank].1);
            assert_eq!(list.rank_of(member, score), Some(rank));
        }
        assert!(list.get_by_rank(200).is_none());
    }

    #[test]
    fn remove_keeps_spans_consistent() {
        let mut list = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        assert!(list.remove(b"b", 2.0));
        assert!(!list.remove(b"b", 2.0));
        assert_eq!(list.len(), 3);
        assert_eq!(list.rank_of(b"c", 3.0), Some(1));
        assert_eq!(list.rank_of(b"d", 4.0), Some(2));
        let (member, _) = list.get_by_rank(1).unwrap();
        assert_eq!(member, b"c");
    }

    #[test]
    fn count_below_bounds() {
        let list = build(&[("a", 1.0), ("b", 2.0), ("c", 2.0), ("d", 3.0)]);
        assert_eq!(list.count_below(2.0, false), 1);
        assert_eq!(list.count_below(2.0, true), 3);
        assert_eq!(list.count_below(0.0, true), 0);
        assert_eq!(list.count_below(99.0, true), 4);
    }

    #[test]
    fn iter_from_rank_starts_mid_list() {
        let list = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let tail: Vec<&[u8]> = list.iter_from_rank(1).map(|(m, _)| m).collect();
        assert_eq!(tail, vec![&b"b"[..], b"c"]);
        assert_eq!(list.iter_from_rank(3).count(), 0);
    }

    #[test]
    fn survives_heavy_churn() {
        let mut list = SkipList::new();
        for i in 0..500 {
            list.insert(format!("m{i}").into_bytes(), (i % 7) as f64);
        }
        assert_eq!(list.len(), 500);
        for i in (0..500).step_by(2) {
            assert!(list.remove(format!("m{i}").as_bytes(), (i % 7) as f64));
        }
        assert_eq!(list.len(), 250);
        // Remaining elements still traverse in order with exact ranks.
        let mut last: Option<(f64, Vec<u8>)> = None;
        for (rank, (member, score)) in list.iter().enumerate() {
            assert_eq!(list.rank_of(member, score), Some(rank));
            if let Some((prev_score, prev_member)) = &last {
                assert!(
                    *prev_score < score || (*prev_score == score && prev_member.as_slice() < member)
                );
            }
            last = Some((score, member.to_vec()));
        }
    }
}
