//! # Sorted-Set Values
//!
//! Purpose: Sorted sets with a listpack encoding for small member counts and
//! a skiplist-plus-dict encoding for the rest. The dict maps member→score
//! and the skiplist orders (score, member); the two structures agree on
//! membership and scores after every operation.

use ahash::RandomState;
use hashbrown::HashMap;

use ember_common::{EmberError, EmberResult};

use super::skiplist::SkipList;

/// Member count above which a listpack converts to the skiplist encoding.
pub const ZSET_MAX_LISTPACK_ENTRIES: usize = 128;
/// Member size above which a listpack converts to the skiplist encoding.
pub const ZSET_MAX_LISTPACK_VALUE: usize = 64;

/// Outcome of a sorted-set add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZAddOutcome {
    /// The member was new.
    Added,
    /// The member existed; its score was replaced (possibly unchanged).
    Updated,
}

/// One end of a score interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Incl(f64),
    Excl(f64),
}

impl ScoreBound {
    /// Parses a ZRANGEBYSCORE-style bound: `-inf`, `+inf`, `(1.5`, `1.5`.
    pub fn parse(text: &[u8]) -> EmberResult<ScoreBound> {
        match text {
            b"-inf" => Ok(ScoreBound::NegInf),
            b"+inf" | b"inf" => Ok(ScoreBound::PosInf),
            _ if text.first() == Some(&b'(') => {
                Ok(ScoreBound::Excl(parse_score(&text[1..])?))
            }
            _ => Ok(ScoreBound::Incl(parse_score(text)?)),
        }
    }

    fn admits_from_below(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Incl(min) => score >= *min,
            ScoreBound::Excl(min) => score > *min,
        }
    }

    fn admits_from_above(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Incl(max) => score <= *max,
            ScoreBound::Excl(max) => score < *max,
        }
    }
}

fn parse_score(text: &[u8]) -> EmberResult<f64> {
    let text = std::str::from_utf8(text).map_err(|_| EmberError::NotAFloat)?;
    let score: f64 = text.trim().parse().map_err(|_| EmberError::NotAFloat)?;
    if score.is_nan() {
        return Err(EmberError::NotAFloat);
    }
    Ok(score)
}

#[derive(Debug, Clone)]
enum ZSetRepr {
    /// Small sets as a vector sorted by (score, member).
    Listpack(Vec<(Vec<u8>, f64)>),
    /// Skiplist ordered by (score, member) paired with a member→score dict.
    Skip {
        list: SkipList,
        dict: HashMap<Vec<u8>, f64, RandomState>,
    },
}

/// A sorted-set value with encoding transitions.
#[derive(Debug, Clone)]
pub struct SortedSetValue {
    repr: ZSetRepr,
}

impl Default for SortedSetValue {
    fn default() -> Self {
        SortedSetValue::new()
    }
}

impl SortedSetValue {
    /// Creates an empty listpack-encoded sorted set.
    pub fn new() -> SortedSetValue {
        SortedSetValue {
            repr: ZSetRepr::Listpack(Vec::new()),
        }
    }

    /// Inserts or rescores a member.
    pub fn add(&mut self, member: &[u8], score: f64) -> ZAddOutcome {
        let outcome = match &mut self.repr {
            ZSetRepr::Listpack(items) => {
                match items.iter().position(|(m, _)| m == member) {
                    Some(at) => {
                        items.remove(at);
                        insert_sorted(items, member.to_vec(), score);
                        ZAddOutcome::Updated
                    }
                    None => {
                        insert_sorted(items, member.to_vec(), score);
                        ZAddOutcome::Added
                    }
                }
            }
            ZSetRepr::Skip { list, dict } => match dict.insert(member.to_vec(), score) {
                Some(old) => {
                    list.remove(member, old);
                    list.insert(member.to_vec(), score);
                    ZAddOutcome::Updated
                }
                None => {
                    list.insert(member.to_vec(), score);
                    ZAddOutcome::Added
                }
            },
        };
        self.maybe_upgrade(member.len());
        outcome
    }

    /// Removes a member; returns false when absent.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match &mut self.repr {
            ZSetRepr::Listpack(items) => {
                let before = items.len();
                items.retain(|(m, _)| m != member);
                items.len() != before
            }
            ZSetRepr::Skip { list, dict } => match dict.remove(member) {
                Some(score) => {
                    list.remove(member, score);
                    true
                }
                None => false,
            },
        }
    }

    /// Score of a member.
    pub fn score_of(&self, member: &[u8]) -> Option<f64> {
        match &self.repr {
            ZSetRepr::Listpack(items) => items
                .iter()
                .find(|(m, _)| m == member)
                .map(|(_, score)| *score),
            ZSetRepr::Skip { dict, .. } => dict.get(member).copied(),
        }
    }

    /// Adds `delta` to a member's score, inserting at `delta` when absent.
    /// Fails when the result would be NaN (opposite infinities).
    pub fn incr_score(&mut self, member: &[u8], delta: f64) -> EmberResult<f64> {
        let next = match self.score_of(member) {
            Some(current) => {
                let next = current + delta;
                if next.is_nan() {
                    return Err(EmberError::NotAFloat);
                }
                next
            }
            None => delta,
        };
        self.add(member, next);
        Ok(next)
    }

    /// 0-based rank of a member in ascending order (`reverse` flips).
    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        let forward = match &self.repr {
            ZSetRepr::Listpack(items) => items.iter().position(|(m, _)| m == member)?,
            ZSetRepr::Skip { list, dict } => {
                let score = *dict.get(member)?;
                list.rank_of(member, score)?
            }
        };
        if reverse {
            Some(self.len() - 1 - forward)
        } else {
            Some(forward)
        }
    }

    /// Members in the inclusive rank range `[start, stop]` with negative
    /// indices counting from the end.
    pub fn range_by_rank(&self, start: i64, stop: i64, reverse: bool) -> Vec<(Vec<u8>, f64)> {
        let len = self.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let start = normalize(start, len).max(0);
        let stop = normalize(stop, len).min(len - 1);
        if start > stop {
            return Vec::new();
        }

        let (lo, hi) = if reverse {
            (len - 1 - stop, len - 1 - start)
        } else {
            (start, stop)
        };
        let mut slice: Vec<(Vec<u8>, f64)> = match &self.repr {
            ZSetRepr::Listpack(items) => items[lo as usize..=hi as usize].to_vec(),
            ZSetRepr::Skip { list, .. } => list
                .iter_from_rank(lo as usize)
                .take((hi - lo + 1) as usize)
                .map(|(m, s)| (m.to_vec(), s))
                .collect(),
        };
        if reverse {
            slice.reverse();
        }
        slice
    }

    /// Members whose score falls within `[min, max]` under the given bounds.
    pub fn range_by_score(
        &self,
        min: ScoreBound,
        max: ScoreBound,
        reverse: bool,
    ) -> Vec<(Vec<u8>, f64)> {
        let mut result: Vec<(Vec<u8>, f64)> = match &self.repr {
            ZSetRepr::Listpack(items) => items
                .iter()
                .filter(|(_, s)| min.admits_from_below(*s) && max.admits_from_above(*s))
                .cloned()
                .collect(),
            ZSetRepr::Skip { list, .. } => {
                let skip = match min {
                    ScoreBound::NegInf => 0,
                    ScoreBound::PosInf => list.len(),
                    ScoreBound::Incl(s) => list.count_below(s, false),
                    ScoreBound::Excl(s) => list.count_below(s, true),
                };
                list.iter_from_rank(skip)
                    .take_while(|(_, s)| max.admits_from_above(*s))
                    .map(|(m, s)| (m.to_vec(), s))
                    .collect()
            }
        };
        if reverse {
            result.reverse();
        }
        result
    }

    /// Number of members whose score falls within the bounds.
    pub fn count_by_score(&self, min: ScoreBound, max: ScoreBound) -> usize {
        match &self.repr {
            ZSetRepr::Listpack(items) => items
                .iter()
                .filter(|(_, s)| min.admits_from_below(*s) && max.admits_from_above(*s))
                .count(),
            ZSetRepr::Skip { list, .. } => {
                let below_min = match min {
                    ScoreBound::NegInf => 0,
                    ScoreBound::PosInf => list.len(),
                    ScoreBound::Incl(s) => list.count_below(s, false),
                    ScoreBound::Excl(s) => list.count_below(s, true),
                };
                let within_max = match max {
                    ScoreBound::NegInf => 0,
                    ScoreBound::PosInf => list.len(),
                    ScoreBound::Incl(s) => list.count_below(s, true),
                    ScoreBound::Excl(s) => list.count_below(s, false),
                };
                within_max.saturating_sub(below_min)
            }
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        match &self.repr {
            ZSetRepr::Listpack(items) => items.len(),
            ZSetRepr::Skip { dict, .. } => dict.len(),
        }
    }

    /// Returns true when the set holds no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// OBJECT ENCODING name for the current representation.
    pub fn encoding_name(&self) -> &'static str {
        match &self.repr {
            ZSetRepr::Listpack(_) => "listpack",
            ZSetRepr::Skip { .. } => "skiplist",
        }
    }

    /// Debug-only agreement check between dict and skiplist.
    #[cfg(test)]
    fn assert_consistent(&self) {
        if let ZSetRepr::Skip { list, dict } = &self.repr {
            assert_eq!(list.len(), dict.len());
            for (member, score) in list.iter() {
                assert_eq!(dict.get(member), Some(&score));
            }
        }
    }

    /// Checked at the end of every write; the transition is one-way.
    fn maybe_upgrade(&mut self, incoming_len: usize) {
        let ZSetRepr::Listpack(items) = &mut self.repr else {
            return;
        };
        if items.len() > ZSET_MAX_LISTPACK_ENTRIES || incoming_len > ZSET_MAX_LISTPACK_VALUE {
            let drained = std::mem::take(items);
            let mut list = SkipList::new();
            let mut dict: HashMap<Vec<u8>, f64, RandomState> = HashMap::default();
            for (member, score) in drained {
                list.insert(member.clone(), score);
                dict.insert(member, score);
            }
            self.repr = ZSetRepr::Skip { list, dict };
        }
    }
}

fn normalize(idx: i64, len: i64) -> i64 {
    if idx < 0 { len + idx } else { idx }
}

fn insert_sorted(items: &mut Vec<(Vec<u8>, f64)>, member: Vec<u8>, score: f64) {
    let at = items
        .partition_point(|(m, s)| *s < score || (*s == score && m.as_slice() < member.as_slice()));
    items.insert(at, (member, score));
}
