//! # Set Values
//!
//! Purpose: Unordered sets with three encodings. All-integer sets start as a
//! packed [`IntSet`], small non-integer sets as a listpack, and everything
//! else as a hash table. Threshold breaches convert one way only.
//!
//! Member ordering follows the encoding: ascending numeric order on IntSet,
//! insertion order on Listpack, hash order on Hashtable.

use ahash::RandomState;
use hashbrown::HashSet;
use rand::Rng;

use super::intset::IntSet;
use super::string::parse_strict_i64;

/// Integer count above which an intset converts to a hash table.
pub const SET_MAX_INTSET_ENTRIES: usize = 512;
/// Element count above which a listpack set converts to a hash table.
pub const SET_MAX_LISTPACK_ENTRIES: usize = 128;
/// Element size above which a listpack set converts to a hash table.
pub const SET_MAX_LISTPACK_VALUE: usize = 64;

#[derive(Debug, Clone)]
enum SetRepr {
    IntSet(IntSet),
    Listpack(Vec<Vec<u8>>),
    Table(HashSet<Vec<u8>, RandomState>),
}

/// A set value with encoding transitions.
#[derive(Debug, Clone)]
pub struct SetValue {
    repr: SetRepr,
}

impl Default for SetValue {
    fn default() -> Self {
        SetValue::new()
    }
}

impl SetValue {
    /// Creates an empty intset-encoded set.
    pub fn new() -> SetValue {
        SetValue {
            repr: SetRepr::IntSet(IntSet::new()),
        }
    }

    /// Adds a member; returns false when it was already present.
    pub fn add(&mut self, member: &[u8]) -> bool {
        // A non-integer member ends the intset encoding before insertion.
        if matches!(self.repr, SetRepr::IntSet(_)) && parse_strict_i64(member).is_none() {
            self.convert_from_intset(member.len());
        }
        let added = match &mut self.repr {
            SetRepr::IntSet(ints) => match parse_strict_i64(member) {
                Some(n) => ints.insert(n),
                // Unreachable after the conversion guard above.
                None => false,
            },
            SetRepr::Listpack(items) => {
                if items.iter().any(|m| m == member) {
                    false
                } else {
                    items.push(member.to_vec());
                    true
                }
            }
            SetRepr::Table(table) => table.insert(member.to_vec()),
        };
        self.maybe_upgrade();
        added
    }

    /// Removes a member; returns false when absent.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match &mut self.repr {
            SetRepr::IntSet(ints) => match parse_strict_i64(member) {
                Some(n) => ints.remove(n),
                None => false,
            },
            SetRepr::Listpack(items) => {
                let before = items.len();
                items.retain(|m| m != member);
                items.len() != before
            }
            SetRepr::Table(table) => table.remove(member),
        }
    }

    /// Membership test.
    pub fn contains(&self, member: &[u8]) -> bool {
        match &self.repr {
            SetRepr::IntSet(ints) => {
                parse_strict_i64(member).is_some_and(|n| ints.contains(n))
            }
            SetRepr::Listpack(items) => items.iter().any(|m| m == member),
            SetRepr::Table(table) => table.contains(member),
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        match &self.repr {
            SetRepr::IntSet(ints) => ints.len(),
            SetRepr::Listpack(items) => items.len(),
            SetRepr::Table(table) => table.len(),
        }
    }

    /// Returns true when the set holds no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materializes all members in encoding order.
    pub fn members(&self) -> Vec<Vec<u8>> {
        match &self.repr {
            SetRepr::IntSet(ints) => ints.iter().map(|n| n.to_string().into_bytes()).collect(),
            SetRepr::Listpack(items) => items.clone(),
            SetRepr::Table(table) => table.iter().cloned().collect(),
        }
    }

    /// Removes and returns a uniformly random member.
    pub fn pop_random<R: Rng>(&mut self, rng: &mut R) -> Option<Vec<u8>> {
        let member = self.random_member(rng)?;
        self.remove(&member);
        Some(member)
    }

    /// Returns a uniformly random member without removing it.
    pub fn random_member<R: Rng>(&self, rng: &mut R) -> Option<Vec<u8>> {
        if self.is_empty() {
            return None;
        }
        let pick = rng.gen_range(0..self.len());
        match &self.repr {
            SetRepr::IntSet(ints) => ints.get(pick).map(|n| n.to_string().into_bytes()),
            SetRepr::Listpack(items) => items.get(pick).cloned(),
            SetRepr::Table(table) => table.iter().nth(pick).cloned(),
        }
    }

    /// Union with `others`; inputs are untouched.
    pub fn union(&self, others: &[&SetValue]) -> SetValue {
        let mut result = SetValue::new();
        for member in self.members() {
            result.add(&member);
        }
        for other in others {
            for member in other.members() {
                result.add(&member);
            }
        }
        result
    }

    /// Intersection with `others`; inputs are untouched.
    pub fn intersect(&self, others: &[&SetValue]) -> SetValue {
        let mut result = SetValue::new();
        for member in self.members() {
            if others.iter().all(|o| o.contains(&member)) {
                result.add(&member);
            }
        }
        result
    }

    /// Difference `self \ others`; inputs are untouched.
    pub fn difference(&self, others: &[&SetValue]) -> SetValue {
        let mut result = SetValue::new();
        for member in self.members() {
            if !others.iter().any(|o| o.contains(&member)) {
                result.add(&member);
            }
        }
        result
    }

    /// OBJECT ENCODING name for the current representation.
    pub fn encoding_name(&self) -> &'static str {
        match &self.repr {
            SetRepr::IntSet(_) => "intset",
            SetRepr::Listpack(_) => "listpack",
            SetRepr::Table(_) => "hashtable",
        }
    }

    /// Leaves the intset encoding because a non-integer member arrived.
    /// Small sets land in a listpack, larger ones go straight to the table.
    fn convert_from_intset(&mut self, incoming_len: usize) {
        let SetRepr::IntSet(ints) = &self.repr else {
            return;
        };
        let members: Vec<Vec<u8>> = ints.iter().map(|n| n.to_string().into_bytes()).collect();
        if members.len() < SET_MAX_LISTPACK_ENTRIES && incoming_len <= SET_MAX_LISTPACK_VALUE {
            self.repr = SetRepr::Listpack(members);
        } else {
            let mut table: HashSet<Vec<u8>, RandomState> = HashSet::default();
            table.extend(members);
            self.repr = SetRepr::Table(table);
        }
    }

    /// Checked at the end of every write; transitions are one-way.
    fn maybe_upgrade(&mut self) {
        match &mut self.repr {
            SetRepr::IntSet(ints) => {
                if ints.len() > SET_MAX_INTSET_ENTRIES {
                    let mut table: HashSet<Vec<u8>, RandomState> = HashSet::default();
                    table.extend(ints.iter().map(|n| n.to_string().into_bytes()));
                    self.repr = SetRepr::Table(table);
                }
            }
            SetRepr::Listpack(items) => {
                let oversized = items.len() > SET_MAX_LISTPACK_ENTRIES
                    || items.iter().any(|m| m.len() > SET_MAX_LISTPACK_VALUE);
                if oversized {
                    let mut table: HashSet<Vec<u8>, RandomState> = HashSet::default();
                    table.extend(std::mem::take(items));
                    self.repr = SetRepr::Table(table);
                }
            }
            SetRepr::Table(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn integers_stay_in_intset() {
        let mut set = SetValue::new();
        assert!(set.add(b"1"));
        assert!(set.add(b"2"));
        assert!(set.add(b"3"));
        assert!(!set.add(b"2"));
        assert_eq!(set.encoding_name(), "intset");
        assert_eq!(set.len(), 3);
        assert!(set.contains(b"2"));
    }

    #[test]
    fn non_integer_member_leaves_intset() {
        let mut set = SetValue::new();
        set.add(b"1");
        set.add(b"2");
        set.add(b"3");
        set.add(b"hello");
        assert_ne!(set.encoding_name(), "intset");
        assert_eq!(set.len(), 4);
        assert!(set.contains(b"2"));
        assert!(set.contains(b"hello"));
    }

    #[test]
    fn long_member_forces_hashtable() {
        let mut set = SetValue::new();
        set.add(b"1");
        set.add(&vec![b'x'; SET_MAX_LISTPACK_VALUE + 1]);
        assert_eq!(set.encoding_name(), "hashtable");
    }

    #[test]
    fn intset_overflow_goes_to_hashtable() {
        let mut set = SetValue::new();
        for i in 0..=SET_MAX_INTSET_ENTRIES {
            set.add(i.to_string().as_bytes());
        }
        assert_eq!(set.encoding_name(), "hashtable");
        assert_eq!(set.len(), SET_MAX_INTSET_ENTRIES + 1);
    }

    #[test]
    fn intset_members_are_sorted() {
        let mut set = SetValue::new();
        for n in ["30", "10", "20"] {
            set.add(n.as_bytes());
        }
        assert_eq!(
            set.members(),
            vec![b"10".to_vec(), b"20".to_vec(), b"30".to_vec()]
        );
    }

    #[test]
    fn set_algebra_does_not_mutate_inputs() {
        let mut a = SetValue::new();
        let mut b = SetValue::new();
        for m in ["1", "2", "3"] {
            a.add(m.as_bytes());
        }
        for m in ["2", "3", "4"] {
            b.add(m.as_bytes());
        }

        let union = a.union(&[&b]);
        let inter = a.intersect(&[&b]);
        let diff = a.difference(&[&b]);

        assert_eq!(union.len(), 4);
        assert_eq!(inter.len(), 2);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains(b"1"));
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn pop_random_removes_a_member() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut set = SetValue::new();
        for m in ["a", "b", "c"] {
            set.add(m.as_bytes());
        }
        let popped = set.pop_random(&mut rng).unwrap();
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&popped));
        assert!(set.pop_random(&mut rng).is_some());
        assert!(set.pop_random(&mut rng).is_some());
        assert!(set.pop_random(&mut rng).is_none());
    }
}
