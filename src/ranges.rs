// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::ops::RangeInclusive;

use smallvec::SmallVec;

use crate::error::Error;
use crate::Result;

/// Number of ranges kept inline before the list spills to the heap.
const INLINE_SACK_RANGES: usize = 8;

/// A closed interval `[start, end]` of received packet numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SackRange {
    /// The lowest packet number in the range.
    pub start: u64,

    /// The highest packet number in the range.
    pub end: u64,
}

impl SackRange {
    pub fn new(start: u64, end: u64) -> Self {
        SackRange { start, end }
    }

    /// Return whether `pn` falls inside the range.
    pub fn contains(&self, pn: u64) -> bool {
        self.start <= pn && pn <= self.end
    }

    /// Return the number of packet numbers covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl From<SackRange> for RangeInclusive<u64> {
    fn from(r: SackRange) -> Self {
        r.start..=r.end
    }
}

/// Result of recording packet numbers in a [`SackList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SackOutcome {
    /// All the packet numbers were already recorded.
    Duplicate,

    /// At least one packet number was not known before.
    Recorded,
}

/// The set of received packet numbers of a packet number space.
///
/// Ranges are kept in strictly descending order, and two consecutive ranges
/// are always separated by at least one missing packet number. Packet numbers
/// mostly arrive in increasing order, so the common case only extends the
/// first range. The cost of an update is bounded by the number of holes.
#[derive(Clone, PartialEq, Eq)]
pub struct SackList {
    /// Ranges, highest first.
    ranges: SmallVec<[SackRange; INLINE_SACK_RANGES]>,

    /// The maximum number of ranges the list may hold.
    capacity: usize,
}

impl SackList {
    /// Create an empty list holding at most `capacity` ranges.
    pub fn new(capacity: usize) -> Self {
        SackList {
            ranges: SmallVec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Return whether no packet number was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Return the number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Return the highest recorded packet number.
    pub fn largest(&self) -> Option<u64> {
        self.ranges.first().map(|r| r.end)
    }

    /// Return the lowest recorded packet number.
    pub fn smallest(&self) -> Option<u64> {
        self.ranges.last().map(|r| r.start)
    }

    /// Return an iterator over the ranges, highest first.
    pub fn iter(&self) -> std::slice::Iter<'_, SackRange> {
        self.ranges.iter()
    }

    /// Forget all recorded packet numbers.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Check whether the packet number was already received.
    pub fn contains(&self, pn: u64) -> bool {
        for r in self.ranges.iter() {
            if pn > r.end {
                // The packet number is in the hole above this range.
                return false;
            }
            if pn >= r.start {
                return true;
            }
        }
        false
    }

    /// Check whether recording `[pn_min, pn_max]` would add any packet
    /// number to the list, without modifying it.
    pub fn would_fill_hole(&self, pn_min: u64, pn_max: u64) -> bool {
        for r in self.ranges.iter() {
            if pn_max > r.end {
                return true;
            }
            if pn_max >= r.start {
                return pn_min < r.start;
            }
        }
        // Either the list is empty or the range lies below the last range.
        true
    }

    /// Record the packet numbers `[pn_min, pn_max]`.
    ///
    /// Adjacent and overlapping ranges are merged. If a new range is needed
    /// but can not be allocated, `Error::AllocationFailure` is returned: the
    /// incoming packet numbers may be partially recorded, and the list is
    /// still well formed.
    pub fn update(&mut self, pn_min: u64, mut pn_max: u64) -> Result<SackOutcome> {
        if pn_min > pn_max {
            return Ok(SackOutcome::Duplicate);
        }

        if self.ranges.is_empty() {
            self.reserve_one()?;
            self.ranges.push(SackRange::new(pn_min, pn_max));
            return Ok(SackOutcome::Recorded);
        }

        let mut outcome = SackOutcome::Duplicate;
        let mut i = 0;
        while i < self.ranges.len() {
            let cur = self.ranges[i];
            let is_last = i + 1 == self.ranges.len();

            if pn_max > cur.end {
                outcome = SackOutcome::Recorded;

                if pn_min <= cur.end + 1 {
                    if i > 0 && pn_max.saturating_add(1) >= self.ranges[i - 1].start {
                        // The range fills the hole between the previous range
                        // and the current one.
                        self.ranges[i - 1].start = cur.start;
                        self.ranges.remove(i);
                        i -= 1;
                    } else {
                        self.ranges[i].end = pn_max;
                    }

                    let start = self.ranges[i].start;
                    if pn_min >= start {
                        break;
                    }
                    if i + 1 == self.ranges.len() {
                        self.ranges[i].start = pn_min;
                        break;
                    }

                    // Carry on with the remaining lower part.
                    pn_max = start - 1;
                    i += 1;
                } else if i > 0 && pn_max.saturating_add(1) >= self.ranges[i - 1].start {
                    self.ranges[i - 1].start = pn_min;
                    break;
                } else {
                    // A new range between the previous range and this one.
                    self.reserve_one()?;
                    self.ranges.insert(i, SackRange::new(pn_min, pn_max));
                    break;
                }
            } else if pn_max >= cur.start {
                if pn_min >= cur.start {
                    break;
                }

                outcome = SackOutcome::Recorded;
                if is_last {
                    self.ranges[i].start = pn_min;
                    break;
                }

                pn_max = cur.start - 1;
                i += 1;
            } else if is_last {
                outcome = SackOutcome::Recorded;
                if pn_max + 1 == cur.start {
                    self.ranges[i].start = pn_min;
                } else {
                    // An old packet, below all the ranges known so far.
                    self.reserve_one()?;
                    self.ranges.push(SackRange::new(pn_min, pn_max));
                }
                break;
            } else {
                i += 1;
            }
        }

        Ok(outcome)
    }

    /// Make room for one more range.
    fn reserve_one(&mut self) -> Result<()> {
        if self.ranges.len() >= self.capacity {
            return Err(Error::AllocationFailure);
        }
        self.ranges
            .try_reserve(1)
            .map_err(|_| Error::AllocationFailure)
    }

    /// Check the ordering invariant of the list.
    #[cfg(test)]
    pub(crate) fn is_well_formed(&self) -> bool {
        let ordered = self
            .ranges
            .windows(2)
            .all(|w| w[1].end < w[0].start && w[0].start - 1 > w[1].end);
        ordered && self.ranges.iter().all(|r| r.start <= r.end)
    }
}

impl Default for SackList {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl std::fmt::Debug for SackList {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let ranges: Vec<RangeInclusive<u64>> =
            self.ranges.iter().map(|r| r.start..=r.end).collect();
        write!(f, "{ranges:?}")
    }
}

impl<'a> IntoIterator for &'a SackList {
    type Item = &'a SackRange;
    type IntoIter = std::slice::Iter<'a, SackRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use std::collections::BTreeSet;

    fn ranges(list: &SackList) -> Vec<(u64, u64)> {
        list.iter().map(|r| (r.start, r.end)).collect()
    }

    fn insert(list: &mut SackList, pn_min: u64, pn_max: u64) -> SackOutcome {
        let outcome = list.update(pn_min, pn_max).unwrap();
        assert!(list.is_well_formed(), "{:?}", list);
        outcome
    }

    #[test]
    fn empty() {
        let list = SackList::default();
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert_eq!(list.largest(), None);
        assert_eq!(list.smallest(), None);
        assert!(!list.contains(0));
        assert!(!list.contains(u64::MAX));
        assert!(list.would_fill_hole(0, 0));
        assert_eq!(format!("{:?}", list), "[]");
    }

    #[test]
    fn packet_number_zero() {
        let mut list = SackList::default();
        assert_eq!(insert(&mut list, 0, 0), SackOutcome::Recorded);
        assert!(list.contains(0));
        assert!(!list.contains(1));
        assert_eq!(insert(&mut list, 0, 0), SackOutcome::Duplicate);
        assert_eq!(ranges(&list), vec![(0, 0)]);
    }

    #[test]
    fn in_order_extends_head() {
        let mut list = SackList::default();
        for pn in 0..100 {
            assert_eq!(insert(&mut list, pn, pn), SackOutcome::Recorded);
        }
        assert_eq!(ranges(&list), vec![(0, 99)]);
        assert_eq!(list.largest(), Some(99));
        assert_eq!(list.smallest(), Some(0));
    }

    #[test]
    fn hole_filling_merge() {
        let mut list = SackList::default();
        insert(&mut list, 5, 5);
        insert(&mut list, 7, 7);
        assert_eq!(ranges(&list), vec![(7, 7), (5, 5)]);
        assert_eq!(list.len(), 2);

        assert_eq!(insert(&mut list, 6, 6), SackOutcome::Recorded);
        assert_eq!(ranges(&list), vec![(5, 7)]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn new_hole_above_head() {
        let mut list = SackList::default();
        insert(&mut list, 10, 20);
        insert(&mut list, 30, 40);
        assert_eq!(ranges(&list), vec![(30, 40), (10, 20)]);
        assert_eq!(format!("{:?}", list), "[30..=40, 10..=20]");

        // Fill a hole in the middle without touching any neighbour.
        insert(&mut list, 24, 26);
        assert_eq!(ranges(&list), vec![(30, 40), (24, 26), (10, 20)]);

        // Extend the previous range downward.
        insert(&mut list, 27, 29);
        assert_eq!(ranges(&list), vec![(24, 40), (10, 20)]);
    }

    #[test]
    fn tail_growth_and_new_tail() {
        let mut list = SackList::default();
        insert(&mut list, 100, 110);

        // Adjacent to the tail.
        insert(&mut list, 95, 99);
        assert_eq!(ranges(&list), vec![(95, 110)]);

        // Below the tail with a gap.
        insert(&mut list, 50, 60);
        assert_eq!(ranges(&list), vec![(95, 110), (50, 60)]);

        // Overlapping the tail from below.
        insert(&mut list, 40, 55);
        assert_eq!(ranges(&list), vec![(95, 110), (40, 60)]);
    }

    #[test]
    fn range_spanning_several_holes() {
        let mut list = SackList::default();
        insert(&mut list, 1, 3);
        insert(&mut list, 10, 15);
        insert(&mut list, 20, 30);
        assert_eq!(list.len(), 3);

        assert_eq!(insert(&mut list, 0, 40), SackOutcome::Recorded);
        assert_eq!(ranges(&list), vec![(0, 40)]);
    }

    #[test]
    fn range_ending_inside_a_hole() {
        let mut list = SackList::default();
        insert(&mut list, 1, 3);
        insert(&mut list, 10, 20);

        insert(&mut list, 5, 25);
        assert_eq!(ranges(&list), vec![(5, 25), (1, 3)]);

        insert(&mut list, 2, 4);
        assert_eq!(ranges(&list), vec![(1, 25)]);
    }

    #[test]
    fn overlap_from_below_continues_leftward() {
        let mut list = SackList::default();
        insert(&mut list, 1, 2);
        insert(&mut list, 10, 20);

        assert_eq!(insert(&mut list, 5, 15), SackOutcome::Recorded);
        assert_eq!(ranges(&list), vec![(5, 20), (1, 2)]);

        assert_eq!(insert(&mut list, 3, 12), SackOutcome::Recorded);
        assert_eq!(ranges(&list), vec![(1, 20)]);
    }

    #[test]
    fn duplicates_leave_list_unchanged() {
        let mut list = SackList::default();
        insert(&mut list, 10, 20);
        insert(&mut list, 30, 40);
        insert(&mut list, 50, 50);

        let before = list.clone();
        for (lo, hi) in [(10, 20), (12, 15), (30, 40), (50, 50), (33, 33)] {
            assert_eq!(insert(&mut list, lo, hi), SackOutcome::Duplicate);
            assert_eq!(list, before);
        }
    }

    #[test]
    fn recording_twice_is_idempotent() {
        let mut list = SackList::default();
        insert(&mut list, 3, 9);
        insert(&mut list, 20, 22);

        assert_eq!(insert(&mut list, 12, 14), SackOutcome::Recorded);
        let snapshot = list.clone();
        assert_eq!(insert(&mut list, 12, 14), SackOutcome::Duplicate);
        assert_eq!(list, snapshot);
    }

    #[test]
    fn contains() {
        let mut list = SackList::default();
        insert(&mut list, 2, 4);
        insert(&mut list, 8, 8);
        insert(&mut list, 12, 20);

        let expected: BTreeSet<u64> = [2, 3, 4, 8].into_iter().chain(12..=20).collect();
        for pn in 0..30 {
            assert_eq!(list.contains(pn), expected.contains(&pn), "pn {}", pn);
        }
    }

    #[test]
    fn would_fill_hole() {
        let mut list = SackList::default();
        insert(&mut list, 1, 3);
        insert(&mut list, 10, 20);

        assert!(!list.would_fill_hole(1, 3));
        assert!(!list.would_fill_hole(11, 12));
        assert!(!list.would_fill_hole(10, 20));
        assert!(list.would_fill_hole(21, 21));
        assert!(list.would_fill_hole(5, 8));
        assert!(list.would_fill_hole(2, 15));
        assert!(list.would_fill_hole(0, 0));
        assert!(list.would_fill_hole(9, 10));

        // The dry run must not have modified anything.
        assert_eq!(ranges(&list), vec![(10, 20), (1, 3)]);
    }

    #[test]
    fn dry_run_matches_update() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mut list = SackList::default();
            for _ in 0..40 {
                let lo = rng.gen_range(0..200);
                let hi = lo + rng.gen_range(0..6);
                let predicted = list.would_fill_hole(lo, hi);
                let outcome = insert(&mut list, lo, hi);
                assert_eq!(predicted, outcome == SackOutcome::Recorded);
            }
        }
    }

    #[test]
    fn random_order_matches_model() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let mut pns: Vec<u64> = (0..300).filter(|_| rng.gen_bool(0.7)).collect();
            pns.shuffle(&mut rng);

            let mut list = SackList::default();
            let mut model = BTreeSet::new();
            for pn in pns {
                let outcome = insert(&mut list, pn, pn);
                assert_eq!(outcome == SackOutcome::Recorded, model.insert(pn));
            }

            for pn in 0..310 {
                assert_eq!(list.contains(pn), model.contains(&pn));
            }
        }
    }

    #[test]
    fn random_ranges_match_model() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let mut list = SackList::default();
            let mut model = BTreeSet::new();
            for _ in 0..60 {
                let lo = rng.gen_range(0..500);
                let hi = lo + rng.gen_range(0..20);
                let mut added = false;
                for pn in lo..=hi {
                    added |= model.insert(pn);
                }
                let outcome = insert(&mut list, lo, hi);
                assert_eq!(outcome == SackOutcome::Recorded, added);
            }

            let covered: u64 = list.iter().map(|r| r.len()).sum();
            assert_eq!(covered, model.len() as u64);
            for pn in 0..530 {
                assert_eq!(list.contains(pn), model.contains(&pn));
            }
        }
    }

    #[test]
    fn allocation_failure_keeps_list_valid() {
        let mut list = SackList::new(2);
        insert(&mut list, 10, 20);
        insert(&mut list, 30, 40);

        // No room for a third range, above, between or below.
        assert_eq!(list.update(50, 55), Err(Error::AllocationFailure));
        assert_eq!(list.update(24, 26), Err(Error::AllocationFailure));
        assert_eq!(list.update(1, 2), Err(Error::AllocationFailure));
        assert!(list.is_well_formed());
        assert_eq!(ranges(&list), vec![(30, 40), (10, 20)]);
        assert!(!list.contains(50));
        assert!(!list.contains(25));

        // Merges do not need any room.
        assert_eq!(insert(&mut list, 41, 45), SackOutcome::Recorded);
        assert_eq!(insert(&mut list, 21, 29), SackOutcome::Recorded);
        assert_eq!(ranges(&list), vec![(10, 45)]);

        // Room is available again after the merge.
        assert_eq!(insert(&mut list, 50, 55), SackOutcome::Recorded);
        assert_eq!(ranges(&list), vec![(50, 55), (10, 45)]);
    }

    #[test]
    fn allocation_failure_after_partial_merge() {
        let mut list = SackList::new(2);
        insert(&mut list, 20, 30);
        insert(&mut list, 10, 12);

        // Extends [20, 30] on both sides and joins nothing, no room needed.
        assert_eq!(list.update(15, 35), Ok(SackOutcome::Recorded));
        assert_eq!(ranges(&list), vec![(15, 35), (10, 12)]);

        let mut list = SackList::new(1);
        insert(&mut list, 20, 30);
        assert_eq!(list.update(5, 8), Err(Error::AllocationFailure));
        assert!(list.is_well_formed());
        assert_eq!(ranges(&list), vec![(20, 30)]);
    }

    #[test]
    fn extreme_packet_numbers() {
        let mut list = SackList::default();
        insert(&mut list, u64::MAX, u64::MAX);
        insert(&mut list, 0, 0);
        assert_eq!(ranges(&list), vec![(u64::MAX, u64::MAX), (0, 0)]);

        insert(&mut list, 1, u64::MAX - 1);
        assert_eq!(ranges(&list), vec![(0, u64::MAX)]);
        assert!(list.contains(u64::MAX / 2));
    }

    #[test]
    fn extend_previous_range_downward_near_max() {
        let mut list = SackList::default();
        insert(&mut list, u64::MAX - 5, u64::MAX);
        insert(&mut list, 0, 0);

        // Joins the highest range from below, skipping over the tail.
        assert_eq!(insert(&mut list, u64::MAX - 10, u64::MAX - 6), SackOutcome::Recorded);
        assert_eq!(ranges(&list), vec![(u64::MAX - 10, u64::MAX), (0, 0)]);
    }

    #[test]
    fn invalid_range_is_ignored() {
        let mut list = SackList::default();
        assert_eq!(list.update(9, 3), Ok(SackOutcome::Duplicate));
        assert!(list.is_empty());
    }
}
