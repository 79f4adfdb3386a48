//! Run-length encoded per-slot state.
//!
//! A tile keeps one value per slot (visible flag, highlight id). Most of the
//! time long stretches share a value, so the track is stored as a doubly
//! linked chain of runs. Nodes live in a `Vec` arena and are recycled through
//! a free list, so updates never allocate once the chain has reached its
//! working size.
//!
//! Invariants after every mutation:
//! - runs tile `[0, len)` exactly, in order, without gaps or overlap
//! - every run has a positive size
//! - adjacent runs hold different values

/// Size value meaning "until the end of the domain" in [`RunLengthState::get_complementary`].
pub const RUN_TO_END: u32 = u32::MAX;

/// One maximal run of equal values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run<T> {
    pub position: u32,
    pub size: u32,
    pub value: T,
}

impl<T> Run<T> {
    pub fn end(&self) -> u32 {
        self.position + self.size
    }
}

#[derive(Clone, Debug)]
struct RunNode<T> {
    run: Run<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A dense `[0, len)` domain of values stored as runs.
#[derive(Clone, Debug)]
pub struct RunLengthState<T> {
    nodes: Vec<RunNode<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: u32,
    run_count: usize,
}

impl<T: Copy + PartialEq> RunLengthState<T> {
    /// A domain of `len` positions all holding `value`.
    pub fn new(len: u32, value: T) -> Self {
        let mut state = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            run_count: 0,
        };
        if len > 0 {
            state.push_run(len, value);
        }
        state
    }

    /// Number of positions in the domain.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of runs currently in the chain.
    pub fn run_count(&self) -> usize {
        self.run_count
    }

    /// Grow the domain by one position holding `value`.
    pub fn push(&mut self, value: T) {
        self.push_run(1, value);
    }

    fn push_run(&mut self, size: u32, value: T) {
        if let Some(tail) = self.tail
            && self.nodes[tail].run.value == value
        {
            self.nodes[tail].run.size += size;
            self.len += size;
            return;
        }
        let node = self.alloc(Run {
            position: self.len,
            size,
            value,
        });
        self.nodes[node].prev = self.tail;
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(node),
            None => self.head = Some(node),
        }
        self.tail = Some(node);
        self.len += size;
    }

    /// Value at `index`, or `None` past the end.
    pub fn get(&self, index: u32) -> Option<T> {
        self.find(index).map(|node| self.nodes[node].run.value)
    }

    /// Set the value at `index`. Returns `true` if the stored value changed.
    ///
    /// The containing run is split into up to three pieces and the new piece
    /// is merged with equal neighbours, so the chain stays maximal.
    pub fn update(&mut self, index: u32, value: T) -> bool {
        let Some(node) = self.find(index) else {
            return false;
        };
        let run = self.nodes[node].run;
        if run.value == value {
            return false;
        }

        if index + 1 < run.end() {
            let after = self.alloc(Run {
                position: index + 1,
                size: run.end() - index - 1,
                value: run.value,
            });
            self.link_after(node, after);
        }
        if index > run.position {
            let before = self.alloc(Run {
                position: run.position,
                size: index - run.position,
                value: run.value,
            });
            self.link_before(node, before);
        }
        self.nodes[node].run = Run {
            position: index,
            size: 1,
            value,
        };

        let mut node = node;
        if let Some(prev) = self.nodes[node].prev
            && self.nodes[prev].run.value == value
        {
            self.nodes[prev].run.size += self.nodes[node].run.size;
            self.unlink(node);
            node = prev;
        }
        if let Some(next) = self.nodes[node].next
            && self.nodes[next].run.value == value
        {
            self.nodes[node].run.size += self.nodes[next].run.size;
            self.unlink(next);
        }
        true
    }

    /// Number of runs whose value satisfies `predicate`.
    pub fn size(&self, predicate: impl Fn(&T) -> bool) -> usize {
        self.runs().filter(|run| predicate(&run.value)).count()
    }

    /// Number of positions whose value satisfies `predicate`.
    pub fn count_positions(&self, predicate: impl Fn(&T) -> bool) -> u32 {
        self.runs()
            .filter(|run| predicate(&run.value))
            .map(|run| run.size)
            .sum()
    }

    /// True if every position holds `value` (vacuously true when empty).
    pub fn full_of(&self, value: T) -> bool {
        match self.head {
            None => true,
            Some(head) => self.run_count == 1 && self.nodes[head].run.value == value,
        }
    }

    /// Iterate runs in position order.
    pub fn runs(&self) -> Runs<'_, T> {
        Runs {
            state: self,
            cursor: self.head,
        }
    }

    /// Emit the gaps not covered by the sorted, non-overlapping ranges
    /// `(positions[i], sizes[i])`.
    ///
    /// A size of [`RUN_TO_END`] covers everything after its position. If the
    /// covered region does not reach the end, the last gap is emitted with
    /// size [`RUN_TO_END`].
    pub fn get_complementary(positions: &[u32], sizes: &[u32], mut callback: impl FnMut(u32, u32)) {
        debug_assert_eq!(positions.len(), sizes.len());
        let mut cursor = 0u32;
        for (&position, &size) in positions.iter().zip(sizes) {
            if position > cursor {
                callback(cursor, position - cursor);
            }
            if size == RUN_TO_END {
                return;
            }
            cursor = cursor.max(position.saturating_add(size));
        }
        callback(cursor, RUN_TO_END);
    }

    fn find(&self, index: u32) -> Option<usize> {
        if index >= self.len {
            return None;
        }
        // Walk from whichever end is closer.
        if index >= self.len / 2 {
            let mut cursor = self.tail;
            while let Some(node) = cursor {
                if self.nodes[node].run.position <= index {
                    return Some(node);
                }
                cursor = self.nodes[node].prev;
            }
        } else {
            let mut cursor = self.head;
            while let Some(node) = cursor {
                if index < self.nodes[node].run.end() {
                    return Some(node);
                }
                cursor = self.nodes[node].next;
            }
        }
        None
    }

    fn alloc(&mut self, run: Run<T>) -> usize {
        self.run_count += 1;
        let node = RunNode {
            run,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn link_after(&mut self, anchor: usize, node: usize) {
        let next = self.nodes[anchor].next;
        self.nodes[node].prev = Some(anchor);
        self.nodes[node].next = next;
        self.nodes[anchor].next = Some(node);
        match next {
            Some(next) => self.nodes[next].prev = Some(node),
            None => self.tail = Some(node),
        }
    }

    fn link_before(&mut self, anchor: usize, node: usize) {
        let prev = self.nodes[anchor].prev;
        self.nodes[node].next = Some(anchor);
        self.nodes[node].prev = prev;
        self.nodes[anchor].prev = Some(node);
        match prev {
            Some(prev) => self.nodes[prev].next = Some(node),
            None => self.head = Some(node),
        }
    }

    fn unlink(&mut self, node: usize) {
        let RunNode { prev, next, .. } = self.nodes[node];
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }
        self.free.push(node);
        self.run_count -= 1;
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let mut expected = 0;
        let mut previous: Option<T> = None;
        let mut count = 0;
        for run in self.runs() {
            assert_eq!(run.position, expected, "gap or overlap at {expected}");
            assert!(run.size > 0, "empty run at {}", run.position);
            assert!(previous != Some(run.value), "unmerged runs at {}", run.position);
            previous = Some(run.value);
            expected = run.end();
            count += 1;
        }
        assert_eq!(expected, self.len);
        assert_eq!(count, self.run_count);
    }
}

/// Iterator over the runs of a [`RunLengthState`].
pub struct Runs<'a, T> {
    state: &'a RunLengthState<T>,
    cursor: Option<usize>,
}

impl<T: Copy> Iterator for Runs<'_, T> {
    type Item = Run<T>;

    fn next(&mut self) -> Option<Run<T>> {
        let node = self.cursor?;
        self.cursor = self.state.nodes[node].next;
        Some(self.state.nodes[node].run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn values<T: Copy + PartialEq>(state: &RunLengthState<T>) -> Vec<T> {
        (0..state.len()).map(|i| state.get(i).unwrap()).collect()
    }

    #[test]
    fn test_new_is_single_run() {
        let state = RunLengthState::new(10, false);
        assert_eq!(state.run_count(), 1);
        assert!(state.full_of(false));
        assert!(!state.full_of(true));
        state.check_invariants();
    }

    #[test]
    fn test_update_middle_splits_into_three() {
        let mut state = RunLengthState::new(10, false);
        assert!(state.update(4, true));
        assert_eq!(state.run_count(), 3);
        let runs: Vec<_> = state.runs().collect();
        assert_eq!(runs[0], Run { position: 0, size: 4, value: false });
        assert_eq!(runs[1], Run { position: 4, size: 1, value: true });
        assert_eq!(runs[2], Run { position: 5, size: 5, value: false });
        state.check_invariants();
    }

    #[test]
    fn test_update_back_merges_into_one() {
        let mut state = RunLengthState::new(10, false);
        state.update(4, true);
        assert!(state.update(4, false));
        assert_eq!(state.run_count(), 1);
        assert!(state.full_of(false));
        state.check_invariants();
    }

    #[test]
    fn test_update_same_value_is_noop() {
        let mut state = RunLengthState::new(5, 3u16);
        assert!(!state.update(2, 3));
        assert_eq!(state.run_count(), 1);
    }

    #[test]
    fn test_update_at_edges() {
        let mut state = RunLengthState::new(4, 0u16);
        state.update(0, 1);
        state.update(3, 1);
        assert_eq!(values(&state), vec![1, 0, 0, 1]);
        state.update(1, 1);
        state.update(2, 1);
        assert!(state.full_of(1));
        state.check_invariants();
    }

    #[test]
    fn test_update_out_of_range_ignored() {
        let mut state = RunLengthState::new(3, false);
        assert!(!state.update(3, true));
        assert_eq!(state.get(3), None);
    }

    #[test]
    fn test_push_extends_or_appends() {
        let mut state = RunLengthState::new(0, false);
        assert!(state.full_of(true));
        state.push(false);
        state.push(false);
        state.push(true);
        assert_eq!(state.len(), 3);
        assert_eq!(state.run_count(), 2);
        assert_eq!(state.count_positions(|v| *v), 1);
        state.check_invariants();
    }

    #[test]
    fn test_size_counts_matching_runs() {
        let mut state = RunLengthState::new(8, 0u16);
        state.update(1, 5);
        state.update(2, 5);
        state.update(6, 2);
        // [0] [5 5] [0 0 0] [2] [0]
        assert_eq!(state.size(|v| *v != 0), 2);
        assert_eq!(state.size(|v| *v == 5), 1);
        assert_eq!(state.size(|_| true), state.run_count());
        assert_eq!(state.count_positions(|v| *v != 0), 3);
        assert_eq!(state.count_positions(|v| *v == 5), 2);
    }

    /// Random updates must keep the chain maximal and agree with a dense model.
    #[test]
    fn test_random_updates_match_dense_model() {
        let mut rng = StdRng::seed_from_u64(0x7e55e7a);
        for _ in 0..20 {
            let len = rng.random_range(1..200u32);
            let mut state = RunLengthState::new(len, 0u16);
            let mut dense = vec![0u16; len as usize];
            for _ in 0..500 {
                let index = rng.random_range(0..len);
                let value = rng.random_range(0..3u16);
                let changed = state.update(index, value);
                assert_eq!(changed, dense[index as usize] != value);
                dense[index as usize] = value;
            }
            state.check_invariants();
            assert_eq!(values(&state), dense);
        }
    }

    #[test]
    fn test_complementary_of_nothing_is_everything() {
        let mut gaps = Vec::new();
        RunLengthState::<bool>::get_complementary(&[], &[], |p, s| gaps.push((p, s)));
        assert_eq!(gaps, vec![(0, RUN_TO_END)]);
    }

    #[test]
    fn test_complementary_gaps() {
        let mut gaps = Vec::new();
        RunLengthState::<bool>::get_complementary(&[2, 10], &[3, 4], |p, s| gaps.push((p, s)));
        assert_eq!(gaps, vec![(0, 2), (5, 5), (14, RUN_TO_END)]);
    }

    #[test]
    fn test_complementary_with_open_ended_range() {
        let mut gaps = Vec::new();
        RunLengthState::<bool>::get_complementary(&[0, 6], &[2, RUN_TO_END], |p, s| {
            gaps.push((p, s))
        });
        assert_eq!(gaps, vec![(2, 4)]);
    }

    /// Ranges plus their complement cover the domain exactly once.
    #[test]
    fn test_complementary_union_covers_domain() {
        let positions = [1u32, 4, 9];
        let sizes = [2u32, 1, 3];
        let mut covered = vec![0u8; 20];
        for (&p, &s) in positions.iter().zip(&sizes) {
            for i in p..p + s {
                covered[i as usize] += 1;
            }
        }
        RunLengthState::<bool>::get_complementary(&positions, &sizes, |p, s| {
            let end = if s == RUN_TO_END { 20 } else { p + s };
            for i in p..end {
                covered[i as usize] += 1;
            }
        });
        assert!(covered.iter().all(|&c| c == 1));
    }
}
