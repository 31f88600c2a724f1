//! Folded
//! ---
//! The result of `Bag::fold_by` and `Bag::reduce_by`: a single deferred map from
//! key to accumulated value.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;

use sack::deferred::Deferred;
use sack::scheduler::{GreedyScheduler, Scheduler};

use crate::error::BagError;
use super::bag::Bag;

/// Number of partial maps merged by a single combine task unless told otherwise
pub const DEFAULT_SPLIT_EVERY: usize = 8;

/// Deferred key -> accumulator mapping
pub struct Folded<K, B> {
    result: Deferred<HashMap<K, B>>
}

impl <K, B> Clone for Folded<K, B> {
    fn clone(&self) -> Self {
        Folded { result: self.result.clone() }
    }
}

impl <K: Any + Send + Sync + Clone + Hash + Eq, B: Any + Send + Sync + Clone> Folded<K, B> {

    pub(crate) fn new(result: Deferred<HashMap<K, B>>) -> Self {
        Folded { result }
    }

    /// The underlying deferred map
    pub fn deferred(&self) -> &Deferred<HashMap<K, B>> {
        &self.result
    }

    /// Runs the fold, returning the final mapping
    pub fn compute<S: Scheduler>(&self, s: &S) -> Result<HashMap<K, B>, BagError> {
        Ok(self.result.run(s)?)
    }

    /// Runs the fold with a default GreedyScheduler
    pub fn eval(&self) -> Result<HashMap<K, B>, BagError> {
        self.compute(&GreedyScheduler::new())
    }

    /// Views the mapping as a single partition Bag of pairs, in no particular order.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let words = Bag::from_vec(vec!["a", "b", "a"]);
    ///   let counts = words.fold_by(|w| *w, 0usize, |c, _w| *c += 1, |c1, c2| *c1 += *c2, 8)
    ///                     .to_bag()
    ///                     .sort_by(|p| p.0);
    ///   assert_eq!(counts.eval().unwrap(), vec![("a", 2), ("b", 1)]);
    /// ```
    pub fn to_bag(&self) -> Bag<(K, B)> {
        let pairs = self.result.apply(|m| {
            m.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<(K, B)>>()
        });
        Bag::from_defs(vec![pairs])
    }
}

#[cfg(test)]
mod folded_test {
    use super::*;
    use sack::scheduler::LeveledScheduler;

    #[test]
    fn test_split_every_invariance() {
        let col = Bag::from_sequence((0..200usize).collect(), 17);
        let expected = col.fold_by(|x| x % 7, 0usize, |a, x| *a += *x, |a, b| *a += *b, DEFAULT_SPLIT_EVERY)
            .compute(&LeveledScheduler::new())
            .unwrap();
        for split_every in [0, 1, 2, 3, 5, 16, 64] {
            let out = col.fold_by(|x| x % 7, 0usize, |a, x| *a += *x, |a, b| *a += *b, split_every)
                .eval()
                .unwrap();
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn test_deferred_shares_graph() {
        let folded = Bag::range(10, 4).reduce_by(|x| x % 2, 0, |a, x| *a += *x, 2);
        let total = folded.deferred().apply(|m| m.values().sum::<usize>());
        assert_eq!(total.run(&LeveledScheduler::new()).unwrap(), 45);
    }
}
