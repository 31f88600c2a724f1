//! Bag
//! ---
//! Bag provides a variety of dataflow operators for consuming and mutating
//! partitioned data.  Every operator returns a new Bag wrapping an extended task
//! graph; nothing runs until one of the materializing calls (`compute`, `eval`,
//! `take`, `to_map`, `to_dataframe`) is made.
//!

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;

use sack::deferred::{batch_apply, run_all, tree_reduce, Deferred};
use sack::scheduler::{GreedyScheduler, Scheduler};
use sack::TaskFailure;

use crate::dataframe::{infer_schema, project, Record, Schema, TabularSink};
use crate::error::{BagError, FieldAccessError};
use crate::interfaces::Pluck;
use crate::partitioned;
use super::emit;
use super::group::Folded;

/// Bag struct
pub struct Bag<A> {
    partitions: Vec<Deferred<Vec<A>>>
}

impl <A> Clone for Bag<A> {
    fn clone(&self) -> Self {
        Bag { partitions: self.partitions.clone() }
    }
}

impl <A: Any + Send + Sync + Clone> Bag<A> {

    /// Creates a Bag from a set of Deferred objects.
    pub fn from_defs(vs: Vec<Deferred<Vec<A>>>) -> Bag<A> {
        Bag { partitions: vs }
    }

    /// Provides raw access to the underlying Deferred objects
    pub fn to_defs(&self) -> &[Deferred<Vec<A>>] {
        &self.partitions
    }

    /// Creates a new Bag from a Vec of items, in a single partition
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![1,2,3usize]);
    ///   assert_eq!(col.n_partitions(), 1);
    ///   assert_eq!(col.eval().unwrap(), vec![1,2,3usize]);
    /// ```
    pub fn from_vec(vs: Vec<A>) -> Bag<A> {
        Bag { partitions: vec![Deferred::lift(vs, None)] }
    }

    /// Splits `items` into `n` contiguous chunks, keeping their order.  `n` is
    /// clamped to `[1, items.len()]`; an empty Vec yields one empty partition.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_sequence((1..=10usize).collect(), 4);
    ///   assert_eq!(col.n_partitions(), 4);
    ///   assert_eq!(col.eval().unwrap(), (1..=10usize).collect::<Vec<_>>());
    /// ```
    pub fn from_sequence(items: Vec<A>, n: usize) -> Bag<A> {
        let n = n.max(1).min(items.len().max(1));
        let (base, extra) = (items.len() / n, items.len() % n);
        let mut rest = items.into_iter();
        let partitions = (0..n).map(|i| {
            let size = base + usize::from(i < extra);
            Deferred::lift(rest.by_ref().take(size).collect::<Vec<A>>(), Some("Sequence"))
        }).collect();
        Bag { partitions }
    }

    /// Creates a Bag whose partitions are produced lazily by `f`, called with the
    /// partition index.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_generator(3, |idx| vec![idx; idx]);
    ///   assert_eq!(col.eval().unwrap(), vec![1, 2, 2]);
    /// ```
    pub fn from_generator<
        F: 'static + Sync + Send + Clone + Fn(usize) -> Vec<A>
    >(parts: usize, f: F) -> Bag<A> {
        let partitions = (0..parts.max(1)).map(|idx| {
            let gen = f.clone();
            Deferred::lift(idx, Some("Generator")).apply(move |i| gen(*i))
        }).collect();
        Bag { partitions }
    }

    /// Returns the current number of data partitions
    pub fn n_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Concatentates two bags into a single Bag
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let one = Bag::from_vec(vec![1,2,3usize]);
    ///   let two = Bag::from_vec(vec![4usize, 5, 6]);
    ///   let cat = one.concat(&two);
    ///   assert_eq!(cat.n_partitions(), 2);
    ///   assert_eq!(cat.eval().unwrap(), vec![1,2,3,4,5,6]);
    /// ```
    pub fn concat(&self, other: &Bag<A>) -> Bag<A> {
        let mut nps = self.partitions.clone();
        nps.extend(other.partitions.iter().cloned());
        Bag { partitions: nps }
    }

    /// Maps a function over the values in the Bag, returning a new Bag
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let one = Bag::from_vec(vec![1,2,3usize]);
    ///   let strings = one.map(|i| format!("{}", i));
    ///   assert_eq!(strings.eval().unwrap(),
    ///     vec!["1".to_owned(),"2".into(),"3".into()]);
    /// ```
    pub fn map<
        B: Any + Send + Sync + Clone,
        F: 'static + Sync + Send + Clone + Fn(&A) -> B
    >(&self, f: F) -> Bag<B> {
        self.try_emit(move |x, emitter| {
            emitter(f(x));
            Ok(())
        })
    }

    /// Maps a function which may fail over the values in the Bag.  Errors fail
    /// the enclosing partition task; transient ones are retried.
    /// ```rust
    ///   use sack::TaskFailure;
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec!["1".to_owned(), "x".into()]);
    ///   let parsed = col.try_map(|s| s.parse::<usize>().map_err(TaskFailure::fatal));
    ///   assert!(parsed.eval().is_err());
    /// ```
    pub fn try_map<
        B: Any + Send + Sync + Clone,
        F: 'static + Sync + Send + Clone + Fn(&A) -> Result<B, TaskFailure>
    >(&self, f: F) -> Bag<B> {
        self.try_emit(move |x, emitter| {
            emitter(f(x)?);
            Ok(())
        })
    }

    /// Filters out items in the bag that fail the predicate.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![1,2,3usize]);
    ///   let odds = col.filter(|x| x % 2 == 1);
    ///   assert_eq!(odds.eval().unwrap(), vec![1, 3usize]);
    /// ```
    pub fn filter<
        F: 'static + Sync + Send + Clone + Fn(&A) -> bool
    >(&self, f: F) -> Bag<A> {
        self.try_emit(move |x, emitter| {
            if f(x) {
                emitter(x.clone())
            }
            Ok(())
        })
    }

    /// Re-partitions a bag by the number of provided chunks.  It uniformly distributes data from each old partition into each new partition.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![1,2,3usize]);
    ///   assert_eq!(col.n_partitions(), 1);
    ///   let two = col.split(2);
    ///   assert_eq!(two.n_partitions(), 2);
    ///   assert_eq!(two.eval().unwrap(), vec![1, 3, 2]);
    /// ```
    pub fn split(&self, n_chunks: usize) -> Bag<A> {
        self.partition(n_chunks, |idx, _k| idx)
    }

    /// Maps over all items in a bag, optionally emitting new values.  It can be used
    /// to efficiently fuse a number of map/filter/flat_map functions into a single method.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![1,2,3usize]);
    ///   let new = col.emit(|item, emitter| {
    ///     if item % 2 == 0 {
    ///         emitter(format!("{}!", item));
    ///     }
    ///   });
    ///   assert_eq!(new.eval().unwrap(), vec!["2!".to_owned()]);
    /// ```
    pub fn emit<
        B: Any + Send + Sync + Clone,
        F: 'static + Sync + Send + Clone + Fn(&A, &mut dyn FnMut(B))
    >(&self, f: F) -> Bag<B> {
        self.try_emit(move |x, emitter| {
            f(x, emitter);
            Ok(())
        })
    }

    /// Fallible variant of `emit`
    pub fn try_emit<
        B: Any + Send + Sync + Clone,
        F: 'static + Sync + Send + Clone + Fn(&A, &mut dyn FnMut(B)) -> Result<(), TaskFailure>
    >(&self, f: F) -> Bag<B> {
        Bag { partitions: emit(&self.partitions, f) }
    }

    /// Re-partitions data into N new partitions by the given function.  The user provided
    /// function is used as a hash function, mapping the returned value to a partition index.
    /// This makes it useful for managing which partition data ends up!
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![1,2,3,4usize]);
    ///   let new_col = col.partition(2, |_idx, x| if *x < 3 { 1 } else { 2 });
    ///
    ///   assert_eq!(new_col.n_partitions(), 2);
    ///   assert_eq!(new_col.eval().unwrap(), vec![3, 4, 1, 2]);
    /// ```
    pub fn partition<
        F: 'static + Sync + Send + Clone + Fn(usize, &A) -> usize
    >(&self, partitions: usize, f: F) -> Bag<A> {
        Bag { partitions: partitioned::partition(&self.partitions, partitions, f) }
    }

    /// Simple function to re-partition values by a given key.  The return key is hashed
    /// and moduloed by the new partition count to determine where it will end up.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![1,2,3,4usize]);
    ///   let new_col = col.partition_by_key(2, |x| format!("{}", x));
    ///
    ///   assert_eq!(new_col.n_partitions(), 2);
    ///   let mut out = new_col.eval().unwrap();
    ///   out.sort();
    ///   assert_eq!(out, vec![1, 2, 3, 4]);
    /// ```
    pub fn partition_by_key<
        K: Hash,
        F: 'static + Sync + Send + Clone + Fn(&A) -> K
    >(&self, n_chunks: usize, key: F) -> Bag<A> {
        Bag { partitions: partitioned::partition_by_key(&self.partitions, n_chunks, key) }
    }

    /// Sorts values within each partition by a key function.  If a global sort is desired,
    /// the bag needs to be re-partitioned into a single partition
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![1,2,3,4i32]);
    ///   let new_col = col.sort_by(|x| -*x);
    ///
    ///   assert_eq!(new_col.eval().unwrap(), vec![4, 3, 2, 1]);
    /// ```
    pub fn sort_by<
        K: Ord,
        F: 'static + Sync + Send + Clone + Fn(&A) -> K
    >(&self, key: F) -> Bag<A> {
        let nps = batch_apply(&self.partitions, move |_idx, vs| {
            let mut v2: Vec<_> = vs.clone();
            v2.sort_by_key(|v| key(v));
            v2
        });
        Bag { partitions: nps }
    }

    /// Inner Joins two bags by the provided key function.
    /// If multiple values of the same key are found, they will be cross product for each
    /// pair found.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let name_age: Vec<(String,u32)> = vec![("Andrew".into(), 33), ("Leah".into(), 12)];
    ///   let name_money: Vec<(String,f32)> = vec![("Leah".into(), 20.50)];
    ///
    ///   let na = Bag::from_vec(name_age);
    ///   let nm = Bag::from_vec(name_money);
    ///   let joined = na.join_on(&nm,
    ///                           |nax| nax.0.clone(),
    ///                           |nmx| nmx.0.clone(),
    ///                           |nax, nmx| (nax.1, nmx.1),
    ///                           1);
    ///   assert_eq!(joined.eval().unwrap(), vec![("Leah".to_owned(), (12, 20.50))]);
    /// ```
    pub fn join_on<
        K: Any + Sync + Send + Clone + Hash + Eq,
        B: Any + Sync + Send + Clone,
        C: Any + Sync + Send + Clone,
        KF1: 'static + Sync + Send + Clone + Fn(&A) -> K,
        KF2: 'static + Sync + Send + Clone + Fn(&B) -> K,
        J:   'static + Sync + Send + Clone + Fn(&A, &B) -> C,
    >(
        &self,
        other: &Bag<B>,
        key1: KF1,
        key2: KF2,
        joiner: J,
        partitions: usize,
    ) -> Bag<(K, C)> {
        // Co-partition both sides on the join key
        let p1 = self.map(move |x| (key1(x), x.clone()))
            .partition_by_key(partitions, |x| x.0.clone());
        let p2 = other.map(move |x| (key2(x), x.clone()))
            .partition_by_key(partitions, |x| x.0.clone());

        let new_parts = p1.partitions.iter().zip(p2.partitions.iter())
            .map(|(l, r)| partitioned::join_on_key(l, r, joiner.clone()))
            .collect();

        Bag { partitions: new_parts }
    }

    /// Returns the number of items in the bag, as a single partition holding one value.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![vec![1usize,2],vec![3,4]]);
    ///   assert_eq!(col.count().eval().unwrap(), vec![2]);
    ///   let flattened = col.flatten();
    ///   assert_eq!(flattened.count().eval().unwrap(), vec![4]);
    /// ```
    pub fn count(&self) -> Bag<usize> {
        let sizes = batch_apply(&self.partitions, |_idx, vs| vs.len());
        let total = tree_reduce(&sizes, |x, y| x + y)
            .unwrap_or_else(|| Deferred::lift(0, Some("EmptyCount")));
        Bag { partitions: vec![total.apply(|x| vec![*x])] }
    }

    /// Groups values by key through a full shuffle into `partitions` new partitions
    /// (`0` keeps the current partition count).  Every key lands in exactly one
    /// partition; within a group values keep their arrival order.
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_sequence(vec![1,2,3,4,5,6usize], 2);
    ///   let groups = col.group_by(|x| x % 2, 1);
    ///   assert_eq!(groups.eval().unwrap(), vec![(1, vec![1, 3, 5]), (0, vec![2, 4, 6])]);
    /// ```
    pub fn group_by<
        K: Any + Sync + Send + Clone + Hash + Eq,
        F: 'static + Sync + Send + Clone + Fn(&A) -> K
    >(&self, key: F, partitions: usize) -> Bag<(K, Vec<A>)> {
        Bag { partitions: partitioned::group_by(&self.partitions, partitions, key) }
    }

    /// Folds and accumulates values by key without shuffling the elements.
    ///
    /// Each partition is first folded locally with `binop`, every key starting from
    /// a clone of `initial`.  The per partition maps are then merged with `combine`,
    /// up to `split_every` at a time, until a single map remains.  `binop` and
    /// `combine` must be associative with `initial` as identity.
    ///
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_sequence((0..10usize).collect(), 3);
    ///   // Sum all odds and evens together
    ///   let sums = col.fold_by(|x| x % 2,
    ///                          0usize,
    ///                          |acc, item| *acc += *item,
    ///                          |acc1, acc2| *acc1 += *acc2,
    ///                          2)
    ///                 .eval()
    ///                 .unwrap();
    ///   assert_eq!(sums[&0], 20);
    ///   assert_eq!(sums[&1], 25);
    /// ```
    pub fn fold_by<
        K: Any + Sync + Send + Clone + Hash + Eq,
        B: Any + Sync + Send + Clone,
        F: 'static + Sync + Send + Clone + Fn(&A) -> K,
        O: 'static + Sync + Send + Clone + Fn(&mut B, &A),
        R: 'static + Sync + Send + Clone + Fn(&mut B, &B)
    >(&self, key: F, initial: B, binop: O, combine: R, split_every: usize) -> Folded<K, B> {
        Folded::new(partitioned::fold_by(&self.partitions, key, initial, binop, combine, split_every))
    }

    /// `fold_by` where the accumulator has the element type and one operator
    /// serves both phases.
    /// ```rust
    ///   use sack_collection::Bag;
    ///   use sack_collection::collection::group::DEFAULT_SPLIT_EVERY;
    ///
    ///   let col = Bag::from_sequence(vec![3, 1, 4, 1, 5, 9, 2, 6usize], 4);
    ///   let max = col.reduce_by(|x| x % 2, 0, |acc, x| *acc = (*acc).max(*x), DEFAULT_SPLIT_EVERY)
    ///                .eval()
    ///                .unwrap();
    ///   assert_eq!(max[&0], 6);
    ///   assert_eq!(max[&1], 9);
    /// ```
    pub fn reduce_by<
        K: Any + Sync + Send + Clone + Hash + Eq,
        F: 'static + Sync + Send + Clone + Fn(&A) -> K,
        O: 'static + Sync + Send + Clone + Fn(&mut A, &A)
    >(&self, key: F, initial: A, op: O, split_every: usize) -> Folded<K, A> {
        self.fold_by(key, initial, op.clone(), op, split_every)
    }

    /// Executes every partition within a single run, returning the concatenated
    /// values in partition order.
    pub fn compute<S: Scheduler>(&self, s: &S) -> Result<Vec<A>, BagError> {
        let parts = run_all(&self.partitions, s)?;
        Ok(parts.into_iter().flatten().collect())
    }

    /// Executes the Bag with a default GreedyScheduler
    pub fn eval(&self) -> Result<Vec<A>, BagError> {
        self.compute(&GreedyScheduler::new())
    }

    /// Returns the first `n` values.  Partitions are run one at a time, in order,
    /// and no further partition is run once `n` values are collected.
    /// ```rust
    ///   use sack::scheduler::LeveledScheduler;
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_sequence((0..100usize).collect(), 10);
    ///   let first = col.map(|x| x * 2).take(12, &LeveledScheduler::new()).unwrap();
    ///   assert_eq!(first, (0..12).map(|x| x * 2).collect::<Vec<usize>>());
    /// ```
    pub fn take<S: Scheduler>(&self, n: usize, s: &S) -> Result<Vec<A>, BagError> {
        let mut out = Vec::with_capacity(n);
        for (idx, p) in self.partitions.iter().enumerate() {
            if out.len() >= n {
                break;
            }
            trace!("take: running partition {}", idx);
            let want = n - out.len();
            out.extend(p.run(s)?.into_iter().take(want));
        }
        Ok(out)
    }
}

impl <A: Any + Send + Sync + Clone> Bag<Vec<A>> {

    /// Flattens a vector of values
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![vec![1usize,2],vec![3,4]]);
    ///   let flattened = col.flatten();
    ///   assert_eq!(flattened.eval().unwrap(), vec![1, 2, 3, 4]);
    /// ```
    pub fn flatten(&self) -> Bag<A> {
        self.emit(move |x, emitter| {
            for xi in x {
                emitter(xi.clone());
            }
        })
    }
}

impl Bag<usize> {
    /// Creates a Bag of `0..n` over `parts` partitions
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   assert_eq!(Bag::range(5, 2).eval().unwrap(), vec![0, 1, 2, 3, 4]);
    /// ```
    pub fn range(n: usize, parts: usize) -> Bag<usize> {
        Bag::from_sequence((0..n).collect(), parts)
    }
}

impl <A: Any + Send + Sync + Clone + Hash + Eq> Bag<A> {

    /// Computes the frequencies of the items in bag, shuffled into `partitions`
    /// partitions (`0` keeps the current partition count).
    /// ```rust
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![1, 2, 1, 5, 1, 2]);
    ///   let freqs = col.frequencies(1).sort_by(|x| x.0);
    ///   assert_eq!(freqs.eval().unwrap(), vec![(1, 3), (2, 2), (5, 1)]);
    /// ```
    pub fn frequencies(&self, partitions: usize) -> Bag<(A, usize)> {
        let local = partitioned::block_reduce(&self.partitions, |x: &A| x.clone(), 0usize, |acc, _x| *acc += 1);
        let pairs = batch_apply(&local, |_idx, counts| {
            counts.iter().map(|(k, c)| (k.clone(), *c)).collect::<Vec<(A, usize)>>()
        });
        let partitions = partitioned::output_partitions(partitions, self.partitions.len());
        let shuffled = partitioned::partition_by_key(&pairs, partitions, |p: &(A, usize)| p.0.clone());
        let merged = batch_apply(&shuffled, |_idx, vs| {
            let mut totals: HashMap<A, usize> = HashMap::new();
            let mut order = Vec::new();
            for (k, c) in vs.iter() {
                let total = totals.entry(k.clone()).or_insert_with(|| {
                    order.push(k.clone());
                    0
                });
                *total += *c;
            }
            order.into_iter()
                .map(|k| { let c = totals[&k]; (k, c) })
                .collect::<Vec<(A, usize)>>()
        });
        Bag { partitions: merged }
    }
}

impl <A: Any + Send + Sync + Clone + Pluck> Bag<A> {

    /// Projects the named field out of every element.  An element lacking the
    /// field fails the run with a `FieldAccessError`.
    /// ```rust
    ///   use serde_json::json;
    ///   use sack_collection::{Bag, BagError};
    ///
    ///   let people = Bag::from_vec(vec![json!({"name": "Alice"}), json!({"name": "Bob"})]);
    ///   assert_eq!(people.pluck("name").eval().unwrap(), vec![json!("Alice"), json!("Bob")]);
    ///   match people.pluck("age").eval() {
    ///       Err(BagError::FieldAccess(e)) => assert_eq!(e.field, "age"),
    ///       other => panic!("unexpected {:?}", other),
    ///   }
    /// ```
    pub fn pluck(&self, field: &str) -> Bag<A::Field> {
        let field = field.to_owned();
        self.try_map(move |x| {
            x.pluck(&field).ok_or_else(|| TaskFailure::fatal(FieldAccessError { field: field.clone() }))
        })
    }

    /// Projects the named field, substituting `default` where it is missing.
    pub fn pluck_or(&self, field: &str, default: A::Field) -> Bag<A::Field> {
        let field = field.to_owned();
        self.map(move |x| x.pluck(&field).unwrap_or_else(|| default.clone()))
    }
}

impl <A: Any + Send + Sync + Clone + Record> Bag<A> {

    /// Materializes the Bag and hands it to `sink` as a table.  Without an explicit
    /// `schema` one is inferred from the records; either way rows are laid out in
    /// schema column order, with missing fields as `Null`.
    /// ```rust
    ///   use serde_json::json;
    ///   use sack::scheduler::GreedyScheduler;
    ///   use sack_collection::Bag;
    ///   use sack_collection::dataframe::MemoryTable;
    ///
    ///   let rows = Bag::from_vec(vec![json!({"a": 1, "b": "x"}), json!({"a": 2, "b": "y"})]);
    ///   let table = rows.to_dataframe(&GreedyScheduler::new(), &mut MemoryTable, None).unwrap();
    ///   assert_eq!(table.schema.names(), vec!["a", "b"]);
    ///   assert_eq!(table.n_rows(), 2);
    /// ```
    pub fn to_dataframe<S: Scheduler, T: TabularSink>(
        &self,
        s: &S,
        sink: &mut T,
        schema: Option<Schema>
    ) -> Result<T::Output, BagError> {
        let records = partitioned::concat(&self.partitions)
            .unwrap_or_else(|| Deferred::lift(Vec::new(), Some("Empty")));
        let table = records.try_apply(move |rs| {
            let schema = match &schema {
                Some(schema) => schema.clone(),
                None => infer_schema(rs).map_err(TaskFailure::fatal)?
            };
            let rows = project(rs, &schema).map_err(TaskFailure::fatal)?;
            Ok((schema, rows))
        });
        let (schema, rows) = table.run(s)?;
        debug!("Handing {} rows with {} columns to sink", rows.len(), schema.columns.len());
        sink.accept(schema, rows)
    }
}

impl <K: Any + Send + Sync + Clone + Hash + Eq, V: Any + Send + Sync + Clone> Bag<(K, V)> {

    /// Computes the Bag into a map; for repeated keys the last value wins.
    /// ```rust
    ///   use sack::scheduler::GreedyScheduler;
    ///   use sack_collection::Bag;
    ///
    ///   let col = Bag::from_vec(vec![("a", 1), ("b", 2)]);
    ///   let m = col.to_map(&GreedyScheduler::new()).unwrap();
    ///   assert_eq!(m["b"], 2);
    /// ```
    pub fn to_map<S: Scheduler>(&self, s: &S) -> Result<HashMap<K, V>, BagError> {
        Ok(self.compute(s)?.into_iter().collect())
    }
}

#[cfg(test)]
mod bag_test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use sack::scheduler::LeveledScheduler;
    use sack::ExecutorConfig;

    #[test]
    fn test_fold_by() {
        let col = Bag::from_vec(vec![1,2,3,1,2usize]);
        let out = col.fold_by(|x| *x, 0, |x, _y| *x += 1, |x, y| *x += y, 2);
        let results = out.compute(&LeveledScheduler::new()).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!((results[&1], results[&2], results[&3]), (2, 2, 1));
    }

    #[test]
    fn test_fold_by_parts() {
        let col = Bag::from_sequence(vec![1,2,3,1,2usize], 5);
        let out = col.fold_by(|x| *x, 0, |x, _y| *x += 1, |x, y| *x += y, 2);
        let mut results: Vec<_> = out.to_bag().compute(&LeveledScheduler::new()).unwrap();
        results.sort();
        assert_eq!(results, vec![(1, 2), (2, 2), (3, 1)]);
    }

    #[test]
    fn test_partition_by_key() {
        let col = Bag::from_vec(vec![1,2,3,1,2usize]);
        let computed = col.partition_by_key(2, |x| *x)
            .sort_by(|x| *x);
        assert_eq!(computed.partitions.len(), 2);
        let parts = run_all(computed.to_defs(), &LeveledScheduler::new()).unwrap();
        for p in parts.iter() {
            for k in p.iter() {
                assert!(parts.iter().filter(|q| q.contains(k)).count() == 1);
            }
        }
    }

    #[test]
    fn test_partition() {
        let col = Bag::from_vec(vec![1,2,3,1,2usize]);
        let computed = col.partition(2, |_idx, x| x % 2)
            .sort_by(|x| *x);
        assert_eq!(computed.partitions.len(), 2);
        let results = computed.compute(&LeveledScheduler::new()).unwrap();
        assert_eq!(results, vec![2, 2, 1, 1, 3]);
    }

    #[test]
    fn test_count() {
        let col = Bag::from_vec(vec![1,2,3,1,2usize]);
        let results = col.split(3).count().compute(&LeveledScheduler::new()).unwrap();
        assert_eq!(results, vec![5]);
        let empty: Bag<usize> = Bag::from_defs(Vec::new());
        assert_eq!(empty.count().eval().unwrap(), vec![0]);
    }

    #[test]
    fn test_join() {
        let col1 = Bag::from_vec(vec![1,2,3,1,2usize]);
        let col2 = Bag::from_vec(
            vec![(2, 1.23f64), (3usize, 2.34)]);
        let out = col1.join_on(&col2, |x| *x, |y| y.0, |x, y| {
            (*x, y.1)
        }, 5).split(1).sort_by(|x| x.0);
        let results = out.compute(&LeveledScheduler::new()).unwrap();
        let expected = vec![(2, (2, 1.23)), (2, (2, 1.23)), (3, (3, 2.34))];
        assert_eq!(results, expected);
    }

    #[test]
    fn test_emit() {
        let results = Bag::from_vec(vec![1,2,3usize])
            .emit(|num, emitter| {
                for i in 0..*num {
                    emitter(i);
                }
            })
            .sort_by(|x| *x)
            .compute(&LeveledScheduler::new()).unwrap();
        let expected = vec![0, 0, 0, 1, 1, 2];
        assert_eq!(results, expected);
    }

    #[test]
    fn test_sort() {
        let results = Bag::from_vec(vec![1, 3, 2usize])
            .sort_by(|x| *x)
            .compute(&LeveledScheduler::new()).unwrap();
        let expected = vec![1, 2, 3];
        assert_eq!(results, expected);
    }

    #[test]
    fn test_from_sequence_shapes() {
        let col = Bag::from_sequence((0..10usize).collect(), 4);
        let sizes: Vec<usize> = run_all(col.to_defs(), &GreedyScheduler::new()).unwrap()
            .iter().map(|p| p.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);

        assert_eq!(Bag::from_sequence(vec![1, 2usize], 10).n_partitions(), 2);
        assert_eq!(Bag::from_sequence(vec![1, 2usize], 0).n_partitions(), 1);

        let empty: Bag<usize> = Bag::from_sequence(Vec::new(), 3);
        assert_eq!(empty.n_partitions(), 1);
        assert!(empty.eval().unwrap().is_empty());
    }

    #[test]
    fn test_take_stops_early() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let col = Bag::from_generator(5, move |idx| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![idx; 3]
        });
        assert_eq!(col.take(4, &GreedyScheduler::new()).unwrap(), vec![0, 0, 0, 1]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        assert!(col.take(0, &GreedyScheduler::new()).unwrap().is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(col.take(100, &GreedyScheduler::new()).unwrap().len(), 15);
    }

    #[test]
    fn test_try_map_retries_transient() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let col = Bag::from_vec(vec![1, 2usize]).try_map(move |x| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TaskFailure::transient(std::io::Error::new(std::io::ErrorKind::Other, "flaky")))
            } else {
                Ok(x * 10)
            }
        });
        let s = GreedyScheduler::with_config(ExecutorConfig::default().with_max_attempts(2));
        assert_eq!(col.compute(&s).unwrap(), vec![10, 20]);
    }

    #[test]
    fn test_pluck_or() {
        let mut a = HashMap::new();
        a.insert("x".to_owned(), 1usize);
        let b: HashMap<String, usize> = HashMap::new();
        let col = Bag::from_vec(vec![a, b]);
        assert_eq!(col.pluck_or("x", 0).eval().unwrap(), vec![1, 0]);
        assert!(matches!(col.pluck("x").eval(), Err(BagError::FieldAccess(_))));
    }

    #[test]
    fn test_frequencies_across_partitions() {
        let col = Bag::from_sequence(vec!["a", "b", "a", "c", "a", "b"], 3);
        let freqs = col.frequencies(2);
        assert_eq!(freqs.n_partitions(), 2);
        let mut out = freqs.eval().unwrap();
        out.sort();
        assert_eq!(out, vec![("a", 3), ("b", 2), ("c", 1)]);
    }

    #[test]
    fn test_zero_partitions_keep_input_count() {
        let col = Bag::from_sequence(vec![1, 2, 1, 3, 2, 1usize], 3);
        let freqs = col.frequencies(0);
        assert_eq!(freqs.n_partitions(), 3);
        let mut out = freqs.eval().unwrap();
        out.sort();
        assert_eq!(out, vec![(1, 3), (2, 2), (3, 1)]);
        assert_eq!(col.group_by(|x| *x, 0).n_partitions(), 3);
    }

    #[test]
    fn test_bag_is_reusable_after_failure() {
        let col = Bag::from_vec(vec![1usize, 0, 2]);
        let inverted = col.try_map(|x| {
            if *x == 0 {
                Err(TaskFailure::fatal(anyhow::anyhow!("division by zero")))
            } else {
                Ok(10 / x)
            }
        });
        let s = GreedyScheduler::new();
        assert!(matches!(inverted.compute(&s), Err(BagError::Exec(_))));
        assert_eq!(col.compute(&s).unwrap(), vec![1, 0, 2]);
        assert_eq!(col.filter(|x| *x > 0).map(|x| 10 / x).compute(&s).unwrap(), vec![10, 5]);
    }
}
