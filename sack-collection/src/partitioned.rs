//! Graph construction strategies shared by the collection operators: shuffles,
//! block reductions and tree combines over partitions.

use std::any::Any;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use sack::deferred::{batch_apply, tree_combine, Deferred};

/// Folds every partition into a local key -> accumulator map.
pub fn block_reduce<
    A: Any + Sync + Send,
    K: Any + Sync + Send + Clone + Hash + Eq,
    B: Any + Sync + Send + Clone,
    F: 'static + Sync + Send + Clone + Fn(&A) -> K,
    O: 'static + Sync + Send + Clone + Fn(&mut B, &A),
>(
    defs: &[Deferred<Vec<A>>],
    key: F,
    initial: B,
    binop: O
) -> Vec<Deferred<HashMap<K, B>>> {
    batch_apply(defs, move |_idx, vs| {
        let mut reducer = HashMap::new();
        for v in vs.iter() {
            let acc = reducer.entry(key(v)).or_insert_with(|| initial.clone());
            binop(acc, v);
        }
        reducer
    })
}

/// First stage of a shuffle: every partition is split into `partitions` buckets.
pub fn split_by_key<
    A: Any + Send + Sync + Clone,
    F: 'static + Sync + Send + Clone + Fn(usize, &A) -> usize
>(
    defs: &[Deferred<Vec<A>>],
    partitions: usize,
    hash_function: F
) -> Vec<Deferred<Vec<Vec<A>>>> {
    let partitions = partitions.max(1);
    batch_apply(defs, move |_idx, vs| {
        let mut parts = vec![Vec::new(); partitions];
        for (idx, x) in vs.iter().enumerate() {
            let p = hash_function(idx, x) % partitions;
            parts[p].push(x.clone());
        }
        parts
    })
}

/// Collects bucket `idx` of every split partition, in partition order.
fn gather<A: Any + Send + Sync + Clone>(splits: &[Deferred<Vec<Vec<A>>>], idx: usize) -> Deferred<Vec<A>> {
    Deferred::join_all(splits, move |parts| {
        parts.iter()
            .filter_map(|p| p.get(idx))
            .flat_map(|bucket| bucket.iter().cloned())
            .collect::<Vec<A>>()
    })
}

/// Redistributes elements into `partitions` new partitions, as directed by `key`.
pub fn partition<
    A: Any + Send + Sync + Clone,
    F: 'static + Sync + Send + Clone + Fn(usize, &A) -> usize
>(
    defs: &[Deferred<Vec<A>>],
    partitions: usize,
    key: F
) -> Vec<Deferred<Vec<A>>> {
    let partitions = partitions.max(1);
    let splits = split_by_key(defs, partitions, key);
    (0..partitions).map(|idx| gather(&splits, idx)).collect()
}

pub(crate) fn hash_key<K: Hash>(k: &K) -> usize {
    let mut hasher = DefaultHasher::new();
    k.hash(&mut hasher);
    hasher.finish() as usize
}

// Partition count of a keyed shuffle; 0 keeps the input count.
pub(crate) fn output_partitions(requested: usize, inputs: usize) -> usize {
    if requested == 0 { inputs.max(1) } else { requested }
}

/// Shuffles elements so that equal keys land in the same partition.
pub fn partition_by_key<
    A: Any + Sync + Send + Clone,
    K: Hash,
    F: 'static + Sync + Send + Clone + Fn(&A) -> K
>(
    defs: &[Deferred<Vec<A>>],
    n_chunks: usize,
    key: F
) -> Vec<Deferred<Vec<A>>> {
    partition(defs, n_chunks, move |_idx, v| hash_key(&key(v)))
}

/// Groups elements by key through a full shuffle.  Within one output partition,
/// keys appear in order of first arrival and each group keeps arrival order.
/// `partitions == 0` keeps the input partition count.
pub fn group_by<
    A: Any + Sync + Send + Clone,
    K: Any + Sync + Send + Clone + Hash + Eq,
    F: 'static + Sync + Send + Clone + Fn(&A) -> K
>(
    defs: &[Deferred<Vec<A>>],
    partitions: usize,
    key: F
) -> Vec<Deferred<Vec<(K, Vec<A>)>>> {
    let partitions = output_partitions(partitions, defs.len());
    let shuffled = partition_by_key(defs, partitions, key.clone());
    batch_apply(&shuffled, move |_idx, vs| {
        let mut index: HashMap<K, usize> = HashMap::new();
        let mut groups: Vec<(K, Vec<A>)> = Vec::new();
        for v in vs.iter() {
            let k = key(v);
            match index.get(&k) {
                Some(&i) => groups[i].1.push(v.clone()),
                None => {
                    index.insert(k.clone(), groups.len());
                    groups.push((k, vec![v.clone()]));
                }
            }
        }
        groups
    })
}

fn merge_maps<
    K: Hash + Eq + Clone,
    V: Clone,
    R: Fn(&mut V, &V)
>(
    maps: &[&HashMap<K, V>],
    reduce: &R
) -> HashMap<K, V> {
    let mut nl: HashMap<K, V> = maps.first().map(|m| (*m).clone()).unwrap_or_default();
    for right in maps.iter().skip(1) {
        for (k, v) in right.iter() {
            match nl.entry(k.clone()) {
                Entry::Occupied(mut e) => reduce(e.get_mut(), v),
                Entry::Vacant(e) => { e.insert(v.clone()); }
            }
        }
    }
    nl
}

/// Map side reduction followed by a tree combine of the per partition maps, with
/// up to `split_every` maps merged per task.
///
/// `binop` and `combine` must be associative and `initial` must be their identity;
/// the result is then independent of partitioning and of the combine tree.  This
/// is not checked.
pub fn fold_by<
    A: Any + Send + Sync,
    B: Any + Sync + Send + Clone,
    K: Any + Sync + Send + Clone + Hash + Eq,
    F: 'static + Sync + Send + Clone + Fn(&A) -> K,
    O: 'static + Sync + Send + Clone + Fn(&mut B, &A),
    R: 'static + Sync + Send + Clone + Fn(&mut B, &B)
>(
    defs: &[Deferred<Vec<A>>],
    key: F,
    initial: B,
    binop: O,
    combine: R,
    split_every: usize
) -> Deferred<HashMap<K, B>> {
    let stage1 = block_reduce(defs, key, initial, binop);
    tree_combine(&stage1, split_every, move |maps| merge_maps(maps, &combine))
        .unwrap_or_else(|| Deferred::lift(HashMap::new(), Some("EmptyFold")))
}

/// Concatenates partitions in order into one
pub fn concat<A: Any + Sync + Send + Clone>(defs: &[Deferred<Vec<A>>]) -> Option<Deferred<Vec<A>>> {
    if defs.is_empty() {
        None
    } else {
        Some(Deferred::join_all(defs, |vs| {
            vs.iter().flat_map(|v| v.iter().cloned()).collect::<Vec<A>>()
        }))
    }
}

/// Inner join of two co-partitioned, keyed partitions
pub fn join_on_key<
    A: Any + Sync + Send + Clone,
    B: Any + Sync + Send + Clone,
    K: Any + Send + Sync + Clone + Hash + Eq,
    C: Any + Sync + Send + Clone,
    J: 'static + Sync + Send + Clone + Fn(&A, &B) -> C,
>(
    d1: &Deferred<Vec<(K, A)>>,
    d2: &Deferred<Vec<(K, B)>>,
    joiner: J
) -> Deferred<Vec<(K, C)>> {

    d1.join(d2, move |left, right| {
        // Slurp up left into a hashmap
        let mut hm = HashMap::new();
        for (k, lv) in left {
            let e = hm.entry(k).or_insert_with(|| Vec::with_capacity(1));
            e.push(lv);
        }
        let mut ret = Vec::new();
        for (k, rv) in right {
            if let Some(lvs) = hm.get(k) {
                for lv in lvs.iter() {
                    ret.push((k.clone(), joiner(lv, rv)))
                }
            }
        }
        ret
    })
}

#[cfg(test)]
mod partitioned_test {
    use super::*;
    use sack::deferred::run_all;
    use sack::scheduler::GreedyScheduler;

    fn parts(vs: Vec<Vec<usize>>) -> Vec<Deferred<Vec<usize>>> {
        vs.into_iter().map(|v| Deferred::lift(v, None)).collect()
    }

    #[test]
    fn test_merge_maps() {
        let mut a = HashMap::new();
        a.insert("x", 1usize);
        let mut b = HashMap::new();
        b.insert("x", 2usize);
        b.insert("y", 5usize);
        let merged = merge_maps(&[&a, &b, &b], &|acc: &mut usize, v: &usize| *acc += *v);
        assert_eq!(merged["x"], 5);
        assert_eq!(merged["y"], 10);
    }

    #[test]
    fn test_partition_by_key_colocates() {
        let defs = parts(vec![vec![1, 2, 3], vec![3, 2, 1], vec![1, 1]]);
        let shuffled = partition_by_key(&defs, 2, |x| *x);
        assert_eq!(shuffled.len(), 2);
        let out = run_all(&shuffled, &GreedyScheduler::new()).unwrap();
        for key in 1..4usize {
            let holders = out.iter().filter(|p| p.contains(&key)).count();
            assert_eq!(holders, 1);
        }
        assert_eq!(out.iter().map(|p| p.len()).sum::<usize>(), 8);
    }

    #[test]
    fn test_group_by_keeps_arrival_order() {
        let defs = parts(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let grouped = group_by(&defs, 1, |x| x % 2);
        let out = run_all(&grouped, &GreedyScheduler::new()).unwrap();
        assert_eq!(out, vec![vec![(1, vec![1, 3, 5]), (0, vec![2, 4, 6])]]);
    }

    #[test]
    fn test_fold_by_empty() {
        let defs: Vec<Deferred<Vec<usize>>> = Vec::new();
        let folded = fold_by(&defs, |x| *x, 0usize, |a, x| *a += x, |a, b| *a += b, 8);
        assert!(folded.run(&GreedyScheduler::new()).unwrap().is_empty());
    }
}
