use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use jobpool::JobPool;
use log::Level::{Debug as LDebug, Trace};
use priority_queue::PriorityQueue;
use rayon::prelude::*;

use crate::config::ExecutorConfig;
use crate::error::ExecError;
use crate::graph::{FnArgs, Graph, Handle, Snapshot, Task};
use crate::task::{DynArgs, TaskFailure, BASS};

type DepGraph = HashMap<Arc<Handle>, HashSet<Arc<Handle>>>;
type Chain = Vec<Arc<Handle>>;
type ChainGraph = HashMap<Chain, HashSet<Arc<Handle>>>;
type Store = Arc<Mutex<DataStore<Arc<Handle>, Arc<BASS>>>>;

/// Reference counted storage for task outputs.  A value is dropped once each of
/// its readers has taken it.
#[derive(Debug)]
struct DataStore<K: PartialEq + Hash + Eq, V> {
    data: HashMap<K, V>,
    counts: HashMap<K, usize>
}

impl <K: PartialEq + Hash + Eq, V: Clone> DataStore<K, V> {
    fn new(
        data: HashMap<K, V>,
        counts: HashMap<K, usize>
    ) -> Self {
        DataStore { data, counts }
    }

    fn get(&mut self, handle: &K) -> Option<V> {
        let count = self.counts.get_mut(handle).map(|c| {
            *c = c.saturating_sub(1);
            *c
        }).unwrap_or(0);

        if count == 0 {
            self.data.remove(handle)
        } else {
            self.data.get(handle).cloned()
        }
    }

    fn insert(&mut self, handle: K, data: V) {
        self.data.insert(handle, data);
    }
}

fn lock(store: &Store) -> MutexGuard<'_, DataStore<Arc<Handle>, Arc<BASS>>> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Executes snapshotted graphs.
///
/// Only the ancestors of the requested outputs are run.  Values are returned in
/// the order of `outputs`; a failed run returns no values at all.
pub trait Scheduler {
    /// Computes the values of `outputs`.
    fn compute(&self, graph: &Snapshot, outputs: &[Arc<Handle>]) -> Result<Vec<Arc<BASS>>, ExecError>;

    /// Computes `outputs`, keyed by handle.
    fn run(
        &self,
        graph: &Snapshot,
        outputs: &[Arc<Handle>]
    ) -> Result<HashMap<Arc<Handle>, Arc<BASS>>, ExecError> {
        let values = self.compute(graph, outputs)?;
        Ok(outputs.iter().cloned().zip(values).collect())
    }
}

impl <S: Scheduler + ?Sized> Scheduler for &S {
    fn compute(&self, graph: &Snapshot, outputs: &[Arc<Handle>]) -> Result<Vec<Arc<BASS>>, ExecError> {
        (**self).compute(graph, outputs)
    }
}

impl <S: Scheduler + ?Sized> Scheduler for Box<S> {
    fn compute(&self, graph: &Snapshot, outputs: &[Arc<Handle>]) -> Result<Vec<Arc<BASS>>, ExecError> {
        (**self).compute(graph, outputs)
    }
}

// Converts a flattened graph into a dependency list, restricted to `closure`
fn build_dep_graph(graph: &Graph, closure: &HashSet<Arc<Handle>>) -> (DepGraph, DepGraph) {
    // Build out dependencies
    let mut inbound: DepGraph = HashMap::new();
    let mut outbound: DepGraph = HashMap::new();
    for output in closure.iter() {
        let hs: HashSet<Arc<Handle>> = graph.args(output)
            .map(|args| args.handles().into_iter().cloned().collect())
            .unwrap_or_default();
        // Add outbound
        for h in hs.iter() {
            let e = outbound.entry(h.clone()).or_default();
            e.insert(output.clone());
        }
        inbound.insert(output.clone(), hs);
    }
    (inbound, outbound)
}

// Constructs a set of nodes that have no dependencies between them
fn generate_levels(collapsed: &ChainGraph) -> Vec<Vec<Chain>> {
    // Create outbound
    let mut outbound: HashMap<&Arc<Handle>, HashSet<&Chain>> = HashMap::new();
    for (nodes, deps) in collapsed.iter() {
        for d in deps.iter() {
            outbound.entry(d).or_default().insert(nodes);
        }
    }
    let mut inbound = collapsed.clone();
    // Compute task levels
    let mut levels = Vec::new();
    let mut cur_level: Vec<Chain> = inbound.iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(k, _)| k.clone())
            .collect();

    while !cur_level.is_empty() {

        // Remove nodes from graph
        for handles in cur_level.iter() {
            inbound.remove(handles);
        }

        // Update dependencies
        let mut next_level = Vec::new();
        for hs in cur_level.iter() {
            // Get outbound nodes
            let last = &hs[hs.len() - 1];
            if let Some(node_set) = outbound.get(last) {
                for node in node_set.iter() {
                    if let Some(set) = inbound.get_mut(*node) {
                        set.remove(last);
                        if set.is_empty() {
                            next_level.push((*node).clone());
                        }
                    }
                }
            }
        }

        levels.push(cur_level);
        cur_level = next_level;
    }
    if log_enabled!(LDebug) {
        let mut max_con = 0usize;
        for (i, l) in levels.iter().enumerate() {
            max_con = max_con.max(l.len());
            debug!("Level: {}, Tasks: {}", i, l.len());
        }
        debug!("Max Concurrency: {}", max_con);
    }
    levels
}

// Finds chains of tasks that can be collapsed into a single task.  `link(tail, next)`
// decides whether `next` may be appended to a chain ending in `tail`.
fn collapse_graph<K: Hash + Eq + Debug + Clone, L: Fn(&K, &K) -> bool>(
    mut nodes: HashMap<K, HashSet<K>>,
    link: L
) -> HashMap<Vec<K>, HashSet<K>> {

    // Generate outbound edges
    let mut outbound: HashMap<K, Vec<K>> = HashMap::new();
    let mut roots = Vec::new();
    let mut inbound: HashMap<K, Vec<K>> = HashMap::new();
    for (node, deps) in nodes.iter() {
        outbound.entry(node.clone()).or_default();

        for d in deps.iter() {
            outbound.entry(d.clone()).or_default().push(node.clone());
        }

        if deps.is_empty() {
            roots.push(vec![node.clone()]);
        }

        inbound.insert(node.clone(), deps.iter().cloned().collect());
    }

    let mut new_nodes = HashMap::new();
    let mut seen = HashSet::new();
    while let Some(mut chain) = roots.pop() {
        let next = {
            let tail = &chain[chain.len() - 1];
            let outs = &outbound[tail];

            // If outbound == 1 and that reference only has one inbound
            if outs.len() == 1 && inbound[&outs[0]].len() == 1 && link(tail, &outs[0]) {
                Some(outs[0].clone())
            } else {
                None
            }
        };

        if let Some(node) = next {
            chain.push(node);
            roots.push(chain);
        } else {
            // If current chain is ended, add the outbound nodes
            {
                let tail = &chain[chain.len() - 1];
                for node in outbound[tail].iter() {
                    if !seen.contains(node) {
                        roots.push(vec![node.clone()]);
                        seen.insert(node.clone());
                    }
                }
            }
            // Emit current chain
            let deps = nodes.remove(&chain[0]).unwrap_or_default();
            new_nodes.insert(chain, deps);
        }
    }

    new_nodes
}

/// Everything a scheduler needs to run one request
struct Plan {
    chains: ChainGraph,
    outbound: DepGraph,
    counts: HashMap<Arc<Handle>, usize>
}

impl Plan {
    fn new(snapshot: &Snapshot, outputs: &[Arc<Handle>]) -> Result<Self, ExecError> {
        let graph = snapshot.graph();
        debug!("Number of Tasks Specified: {}", graph.len());

        let closure = snapshot.ancestors(outputs)?;
        let (inbound, outbound) = build_dep_graph(graph, &closure);

        let targets: HashSet<&Arc<Handle>> = outputs.iter().collect();
        let chains = collapse_graph(inbound, |tail, next| {
            !targets.contains(tail) && matches!(graph.args(next).map(|a| &**a), Some(FnArgs::Single(_)))
        });

        debug!("Number of Tasks to Run: {} in {} chains", closure.len(), chains.len());

        // One read per argument occurrence, plus one per requested output
        let mut counts: HashMap<Arc<Handle>, usize> = HashMap::new();
        for chain in chains.keys() {
            if let Some(args) = graph.args(&chain[0]) {
                for h in args.handles() {
                    *counts.entry(h.clone()).or_insert(0) += 1;
                }
            }
        }
        for h in outputs {
            *counts.entry(h.clone()).or_insert(0) += 1;
        }

        Ok(Plan { chains, outbound, counts })
    }

    fn store(&self) -> Store {
        Arc::new(Mutex::new(DataStore::new(HashMap::new(), self.counts.clone())))
    }

    // Transitive dependents of a failed task
    fn cancelled(&self, failed: &str) -> usize {
        let mut seen: HashSet<&Arc<Handle>> = HashSet::new();
        let mut stack: Vec<&Arc<Handle>> = self.outbound.iter()
            .filter(|(h, _)| h.key() == failed)
            .flat_map(|(_, outs)| outs.iter())
            .collect();
        while let Some(h) = stack.pop() {
            if seen.insert(h) {
                if let Some(outs) = self.outbound.get(h) {
                    stack.extend(outs.iter());
                }
            }
        }
        seen.len()
    }

    fn fail(&self, mut err: ExecError) -> ExecError {
        if let ExecError::TaskExecution { ref key, ref mut cancelled, .. } = err {
            *cancelled = self.cancelled(key);
            debug!("Task {} failed, cancelling {} dependent tasks", key, cancelled);
        }
        err
    }
}

fn collect_outputs(store: &Store, outputs: &[Arc<Handle>]) -> Result<Vec<Arc<BASS>>, ExecError> {
    let mut ds = lock(store);
    outputs.iter()
        .map(|h| ds.get(h).ok_or_else(|| ExecError::MissingOutput { key: h.key().to_owned() }))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn eval_task(task: &Task, shape: Option<&FnArgs>, args: &[Arc<BASS>]) -> Result<BASS, TaskFailure> {
    match task {
        Task::Input(input) => input.read(),
        Task::Function(t) => {
            let dyn_args = match (shape, args) {
                (Some(FnArgs::Single(_)), [a]) => DynArgs::One(&**a),
                (Some(FnArgs::Join(..)), [a, b]) => DynArgs::Two(&**a, &**b),
                (Some(FnArgs::Many(_)), vs) => DynArgs::Many(vs.iter().map(|a| &**a).collect()),
                _ => return Err(TaskFailure::fatal(anyhow!("task arguments do not match its declaration")))
            };
            t.eval(dyn_args)
        }
    }
}

// Runs a single task, retrying transient failures until `max_attempts` runs were made
fn attempt(
    handle: &Handle,
    task: &Task,
    shape: Option<&FnArgs>,
    args: &[Arc<BASS>],
    max_attempts: usize
) -> Result<BASS, ExecError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let out = panic::catch_unwind(AssertUnwindSafe(|| eval_task(task, shape, args)))
            .unwrap_or_else(|payload| {
                Err(TaskFailure::transient(anyhow!("task panicked: {}", panic_message(&*payload))))
            });
        match out {
            Ok(v) => return Ok(v),
            Err(failure) if failure.is_retryable() && attempts < max_attempts => {
                warn!("Task {} failed on attempt {}/{}: {}", handle, attempts, max_attempts, failure);
            },
            Err(failure) => {
                return Err(ExecError::TaskExecution {
                    key: handle.key().to_owned(),
                    attempts,
                    cancelled: 0,
                    cause: failure
                });
            }
        }
    }
}

fn run_task(
    graph: &Graph,
    chain: &[Arc<Handle>],
    dsam: &Store,
    max_attempts: usize
) -> Result<(), ExecError> {
    // Pull out arguments from the datasource
    trace!("Reading dependencies for chain {:?}", chain[0]);
    let mut largs: Vec<Arc<BASS>> = {
        let mut ds = lock(dsam);
        match graph.args(&chain[0]) {
            Some(fa) => fa.handles().into_iter()
                .map(|h| ds.get(h).ok_or_else(|| ExecError::MissingOutput { key: h.key().to_owned() }))
                .collect::<Result<_, _>>()?,
            None => Vec::new()
        }
    };

    for handle in chain {
        trace!("Processing handle: {:?}", handle);
        let task = graph.tasks.get(handle)
            .ok_or_else(|| ExecError::MissingOutput { key: handle.key().to_owned() })?;
        let shape = graph.args(handle).map(|a| &**a);
        let out = attempt(handle, task, shape, &largs, max_attempts)?;
        largs = vec![Arc::new(out)];
    }

    if let (Some(d), Some(tail)) = (largs.pop(), chain.last()) {
        lock(dsam).insert(tail.clone(), d);
    }
    Ok(())
}

/// Runs the graph level by level: every task whose dependencies are complete
/// runs in parallel on a rayon pool, and a level must finish before the next
/// one starts.
#[derive(Debug, Clone, Default)]
pub struct LeveledScheduler {
    config: ExecutorConfig
}

impl LeveledScheduler {
    /// Creates a LeveledScheduler with the default configuration
    pub fn new() -> Self {
        LeveledScheduler::default()
    }

    /// Creates a LeveledScheduler with the given configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        LeveledScheduler { config: config.normalized() }
    }
}

impl Scheduler for LeveledScheduler {

    fn compute(
        &self,
        snapshot: &Snapshot,
        outputs: &[Arc<Handle>]
    ) -> Result<Vec<Arc<BASS>>, ExecError> {
        if outputs.is_empty() {
            return Ok(Vec::new());
        }
        let config = self.config.normalized();
        let plan = Plan::new(snapshot, outputs)?;

        // Build out the levels
        let levels = generate_levels(&plan.chains);
        let dsam = plan.store();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()?;

        let graph = snapshot.graph();
        for (i, level) in levels.iter().enumerate() {
            debug!("Running level: {}", i);
            let results: Vec<_> = pool.install(|| {
                level.par_iter()
                    .map(|chain| run_task(graph, chain, &dsam, config.max_attempts))
                    .collect()
            });
            if let Some(err) = results.into_iter().find_map(Result::err) {
                return Err(plan.fail(err));
            }
        }

        debug!("Finished");
        collect_outputs(&dsam, outputs)
    }
}

/// Dataflow scheduler: a task is sent to the worker pool as soon as all of its
/// dependencies have completed.
#[derive(Debug, Clone, Default)]
pub struct GreedyScheduler {
    config: ExecutorConfig
}

impl GreedyScheduler {
    /// Creates a GreedyScheduler with the default configuration
    pub fn new() -> Self {
        GreedyScheduler::default()
    }

    /// Creates a GreedyScheduler running at most `n_threads` tasks at once
    pub fn with_workers(n_threads: usize) -> Self {
        GreedyScheduler::with_config(ExecutorConfig::default().with_workers(n_threads))
    }

    /// Creates a GreedyScheduler with the given configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        GreedyScheduler { config: config.normalized() }
    }
}

impl Scheduler for GreedyScheduler {

    fn compute(
        &self,
        snapshot: &Snapshot,
        outputs: &[Arc<Handle>]
    ) -> Result<Vec<Arc<BASS>>, ExecError> {
        if outputs.is_empty() {
            return Ok(Vec::new());
        }
        let config = self.config.normalized();
        let plan = Plan::new(snapshot, outputs)?;

        let mut queue = PriorityQueue::new();
        let mut head_map = HashMap::with_capacity(plan.chains.len());
        for (chain, deps) in plan.chains.iter() {
            // Chains feeding more tasks go first
            let tail = &chain[chain.len() - 1];
            let priority = plan.outbound.get(tail).map(|o| o.len()).unwrap_or(0);
            if deps.is_empty() {
                queue.push(chain.clone(), priority);
            }
            head_map.insert(chain[0].clone(), (chain.clone(), priority, deps.clone()));
        }

        // Initialize an empty data store
        let dsam = plan.store();

        trace!("Output: {:?}", outputs);

        if log_enabled!(Trace) {
            for (index, (chain, _priority, deps)) in head_map.iter() {
                trace!("Index: {:?}, Chain: {:?}, Deps: {:?}", index, chain, deps);
            }
        }

        let mut failure = None;
        {
            let mut pool = JobPool::new(config.workers);
            let mut running = 0usize;
            let (tx, rx) = mpsc::channel();
            loop {
                // Queue up all free items, unless the run already failed
                while failure.is_none() && running < config.workers {
                    let Some((chain, _priority)) = queue.pop() else { break };
                    trace!("Starting chain: {:?}", chain);
                    let g = snapshot.clone();
                    let d = dsam.clone();
                    let thread_tx = tx.clone();
                    let attempts = config.max_attempts;
                    pool.queue(move || {
                        let res = run_task(g.graph(), &chain, &d, attempts);
                        let tail = chain[chain.len() - 1].clone();
                        // The receiver only hangs up once the run is over
                        let _ = thread_tx.send((tail, res));
                    });
                    running += 1;
                }

                if running == 0 {
                    break;
                }

                let Ok((handle, res)) = rx.recv() else { break };
                running -= 1;
                trace!("{:?} finished", handle);
                if let Err(e) = res {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                    continue;
                }

                // Remove it as deps from remaining tasks
                if let Some(out) = plan.outbound.get(&handle) {
                    for out_handle in out {
                        if let Some((chain, p, deps)) = head_map.get_mut(out_handle) {
                            trace!("Updating {:?}", out_handle);
                            deps.remove(&handle);
                            if deps.is_empty() {
                                trace!("Adding new chain: {:?}", chain);
                                queue.push(chain.clone(), *p);
                            } else {
                                trace!("Remaining Deps: {:?}", deps);
                            }
                        }
                    }
                }
            }
            pool.shutdown();
        }

        if let Some(err) = failure {
            return Err(plan.fail(err));
        }

        debug!("Finished");
        collect_outputs(&dsam, outputs)
    }
}

#[cfg(test)]
mod size_test {
    use super::*;

    #[test]
    fn test_graph_collapse() {
        /*
        1 -> 2 -> 3
              \
               4 -> 5

        We should collapse 1 -> 2 and 4 -> 5
        */
        let one_deps = HashSet::new();
        let mut two_deps = HashSet::new();
        two_deps.insert(1usize);

        let mut three_deps = HashSet::new();
        three_deps.insert(2usize);

        let mut four_deps = HashSet::new();
        four_deps.insert(2usize);

        let mut five_deps = HashSet::new();
        five_deps.insert(4usize);

        let mut deps = HashMap::new();
        deps.insert(1usize, one_deps);
        deps.insert(2usize, two_deps);
        deps.insert(3usize, three_deps);
        deps.insert(4usize, four_deps);
        deps.insert(5usize, five_deps);

        let out = collapse_graph(deps, |_, _| true);
        let mut res = HashMap::new();
        res.insert(vec![1, 2], HashSet::new());
        res.insert(vec![3], vec![2].into_iter().collect());
        res.insert(vec![4, 5], vec![2].into_iter().collect());

        assert_eq!(out, res);
    }

    #[test]
    fn test_graph_collapse_2() {
        /*
             2 -> 4
            /     |
           1 ---> 3

        */
        let one_deps = HashSet::new();
        let mut two_deps = HashSet::new();
        two_deps.insert(1usize);

        let mut three_deps = HashSet::new();
        three_deps.insert(1usize);

        let mut four_deps = HashSet::new();
        four_deps.insert(2usize);
        four_deps.insert(3usize);

        let mut deps = HashMap::new();
        deps.insert(1usize, one_deps);
        deps.insert(2usize, two_deps);
        deps.insert(3usize, three_deps);
        deps.insert(4usize, four_deps);

        let res = deps.clone().into_iter().map(|(k, v)| (vec![k], v)).collect();
        let out = collapse_graph(deps, |_, _| true);

        assert_eq!(out, res);
    }

    #[test]
    fn test_graph_collapse_stops_at_link() {
        // 1 -> 2 -> 3, but 2 is requested and may not be extended past
        let mut deps = HashMap::new();
        deps.insert(1usize, HashSet::new());
        deps.insert(2usize, vec![1].into_iter().collect());
        deps.insert(3usize, vec![2].into_iter().collect());

        let out = collapse_graph(deps, |tail, _| *tail != 2);
        let mut res = HashMap::new();
        res.insert(vec![1, 2], HashSet::new());
        res.insert(vec![3], vec![2].into_iter().collect());
        assert_eq!(out, res);
    }

    #[test]
    fn test_data_store_counts() {
        let mut counts = HashMap::new();
        counts.insert("a", 2usize);
        let mut ds = DataStore::new(HashMap::new(), counts);
        ds.insert("a", 1usize);
        assert_eq!(ds.get(&"a"), Some(1));
        assert_eq!(ds.get(&"a"), Some(1));
        assert_eq!(ds.get(&"a"), None);
    }
}
