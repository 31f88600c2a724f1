use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{ExecError, GraphError};
use crate::task::{BASS, DynRun, TaskFailure};

static GLOBAL_HANDLE_COUNT: AtomicUsize = AtomicUsize::new(0);

// Prefixes of generated keys; explicit keys may not use them.
const GENERATED_KINDS: [&str; 2] = ["Input", "Task"];

/// Interface for providing inputs into the graph, such as literal values or files
pub trait Input: Send + Sync {
    /// Produces the value of the node.
    fn read(&self) -> Result<BASS, TaskFailure>;
}

/// Unique key representing a task in a Graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    /// Uses the provided key verbatim.
    pub fn named(key: &str) -> Self {
        Handle(key.to_owned())
    }

    /// Creates a new handle, unique for the lifetime of the process.
    fn generate(kind: &str, name: &str) -> Self {
        let id = GLOBAL_HANDLE_COUNT.fetch_add(1, Ordering::SeqCst);
        Handle(format!("{}<id={},name={}>", kind, id, name))
    }

    /// Whether `key` has the shape of a generated key
    fn is_generated(key: &str) -> bool {
        key.ends_with('>') && GENERATED_KINDS.iter().any(|kind| {
            key.strip_prefix(kind).map_or(false, |rest| rest.starts_with("<id="))
        })
    }

    /// Key of the handle
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ADT for handling either Tasks or reading data into the graph
pub enum Task {

    /// Node which consumes down stream data to produce new data
    Function(Box<dyn DynRun>),

    /// Node which generates data
    Input(Box<dyn Input>)
}

/// Holds references to the arguments to pass into a Task
#[derive(Debug, Clone)]
pub enum FnArgs {

    /// Single argument
    Single(Arc<Handle>),

    /// Used for joining two separate task outputs
    Join(Arc<Handle>, Arc<Handle>),

    /// Ordered list of arguments, used by n-ary combines
    Many(Vec<Arc<Handle>>)
}

impl FnArgs {
    /// Referenced handles in argument order, duplicates included.
    pub fn handles(&self) -> Vec<&Arc<Handle>> {
        match self {
            FnArgs::Single(h) => vec![h],
            FnArgs::Join(l, r) => vec![l, r],
            FnArgs::Many(hs) => hs.iter().collect()
        }
    }
}

/// Graphs contain the computational pieces needed to represent the data flow
/// between multiple different tasks, their combination, and eventual output.
///
/// Cloning a Graph shares every task with the original, so extending a clone
/// leaves the original untouched.
#[derive(Clone, Default)]
pub struct Graph {

    /// Output handle to task
    pub(crate) tasks: HashMap<Arc<Handle>, Arc<Task>>,

    /// Dependencies between tasks
    pub(crate) dependencies: HashMap<Arc<Handle>, Option<Arc<FnArgs>>>
}

#[derive(Clone, Copy)]
enum Mark {
    InProgress,
    Done
}

impl Graph {

    /// Creates a new Graph
    pub fn new() -> Self {
        Graph {
            tasks: HashMap::new(),
            dependencies: HashMap::new()
        }
    }

    /// Number of tasks in the graph
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether a task with the given key exists
    pub fn contains(&self, handle: &Handle) -> bool {
        self.tasks.contains_key(handle)
    }

    /// Adds a function node under an explicit key.  The referenced handles do not
    /// need to exist yet; they are resolved by `snapshot`.
    pub fn add_node<D: 'static + DynRun>(
        &mut self,
        key: &str,
        inputs: FnArgs,
        t: D
    ) -> Result<Arc<Handle>, GraphError> {
        let handle = self.reserve(key)?;
        self.insert(handle.clone(), Task::Function(Box::new(t)), Some(inputs));
        Ok(handle)
    }

    /// Adds an input node under an explicit key.  Literal arguments are given to
    /// other nodes this way.
    pub fn add_named_input<I: Input + 'static>(
        &mut self,
        key: &str,
        input: I
    ) -> Result<Arc<Handle>, GraphError> {
        let handle = self.reserve(key)?;
        self.insert(handle.clone(), Task::Input(Box::new(input)), None);
        Ok(handle)
    }

    /// Adds a new input into the Graph under a generated key
    pub fn add_input<I: Input + 'static>(&mut self, input: I, name: &str) -> Arc<Handle> {
        let handle = Arc::new(Handle::generate("Input", name));
        self.insert(handle.clone(), Task::Input(Box::new(input)), None);
        handle
    }

    /// Adds a task to the graph under a generated key.  No effort is made to ensure
    /// the handles exist within the graph until it is snapshotted.
    pub fn add_task<D: 'static + DynRun>(&mut self, inputs: FnArgs, t: D, name: &str) -> Arc<Handle> {
        let handle = Arc::new(Handle::generate("Task", name));
        self.insert(handle.clone(), Task::Function(Box::new(t)), Some(inputs));
        handle
    }

    fn reserve(&self, key: &str) -> Result<Arc<Handle>, GraphError> {
        if Handle::is_generated(key) {
            return Err(GraphError::ReservedKey { key: key.to_owned() });
        }
        let handle = Arc::new(Handle::named(key));
        if self.tasks.contains_key(&handle) {
            Err(GraphError::DuplicateKey { key: key.to_owned() })
        } else {
            Ok(handle)
        }
    }

    fn insert(&mut self, handle: Arc<Handle>, task: Task, inputs: Option<FnArgs>) {
        self.dependencies.insert(handle.clone(), inputs.map(Arc::new));
        self.tasks.insert(handle, Arc::new(task));
    }

    /// Given two graphs, merge all tasks and dependencies.  A key present in both
    /// graphs must refer to the same task.
    pub fn merge(&self, other: &Graph) -> Result<Graph, GraphError> {
        for (handle, task) in other.tasks.iter() {
            if let Some(mine) = self.tasks.get(handle) {
                if !Arc::ptr_eq(mine, task) {
                    return Err(GraphError::DuplicateKey { key: handle.key().to_owned() });
                }
            }
        }
        Ok(self.merge_shared(other))
    }

    /// Merge for graphs whose keys were all generated, and therefore can only
    /// collide on shared tasks.
    pub(crate) fn merge_shared(&self, other: &Graph) -> Graph {
        let mut nh = self.clone();

        for (handle, input) in other.dependencies.iter() {
            if !self.dependencies.contains_key(handle) {
                nh.dependencies.insert(handle.clone(), input.clone());
            }
        }

        for (handle, task) in other.tasks.iter() {
            if !self.tasks.contains_key(handle) {
                nh.tasks.insert(handle.clone(), task.clone());
            }
        }
        nh
    }

    /// Arguments of a task; `None` for inputs and unknown handles
    pub(crate) fn args(&self, handle: &Handle) -> Option<&Arc<FnArgs>> {
        self.dependencies.get(handle).and_then(|a| a.as_ref())
    }

    fn refs(&self, handle: &Handle) -> Vec<&Arc<Handle>> {
        self.args(handle).map(|a| a.handles()).unwrap_or_default()
    }

    /// Freezes the graph for execution, checking that every reference resolves
    /// and that the references are acyclic.
    pub fn snapshot(&self) -> Result<Snapshot, GraphError> {
        for (node, args) in self.dependencies.iter() {
            if let Some(args) = args {
                for dep in args.handles() {
                    if !self.tasks.contains_key(dep) {
                        return Err(GraphError::MissingDependency {
                            node: node.key().to_owned(),
                            dependency: dep.key().to_owned()
                        });
                    }
                }
            }
        }
        self.check_cycles()?;
        Ok(Snapshot(Arc::new(self.clone())))
    }

    // Iterative depth first traversal; meeting a node still on the stack is a cycle.
    fn check_cycles(&self) -> Result<(), GraphError> {
        let mut marks: HashMap<&Arc<Handle>, Mark> = HashMap::with_capacity(self.tasks.len());
        for root in self.tasks.keys() {
            if marks.contains_key(root) {
                continue;
            }
            marks.insert(root, Mark::InProgress);
            let mut stack = vec![(root, self.refs(root), 0usize)];
            while let Some(frame) = stack.last_mut() {
                if frame.2 < frame.1.len() {
                    let dep = frame.1[frame.2];
                    frame.2 += 1;
                    match marks.get(dep) {
                        Some(Mark::InProgress) => {
                            return Err(GraphError::Cycle { key: dep.key().to_owned() });
                        },
                        Some(Mark::Done) => (),
                        None => {
                            marks.insert(dep, Mark::InProgress);
                            stack.push((dep, self.refs(dep), 0));
                        }
                    }
                } else {
                    let node = frame.0;
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}

/// Frozen, validated view of a Graph.  Cheap to clone.
#[derive(Clone)]
pub struct Snapshot(Arc<Graph>);

impl Snapshot {
    /// The frozen graph
    pub fn graph(&self) -> &Graph {
        &self.0
    }

    /// All tasks needed to produce `targets`, targets included.
    pub fn ancestors(&self, targets: &[Arc<Handle>]) -> Result<HashSet<Arc<Handle>>, ExecError> {
        let mut seen = HashSet::new();
        let mut stack = Vec::with_capacity(targets.len());
        for t in targets {
            match self.0.tasks.get_key_value(t) {
                Some((h, _)) => stack.push(h.clone()),
                None => return Err(ExecError::UnknownTarget { key: t.key().to_owned() })
            }
        }
        while let Some(h) = stack.pop() {
            if seen.contains(&h) {
                continue;
            }
            for dep in self.0.refs(&h) {
                if !seen.contains(dep) {
                    stack.push(dep.clone());
                }
            }
            seen.insert(h);
        }
        Ok(seen)
    }
}

#[cfg(test)]
mod graph_test {
    use super::*;
    use crate::task::{DynFn, DynFnN};

    struct Const(usize);

    impl Input for Const {
        fn read(&self) -> Result<BASS, TaskFailure> {
            Ok(Box::new(self.0))
        }
    }

    fn incr() -> DynFn<usize, usize, impl Fn(&usize) -> Result<usize, TaskFailure>> {
        DynFn::new(|x: &usize| Ok(x + 1))
    }

    #[test]
    fn test_duplicate_key() {
        let mut g = Graph::new();
        g.add_named_input("a", Const(1)).unwrap();
        let err = g.add_named_input("a", Const(2)).unwrap_err();
        assert_eq!(err, GraphError::DuplicateKey { key: "a".into() });
        let a = Arc::new(Handle::named("a"));
        let err = g.add_node("a", FnArgs::Single(a), incr()).unwrap_err();
        assert_eq!(err, GraphError::DuplicateKey { key: "a".into() });
    }

    #[test]
    fn test_generated_keys_are_reserved() {
        let mut g = Graph::new();
        let first = g.add_input(Const(1), "x");
        assert_eq!(g.add_named_input(first.key(), Const(2)).unwrap_err(),
                   GraphError::ReservedKey { key: first.key().into() });

        // A key the counter has not reached yet is refused as well
        let ahead = "Input<id=18446744073709551615,name=x>";
        assert!(matches!(g.add_named_input(ahead, Const(2)), Err(GraphError::ReservedKey { .. })));
        assert!(matches!(g.add_node("Task<id=7,name=y>", FnArgs::Single(first.clone()), incr()),
                         Err(GraphError::ReservedKey { .. })));

        g.add_input(Const(3), "x");
        assert_eq!(g.len(), 2);

        // Look-alikes outside the generated form stay usable
        g.add_named_input("Input<x>", Const(4)).unwrap();
        g.add_named_input("MyTask<id=1,name=x>", Const(5)).unwrap();
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn test_missing_dependency() {
        let mut g = Graph::new();
        g.add_node("b", FnArgs::Single(Arc::new(Handle::named("a"))), incr()).unwrap();
        match g.snapshot() {
            Err(GraphError::MissingDependency { node, dependency }) => {
                assert_eq!(node, "b");
                assert_eq!(dependency, "a");
            },
            _ => panic!("expected a missing dependency")
        }
    }

    #[test]
    fn test_cycle_detection() {
        /*
        a -> b -> c
             ^    |
             +----+
        */
        let h = |k: &str| Arc::new(Handle::named(k));
        let mut g = Graph::new();
        g.add_named_input("a", Const(1)).unwrap();
        g.add_node("b", FnArgs::Join(h("a"), h("c")), sum_all()).unwrap();
        g.add_node("c", FnArgs::Single(h("b")), incr()).unwrap();
        assert!(matches!(g.snapshot(), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut g = Graph::new();
        g.add_node("a", FnArgs::Single(Arc::new(Handle::named("a"))), incr()).unwrap();
        assert_eq!(g.snapshot().err(), Some(GraphError::Cycle { key: "a".into() }));
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let h = |k: &str| Arc::new(Handle::named(k));
        let mut g = Graph::new();
        g.add_named_input("a", Const(1)).unwrap();
        g.add_node("b", FnArgs::Single(h("a")), incr()).unwrap();
        g.add_node("c", FnArgs::Single(h("a")), incr()).unwrap();
        g.add_node("d", FnArgs::Join(h("b"), h("c")), sum_all()).unwrap();
        let snap = g.snapshot().unwrap();
        assert_eq!(snap.ancestors(&[h("b")]).unwrap().len(), 2);
        assert_eq!(snap.ancestors(&[h("d")]).unwrap().len(), 4);
        assert!(matches!(snap.ancestors(&[h("z")]), Err(ExecError::UnknownTarget { .. })));
    }

    #[test]
    fn test_extension_does_not_mutate() {
        let mut g = Graph::new();
        let a = g.add_input(Const(1), "a");
        let mut g2 = g.clone();
        g2.add_task(FnArgs::Single(a), incr(), "b");
        assert_eq!(g.len(), 1);
        assert_eq!(g2.len(), 2);
        assert_eq!(g.merge(&g2).unwrap().len(), 2);
    }

    #[test]
    fn test_merge_conflict() {
        let mut g1 = Graph::new();
        g1.add_named_input("a", Const(1)).unwrap();
        let mut g2 = Graph::new();
        g2.add_named_input("a", Const(2)).unwrap();
        assert!(matches!(g1.merge(&g2), Err(GraphError::DuplicateKey { .. })));
    }

    fn sum_all() -> DynFnN<usize, usize, impl Fn(&[&usize]) -> Result<usize, TaskFailure>> {
        DynFnN::new(|xs: &[&usize]| Ok(xs.iter().map(|x| **x).sum()))
    }
}
