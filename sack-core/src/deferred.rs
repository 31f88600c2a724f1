use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::ExecError;
use crate::task::{DynFn, DynFn2, DynFnN, TaskFailure, BASS};
use crate::graph::*;
use crate::scheduler::Scheduler;

struct Lift<A>(A);

impl <A: Any + Send + Sync + Clone> Input for Lift<A> {
    fn read(&self) -> Result<BASS, TaskFailure> {
        Ok(Box::new(self.0.clone()))
    }
}

/// A typed, lazily computed value: the Graph able to produce it plus the
/// handle of the task whose output it is.
pub struct Deferred<A> {
    graph: Graph,
    items: PhantomData<fn() -> A>,
    handle: Arc<Handle>
}

impl <A> Clone for Deferred<A> {
    fn clone(&self) -> Self {
        Deferred {
            graph: self.graph.clone(),
            items: PhantomData,
            handle: self.handle.clone()
        }
    }
}

impl <A> Deferred<A> {
    /// Handle of the task producing this value
    pub fn handle(&self) -> &Arc<Handle> {
        &self.handle
    }

    /// Graph able to produce this value
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl <A: Any + Send + Sync> Deferred<A> {

    /// Applies an infallible function to the value.
    pub fn apply<B: Any + Send + Sync, F: Send + Sync + 'static + Fn(&A) -> B>(&self, f: F) -> Deferred<B> {
        self.try_apply(move |a| Ok(f(a)))
    }

    /// Applies a function which may fail.  Transient failures are retried by the
    /// scheduler.
    pub fn try_apply<
        B: Any + Send + Sync,
        F: Send + Sync + 'static + Fn(&A) -> Result<B, TaskFailure>
    >(&self, f: F) -> Deferred<B> {
        let mut ng = self.graph.clone();
        let handle = ng.add_task(
            FnArgs::Single(self.handle.clone()), DynFn::new(f), "Apply");
        Deferred {
            graph: ng,
            items: PhantomData,
            handle
        }
    }

    /// Combines two deferred values with a joiner function
    pub fn join<B: Any + Send + Sync, C: Any + Send + Sync, F: Send + Sync + 'static + Fn(&A, &B) -> C>(&self, other: &Deferred<B>, f: F) -> Deferred<C> {
        self.try_join(other, move |a, b| Ok(f(a, b)))
    }

    /// Fallible variant of `join`
    pub fn try_join<
        B: Any + Send + Sync,
        C: Any + Send + Sync,
        F: Send + Sync + 'static + Fn(&A, &B) -> Result<C, TaskFailure>
    >(&self, other: &Deferred<B>, f: F) -> Deferred<C> {
        let mut ng = self.graph.merge_shared(&other.graph);
        let handle = ng.add_task(
            FnArgs::Join(self.handle.clone(), other.handle.clone()),
            DynFn2::new(f), "Join");

        Deferred {
            graph: ng,
            items: PhantomData,
            handle
        }
    }

    /// Combines any number of deferred values, in order, into a single value.
    pub fn join_all<
        B: Any + Send + Sync,
        F: Send + Sync + 'static + Fn(&[&A]) -> B
    >(defs: &[Deferred<A>], f: F) -> Deferred<B> {
        let mut ng = Graph::new();
        for d in defs {
            ng = ng.merge_shared(&d.graph);
        }
        let handles = defs.iter().map(|d| d.handle.clone()).collect();
        let handle = ng.add_task(
            FnArgs::Many(handles), DynFnN::new(move |vs: &[&A]| Ok(f(vs))), "JoinAll");
        Deferred {
            graph: ng,
            items: PhantomData,
            handle
        }
    }
}

fn downcast_output<A: Any + Clone>(handle: &Handle, out: Arc<BASS>) -> Result<A, ExecError> {
    let mismatch = || ExecError::TypeMismatch {
        key: handle.key().to_owned(),
        expected: type_name::<A>()
    };
    match Arc::try_unwrap(out) {
        Ok(owned) => owned.downcast::<A>().map(|a| *a).map_err(|_| mismatch()),
        Err(shared) => shared.downcast_ref::<A>().cloned().ok_or_else(mismatch)
    }
}

impl <A: Any + Send + Sync + Clone> Deferred<A> {
    /// Lifts a concrete value into the graph
    pub fn lift(a: A, name: Option<&str>) -> Self {
        let mut graph = Graph::new();
        let handle = graph.add_input(Lift(a), name.unwrap_or("Input"));
        Deferred {
            graph,
            items: PhantomData,
            handle
        }
    }

    /// Runs the graph, returning the computed value.
    pub fn run<S: Scheduler>(&self, s: &S) -> Result<A, ExecError> {
        let snapshot = self.graph.snapshot()?;
        let mut vs = s.compute(&snapshot, &[self.handle.clone()])?;
        let out = vs.pop().ok_or_else(|| ExecError::MissingOutput {
            key: self.handle.key().to_owned()
        })?;
        downcast_output(&self.handle, out)
    }
}

/// Runs many deferred values within a single execution, returning their values in
/// the order given.
pub fn run_all<A: Any + Send + Sync + Clone, S: Scheduler>(
    defs: &[Deferred<A>],
    s: &S
) -> Result<Vec<A>, ExecError> {
    if defs.is_empty() {
        return Ok(Vec::new());
    }
    let graph = defs.iter().fold(Graph::new(), |g, d| g.merge_shared(&d.graph));
    let outputs: Vec<_> = defs.iter().map(|d| d.handle.clone()).collect();
    let snapshot = graph.snapshot()?;
    let vs = s.compute(&snapshot, &outputs)?;
    outputs.iter().zip(vs)
        .map(|(h, v)| downcast_output(h, v))
        .collect()
}

/// Applies `f` to each deferred value, passing along its index
pub fn batch_apply<
    A: Any + Send + Sync,
    B: Any + Send + Sync,
    F: 'static + Sync + Send + Clone + Fn(usize, &A) -> B
    >(defs: &[Deferred<A>], f: F)
-> Vec<Deferred<B>> {
    batch_try_apply(defs, move |idx, a| Ok(f(idx, a)))
}

/// Fallible variant of `batch_apply`
pub fn batch_try_apply<
    A: Any + Send + Sync,
    B: Any + Send + Sync,
    F: 'static + Sync + Send + Clone + Fn(usize, &A) -> Result<B, TaskFailure>
    >(defs: &[Deferred<A>], f: F)
-> Vec<Deferred<B>> {
    let mut nps = Vec::with_capacity(defs.len());
    for (idx, p) in defs.iter().enumerate() {
        let mf = f.clone();
        let np = p.try_apply(move |vs| { mf(idx, vs) });
        nps.push(np);
    }
    nps
}

/// Reduces a set of deferred values pairwise, keeping their order.
pub fn tree_reduce<A: Any + Send + Sync + Clone,
                   F: 'static + Sync + Send + Clone + Fn(&A, &A) -> A
>(
    defs: &[Deferred<A>],
    f: F
) -> Option<Deferred<A>> {
    tree_reduce_until(defs, 1, f).map(|mut defs| {
        defs.remove(0)
    })
}

/// Reduces pairwise until at most `parts` deferred values remain.
pub fn tree_reduce_until<A: Any + Send + Sync + Clone,
                   F: 'static + Sync + Send + Clone + Fn(&A, &A) -> A
>(
    defs: &[Deferred<A>],
    parts: usize,
    f: F
) -> Option<Vec<Deferred<A>>> {
    if defs.is_empty() {
        None
    } else if defs.len() <= parts.max(1) {
        Some(defs.to_vec())
    } else {
        // First pass
        let mut pass = Vec::new();
        for i in (0..defs.len() - 1).step_by(2) {
            pass.push(defs[i].join(&defs[i+1], f.clone()));
        }
        if defs.len() % 2 == 1 {
            pass.push(defs[defs.len() - 1].clone());
        }
        tree_reduce_until(&pass, parts, f)
    }
}

/// Combines groups of up to `split_every` consecutive deferred values per round
/// until a single value remains.  `split_every` below 2 is treated as 2.
pub fn tree_combine<A: Any + Send + Sync,
                    F: 'static + Sync + Send + Clone + Fn(&[&A]) -> A
>(
    defs: &[Deferred<A>],
    split_every: usize,
    f: F
) -> Option<Deferred<A>> {
    let width = split_every.max(2);
    let mut round = defs.to_vec();
    while round.len() > 1 {
        round = round.chunks(width)
            .map(|group| if group.len() == 1 {
                group[0].clone()
            } else {
                Deferred::join_all(group, f.clone())
            })
            .collect();
    }
    round.pop()
}
