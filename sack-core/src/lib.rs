//! sack-core
//!
//! `sack-core` provides primitives for building and running task-based computations.
//!
//! What is it?
//! ---
//!
//! `sack` makes it easy to write deferred, data parallel computations that are executed
//! concurrently across a local pool of workers.  Computations are described as a graph
//! of tasks; nothing runs until a value is requested, and then only the tasks needed to
//! produce it are scheduled.
//!
//! How to Use It?
//! ---
//!
//! `Deferred` represents a computation.  `Deferred` objects are built with a few
//! simple functions:
//!
//! 1. `lift` - Lift takes a concrete value and lifts it into a Deferred object
//! 2. `apply` - Apply applies a function to a Deferred, producing a new Deferred object.
//! 3. `join` -  Join combines two Deferred objects with a joiner function, producing a new Deferred.
//! 4. `join_all` - Combines any number of Deferred objects at once.
//!
//! Failures are values too: `try_apply` takes a function returning
//! `Result<_, TaskFailure>`.  Transient failures are retried up to
//! `ExecutorConfig::max_attempts` times; the first permanent failure aborts the run.
//!
//! Example - Hello World!
//! ---
//! ```rust
//! use sack::deferred::Deferred;
//! use sack::scheduler::GreedyScheduler;
//!
//! let hello = Deferred::lift("Hello".to_owned(), None);
//! let world = Deferred::lift("World".to_owned(), None);
//! let world_exclaim = world.apply(|w| format!("{}!", w));
//! let hello_world = hello.join(&world_exclaim, |h, w| format!("{} {}", h, w));
//! assert_eq!(hello_world.run(&GreedyScheduler::new()).unwrap(), "Hello World!");
//! ```
//!
//! Example - Explicit keys
//! ---
//! ```rust
//! use std::sync::Arc;
//! use sack::graph::{FnArgs, Graph, Handle, Input};
//! use sack::scheduler::{GreedyScheduler, Scheduler};
//! use sack::task::{DynFn, TaskFailure, BASS};
//!
//! struct Ten;
//! impl Input for Ten {
//!     fn read(&self) -> Result<BASS, TaskFailure> { Ok(Box::new(10usize)) }
//! }
//!
//! let mut graph = Graph::new();
//! graph.add_node("double", FnArgs::Single(Arc::new(Handle::named("ten"))),
//!                DynFn::new(|x: &usize| Ok(x * 2))).unwrap();
//! graph.add_named_input("ten", Ten).unwrap();
//!
//! let snapshot = graph.snapshot().unwrap();
//! let double = Arc::new(Handle::named("double"));
//! let out = GreedyScheduler::new().run(&snapshot, &[double.clone()]).unwrap();
//! assert_eq!(out[&double].downcast_ref::<usize>(), Some(&20));
//! ```

#![warn(missing_docs)]

#[macro_use]
extern crate log;

/// Contains Deferred primitive and function definitions
pub mod deferred;

/// Contains Scheduler trait definition and implementations
pub mod scheduler;

/// Graph construction and frozen snapshots
pub mod graph;

/// Task definitions
pub mod task;

/// Scheduler configuration
pub mod config;

mod error;

pub use config::ExecutorConfig;
pub use error::{ConfigError, ExecError, GraphError};
pub use task::TaskFailure;
