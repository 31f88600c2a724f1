//! Sack-Collection
//! ---
//! Sack-Collection is a lazy, partitioned collection library for data parallel processing.
//!
//! What is it?
//! ---
//! Sack-Collection provides dataflow operators over a `Bag`: an ordered set of partitions,
//! each a deferred `Vec` of elements.  Operators extend the task graph built by `sack`;
//! only the materializing calls (`compute`, `eval`, `take`, `to_map`, `to_dataframe`) run
//! it, scheduling just the tasks needed for the requested result.
//!
//! Keyed aggregation comes in two flavors: `group_by` shuffles every element so that
//! each key ends up in one partition, while `fold_by` folds locally first and then merges
//! the per partition results in a tree, moving only one accumulator per key and partition.
//!
//! Example - Word Count
//! ---
//!
//! ```rust
//! use std::fs;
//!
//! use sack::scheduler::GreedyScheduler;
//! use sack_collection::sources::{read_text, Compression};
//!
//! let dir = tempfile::tempdir().unwrap();
//! fs::write(dir.path().join("a.txt"), "the cat\nthe hat\n").unwrap();
//! fs::write(dir.path().join("b.txt"), "a cat sat\n").unwrap();
//!
//! let pattern = dir.path().join("*.txt");
//! let lines = read_text(pattern.to_str().unwrap(), 1, Compression::Auto).unwrap();
//!
//! let counts = lines
//!     .emit(|line, emitter| {
//!         for word in line.split_whitespace() {
//!             emitter(word.to_owned());
//!         }
//!     })
//!     .fold_by(|w| w.clone(),
//!              0usize,
//!              |acc, _w| *acc += 1,
//!              |acc1, acc2| *acc1 += *acc2,
//!              8)
//!     .compute(&GreedyScheduler::new())
//!     .unwrap();
//!
//! assert_eq!(counts["the"], 2);
//! assert_eq!(counts["cat"], 2);
//! assert_eq!(counts["sat"], 1);
//! ```
//!
//! Example - IDF count
//! ---
//! ```rust
//! use std::collections::HashSet;
//!
//! use sack::scheduler::GreedyScheduler;
//! use sack_collection::Bag;
//!
//! let docs = Bag::from_sequence(vec![
//!     "the cat sat".to_owned(),
//!     "the dog".into(),
//!     "a cat".into(),
//! ], 2);
//!
//! let total_docs = docs.count();
//! let word_freq = docs
//!     .emit(|line, emitter| {
//!         let unique: HashSet<_> = line.split_whitespace().map(|p| p.to_lowercase()).collect();
//!         for word in unique {
//!             emitter(word);
//!         }
//!     })
//!     .frequencies(4);
//!
//! // Cross product
//! let idfs = total_docs.join_on(
//!         &word_freq,
//!         |_c| 1,
//!         |_wc| 1,
//!         |total, (word, count)| {
//!             (word.clone(), (1f64 + (*total as f64 / *count as f64)).ln())
//!         },
//!         1
//!     )
//!     .map(|(_k, x)| x.clone())
//!     .sort_by(|(word, _idf)| word.clone());
//!
//! let word_idf = idfs.compute(&GreedyScheduler::new()).unwrap();
//! assert_eq!(word_idf.len(), 5);
//! assert_eq!(word_idf[0].0, "a");
//! assert!((word_idf[0].1 - 4f64.ln()).abs() < 1e-9);
//! ```

#![warn(missing_docs)]

#[macro_use]
extern crate log;

/// Bag and Folded along with their operators
pub mod collection;

/// Field lookup on elements
pub mod interfaces;

/// Line oriented file sources
pub mod sources;

/// Schema inference and tabular sinks
pub mod dataframe;

mod error;

/// Graph construction strategies behind the wide operators
pub mod partitioned;

pub use collection::bag::Bag;
pub use collection::group::Folded;
pub use error::{BagError, FieldAccessError, SchemaInferenceError};
