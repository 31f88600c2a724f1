//! Contains the two main primitives: Bag and its keyed reduction, Folded

/// Defines Bag and assorted functions
pub mod bag;

/// Defines Folded, the result of a keyed fold
pub mod group;

use std::any::Any;

use sack::deferred::{batch_try_apply, Deferred};
use sack::TaskFailure;

// Runs `f` over every element of every partition, collecting what it emits.
fn emit<
    A: Any + Send + Sync,
    B: Any + Send + Sync,
    F: 'static + Sync + Send + Clone + Fn(&A, &mut dyn FnMut(B)) -> Result<(), TaskFailure>
>(defs: &[Deferred<Vec<A>>], f: F) -> Vec<Deferred<Vec<B>>> {

    batch_try_apply(defs, move |_idx, vs| {
        let mut out = Vec::with_capacity(vs.len());
        for v in vs.iter() {
            f(v, &mut |r| out.push(r))?;
        }
        Ok(out)
    })
}
