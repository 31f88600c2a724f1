//! Type-erased task functions and the failures they report.

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

/// Boxed, type-erased output of a task
pub type BASS = Box<dyn Any + Send + Sync>;

/// Arguments handed to a task, in the order the task declared them
pub enum DynArgs<'a> {
    /// Single upstream value
    One(&'a BASS),

    /// Two upstream values, used by joins
    Two(&'a BASS, &'a BASS),

    /// Any number of upstream values of the same type
    Many(Vec<&'a BASS>),
}

/// Raised when an upstream value does not have the type a task expects.
#[derive(Debug, Error)]
#[error("argument mismatch: task expected {expected}")]
pub struct ArgumentMismatch {
    expected: &'static str,
}

impl ArgumentMismatch {
    fn of<A>() -> Self {
        ArgumentMismatch { expected: type_name::<A>() }
    }
}

/// Error reported by a task.
///
/// Transient failures are retried by the scheduler until the attempt budget is
/// exhausted; fatal failures stop the computation on the first occurrence.
#[derive(Clone)]
pub struct TaskFailure {
    cause: Arc<anyhow::Error>,
    retryable: bool,
}

impl TaskFailure {
    /// A failure worth retrying, such as an IO hiccup
    pub fn transient<E: Into<anyhow::Error>>(err: E) -> Self {
        TaskFailure { cause: Arc::new(err.into()), retryable: true }
    }

    /// A deterministic failure, retrying would reproduce it
    pub fn fatal<E: Into<anyhow::Error>>(err: E) -> Self {
        TaskFailure { cause: Arc::new(err.into()), retryable: false }
    }

    /// Whether the scheduler may run the task again
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Underlying error
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Recovers a typed error raised by the task.
    pub fn downcast_ref<E: fmt::Display + fmt::Debug + Send + Sync + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }
}

impl <E: std::error::Error + Send + Sync + 'static> From<E> for TaskFailure {
    fn from(err: E) -> Self {
        TaskFailure::transient(err)
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFailure")
            .field("cause", &self.cause)
            .field("retryable", &self.retryable)
            .finish()
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.cause)
    }
}

/// Object safe interface to every function node in a graph
pub trait DynRun: Send + Sync {
    /// Evaluates the task on its upstream values.
    fn eval(&self, val: DynArgs<'_>) -> Result<BASS, TaskFailure>;
}

fn downcast<'a, A: Any>(v: &'a BASS) -> Result<&'a A, TaskFailure> {
    v.downcast_ref::<A>().ok_or_else(|| TaskFailure::fatal(ArgumentMismatch::of::<A>()))
}

/// Wraps a function with one upstream argument
pub struct DynFn<A, B, F: Fn(&A) -> Result<B, TaskFailure>>(F, PhantomData<fn(&A) -> B>);

impl <A, B, F: Fn(&A) -> Result<B, TaskFailure>> DynFn<A, B, F> {
    /// Creates a new DynFn
    pub fn new(f: F) -> Self {
        DynFn(f, PhantomData)
    }
}

impl <A, B, F> DynRun for DynFn<A, B, F>
    where A: Any + Send + Sync,
          B: Any + Send + Sync,
          F: Send + Sync + Fn(&A) -> Result<B, TaskFailure> {

    fn eval(&self, val: DynArgs<'_>) -> Result<BASS, TaskFailure> {
        match val {
            DynArgs::One(v) => {
                let b = self.0(downcast::<A>(v)?)?;
                Ok(Box::new(b))
            },
            _ => Err(TaskFailure::fatal(ArgumentMismatch::of::<A>()))
        }
    }
}

/// Wraps a function joining two upstream arguments
pub struct DynFn2<A, B, C, F: Fn(&A, &B) -> Result<C, TaskFailure>>(F, PhantomData<fn(&A, &B) -> C>);

impl <A, B, C, F: Fn(&A, &B) -> Result<C, TaskFailure>> DynFn2<A, B, C, F> {
    /// Creates a new DynFn2
    pub fn new(f: F) -> Self {
        DynFn2(f, PhantomData)
    }
}

impl <A, B, C, F> DynRun for DynFn2<A, B, C, F>
    where A: Any + Send + Sync,
          B: Any + Send + Sync,
          C: Any + Send + Sync,
          F: Send + Sync + Fn(&A, &B) -> Result<C, TaskFailure> {

    fn eval(&self, val: DynArgs<'_>) -> Result<BASS, TaskFailure> {
        match val {
            DynArgs::Two(a, b) => {
                let c = self.0(downcast::<A>(a)?, downcast::<B>(b)?)?;
                Ok(Box::new(c))
            },
            _ => Err(TaskFailure::fatal(ArgumentMismatch::of::<(A, B)>()))
        }
    }
}

/// Wraps a function over any number of upstream arguments sharing one type
pub struct DynFnN<A, B, F: Fn(&[&A]) -> Result<B, TaskFailure>>(F, PhantomData<fn(&A) -> B>);

impl <A, B, F: Fn(&[&A]) -> Result<B, TaskFailure>> DynFnN<A, B, F> {
    /// Creates a new DynFnN
    pub fn new(f: F) -> Self {
        DynFnN(f, PhantomData)
    }
}

impl <A, B, F> DynRun for DynFnN<A, B, F>
    where A: Any + Send + Sync,
          B: Any + Send + Sync,
          F: Send + Sync + Fn(&[&A]) -> Result<B, TaskFailure> {

    fn eval(&self, val: DynArgs<'_>) -> Result<BASS, TaskFailure> {
        let vs = match val {
            DynArgs::One(a) => vec![downcast::<A>(a)?],
            DynArgs::Two(a, b) => vec![downcast::<A>(a)?, downcast::<A>(b)?],
            DynArgs::Many(vs) => vs.into_iter()
                .map(downcast::<A>)
                .collect::<Result<Vec<_>, _>>()?
        };
        let b = self.0(&vs)?;
        Ok(Box::new(b))
    }
}

#[cfg(test)]
mod task_test {
    use super::*;

    #[test]
    fn test_dyn_fn_type_mismatch_is_fatal() {
        let f = DynFn::new(|x: &usize| Ok(x + 1));
        let arg: BASS = Box::new("one".to_owned());
        let err = f.eval(DynArgs::One(&arg)).err().unwrap();
        assert!(!err.is_retryable());
        assert!(err.downcast_ref::<ArgumentMismatch>().is_some());
    }

    #[test]
    fn test_dyn_fn_n() {
        let f = DynFnN::new(|xs: &[&usize]| Ok(xs.iter().map(|x| **x).sum::<usize>()));
        let (a, b, c): (BASS, BASS, BASS) = (Box::new(1usize), Box::new(2usize), Box::new(3usize));
        let out = f.eval(DynArgs::Many(vec![&a, &b, &c])).unwrap();
        assert_eq!(out.downcast_ref::<usize>(), Some(&6));
    }

    #[test]
    fn test_std_errors_are_transient() {
        let failure: TaskFailure = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(failure.is_retryable());
        assert_eq!(failure.to_string(), "disk");
    }
}
