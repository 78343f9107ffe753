//! Command dispatch registry.
//!
//! A [`Registry`] maps command names to handler closures. The parameter
//! list of each closure is its contract: every parameter type implements
//! [`FromValue`], so the number of expected arguments and their types are
//! known when the handler is registered, and a frame is only delivered if it
//! carries exactly that many convertible arguments.
//!
//! The registry is parameterised by the value it injects in front of the
//! decoded arguments. Client-side registries inject nothing (`()`);
//! server-side registries inject the [`PeerId`] of the sending peer, and
//! their handlers take it as their first parameter.
//!
//! ```rust
//! use eventwire_core::values;
//! use eventwire_protocol::{DispatchOutcome, PeerId, Registry};
//!
//! let mut registry = Registry::<PeerId>::new();
//! registry
//!     .register("echo", |peer: PeerId, text: String| {
//!         println!("{peer} says {text}");
//!     })
//!     .unwrap();
//!
//! let outcome = registry.dispatch(PeerId::new(0), "echo", values!["hi"]);
//! assert_eq!(outcome, DispatchOutcome::Handled);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, warn};

use eventwire_core::{ConversionError, FromValue, Value};

use crate::command::{CommandName, PeerId};
use crate::error::ProtocolResult;

/// A value placed in front of the decoded arguments of every invocation.
pub trait Injected: Copy + Send + 'static {
    /// How many handler parameters the injected value occupies.
    const COUNT: usize;
}

impl Injected for () {
    const COUNT: usize = 0;
}

impl Injected for PeerId {
    const COUNT: usize = 1;
}

/// Failure reported by a handler body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HandlerError {}

/// Return types a handler may declare.
///
/// Handlers act only through side effects, so the only accepted return
/// types are `()` and `Result<(), E>`.
pub trait HandlerReturn {
    /// Normalises the return value.
    fn into_handler_result(self) -> Result<(), HandlerError>;
}

impl HandlerReturn for () {
    fn into_handler_result(self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<E: fmt::Display> HandlerReturn for Result<(), E> {
    fn into_handler_result(self) -> Result<(), HandlerError> {
        self.map_err(|e| HandlerError(e.to_string()))
    }
}

/// An argument that could not be converted to its parameter type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentError {
    /// Zero-based position among the decoded arguments.
    pub index: usize,
    /// What went wrong.
    pub error: ConversionError,
}

/// Something that can be registered as a command handler.
///
/// Implemented for closures and functions of up to eight parameters whose
/// argument types implement [`FromValue`] and whose return type implements
/// [`HandlerReturn`]. `Args` is a marker that keeps the implementations for
/// different parameter lists apart.
pub trait IntoHandler<I, Args>: Send + Sync + 'static {
    /// Number of declared parameters, including the injected one.
    const ARITY: usize;

    /// Converts the arguments and runs the handler.
    fn invoke(&self, injected: I, args: Vec<Value>) -> Result<Result<(), HandlerError>, ArgumentError>;
}

fn next_arg<T: FromValue>(
    args: &mut impl Iterator<Item = (usize, Value)>,
    position: usize,
) -> Result<T, ArgumentError> {
    match args.next() {
        Some((index, value)) => {
            T::from_value(value).map_err(|error| ArgumentError { index, error })
        }
        None => Err(ArgumentError {
            index: position,
            error: ConversionError::new(T::TYPE_NAME, "nothing"),
        }),
    }
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_into_handler {
    ($($ty:ident),*) => {
        impl<F, R, $($ty,)*> IntoHandler<(), ($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + Send + Sync + 'static,
            R: HandlerReturn,
            $($ty: FromValue,)*
        {
            const ARITY: usize = count!($($ty)*);

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn invoke(
                &self,
                _injected: (),
                args: Vec<Value>,
            ) -> Result<Result<(), HandlerError>, ArgumentError> {
                let mut args = args.into_iter().enumerate();
                let mut position = 0;
                $(
                    let $ty = next_arg::<$ty>(&mut args, position)?;
                    position += 1;
                )*
                Ok((self)($($ty),*).into_handler_result())
            }
        }

        impl<F, R, $($ty,)*> IntoHandler<PeerId, (PeerId, $($ty,)*)> for F
        where
            F: Fn(PeerId, $($ty),*) -> R + Send + Sync + 'static,
            R: HandlerReturn,
            $($ty: FromValue,)*
        {
            const ARITY: usize = 1 + count!($($ty)*);

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn invoke(
                &self,
                peer: PeerId,
                args: Vec<Value>,
            ) -> Result<Result<(), HandlerError>, ArgumentError> {
                let mut args = args.into_iter().enumerate();
                let mut position = 0;
                $(
                    let $ty = next_arg::<$ty>(&mut args, position)?;
                    position += 1;
                )*
                Ok((self)(peer, $($ty),*).into_handler_result())
            }
        }
    };
}

impl_into_handler!();
impl_into_handler!(A1);
impl_into_handler!(A1, A2);
impl_into_handler!(A1, A2, A3);
impl_into_handler!(A1, A2, A3, A4);
impl_into_handler!(A1, A2, A3, A4, A5);
impl_into_handler!(A1, A2, A3, A4, A5, A6);
impl_into_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_into_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

type Invoke<I> =
    dyn Fn(I, Vec<Value>) -> Result<Result<(), HandlerError>, ArgumentError> + Send + Sync;

struct Descriptor<I> {
    arity: usize,
    invoke: Arc<Invoke<I>>,
}

impl<I> Clone for Descriptor<I> {
    fn clone(&self) -> Self {
        Self {
            arity: self.arity,
            invoke: Arc::clone(&self.invoke),
        }
    }
}

/// What happened to a dispatched frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and succeeded.
    Handled,
    /// The handler ran and reported an error or panicked.
    Failed(String),
    /// No handler is registered under this name.
    Unknown,
    /// The handler declares a different number of parameters.
    ArityMismatch {
        /// Declared parameters, including the injected one.
        expected: usize,
        /// Decoded arguments plus the injected one.
        actual: usize,
    },
    /// An argument could not be converted to its declared type.
    BadArgument(ArgumentError),
}

impl DispatchOutcome {
    /// True when a handler was invoked, whether or not it succeeded.
    ///
    /// Anything else should fall back to raw-message handling.
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled | Self::Failed(_))
    }
}

/// Command name to handler table.
pub struct Registry<I> {
    handlers: HashMap<String, Descriptor<I>>,
}

impl<I: Injected> Default for Registry<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Injected> fmt::Debug for Registry<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("commands", &names).finish()
    }
}

impl<I: Injected> Registry<I> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` under `name`, replacing any previous handler.
    pub fn register<F, Args>(&mut self, name: &str, handler: F) -> ProtocolResult<()>
    where
        F: IntoHandler<I, Args>,
    {
        let name = CommandName::new(name)?;
        let descriptor = Descriptor {
            arity: F::ARITY,
            invoke: Arc::new(move |injected: I, args: Vec<Value>| handler.invoke(injected, args)),
        };
        if self
            .handlers
            .insert(name.to_string(), descriptor)
            .is_some()
        {
            debug!(command = %name, "replaced existing handler");
        } else {
            debug!(command = %name, arity = F::ARITY, "registered handler");
        }
        Ok(())
    }

    /// Binds `name` to the handler already registered as `target`.
    ///
    /// Returns `Ok(false)` and logs a warning when `target` is not
    /// registered; startup carries on without the binding.
    pub fn alias(&mut self, name: &str, target: &str) -> ProtocolResult<bool> {
        let name = CommandName::new(name)?;
        let Some(descriptor) = self.handlers.get(target).cloned() else {
            warn!(command = %name, target = %target, "could not find handler to bind");
            return Ok(false);
        };
        self.handlers.insert(name.to_string(), descriptor);
        Ok(true)
    }

    /// Removes the handler for `name`, returning whether one existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    /// Returns true if a handler is registered for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Declared parameter count of the handler for `name`.
    pub fn arity(&self, name: &str) -> Option<usize> {
        self.handlers.get(name).map(|d| d.arity)
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolves `name` and invokes its handler with `args`.
    ///
    /// Handler errors and panics are caught here and reported as
    /// [`DispatchOutcome::Failed`]; they never reach the caller's thread.
    pub fn dispatch(&self, injected: I, name: &str, args: Vec<Value>) -> DispatchOutcome {
        let Some(descriptor) = self.handlers.get(name) else {
            return DispatchOutcome::Unknown;
        };

        let actual = args.len() + I::COUNT;
        if actual != descriptor.arity {
            warn!(
                command = %name,
                expected = descriptor.arity,
                actual,
                "wrong number of arguments"
            );
            return DispatchOutcome::ArityMismatch {
                expected: descriptor.arity,
                actual,
            };
        }

        let invoke = &descriptor.invoke;
        match catch_unwind(AssertUnwindSafe(|| invoke(injected, args))) {
            Ok(Ok(Ok(()))) => DispatchOutcome::Handled,
            Ok(Ok(Err(e))) => {
                warn!(command = %name, error = %e, "handler failed");
                DispatchOutcome::Failed(e.0)
            }
            Ok(Err(bad)) => {
                warn!(
                    command = %name,
                    index = bad.index,
                    error = %bad.error,
                    "argument has the wrong type"
                );
                DispatchOutcome::BadArgument(bad)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(command = %name, panic = %message, "handler panicked");
                DispatchOutcome::Failed(message)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventwire_core::values;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn arity_counts_injected_identity() {
        let mut server = Registry::<PeerId>::new();
        server.register("two", |_: PeerId, _: String| {}).unwrap();
        server.register("none", |_: PeerId| {}).unwrap();
        assert_eq!(server.arity("two"), Some(2));
        assert_eq!(server.arity("none"), Some(1));

        let mut client = Registry::<()>::new();
        client.register("two", |_: String, _: i64| {}).unwrap();
        client.register("none", || {}).unwrap();
        assert_eq!(client.arity("two"), Some(2));
        assert_eq!(client.arity("none"), Some(0));
    }

    #[test]
    fn exact_arity_invokes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = Registry::<()>::new();
        registry
            .register("pair", move |_: i64, _: i64| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(
            registry.dispatch((), "pair", values![1]),
            DispatchOutcome::ArityMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert!(!registry.dispatch((), "pair", values![1, 2, 3]).is_handled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(registry.dispatch((), "pair", values![1, 2]), DispatchOutcome::Handled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn server_dispatch_injects_peer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut registry = Registry::<PeerId>::new();
        registry
            .register("echo", move |peer: PeerId, text: String| {
                sink.lock().unwrap().push((peer, text));
            })
            .unwrap();

        assert!(registry.dispatch(PeerId::new(3), "echo", values!["hi"]).is_handled());
        assert!(!registry.dispatch(PeerId::new(3), "echo", values![]).is_handled());
        assert_eq!(*seen.lock().unwrap(), vec![(PeerId::new(3), "hi".to_string())]);
    }

    #[test]
    fn unknown_command() {
        let registry = Registry::<()>::new();
        assert_eq!(registry.dispatch((), "nope", values![]), DispatchOutcome::Unknown);
        assert!(registry.is_empty());
    }

    #[test]
    fn wrong_type_is_not_handled() {
        let mut registry = Registry::<()>::new();
        registry.register("num", |_: i64| {}).unwrap();
        let outcome = registry.dispatch((), "num", values!["seven"]);
        assert_eq!(
            outcome,
            DispatchOutcome::BadArgument(ArgumentError {
                index: 0,
                error: ConversionError::new("integer", "string"),
            })
        );
        assert!(!outcome.is_handled());
    }

    #[test]
    fn handler_error_counts_as_handled() {
        let mut registry = Registry::<()>::new();
        registry
            .register("fails", |reason: String| -> Result<(), String> { Err(reason) })
            .unwrap();
        let outcome = registry.dispatch((), "fails", values!["boom"]);
        assert_eq!(outcome, DispatchOutcome::Failed("boom".into()));
        assert!(outcome.is_handled());
    }

    #[test]
    fn handler_panic_is_contained() {
        let mut registry = Registry::<PeerId>::new();
        registry
            .register("explode", |_: PeerId| -> () { panic!("kaboom") })
            .unwrap();
        let outcome = registry.dispatch(PeerId::new(0), "explode", values![]);
        assert_eq!(outcome, DispatchOutcome::Failed("kaboom".into()));
    }

    #[test]
    fn register_overwrites() {
        let mut registry = Registry::<()>::new();
        registry.register("cmd", |_: i64| {}).unwrap();
        registry.register("cmd", |_: i64, _: i64| {}).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.arity("cmd"), Some(2));
    }

    #[test]
    fn register_rejects_invalid_name() {
        let mut registry = Registry::<()>::new();
        assert!(registry.register("no spaces", || {}).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn alias_binds_existing_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = Registry::<()>::new();
        registry
            .register("say", move |_: String| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(registry.alias("talk", "say").unwrap());
        assert!(!registry.alias("shout", "missing").unwrap());
        assert!(!registry.contains("shout"));
        assert_eq!(registry.commands(), vec!["say", "talk"]);

        registry.dispatch((), "talk", values!["x"]);
        registry.dispatch((), "say", values!["y"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn optional_and_any_parameters() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut registry = Registry::<()>::new();
        registry
            .register("opt", move |name: Option<String>, raw: Value| {
                sink.lock().unwrap().push((name, raw));
            })
            .unwrap();
        registry.dispatch((), "opt", values![Option::<String>::None, vec![1]]);
        assert_eq!(
            seen.lock().unwrap()[0],
            (None, Value::List(vec![Value::Int(1)]))
        );
    }

    #[test]
    fn unregister_removes() {
        let mut registry = Registry::<()>::new();
        registry.register("gone", || {}).unwrap();
        assert!(registry.unregister("gone"));
        assert!(!registry.unregister("gone"));
        assert_eq!(registry.dispatch((), "gone", values![]), DispatchOutcome::Unknown);
    }
}
