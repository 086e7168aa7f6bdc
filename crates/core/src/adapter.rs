//! Type adaptation: registered coercions between runtime types.
//!
//! An adapter is a pure function from one [`TypeKey`] to another. The registry
//! resolves a request `adapt(value, to)` in three steps:
//!
//! 1. **Identity**: the value already has the target type, it is returned as-is.
//! 2. **Direct**: an adapter registered for exactly `(from, to)` is applied and its
//!    result (or error) is returned verbatim.
//! 3. **Search**: a breadth-first walk over the registered edges, starting at the
//!    value's type. Every reached type is expanded once, so each adapter runs at
//!    most once per call and the first hit is a shortest chain. Edges whose
//!    adapter fails are skipped; another path may still reach the same type.
//!
//! The edge table is copy-on-write: readers clone an `Arc` of the current table
//! and release the lock before running any adapter.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::value::{TypeKey, Value};

/// Adapter function over type-erased values.
pub type AdapterFn = Arc<dyn Fn(&Value) -> Result<Value, AdaptError> + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdaptError {
    #[error("no adapter path from {from} to {to}")]
    NoAdapterPath { from: &'static str, to: &'static str },

    #[error("invalid integer literal: {0:?}")]
    InvalidIntegerLiteral(String),

    #[error("invalid boolean literal: {0:?}")]
    InvalidBooleanLiteral(String),

    /// An adapter received (or produced) a value of the wrong type.
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0}")]
    Rejected(String),
}

type EdgeTable = HashMap<TypeKey, Vec<(TypeKey, AdapterFn)>>;

/// Registry of `(from, to)` adapters.
pub struct AdapterRegistry {
    edges: RwLock<Arc<EdgeTable>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    /// Registry pre-loaded with the built-in string/integer/boolean adapters.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_builtins();
        registry
    }

    pub fn empty() -> Self {
        Self {
            edges: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Register an untyped adapter. Re-registering a pair replaces the old one.
    pub fn register_adapter(&self, from: TypeKey, to: TypeKey, adapter: AdapterFn) {
        let mut guard = self.edges.write().unwrap_or_else(PoisonError::into_inner);
        let mut table: EdgeTable = (**guard).clone();
        let out = table.entry(from).or_default();
        match out.iter_mut().find(|(target, _)| *target == to) {
            Some(slot) => slot.1 = adapter,
            None => out.push((to, adapter)),
        }
        *guard = Arc::new(table);
        tracing::debug!(from = from.name(), to = to.name(), "adapter registered");
    }

    /// Register a typed adapter `A -> B`.
    pub fn register<A, B, F>(&self, adapter: F)
    where
        A: Any + Send + Sync,
        B: Any + Send + Sync,
        F: Fn(&A) -> Result<B, AdaptError> + Send + Sync + 'static,
    {
        let erased: AdapterFn = Arc::new(move |value: &Value| {
            let input = value.downcast_ref::<A>().ok_or(AdaptError::TypeMismatch {
                expected: std::any::type_name::<A>(),
                actual: value.type_key().name(),
            })?;
            adapter(input).map(Value::new)
        });
        self.register_adapter(TypeKey::of::<A>(), TypeKey::of::<B>(), erased);
    }

    pub fn has_adapter(&self, from: TypeKey, to: TypeKey) -> bool {
        self.snapshot()
            .get(&from)
            .is_some_and(|out| out.iter().any(|(target, _)| *target == to))
    }

    /// Number of registered `(from, to)` edges.
    pub fn len(&self) -> usize {
        self.snapshot().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn adapt(&self, value: Value, to: TypeKey) -> Result<Value, AdaptError> {
        let from = value.type_key();
        if from == to {
            return Ok(value);
        }

        let table = self.snapshot();
        if let Some((_, direct)) = table
            .get(&from)
            .and_then(|out| out.iter().find(|(target, _)| *target == to))
        {
            return direct(&value);
        }

        let mut visited: HashSet<TypeKey> = HashSet::from([from]);
        let mut frontier: VecDeque<Value> = VecDeque::from([value]);

        while let Some(current) = frontier.pop_front() {
            let Some(out) = table.get(&current.type_key()) else {
                continue;
            };
            for (next, adapter) in out {
                if visited.contains(next) {
                    continue;
                }
                match adapter(&current) {
                    Ok(reached) if reached.type_key() == *next => {
                        if *next == to {
                            return Ok(reached);
                        }
                        visited.insert(*next);
                        frontier.push_back(reached);
                    }
                    Ok(reached) => {
                        tracing::warn!(
                            declared = next.name(),
                            produced = reached.type_key().name(),
                            "adapter produced an undeclared type; edge skipped"
                        );
                    }
                    Err(err) => {
                        tracing::trace!(
                            from = current.type_key().name(),
                            to = next.name(),
                            error = %err,
                            "adapter edge failed"
                        );
                    }
                }
            }
        }

        Err(AdaptError::NoAdapterPath {
            from: from.name(),
            to: to.name(),
        })
    }

    /// Adapt and extract the result as `T`.
    pub fn adapt_to<T: Any + Send + Sync + Clone>(&self, value: Value) -> Result<T, AdaptError> {
        let adapted = self.adapt(value, TypeKey::of::<T>())?;
        adapted.into_inner::<T>().map_err(|other| AdaptError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual: other.type_key().name(),
        })
    }

    fn snapshot(&self) -> Arc<EdgeTable> {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn register_builtins(&self) {
        self.register::<String, i64, _>(|s| {
            s.parse::<i64>()
                .map_err(|_| AdaptError::InvalidIntegerLiteral(s.clone()))
        });
        self.register::<i64, String, _>(|n| Ok(n.to_string()));
        self.register::<String, bool, _>(|s| parse_bool(s));
        self.register::<bool, String, _>(|b| Ok(b.to_string()));
        self.register::<i64, f64, _>(|n| Ok(*n as f64));
    }
}

/// Boolean literals accepted by the built-in `String -> bool` adapter.
pub fn parse_bool(s: &str) -> Result<bool, AdaptError> {
    match s {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(AdaptError::InvalidBooleanLiteral(other.to_string())),
    }
}
