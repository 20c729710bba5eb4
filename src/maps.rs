//! Name-addressed views over collections of futures and promises.
//!
//! These are what a [`Filter`](crate::Filter) sees while executing: a
//! [`FutureMap`] over its resolved inputs and a [`PromiseMap`] over its
//! outputs.

use std::any::Any;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Lookup, Result};
use crate::promise::{Future, Futures, Promise, Promises};

/// A collection of futures addressed by name.
///
/// Several futures may share a name, e.g. when an input port receives
/// values from more than one producer. [`get`](Self::get) then returns the
/// first one and [`get_all`](Self::get_all) returns all of them.
#[derive(Debug, Clone, Default)]
pub struct FutureMap {
    futures: Futures,
}

impl FutureMap {
    pub fn new(futures: impl IntoIterator<Item = Future>) -> Self {
        Self {
            futures: futures.into_iter().collect(),
        }
    }

    pub fn futures(&self) -> &[Future] {
        &self.futures
    }

    pub fn into_futures(self) -> Futures {
        self.futures
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.futures.iter().any(|future| future.name() == name)
    }

    /// The first future carrying `name`.
    pub fn future(&self, name: &str) -> Result<&Future> {
        self.futures
            .iter()
            .find(|future| future.name() == name)
            .ok_or_else(|| Error::not_found(Lookup::Future, name))
    }

    /// Reads the first value named `name` without blocking.
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.future(name)?.get()
    }

    /// Reads every value named `name`, in collection order.
    ///
    /// # Errors
    /// [`Error::NotFound`] when no future carries the name, otherwise the
    /// first error any of the reads produced.
    pub fn get_all<T>(&self, name: &str) -> Result<Vec<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        let values = self
            .futures
            .iter()
            .filter(|future| future.name() == name)
            .map(|future| future.get::<T>())
            .collect::<Result<Vec<_>>>()?;

        if values.is_empty() {
            return Err(Error::not_found(Lookup::Future, name));
        }

        Ok(values)
    }

    /// True when every future is ready. An empty map is ready.
    pub fn is_ready(&self) -> bool {
        self.futures.iter().all(Future::is_ready)
    }

    /// Blocks until every future is ready.
    pub fn wait(&self) {
        for future in &self.futures {
            future.wait();
        }
    }

    /// Blocks until every future is ready or `timeout` elapses. Returns
    /// whether everything became ready.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.futures.iter().all(|future| {
            let left = deadline.saturating_duration_since(Instant::now());
            future.wait_timeout(left)
        })
    }
}

impl From<Futures> for FutureMap {
    fn from(futures: Futures) -> Self {
        Self { futures }
    }
}

impl<'a> IntoIterator for &'a FutureMap {
    type Item = &'a Future;
    type IntoIter = std::slice::Iter<'a, Future>;

    fn into_iter(self) -> Self::IntoIter {
        self.futures.iter()
    }
}

/// A [`FutureMap`] in which every name appears at most once.
#[derive(Debug, Clone)]
pub struct UniqueFutureMap {
    map: FutureMap,
}

impl UniqueFutureMap {
    /// # Errors
    /// [`Error::DuplicateName`] if two futures share a name.
    pub fn new(futures: impl IntoIterator<Item = Future>) -> Result<Self> {
        let map = FutureMap::new(futures);

        let mut seen = HashSet::new();
        for future in map.futures() {
            if !seen.insert(future.name()) {
                return Err(Error::DuplicateName(future.name().to_string()));
            }
        }

        Ok(Self { map })
    }

    pub fn into_inner(self) -> FutureMap {
        self.map
    }
}

impl Deref for UniqueFutureMap {
    type Target = FutureMap;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl TryFrom<Futures> for UniqueFutureMap {
    type Error = Error;

    fn try_from(futures: Futures) -> Result<Self> {
        Self::new(futures)
    }
}

/// A collection of promises addressed by name.
#[derive(Debug, Clone, Default)]
pub struct PromiseMap {
    promises: Promises,
}

impl PromiseMap {
    pub fn new(promises: impl IntoIterator<Item = Promise>) -> Self {
        Self {
            promises: promises.into_iter().collect(),
        }
    }

    pub fn promises(&self) -> &[Promise] {
        &self.promises
    }

    pub fn promise(&self, name: &str) -> Result<&Promise> {
        self.promises
            .iter()
            .find(|promise| promise.name() == name)
            .ok_or_else(|| Error::not_found(Lookup::Promise, name))
    }

    /// Sets the promise named `name`, checking the declared type.
    pub fn set<T>(&self, name: &str, value: T) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        self.promise(name)?.set(value)
    }

    /// Sets the promise named `name` from a value convertible into `T`. See
    /// [`Promise::set_as`] for which conversions are accepted.
    pub fn set_as<T, V>(&self, name: &str, value: V) -> Result<()>
    where
        T: Any + Send + Sync,
        V: Into<T>,
    {
        self.promise(name)?.set_as::<T, V>(value)
    }

    /// Futures of the current generation of every promise.
    pub fn futures(&self) -> FutureMap {
        FutureMap::new(self.promises.iter().map(Promise::future))
    }

    pub fn is_ready(&self) -> bool {
        self.promises.iter().all(Promise::is_ready)
    }
}
