//! Write-once cells shared between a [`Promise`] and its [`Future`]s.
//!
//! A promise owns a cell that can be completed exactly once. Resetting the
//! promise swaps in a fresh cell (a new *generation*); futures taken before
//! the reset stay bound to the old cell and keep whatever it resolved to.
//!
//! Reading is split in two on purpose:
//! * [`Future::get`] never blocks and fails with [`Error::NotReady`] on a
//!   pending cell.
//! * [`Future::wait`] and [`wait_for_any`] block the calling thread.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::data::{ArcStr, DataInfo, DataType, Dynamic};
use crate::error::{Error, FilterError, Result};

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(0);

enum Slot {
    Pending,
    Value(Dynamic),
    /// Completed without a value, see [`Promise::flush`].
    Unset,
    Failed(FilterError),
}

impl Slot {
    fn is_ready(&self) -> bool {
        !matches!(self, Slot::Pending)
    }
}

/// Wake-up shared by every cell a [`wait_for_any`] call is watching.
#[derive(Default)]
struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn fire(&self) {
        *self.fired.lock() = true;
        self.cond.notify_all();
    }

    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut fired = self.fired.lock();
        while !*fired {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut fired, deadline).timed_out() {
                        return *fired;
                    }
                }
                None => self.cond.wait(&mut fired),
            }
        }
        true
    }
}

struct State {
    slot: Slot,
    watchers: Vec<Arc<Signal>>,
}

/// One generation of a promise.
pub(crate) struct Cell {
    id: u64,
    info: DataInfo,
    generation: u64,
    state: Mutex<State>,
    ready: Condvar,
}

impl Cell {
    fn new(info: DataInfo, generation: u64) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed),
            info,
            generation,
            state: Mutex::new(State {
                slot: Slot::Pending,
                watchers: Vec::new(),
            }),
            ready: Condvar::new(),
        })
    }

    fn complete(&self, slot: Slot) -> Result<()> {
        let mut state = self.state.lock();
        if state.slot.is_ready() {
            return Err(Error::AlreadySet(self.info.name().to_string()));
        }

        state.slot = slot;
        for signal in state.watchers.drain(..) {
            signal.fire();
        }
        self.ready.notify_all();

        tracing::trace!(name = self.info.name(), generation = self.generation, "cell completed");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.state.lock().slot.is_ready()
    }

    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();
        while !state.slot.is_ready() {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        return state.slot.is_ready();
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
        true
    }

    /// Registers `signal` to fire on completion. Returns `true` instead when
    /// the cell is already complete.
    fn watch(&self, signal: &Arc<Signal>) -> bool {
        let mut state = self.state.lock();
        if state.slot.is_ready() {
            return true;
        }
        state.watchers.push(signal.clone());
        false
    }

    fn unwatch(&self, signal: &Arc<Signal>) {
        self.state
            .lock()
            .watchers
            .retain(|other| !Arc::ptr_eq(other, signal));
    }
}

/// The write side of a single-assignment value.
///
/// Cloning a `Promise` shares the underlying cell: setting or resetting
/// through any clone is visible through all of them.
#[derive(Clone)]
pub struct Promise {
    cell: Arc<RwLock<Arc<Cell>>>,
}

impl Promise {
    pub fn new(info: DataInfo) -> Self {
        Self {
            cell: Arc::new(RwLock::new(Cell::new(info, 0))),
        }
    }

    fn current(&self) -> Arc<Cell> {
        self.cell.read().clone()
    }

    pub fn info(&self) -> DataInfo {
        self.cell.read().info.clone()
    }

    pub fn name(&self) -> String {
        self.cell.read().info.name().to_string()
    }

    pub fn data_type(&self) -> DataType {
        self.cell.read().info.data_type()
    }

    /// Number of resets this promise has gone through.
    pub fn generation(&self) -> u64 {
        self.cell.read().generation
    }

    /// A read handle to the current generation.
    pub fn future(&self) -> Future {
        let cell = self.current();
        let name = cell.info.name().into();
        Future { cell, name }
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_ready()
    }

    /// Completes the current generation with `value`.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] if `T` is not the declared type,
    /// [`Error::AlreadySet`] if this generation already holds a value.
    pub fn set<T>(&self, value: T) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        let cell = self.current();
        let declared = cell.info.data_type();
        if !declared.is::<T>() {
            return Err(Error::TypeMismatch {
                name: cell.info.name().to_string(),
                expected: declared.name(),
                found: type_name::<T>(),
            });
        }

        cell.complete(Slot::Value(Arc::new(value)))
    }

    /// Converts `value` into `T` before setting it, for callers that hold a
    /// value of a different type than the declared one.
    ///
    /// Only lossless [`Into`] conversions are accepted, such as `u16` into
    /// `u32` or `f32` into `f64`. Lossy ones like `f32` into `u32` have no
    /// `Into` impl; convert explicitly and call [`set`](Self::set) instead.
    /// `T` must still be the declared type or [`Error::TypeMismatch`] is
    /// returned.
    pub fn set_as<T, V>(&self, value: V) -> Result<()>
    where
        T: Any + Send + Sync,
        V: Into<T>,
    {
        self.set::<T>(value.into())
    }

    /// Marks a still pending generation as completed without a value, so
    /// that nobody waiting on it is left blocked. Returns whether anything
    /// was flushed.
    pub(crate) fn flush(&self) -> bool {
        self.current().complete(Slot::Unset).is_ok()
    }

    /// Completes a still pending generation with a filter failure.
    pub(crate) fn fail(&self, error: FilterError) -> bool {
        self.current().complete(Slot::Failed(error)).is_ok()
    }

    /// Starts a new generation with the same name and type.
    pub fn reset(&self) {
        let mut cell = self.cell.write();
        let next = Cell::new(cell.info.clone(), cell.generation + 1);
        tracing::trace!(name = next.info.name(), generation = next.generation, "promise reset");
        *cell = next;
    }

    pub(crate) fn same_promise(&self, other: &Promise) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.current();
        f.debug_struct("Promise")
            .field("info", &cell.info)
            .field("generation", &cell.generation)
            .field("ready", &cell.is_ready())
            .finish()
    }
}

/// The read side of a promise generation.
///
/// Two futures are equal when they observe the same cell, not when they
/// hold equal values. A future may be viewed under a different name than
/// the promise's (see [`Future::renamed`]) without changing its identity.
#[derive(Clone)]
pub struct Future {
    cell: Arc<Cell>,
    name: ArcStr,
}

impl Future {
    /// Unique identifier of the observed cell.
    pub fn id(&self) -> u64 {
        self.cell.id
    }

    /// The same cell, addressed as `name`.
    pub fn renamed(&self, name: impl Into<ArcStr>) -> Future {
        Future {
            cell: self.cell.clone(),
            name: name.into(),
        }
    }

    pub fn info(&self) -> DataInfo {
        DataInfo::new(self.name.clone(), self.data_type())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.cell.info.data_type()
    }

    pub fn generation(&self) -> u64 {
        self.cell.generation
    }

    pub fn is_ready(&self) -> bool {
        self.cell.is_ready()
    }

    /// Returns the value without blocking.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] if `T` is not the declared type,
    /// [`Error::NotReady`] if the cell has not been completed yet,
    /// [`Error::Unset`] if the producer finished without setting it and
    /// [`Error::Upstream`] if the producer failed.
    pub fn get<T>(&self) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let declared = self.data_type();
        if !declared.is::<T>() {
            return Err(Error::TypeMismatch {
                name: self.name().to_string(),
                expected: declared.name(),
                found: type_name::<T>(),
            });
        }

        self.get_dynamic()?
            .downcast::<T>()
            .map_err(|_| Error::TypeMismatch {
                name: self.name().to_string(),
                expected: declared.name(),
                found: type_name::<T>(),
            })
    }

    /// Returns the type-erased value without blocking.
    pub fn get_dynamic(&self) -> Result<Dynamic> {
        let state = self.cell.state.lock();
        match &state.slot {
            Slot::Pending => Err(Error::NotReady(self.name().to_string())),
            Slot::Value(value) => Ok(value.clone()),
            Slot::Unset => Err(Error::Unset(self.name().to_string())),
            Slot::Failed(source) => Err(Error::Upstream {
                name: self.name().to_string(),
                source: source.clone(),
            }),
        }
    }

    /// The failure the producer completed this cell with, if any.
    pub fn failure(&self) -> Option<FilterError> {
        match &self.cell.state.lock().slot {
            Slot::Failed(source) => Some(source.clone()),
            _ => None,
        }
    }

    /// Blocks until the cell is completed.
    pub fn wait(&self) {
        self.cell.wait_until(None);
    }

    /// Blocks until the cell is completed or `timeout` elapses. Returns
    /// whether the cell is ready.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.cell.wait_until(Some(Instant::now() + timeout))
    }
}

impl PartialEq for Future {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for Future {}

impl std::hash::Hash for Future {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.cell.id.hash(state);
    }
}

impl PartialOrd for Future {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Future {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cell.id.cmp(&other.cell.id)
    }
}

impl fmt::Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.cell.id)
            .field("name", &self.name)
            .field("type", &self.data_type())
            .field("generation", &self.cell.generation)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl From<&Promise> for Future {
    fn from(promise: &Promise) -> Self {
        promise.future()
    }
}

pub type Futures = Vec<Future>;
pub type Promises = Vec<Promise>;

/// Blocks until at least one of `futures` is ready. Returns immediately
/// when the collection is empty.
pub fn wait_for_any<'a>(futures: impl IntoIterator<Item = &'a Future>) {
    wait_for_any_until(futures, None);
}

/// Like [`wait_for_any`], giving up after `timeout`. Returns whether one of
/// the futures became ready.
pub fn wait_for_any_timeout<'a>(
    futures: impl IntoIterator<Item = &'a Future>,
    timeout: Duration,
) -> bool {
    wait_for_any_until(futures, Some(Instant::now() + timeout))
}

fn wait_for_any_until<'a>(
    futures: impl IntoIterator<Item = &'a Future>,
    deadline: Option<Instant>,
) -> bool {
    let futures: Vec<&Future> = futures.into_iter().collect();
    if futures.is_empty() {
        return true;
    }

    let signal = Arc::new(Signal::default());
    let mut watched = 0;
    let mut ready = false;
    for future in &futures {
        if future.cell.watch(&signal) {
            ready = true;
            break;
        }
        watched += 1;
    }

    if !ready {
        ready = signal.wait_until(deadline);
    }

    for future in &futures[..watched] {
        future.cell.unwatch(&signal);
    }

    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn promise_u32(name: &str) -> Promise {
        Promise::new(DataInfo::of::<u32>(name))
    }

    #[test]
    fn test_set_and_get() {
        let promise = promise_u32("Helloworld");
        let future1 = promise.future();
        let future2 = promise.future();
        assert_eq!(future1, future2);

        assert!(matches!(promise.set(12.0f32), Err(Error::TypeMismatch { .. })));

        promise.set(42u32).unwrap();
        let future3 = promise.future();
        assert_eq!(*future1.get::<u32>().unwrap(), 42);
        assert_eq!(*future2.get::<u32>().unwrap(), 42);
        assert_eq!(*future3.get::<u32>().unwrap(), 42);

        assert!(matches!(promise.set(42u32), Err(Error::AlreadySet(_))));
    }

    #[test]
    fn test_reset_starts_new_generation() {
        let promise = promise_u32("Helloworld");
        let before = promise.future();
        promise.set(42u32).unwrap();

        promise.reset();
        let after = promise.future();
        assert_ne!(before, after);
        assert_eq!(before.name(), after.name());
        assert_eq!(before.data_type(), after.data_type());
        assert_eq!(promise.generation(), 1);
        assert!(!after.is_ready());

        promise.set_as::<u32, u16>(43).unwrap();
        assert_eq!(*before.get::<u32>().unwrap(), 42);
        assert_eq!(*after.get::<u32>().unwrap(), 43);
    }

    #[test]
    fn test_set_as_converts_losslessly() {
        let wide = Promise::new(DataInfo::of::<f64>("wide"));
        wide.set_as::<f64, f32>(43.5).unwrap();
        assert_eq!(*wide.future().get::<f64>().unwrap(), 43.5);

        // T is checked against the declared type after conversion
        let narrow = promise_u32("narrow");
        assert!(matches!(
            narrow.set_as::<u64, u32>(43),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(!narrow.is_ready());

        // lossy conversions are up to the caller
        narrow.set(43.0f32 as u32).unwrap();
        assert_eq!(*narrow.future().get::<u32>().unwrap(), 43);
    }

    #[test]
    fn test_get_is_fail_fast() {
        let promise = promise_u32("X");
        let future = promise.future();
        assert!(matches!(future.get::<u32>(), Err(Error::NotReady(_))));
        assert!(matches!(future.get::<u64>(), Err(Error::TypeMismatch { .. })));
        assert!(!future.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_flush_and_fail() {
        let promise = promise_u32("X");
        assert!(promise.flush());
        assert!(!promise.flush());
        assert!(matches!(promise.future().get::<u32>(), Err(Error::Unset(_))));

        promise.reset();
        assert!(promise.fail(FilterError::new(anyhow::anyhow!("boom"))));
        let err = promise.future().get::<u32>().unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
        assert!(promise.future().failure().is_some());
    }

    #[test]
    fn test_wait_across_threads() {
        let promise = promise_u32("X");
        let future = promise.future();

        let setter = {
            let promise = promise.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                promise.set(7u32).unwrap();
            })
        };

        future.wait();
        assert_eq!(*future.get::<u32>().unwrap(), 7);
        setter.join().unwrap();
    }

    #[test]
    fn test_wait_for_any() {
        let a = promise_u32("a");
        let b = promise_u32("b");
        let futures = vec![a.future(), b.future()];

        assert!(!wait_for_any_timeout(&futures, Duration::from_millis(10)));

        let setter = {
            let b = b.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                b.set(1u32).unwrap();
            })
        };

        wait_for_any(&futures);
        assert!(futures[1].is_ready());
        assert!(!futures[0].is_ready());
        setter.join().unwrap();

        // already ready futures return at once
        assert!(wait_for_any_timeout(&futures, Duration::ZERO));
        wait_for_any(std::iter::empty());
    }
}
