//! Typed attachment points of a [`PipeFilter`](crate::PipeFilter).
//!
//! An [`OutputPort`] owns the promise its filter writes to. An [`InputPort`]
//! holds the promises of every output connected to it, so that resetting a
//! producer is picked up by its consumers without rewiring.

use parking_lot::RwLock;

use crate::data::{DataInfo, DataType};
use crate::error::{Error, Result};
use crate::promise::{Future, Futures, Promise};

/// A wire from one filter's output to another filter's input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub source: String,
    pub output: String,
    pub target: String,
    pub input: String,
}

#[derive(Debug)]
pub struct OutputPort {
    promise: Promise,
}

impl OutputPort {
    pub fn new(info: DataInfo) -> Self {
        Self {
            promise: Promise::new(info),
        }
    }

    pub fn name(&self) -> String {
        self.promise.name()
    }

    pub fn data_type(&self) -> DataType {
        self.promise.data_type()
    }

    /// The promise the owning filter writes to.
    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }

    pub fn future(&self) -> Future {
        self.promise.future()
    }

    pub fn connect(&self, port: &InputPort) -> Result<()> {
        port.connect(self)
    }

    pub fn reset(&self) {
        self.promise.reset();
    }
}

#[derive(Debug)]
pub struct InputPort {
    info: DataInfo,
    /// Fed by callers while nothing is connected.
    boundary: Promise,
    sources: RwLock<Vec<Promise>>,
}

impl InputPort {
    pub fn new(info: DataInfo) -> Self {
        Self {
            boundary: Promise::new(info.clone()),
            info,
            sources: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn data_type(&self) -> DataType {
        self.info.data_type()
    }

    pub fn info(&self) -> &DataInfo {
        &self.info
    }

    /// Number of outputs connected to this port.
    pub fn size(&self) -> usize {
        self.sources.read().len()
    }

    /// The promise an external caller sets when nothing is connected.
    pub fn boundary(&self) -> Promise {
        self.boundary.clone()
    }

    /// Futures of the current generation of every connected output, or of
    /// the boundary promise when there are none. All are named after this
    /// port.
    pub fn futures(&self) -> Futures {
        let sources = self.sources.read();
        if sources.is_empty() {
            return vec![self.boundary.future()];
        }

        sources
            .iter()
            .map(|promise| promise.future().renamed(self.info.name()))
            .collect()
    }

    /// Connects `port` to this input. Connecting the same output twice is
    /// a no-op.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] if the declared types differ; nothing is
    /// connected in that case.
    pub fn connect(&self, port: &OutputPort) -> Result<()> {
        if port.data_type() != self.data_type() {
            return Err(Error::TypeMismatch {
                name: self.info.name().to_string(),
                expected: self.data_type().name(),
                found: port.data_type().name(),
            });
        }

        let mut sources = self.sources.write();
        if !sources.iter().any(|promise| promise.same_promise(&port.promise)) {
            sources.push(port.promise());
        }

        Ok(())
    }

    /// Returns `true` if `port` was connected and has been removed. Use
    /// [`PipeFilter::disconnect`](crate::PipeFilter::disconnect) to also drop
    /// the recorded [`Connection`].
    pub(crate) fn disconnect(&self, port: &OutputPort) -> bool {
        let mut sources = self.sources.write();
        let before = sources.len();
        sources.retain(|promise| !promise.same_promise(&port.promise));
        sources.len() != before
    }

    /// Starts a new generation of the boundary promise. Connected outputs
    /// are reset by their own filters.
    pub fn reset(&self) {
        self.boundary.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconnected_port_uses_boundary() {
        let input = InputPort::new(DataInfo::of::<u32>("in"));
        assert_eq!(input.size(), 0);

        let futures = input.futures();
        assert_eq!(futures.len(), 1);
        assert_eq!(futures[0], input.boundary().future());

        input.boundary().set(3u32).unwrap();
        assert_eq!(*input.futures()[0].get::<u32>().unwrap(), 3);
    }

    #[test]
    fn test_connect_renames_and_follows_reset() {
        let output = OutputPort::new(DataInfo::of::<u32>("out"));
        let input = InputPort::new(DataInfo::of::<u32>("in"));
        output.connect(&input).unwrap();
        output.connect(&input).unwrap();
        assert_eq!(input.size(), 1);

        let before = input.futures();
        assert_eq!(before[0].name(), "in");
        assert_eq!(before[0], output.future());

        output.reset();
        let after = input.futures();
        assert_ne!(before[0], after[0]);
        assert_eq!(after[0], output.future());

        assert!(input.disconnect(&output));
        assert!(!input.disconnect(&output));
    }

    #[test]
    fn test_connect_type_mismatch() {
        let output = OutputPort::new(DataInfo::of::<f32>("out"));
        let input = InputPort::new(DataInfo::of::<u32>("in"));
        assert!(matches!(
            output.connect(&input),
            Err(Error::TypeMismatch { .. })
        ));
        assert_eq!(input.size(), 0);
    }
}
