use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::{ArcStr, DataInfos};
use crate::error::{Error, FilterError, Lookup, Result};
use crate::filter::Filter;
use crate::maps::{FutureMap, PromiseMap};
use crate::port::{Connection, InputPort, OutputPort};
use crate::promise::{Futures, Promise};

struct Inner {
    name: ArcStr,
    filter: Box<dyn Filter>,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    connections: RwLock<Vec<Connection>>,
}

/// A [`Filter`] wrapped into a graph node with one port per declared slot.
///
/// `PipeFilter` is a cheap handle: clones share the same ports and filter.
#[derive(Clone)]
pub struct PipeFilter {
    inner: Arc<Inner>,
}

impl PipeFilter {
    /// # Errors
    /// [`Error::DuplicateName`] if the filter declares two inputs or two
    /// outputs with the same name.
    pub fn new<F: Filter>(name: impl Into<ArcStr>, filter: F) -> Result<Self> {
        let input_infos = filter.input_infos();
        let output_infos = filter.output_infos();
        ensure_unique(&input_infos)?;
        ensure_unique(&output_infos)?;

        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                filter: Box::new(filter),
                inputs: input_infos.into_iter().map(InputPort::new).collect(),
                outputs: output_infos.into_iter().map(OutputPort::new).collect(),
                connections: RwLock::new(Vec::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inner.inputs
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.inner.outputs
    }

    pub fn input(&self, name: &str) -> Result<&InputPort> {
        self.inner
            .inputs
            .iter()
            .find(|port| port.name() == name)
            .ok_or_else(|| Error::not_found(Lookup::Input, name))
    }

    pub fn output(&self, name: &str) -> Result<&OutputPort> {
        self.inner
            .outputs
            .iter()
            .find(|port| port.name() == name)
            .ok_or_else(|| Error::not_found(Lookup::Output, name))
    }

    /// The promise feeding the input named `name`.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown input and [`Error::Connected`]
    /// once an output is wired to it, since the boundary is no longer read.
    pub fn get_promise(&self, name: &str) -> Result<Promise> {
        let input = self.input(name)?;
        if input.size() > 0 {
            return Err(Error::Connected(name.to_string()));
        }
        Ok(input.boundary())
    }

    /// Wires this filter's output `output` to the input `input` of `other`.
    ///
    /// # Errors
    /// [`Error::NotFound`] if either port is missing and
    /// [`Error::TypeMismatch`] if their types differ.
    pub fn connect(&self, output: &str, other: &PipeFilter, input: &str) -> Result<()> {
        let source = self.output(output)?;
        let target = other.input(input)?;
        target.connect(source)?;

        let connection = Connection {
            source: self.name().to_string(),
            output: output.to_string(),
            target: other.name().to_string(),
            input: input.to_string(),
        };

        let mut connections = self.inner.connections.write();
        if !connections.contains(&connection) {
            tracing::debug!(
                "connected {}.{} -> {}.{}",
                connection.source,
                connection.output,
                connection.target,
                connection.input
            );
            connections.push(connection);
        }

        Ok(())
    }

    /// Undoes [`connect`](Self::connect). Returns `false` if the ports were
    /// not connected.
    pub fn disconnect(&self, output: &str, other: &PipeFilter, input: &str) -> Result<bool> {
        let source = self.output(output)?;
        let removed = other.input(input)?.disconnect(source);

        self.inner.connections.write().retain(|connection| {
            !(connection.output == output
                && connection.target == other.name()
                && connection.input == input)
        });

        if removed {
            tracing::debug!(
                "disconnected {}.{} -> {}.{}",
                self.name(),
                output,
                other.name(),
                input
            );
        }
        Ok(removed)
    }

    /// Connections made from this filter's outputs.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner.connections.read().clone()
    }

    /// Every future the inputs currently observe.
    pub fn preconditions(&self) -> Futures {
        self.inner
            .inputs
            .iter()
            .flat_map(InputPort::futures)
            .collect()
    }

    /// The futures of every output.
    pub fn postconditions(&self) -> Futures {
        self.inner.outputs.iter().map(OutputPort::future).collect()
    }

    /// Runs the filter on the current inputs.
    ///
    /// Outputs the filter leaves unset are completed empty afterwards, so
    /// downstream filters are never blocked on them. When the filter fails
    /// or panics, every unset output carries the failure instead.
    ///
    /// # Errors
    /// [`Error::NotReady`] without running anything when an input has no
    /// value yet, [`Error::Upstream`] when an input was produced by a failed
    /// filter and [`Error::Filter`] when the filter itself fails.
    pub fn execute(&self) -> Result<()> {
        let span = tracing::debug_span!("filter", name = self.name());
        let _enter = span.enter();

        let preconditions = self.preconditions();
        if let Some(missing) = preconditions.iter().find(|future| !future.is_ready()) {
            return Err(Error::NotReady(missing.name().to_string()));
        }

        let outputs = PromiseMap::new(self.inner.outputs.iter().map(OutputPort::promise));

        let failed = preconditions
            .iter()
            .find_map(|future| future.failure().map(|source| (future.name(), source)));
        if let Some((name, source)) = failed {
            fail_all(&outputs, &source);
            return Err(Error::Upstream {
                name: name.to_string(),
                source,
            });
        }

        let inputs = FutureMap::from(preconditions);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.inner.filter.execute(&inputs, &outputs)
        }))
        .unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(panic))));

        match result {
            Ok(()) => {
                for promise in outputs.promises() {
                    if promise.flush() {
                        tracing::warn!(
                            "filter '{}' did not set output '{}'",
                            self.name(),
                            promise.name()
                        );
                    }
                }
                tracing::debug!("executed");
                Ok(())
            }
            Err(err) => {
                let source = FilterError::from(err);
                fail_all(&outputs, &source);
                Err(Error::Filter {
                    name: self.name().to_string(),
                    source,
                })
            }
        }
    }

    /// Starts a new generation of every port promise. Connections stay in
    /// place; inputs fed from outside must be set again.
    pub fn reset(&self) {
        for port in &self.inner.outputs {
            port.reset();
        }
        for port in &self.inner.inputs {
            port.reset();
        }
    }

    pub(crate) fn same(&self, other: &PipeFilter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PipeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeFilter")
            .field("name", &self.inner.name)
            .field("inputs", &self.inner.inputs)
            .field("outputs", &self.inner.outputs)
            .finish()
    }
}

fn ensure_unique(infos: &DataInfos) -> Result<()> {
    let mut seen = HashSet::new();
    for info in infos {
        if !seen.insert(info.name()) {
            return Err(Error::DuplicateName(info.name().to_string()));
        }
    }
    Ok(())
}

fn fail_all(outputs: &PromiseMap, source: &FilterError) {
    for promise in outputs.promises() {
        promise.fail(source.clone());
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Filter panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Filter panicked: {s}")
    } else {
        String::from("Filter panicked with unknown payload")
    }
}
