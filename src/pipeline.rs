//! Named graphs of filters and nested pipelines.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::data::ArcStr;
use crate::error::{Error, Lookup, Result};
use crate::executable::Executable;
use crate::executor::Executor;
use crate::filter::Filter;
use crate::maps::FutureMap;
use crate::pipe_filter::PipeFilter;
use crate::port::Connection;
use crate::promise::{Future, Futures};

/// Outcome of a successful synchronous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Every member ran.
    Complete,
    /// Some members never had their inputs ready. Members of nested
    /// pipelines are listed as `outer/inner`.
    Partial { unexecuted: Vec<String> },
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunStatus::Complete)
    }
}

struct Member {
    name: ArcStr,
    executable: Executable,
}

struct Inner {
    name: ArcStr,
    members: Vec<Member>,
}

/// A named collection of [`Executable`]s wired through their ports.
///
/// `Pipeline` is a shared handle: clones, including the one held by a
/// parent pipeline after [`add_pipeline`](Self::add_pipeline), all see the
/// same members.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<RwLock<Inner>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::named("pipeline")
    }

    pub fn named(name: impl Into<ArcStr>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                name: name.into(),
                members: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> String {
        self.inner.read().name.to_string()
    }

    pub fn len(&self) -> usize {
        self.inner.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().members.is_empty()
    }

    /// Wraps `filter` into a [`PipeFilter`] registered under `name` and
    /// returns a handle to it.
    ///
    /// # Errors
    /// [`Error::DuplicateName`] if a member is already called `name`, or
    /// if the filter declares the same port name twice.
    pub fn add<F: Filter>(&self, name: &str, filter: F) -> Result<PipeFilter> {
        let mut inner = self.inner.write();
        ensure_vacant(&inner, name)?;

        let pipe_filter = PipeFilter::new(name, filter)?;
        inner.members.push(Member {
            name: name.into(),
            executable: Executable::Filter(pipe_filter.clone()),
        });

        tracing::debug!(pipeline = %inner.name, "added filter '{name}'");
        Ok(pipe_filter)
    }

    /// Registers `pipeline` as a member called `name`. The member shares
    /// its state with `pipeline`.
    ///
    /// # Errors
    /// [`Error::Cycle`] if `pipeline` is this pipeline or contains it, and
    /// [`Error::DuplicateName`] if a member is already called `name`.
    pub fn add_pipeline(&self, name: &str, pipeline: &Pipeline) -> Result<()> {
        if self.same(pipeline) || pipeline.contains(self) {
            return Err(Error::Cycle(name.to_string()));
        }

        let mut inner = self.inner.write();
        ensure_vacant(&inner, name)?;
        inner.members.push(Member {
            name: name.into(),
            executable: Executable::Pipeline(pipeline.clone()),
        });

        tracing::debug!(pipeline = %inner.name, "added pipeline '{name}'");
        Ok(())
    }

    pub fn get_executable(&self, name: &str) -> Result<Executable> {
        self.inner
            .read()
            .members
            .iter()
            .find(|member| &*member.name == name)
            .map(|member| member.executable.clone())
            .ok_or_else(|| Error::not_found(Lookup::Executable, name))
    }

    /// The member filter called `name`. Nested pipelines are not searched.
    pub fn get_filter(&self, name: &str) -> Result<PipeFilter> {
        self.get_executable(name)?
            .as_filter()
            .cloned()
            .ok_or_else(|| Error::not_found(Lookup::Executable, name))
    }

    /// Wires the output `output` of member `source` to the input `input` of
    /// member `target`.
    pub fn connect(&self, source: &str, output: &str, target: &str, input: &str) -> Result<()> {
        let source = self.get_filter(source)?;
        let target = self.get_filter(target)?;
        source.connect(output, &target, input)
    }

    /// Removes a connection made with [`connect`](Self::connect). Returns
    /// `false` if the members were not connected that way.
    pub fn disconnect(
        &self,
        source: &str,
        output: &str,
        target: &str,
        input: &str,
    ) -> Result<bool> {
        let source = self.get_filter(source)?;
        let target = self.get_filter(target)?;
        source.disconnect(output, &target, input)
    }

    pub fn member_names(&self) -> Vec<String> {
        self.inner
            .read()
            .members
            .iter()
            .map(|member| member.name.to_string())
            .collect()
    }

    /// Every filter in this pipeline and in its nested pipelines.
    pub fn filters(&self) -> Vec<PipeFilter> {
        let mut filters = Vec::new();
        for member in self.members() {
            match member.executable {
                Executable::Filter(filter) => filters.push(filter),
                Executable::Pipeline(pipeline) => filters.extend(pipeline.filters()),
            }
        }
        filters
    }

    /// Connections made from any filter in this pipeline, nested ones
    /// included.
    pub fn connections(&self) -> Vec<Connection> {
        self.filters()
            .iter()
            .flat_map(PipeFilter::connections)
            .collect()
    }

    /// Member inputs that nothing inside this pipeline produces.
    pub fn preconditions(&self) -> Futures {
        let members = self.members();
        let produced: HashSet<Future> = members
            .iter()
            .flat_map(|member| member.executable.postconditions())
            .collect();

        let mut seen = HashSet::new();
        members
            .iter()
            .flat_map(|member| member.executable.preconditions())
            .filter(|future| !produced.contains(future) && seen.insert(future.clone()))
            .collect()
    }

    /// Member outputs that nothing inside this pipeline consumes.
    pub fn postconditions(&self) -> Futures {
        let members = self.members();
        let consumed: HashSet<Future> = members
            .iter()
            .flat_map(|member| member.executable.preconditions())
            .collect();

        members
            .iter()
            .flat_map(|member| member.executable.postconditions())
            .filter(|future| !consumed.contains(future))
            .collect()
    }

    /// Runs every member on the calling thread, each as soon as its inputs
    /// are ready, until nothing else can run.
    ///
    /// Members whose outputs are already complete are not run again, so a
    /// pipeline can be executed repeatedly within one generation.
    ///
    /// # Errors
    /// The first error raised by a member. Members that never become ready
    /// are not an error; they are reported through [`RunStatus::Partial`].
    pub fn execute(&self) -> Result<RunStatus> {
        let span = tracing::debug_span!("pipeline", name = %self.name());
        let _enter = span.enter();

        let members = self.members();
        let mut done = vec![false; members.len()];
        let mut unexecuted = Vec::new();

        loop {
            let mut progressed = false;

            for (member, done) in members.iter().zip(done.iter_mut()) {
                if *done || !member.executable.is_ready() {
                    continue;
                }

                *done = true;
                progressed = true;

                if member.executable.is_complete() {
                    tracing::trace!("skipping '{}', already complete", member.name);
                    continue;
                }

                if let RunStatus::Partial { unexecuted: nested } = member.executable.execute()? {
                    unexecuted.extend(
                        nested
                            .into_iter()
                            .map(|name| format!("{}/{}", member.name, name)),
                    );
                }
            }

            if !progressed {
                break;
            }
        }

        for (member, done) in members.iter().zip(&done) {
            if !done {
                unexecuted.push(member.name.to_string());
            }
        }

        if unexecuted.is_empty() {
            tracing::debug!("executed {} members", members.len());
            Ok(RunStatus::Complete)
        } else {
            tracing::warn!("{} members never became ready", unexecuted.len());
            Ok(RunStatus::Partial { unexecuted })
        }
    }

    /// Starts a new generation for every member. Boundary inputs have to
    /// be supplied again afterwards.
    pub fn reset(&self) {
        for member in self.members() {
            member.executable.reset();
        }
    }

    /// Submits every member to `executor` and returns the outputs of
    /// everything submitted.
    pub fn schedule(&self, executor: &dyn Executor) -> FutureMap {
        let mut futures = Vec::new();
        for member in self.members() {
            futures.extend(member.executable.schedule(executor).into_futures());
        }
        FutureMap::from(futures)
    }

    /// The member graph. Each node is a member name and each edge a
    /// connection between filters in two different members.
    pub fn graph(&self) -> Graph<String, Connection> {
        let members = self.members();
        let mut graph = Graph::new();
        let mut owners: HashMap<String, NodeIndex> = HashMap::new();

        for member in &members {
            let index = graph.add_node(member.name.to_string());
            match &member.executable {
                Executable::Filter(filter) => {
                    owners.entry(filter.name().to_string()).or_insert(index);
                }
                Executable::Pipeline(pipeline) => {
                    for filter in pipeline.filters() {
                        owners.entry(filter.name().to_string()).or_insert(index);
                    }
                }
            }
        }

        for connection in self.connections() {
            let source = owners.get(&connection.source).copied();
            let target = owners.get(&connection.target).copied();
            match (source, target) {
                (Some(source), Some(target)) if source != target => {
                    graph.add_edge(source, target, connection);
                }
                _ => {}
            }
        }

        graph
    }

    fn members(&self) -> Vec<Member> {
        self.inner
            .read()
            .members
            .iter()
            .map(|member| Member {
                name: member.name.clone(),
                executable: member.executable.clone(),
            })
            .collect()
    }

    fn same(&self, other: &Pipeline) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn contains(&self, other: &Pipeline) -> bool {
        self.members().iter().any(|member| match &member.executable {
            Executable::Pipeline(pipeline) => pipeline.same(other) || pipeline.contains(other),
            Executable::Filter(_) => false,
        })
    }

    /// True when `filter` is a direct member.
    pub fn has_filter(&self, filter: &PipeFilter) -> bool {
        self.members().iter().any(|member| {
            member
                .executable
                .as_filter()
                .is_some_and(|own| own.same(filter))
        })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_vacant(inner: &Inner, name: &str) -> Result<()> {
    if inner.members.iter().any(|member| &*member.name == name) {
        return Err(Error::DuplicateName(name.to_string()));
    }
    Ok(())
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name())
            .field("members", &self.member_names())
            .finish()
    }
}

/// Renders the member graph as a mermaid flowchart.
impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.graph();
        writeln!(f, "graph LR")?;

        for index in graph.node_indices() {
            let name = graph[index].replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in graph.edge_indices() {
            let Some((source, target)) = graph.edge_endpoints(edge) else {
                continue;
            };
            let connection = &graph[edge];
            writeln!(
                f,
                "    {} -- \"{} → {}\" --> {}",
                source.index(),
                connection.output.replace('"', "\\\""),
                connection.input.replace('"', "\\\""),
                target.index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataInfo, DataInfos};
    use crate::maps::PromiseMap;

    struct AddOne;

    impl Filter for AddOne {
        fn input_infos(&self) -> DataInfos {
            vec![DataInfo::of::<u32>("in")]
        }

        fn output_infos(&self) -> DataInfos {
            vec![DataInfo::of::<u32>("out")]
        }

        fn execute(&self, inputs: &FutureMap, outputs: &PromiseMap) -> anyhow::Result<()> {
            outputs.set("out", *inputs.get::<u32>("in")? + 1)?;
            Ok(())
        }
    }

    struct Fail;

    impl Filter for Fail {
        fn input_infos(&self) -> DataInfos {
            vec![DataInfo::of::<u32>("in")]
        }

        fn output_infos(&self) -> DataInfos {
            vec![DataInfo::of::<u32>("out")]
        }

        fn execute(&self, _: &FutureMap, _: &PromiseMap) -> anyhow::Result<()> {
            anyhow::bail!("refusing to add")
        }
    }

    /// `a -> b -> c`, all `AddOne`.
    fn chain() -> (Pipeline, PipeFilter, PipeFilter, PipeFilter) {
        let pipeline = Pipeline::named("chain");
        let a = pipeline.add("a", AddOne).unwrap();
        let b = pipeline.add("b", AddOne).unwrap();
        let c = pipeline.add("c", AddOne).unwrap();
        a.connect("out", &b, "in").unwrap();
        b.connect("out", &c, "in").unwrap();
        (pipeline, a, b, c)
    }

    #[test]
    fn test_add_and_lookup() {
        let (pipeline, a, ..) = chain();
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.member_names(), vec!["a", "b", "c"]);
        assert!(matches!(
            pipeline.add("a", AddOne),
            Err(Error::DuplicateName(_))
        ));
        assert!(matches!(
            pipeline.get_executable("zzz"),
            Err(Error::NotFound { .. })
        ));
        assert!(pipeline.has_filter(&a));
        assert!(pipeline.get_filter("a").unwrap().same(&a));
        assert_eq!(pipeline.connections().len(), 2);
    }

    #[test]
    fn test_boundary_conditions() {
        let (pipeline, a, _, c) = chain();
        assert_eq!(pipeline.preconditions(), a.preconditions());
        assert_eq!(pipeline.postconditions(), c.postconditions());
    }

    #[test]
    fn test_execute_in_dependency_order() {
        let pipeline = Pipeline::new();
        // added in reverse so insertion order is not topological
        let c = pipeline.add("c", AddOne).unwrap();
        let b = pipeline.add("b", AddOne).unwrap();
        let a = pipeline.add("a", AddOne).unwrap();
        a.connect("out", &b, "in").unwrap();
        b.connect("out", &c, "in").unwrap();

        a.get_promise("in").unwrap().set(0u32).unwrap();
        assert_eq!(pipeline.execute().unwrap(), RunStatus::Complete);

        let results = FutureMap::new(pipeline.postconditions());
        assert_eq!(*results.get::<u32>("out").unwrap(), 3);

        // a second run in the same generation changes nothing
        assert_eq!(pipeline.execute().unwrap(), RunStatus::Complete);
    }

    #[test]
    fn test_partial_run() {
        let (pipeline, ..) = chain();
        let status = pipeline.execute().unwrap();
        assert_eq!(
            status,
            RunStatus::Partial {
                unexecuted: vec!["a".into(), "b".into(), "c".into()]
            }
        );
        assert!(!FutureMap::new(pipeline.postconditions()).is_ready());
    }

    #[test]
    fn test_reset_and_rerun() {
        let (pipeline, a, ..) = chain();
        a.get_promise("in").unwrap().set(10u32).unwrap();
        pipeline.execute().unwrap();
        let first = FutureMap::new(pipeline.postconditions());

        pipeline.reset();
        assert!(!pipeline.execute().unwrap().is_complete());

        a.get_promise("in").unwrap().set(10u32).unwrap();
        assert!(pipeline.execute().unwrap().is_complete());
        let second = FutureMap::new(pipeline.postconditions());
        assert_eq!(
            *first.get::<u32>("out").unwrap(),
            *second.get::<u32>("out").unwrap()
        );
    }

    #[test]
    fn test_failure_stops_run() {
        let pipeline = Pipeline::new();
        let source = pipeline.add("source", Fail).unwrap();
        let sink = pipeline.add("sink", AddOne).unwrap();
        source.connect("out", &sink, "in").unwrap();

        source.get_promise("in").unwrap().set(1u32).unwrap();
        let err = pipeline.execute().unwrap_err();
        assert!(matches!(err, Error::Filter { ref name, .. } if name == "source"));
        assert!(err.to_string().contains("refusing to add"));
        assert!(sink.postconditions()[0].failure().is_none());
    }

    #[test]
    fn test_nested_pipeline() {
        let (inner, inner_a, _, inner_c) = chain();
        let outer = Pipeline::named("outer");
        let head = outer.add("head", AddOne).unwrap();
        let tail = outer.add("tail", AddOne).unwrap();
        outer.add_pipeline("chain", &inner).unwrap();
        head.connect("out", &inner_a, "in").unwrap();
        inner_c.connect("out", &tail, "in").unwrap();

        assert_eq!(outer.preconditions(), head.preconditions());
        assert_eq!(outer.postconditions(), tail.postconditions());
        assert_eq!(outer.filters().len(), 5);

        head.get_promise("in").unwrap().set(0u32).unwrap();
        assert!(outer.execute().unwrap().is_complete());
        assert_eq!(*tail.postconditions()[0].get::<u32>().unwrap(), 5);

        // nested members share state with the handle that was added
        assert!(inner_c.postconditions()[0].is_ready());
        outer.reset();
        assert!(!inner_c.postconditions()[0].is_ready());
    }

    #[test]
    fn test_nested_partial_names() {
        let (inner, ..) = chain();
        let outer = Pipeline::new();
        outer.add_pipeline("chain", &inner).unwrap();
        assert_eq!(
            outer.execute().unwrap(),
            RunStatus::Partial {
                unexecuted: vec!["chain".into()]
            }
        );
    }

    #[test]
    fn test_cycles_rejected() {
        let outer = Pipeline::new();
        let inner = Pipeline::new();
        assert!(matches!(
            outer.add_pipeline("self", &outer),
            Err(Error::Cycle(_))
        ));
        outer.add_pipeline("inner", &inner).unwrap();
        assert!(matches!(
            inner.add_pipeline("outer", &outer),
            Err(Error::Cycle(_))
        ));
    }

    #[test]
    fn test_graph_and_mermaid() {
        let (pipeline, ..) = chain();
        let graph = pipeline.graph();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);

        let mermaid = pipeline.to_string();
        assert!(mermaid.starts_with("graph LR\n"));
        assert!(mermaid.contains("0[\"a\"]"));
        assert!(mermaid.contains("0 -- \"out → in\" --> 1"));
    }

    #[test]
    fn test_disconnect_updates_graph() {
        let (pipeline, ..) = chain();
        assert!(pipeline.disconnect("b", "out", "c", "in").unwrap());
        assert!(!pipeline.disconnect("b", "out", "c", "in").unwrap());
        assert!(matches!(
            pipeline.disconnect("b", "out", "z", "in"),
            Err(Error::NotFound { .. })
        ));

        assert_eq!(pipeline.connections().len(), 1);
        assert_eq!(pipeline.graph().edge_count(), 1);
        assert!(!pipeline.to_string().contains("1 -- "));

        // c is now a boundary consumer of the pipeline
        assert_eq!(pipeline.preconditions().len(), 2);
    }
}
