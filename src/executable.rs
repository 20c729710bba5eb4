use crate::error::Result;
use crate::executor::Executor;
use crate::maps::FutureMap;
use crate::pipe_filter::PipeFilter;
use crate::pipeline::{Pipeline, RunStatus};
use crate::promise::Futures;

/// Anything a pipeline can hold and an executor can run.
#[derive(Debug, Clone)]
pub enum Executable {
    Filter(PipeFilter),
    Pipeline(Pipeline),
}

impl Executable {
    pub fn name(&self) -> String {
        match self {
            Executable::Filter(filter) => filter.name().to_string(),
            Executable::Pipeline(pipeline) => pipeline.name(),
        }
    }

    /// Futures that must be ready before this can run.
    pub fn preconditions(&self) -> Futures {
        match self {
            Executable::Filter(filter) => filter.preconditions(),
            Executable::Pipeline(pipeline) => pipeline.preconditions(),
        }
    }

    /// Futures that become ready once this has run.
    pub fn postconditions(&self) -> Futures {
        match self {
            Executable::Filter(filter) => filter.postconditions(),
            Executable::Pipeline(pipeline) => pipeline.postconditions(),
        }
    }

    /// True when every precondition is ready.
    pub fn is_ready(&self) -> bool {
        self.preconditions().iter().all(|future| future.is_ready())
    }

    /// True when there is at least one postcondition and all of them are
    /// ready.
    pub fn is_complete(&self) -> bool {
        let postconditions = self.postconditions();
        !postconditions.is_empty() && postconditions.iter().all(|future| future.is_ready())
    }

    pub fn execute(&self) -> Result<RunStatus> {
        match self {
            Executable::Filter(filter) => filter.execute().map(|()| RunStatus::Complete),
            Executable::Pipeline(pipeline) => pipeline.execute(),
        }
    }

    pub fn reset(&self) {
        match self {
            Executable::Filter(filter) => filter.reset(),
            Executable::Pipeline(pipeline) => pipeline.reset(),
        }
    }

    /// Hands this over to `executor` and returns the futures to wait on.
    /// Pipelines submit each member separately.
    pub fn schedule(&self, executor: &dyn Executor) -> FutureMap {
        match self {
            Executable::Filter(filter) => {
                executor.schedule(self.clone());
                FutureMap::new(filter.postconditions())
            }
            Executable::Pipeline(pipeline) => pipeline.schedule(executor),
        }
    }

    pub fn as_filter(&self) -> Option<&PipeFilter> {
        match self {
            Executable::Filter(filter) => Some(filter),
            Executable::Pipeline(_) => None,
        }
    }

    pub fn as_pipeline(&self) -> Option<&Pipeline> {
        match self {
            Executable::Filter(_) => None,
            Executable::Pipeline(pipeline) => Some(pipeline),
        }
    }
}

impl From<PipeFilter> for Executable {
    fn from(filter: PipeFilter) -> Self {
        Executable::Filter(filter)
    }
}

impl From<Pipeline> for Executable {
    fn from(pipeline: Pipeline) -> Self {
        Executable::Pipeline(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::data::{DataInfo, DataInfos};
    use crate::filter::Filter;
    use crate::maps::PromiseMap;

    struct Double;

    impl Filter for Double {
        fn input_infos(&self) -> DataInfos {
            vec![DataInfo::of::<i64>("in")]
        }

        fn output_infos(&self) -> DataInfos {
            vec![DataInfo::of::<i64>("out")]
        }

        fn execute(&self, inputs: &FutureMap, outputs: &PromiseMap) -> anyhow::Result<()> {
            outputs.set("out", *inputs.get::<i64>("in")? * 2)?;
            Ok(())
        }
    }

    /// Runs everything on the calling thread, in submission order.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl Executor for Recording {
        fn schedule(&self, executable: Executable) {
            self.seen.lock().push(executable.name());
            executable.execute().unwrap();
        }

        fn clear(&self) {}
    }

    #[test]
    fn test_filter_executable() {
        let filter = PipeFilter::new("double", Double).unwrap();
        let executable = Executable::from(filter.clone());
        assert_eq!(executable.name(), "double");
        assert!(!executable.is_ready());
        assert!(!executable.is_complete());

        filter.get_promise("in").unwrap().set(21i64).unwrap();
        assert!(executable.is_ready());
        assert_eq!(executable.execute().unwrap(), RunStatus::Complete);
        assert!(executable.is_complete());
        assert_eq!(*filter.postconditions()[0].get::<i64>().unwrap(), 42);

        executable.reset();
        assert!(!executable.is_ready());
    }

    #[test]
    fn test_variant_accessors() {
        let filter = Executable::from(PipeFilter::new("double", Double).unwrap());
        assert!(filter.as_filter().is_some_and(|f| f.name() == "double"));
        assert!(filter.as_pipeline().is_none());

        let pipeline = Executable::from(Pipeline::named("outer"));
        assert!(pipeline.as_pipeline().is_some_and(|p| p.name() == "outer"));
        assert!(pipeline.as_filter().is_none());
    }

    #[test]
    fn test_schedule_filter() {
        let filter = PipeFilter::new("double", Double).unwrap();
        filter.get_promise("in").unwrap().set(4i64).unwrap();

        let executor = Recording::default();
        let results = Executable::from(filter).schedule(&executor);
        assert_eq!(*executor.seen.lock(), vec![String::from("double")]);
        assert_eq!(*results.get::<i64>("out").unwrap(), 8);
    }
}
