#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod data;
mod error;
mod executable;
pub mod executor;
mod filter;
#[cfg(feature = "logging")]
pub mod logging;
mod maps;
mod pipe_filter;
mod pipeline;
mod port;
mod promise;

pub use crate::data::{DataInfo, DataInfos, DataType, Dynamic};
pub use crate::error::*;
pub use crate::executable::Executable;
pub use crate::executor::{Executor, ExecutorConfig, PushExecutor};
pub use crate::filter::Filter;
pub use crate::maps::{FutureMap, PromiseMap, UniqueFutureMap};
pub use crate::pipe_filter::PipeFilter;
pub use crate::pipeline::{Pipeline, RunStatus};
pub use crate::port::{Connection, InputPort, OutputPort};
pub use crate::promise::{Future, Futures, Promise, Promises, wait_for_any, wait_for_any_timeout};
