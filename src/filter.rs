use crate::data::DataInfos;
use crate::maps::{FutureMap, PromiseMap};

/// A unit of computation with named, typed inputs and outputs.
///
/// Implementations declare their slots with [`input_infos`](Self::input_infos)
/// and [`output_infos`](Self::output_infos). When run, a filter reads its
/// inputs through `inputs.get::<T>(name)` (or `get_all` when several
/// producers feed one input) and writes every declared output through
/// `outputs.set(name, value)`.
///
/// Filters are executed again after every pipeline reset, so they should
/// not keep state between runs, nor hold on to `inputs` or `outputs`.
///
/// # Example
///
/// ```rust
/// use pipework::{DataInfo, DataInfos, Filter, FutureMap, PromiseMap};
///
/// struct AddTen;
///
/// impl Filter for AddTen {
///     fn input_infos(&self) -> DataInfos {
///         vec![DataInfo::of::<u32>("X")]
///     }
///
///     fn output_infos(&self) -> DataInfos {
///         vec![DataInfo::of::<u32>("Y")]
///     }
///
///     fn execute(&self, inputs: &FutureMap, outputs: &PromiseMap) -> anyhow::Result<()> {
///         let x = inputs.get::<u32>("X")?;
///         outputs.set("Y", *x + 10)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Filter: Send + Sync + 'static {
    fn input_infos(&self) -> DataInfos;

    fn output_infos(&self) -> DataInfos;

    fn execute(&self, inputs: &FutureMap, outputs: &PromiseMap) -> anyhow::Result<()>;
}
