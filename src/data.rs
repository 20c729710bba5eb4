//! Runtime type tags for values travelling between filters.
//!
//! Values are stored type-erased as [`Dynamic`]. Every slot that can hold a
//! value carries a [`DataType`], and every read or write compares the
//! requested type against it before any downcast happens.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

/// A type-erased, thread-safe container.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for names.
pub(crate) type ArcStr = Arc<str>;

/// Runtime type tag of a value.
#[derive(Clone, Copy)]
pub struct DataType {
    id: TypeId,
    name: &'static str,
}

impl DataType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Human readable name of the type, as reported by [`std::any::type_name`].
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DataType {}

impl std::hash::Hash for DataType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataType({})", self.name)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Name and type of a slot, e.g. one declared filter input.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DataInfo {
    name: ArcStr,
    data_type: DataType,
}

impl DataInfo {
    pub fn new(name: impl Into<ArcStr>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// Shorthand for `DataInfo::new(name, DataType::of::<T>())`.
    pub fn of<T: Any>(name: impl Into<ArcStr>) -> Self {
        Self::new(name, DataType::of::<T>())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

impl fmt::Debug for DataInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataInfo({}: {})", self.name, self.data_type.name)
    }
}

/// The declared slots of one side (inputs or outputs) of a filter.
pub type DataInfos = Vec<DataInfo>;
