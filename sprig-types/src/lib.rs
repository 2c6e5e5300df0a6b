pub mod constants;

mod generated {
    pub(crate) mod sparkplug_payload;
}

/// generated types
pub mod payload;

pub mod topic;

pub mod utils;

mod value;

pub use value::*;

/// Represents a unique identifier of a metric
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum MetricId {
    Name(String),
    Alias(u64),
}
