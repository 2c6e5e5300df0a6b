mod builder;
mod entity;
mod error;
mod group;
mod metric;
mod session;

pub use builder::EntityBuilder;
pub use entity::{CommandUpdate, Entity, EntityId};
pub use error::{EmptyEntity, PublishError, StateError};
pub use group::{GroupKind, MetricEvent, MetricGroup};
pub use metric::{MetricRecord, MetricValue, RecordValue};
pub use session::{
    CommandCallback, EntityHandle, EntitySession, OfflineCallback, OnlineCallback, StateCallback,
};
