use thiserror::Error;

/// Session state preconditions that a publish can fail on.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum StateError {
    #[error("Not connected to a broker")]
    Offline,
    #[error("No birth has been published for the current session")]
    UnBirthed,
}

/// Returned when a birth is produced from an entity with no metrics in any group.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("Entity has no metrics to birth.")]
pub struct EmptyEntity;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{0}")]
    Empty(#[from] EmptyEntity),
    #[error("No updated metrics to send.")]
    NothingToSend,
    #[error("State Error: {0}.")]
    State(#[from] StateError),
    #[error("The client did not accept the publish.")]
    Client,
}
