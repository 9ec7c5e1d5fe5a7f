use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("No processor was supplied")]
    MissingProcessor,

    #[error("Event type id 0 is reserved")]
    InvalidEventType,

    #[error("Handle is already registered")]
    AlreadyRegistered,

    #[error("Subscribe called from a handler while the dispatcher is emitting")]
    Reentrant,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeError {
    #[error("Handle is not registered")]
    NotRegistered,

    #[error("Handle is registered with a different dispatcher")]
    ForeignHandle,

    #[error("Unsubscribe called from a handler while the dispatcher is emitting")]
    Reentrant,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    #[error("No subscribers for this event type")]
    NoSubscribers,

    #[error("Emit called from a handler while the dispatcher is emitting")]
    Reentrant,
}
