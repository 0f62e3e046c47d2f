use thiserror::Error;

/// Request-scoped failures. Each one terminates only the offending request
/// and is reported back to the requesting session as an `error` envelope;
/// the `Display` text is the client-visible message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Deliberately generic: never reveals which authentication step failed.
    #[error("robot authentication failed")]
    AuthFailed,
    #[error("space '{0}' does not exist")]
    UnknownSpace(String),
    #[error("space is full (capacity {0})")]
    SpaceFull(usize),
    #[error("space '{0}' is currently unavailable")]
    SpaceDisabled(String),
    #[error("already joined to a space; leave it first")]
    AlreadyInSpace,
    #[error("space already has a robot")]
    RobotAlreadyPresent,
    #[error("control is already held or requested")]
    AlreadyControlled,
    #[error("no robot is present in this space")]
    NoRobotPresent,
    #[error("not the active controller")]
    NotController,
    #[error("not joined to any space")]
    NotInSpace,
    #[error("no eligible peer for this message")]
    UnknownTarget,
    #[error("control request was denied")]
    ControlDenied,
    #[error("control validation timed out")]
    Timeout,
}
