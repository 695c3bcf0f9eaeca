use std::fmt;

use crate::runtime::context::ActivityId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested operation is invalid in the current state.
    InvalidState(String),
    /// A configuration error occurred.
    Config(String),
    /// No live activity execution context exists with the given id.
    UnknownActivity(String),
    /// A snapshot references an activity the catalog cannot provide.
    UnregisteredActivity(String),
    /// The activity behaviour raised an error during invocation.
    ActivityFaulted {
        context: ActivityId,
        activity_id: String,
        activity_type: String,
        cause: String,
    },
    /// The invocation observed its cancellation signal.
    Cancelled {
        context: ActivityId,
        activity_id: String,
        activity_type: String,
    },
    /// An error occurred while rendering a template.
    TemplateRendering(String),
    /// The execution state could not be captured or restored.
    Snapshot(String),
}

impl Error {
    /// True when the failure was caused by a cancellation request rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Identity of the activity the failure belongs to, if any.
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Error::ActivityFaulted { activity_id, .. } | Error::Cancelled { activity_id, .. } => {
                Some(activity_id)
            }
            _ => None,
        }
    }

    /// Execution context that faulted or was cancelled.
    pub fn context(&self) -> Option<ActivityId> {
        match self {
            Error::ActivityFaulted { context, .. } | Error::Cancelled { context, .. } => {
                Some(*context)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
            Error::UnknownActivity(id) => write!(f, "Unknown activity execution context: {id}"),
            Error::UnregisteredActivity(id) => write!(f, "Activity {id} is not registered"),
            Error::ActivityFaulted {
                activity_id,
                activity_type,
                cause,
                ..
            } => {
                write!(f, "Activity {activity_id} ({activity_type}) faulted: {cause}")
            }
            Error::Cancelled {
                activity_id,
                activity_type,
                ..
            } => {
                write!(f, "Activity {activity_id} ({activity_type}) was cancelled")
            }
            Error::TemplateRendering(msg) => write!(f, "Template error: {msg}"),
            Error::Snapshot(msg) => write!(f, "Snapshot error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinguishable_from_faults() {
        let cancelled = Error::Cancelled {
            context: ActivityId(0),
            activity_id: "a1".into(),
            activity_type: "Delay".into(),
        };
        let faulted = Error::ActivityFaulted {
            context: ActivityId(3),
            activity_id: "a1".into(),
            activity_type: "Delay".into(),
            cause: "boom".into(),
        };
        assert!(cancelled.is_cancellation());
        assert!(!faulted.is_cancellation());
        assert_eq!(faulted.activity_id(), Some("a1"));
        assert_eq!(faulted.context(), Some(ActivityId(3)));
        assert_eq!(cancelled.context(), Some(ActivityId(0)));
        assert_eq!(Error::Snapshot("x".into()).context(), None);
        assert_eq!(faulted.to_string(), "Activity a1 (Delay) faulted: boom");
    }
}
