//! Fire-and-forget event stream for observability collaborators.
//!
//! Events are broadcast on a `tokio::sync::broadcast` channel. Dropped sends
//! (no subscriber, lagging subscriber) are fine; nothing in the core depends
//! on a listener being present.

use crate::tasks::TaskStatus;

/// Buffered event capacity of the broadcast channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notifications emitted by the router and supervisor.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    AgentAdded {
        agent_id: String,
        capabilities: Vec<String>,
    },
    AgentRemoved {
        agent_id: String,
    },
    TaskAssigned {
        task_id: String,
        agent_id: String,
    },
    TaskCompleted {
        task_id: String,
        agent_id: String,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: String,
        agent_id: Option<String>,
        error: String,
        will_retry: bool,
    },
    AgentError {
        agent_id: String,
        error: String,
    },
}

impl NetworkEvent {
    /// Task status implied by a task-terminal event, if any. Handy for
    /// observers that mirror task state.
    pub fn implied_task_status(&self) -> Option<TaskStatus> {
        match self {
            NetworkEvent::TaskAssigned { .. } => Some(TaskStatus::InProgress),
            NetworkEvent::TaskCompleted { .. } => Some(TaskStatus::Completed),
            NetworkEvent::TaskFailed { will_retry, .. } => {
                if *will_retry {
                    Some(TaskStatus::Pending)
                } else {
                    Some(TaskStatus::Failed)
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implied_status_follows_retry_flag() {
        let retried = NetworkEvent::TaskFailed {
            task_id: "t".into(),
            agent_id: None,
            error: "boom".into(),
            will_retry: true,
        };
        assert_eq!(retried.implied_task_status(), Some(TaskStatus::Pending));

        let terminal = NetworkEvent::TaskFailed {
            task_id: "t".into(),
            agent_id: None,
            error: "boom".into(),
            will_retry: false,
        };
        assert_eq!(terminal.implied_task_status(), Some(TaskStatus::Failed));

        let added = NetworkEvent::AgentAdded {
            agent_id: "a".into(),
            capabilities: vec![],
        };
        assert_eq!(added.implied_task_status(), None);
    }
}
