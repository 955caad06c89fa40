use std::fmt;

/// Canonical registry of report job statuses.
///
/// `done`, `error` and `canceled` are terminal: once persisted, no further
/// transition is accepted anywhere in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
    Canceled,
}

impl JobStatus {
    /// Return the canonical string representation for this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Whether this status admits no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Canceled)
    }

    /// Allowed status transitions. Identity on `running` is permitted because
    /// every step of an in-flight job re-persists the `running` status.
    pub const fn can_transition(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Canceled)
                | (JobStatus::Pending, JobStatus::Error)
                | (JobStatus::Running, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Error)
                | (JobStatus::Running, JobStatus::Canceled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete registry of job statuses.
pub const ALL_JOB_STATUSES: &[JobStatus] = &[
    JobStatus::Pending,
    JobStatus::Running,
    JobStatus::Done,
    JobStatus::Error,
    JobStatus::Canceled,
];

/// Return the status corresponding to the provided string, if any.
pub fn parse_job_status(status: &str) -> Option<JobStatus> {
    ALL_JOB_STATUSES
        .iter()
        .copied()
        .find(|s| s.as_str() == status)
}
