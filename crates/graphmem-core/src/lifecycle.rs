use graphmem_runtime::ContainerStatus;

/// What `start` has to do from a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAction {
    /// The process is up; only the health wait remains.
    Wait,
    /// The container exists but is stopped: `docker start`.
    Resume,
    /// No container: create it through compose.
    Create,
}

/// Transition function of the engine state machine:
/// `NOT_FOUND -> create -> RUNNING`, `STOPPED -> start -> RUNNING`.
/// An unhealthy engine gets no command; the health wait decides.
pub fn plan_start(status: ContainerStatus) -> StartAction {
    match status {
        ContainerStatus::Running | ContainerStatus::Unhealthy => StartAction::Wait,
        ContainerStatus::Stopped => StartAction::Resume,
        ContainerStatus::NotFound => StartAction::Create,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_for_every_status() {
        assert_eq!(plan_start(ContainerStatus::Running), StartAction::Wait);
        assert_eq!(plan_start(ContainerStatus::Unhealthy), StartAction::Wait);
        assert_eq!(plan_start(ContainerStatus::Stopped), StartAction::Resume);
        assert_eq!(plan_start(ContainerStatus::NotFound), StartAction::Create);
    }
}
