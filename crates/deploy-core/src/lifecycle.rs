use crate::CoreError;
use deploy_store::InstanceState;

pub fn validate_transition(from: InstanceState, to: InstanceState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (InstanceState::Stopped | InstanceState::Failed, InstanceState::Starting)
            | (
                InstanceState::Starting,
                InstanceState::Running | InstanceState::Failed | InstanceState::Stopping
            )
            | (
                InstanceState::Running,
                InstanceState::Unhealthy | InstanceState::Stopping | InstanceState::Failed
            )
            | (
                InstanceState::Unhealthy,
                InstanceState::Running | InstanceState::Stopping
            )
            | (
                InstanceState::Stopping,
                InstanceState::Stopped | InstanceState::Failed
            )
            | (InstanceState::Failed, InstanceState::Stopping)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
