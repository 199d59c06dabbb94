use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::hub::HubError;
use crate::state_machine::ItemParseError;
use crate::verify::VerifyError;

/// Top-level error for one orchestration cycle.
#[derive(Debug, Error)]
pub enum GreenloopError {
    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Parse(#[from] ItemParseError),

    #[error("verification runner error: {0}")]
    Verify(#[from] VerifyError),

    #[error("git error: {0}")]
    Git(String),

    #[error("backlog manifest has no entry for spec id '{0}'")]
    MissingSpec(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_errors_convert_transparently() {
        let err: GreenloopError = HubError::NotFound(42).into();
        assert_eq!(err.to_string(), "item #42 not found");
    }

    #[test]
    fn missing_spec_names_the_id() {
        let err = GreenloopError::MissingSpec("app.tables.create".into());
        assert!(err.to_string().contains("app.tables.create"));
    }
}
