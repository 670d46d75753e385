//! Process exit codes. These are part of the public CLI contract.

use mrbench_core::storage::RunStatus;
use mrbench_core::MrbenchError;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_RUN_FAILED: i32 = 1; // At least one job did not complete
pub const EXIT_CONFIG_ERROR: i32 = 2; // Bad config, suite or arguments; internal errors
pub const EXIT_NO_PROVIDER: i32 = 3; // Unknown provider or nothing eligible to route to
pub const EXIT_CANCELLED: i32 = 130;

/// Exit code for an error that escaped a command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<MrbenchError>() {
        Some(e) if e.is_preflight() => EXIT_NO_PROVIDER,
        _ => EXIT_CONFIG_ERROR,
    }
}

/// Exit code for a finished run.
pub fn for_run_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed => EXIT_SUCCESS,
        RunStatus::Failed => EXIT_RUN_FAILED,
        RunStatus::Cancelled => EXIT_CANCELLED,
        RunStatus::Running => EXIT_CONFIG_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn preflight_errors_map_to_no_provider() {
        let err: anyhow::Error = MrbenchError::UnknownProvider {
            name: "nope".into(),
            registered: "fake".into(),
        }
        .into();
        assert_eq!(for_error(&err), EXIT_NO_PROVIDER);

        let wrapped = Err::<(), _>(MrbenchError::NoEligibleProvider {
            detail: "no providers detected".into(),
        })
        .context("routing")
        .unwrap_err();
        assert_eq!(for_error(&wrapped), EXIT_NO_PROVIDER);
    }

    #[test]
    fn other_errors_are_config_errors() {
        let err: anyhow::Error = MrbenchError::Config("bad".into()).into();
        assert_eq!(for_error(&err), EXIT_CONFIG_ERROR);
        assert_eq!(for_error(&anyhow::anyhow!("plain")), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn run_status_codes() {
        assert_eq!(for_run_status(RunStatus::Completed), EXIT_SUCCESS);
        assert_eq!(for_run_status(RunStatus::Failed), EXIT_RUN_FAILED);
        assert_eq!(for_run_status(RunStatus::Cancelled), EXIT_CANCELLED);
    }
}
