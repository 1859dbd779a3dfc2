//! Tests for the per-provider normalization tables.

use super::*;

fn cirrus(status: Option<&str>) -> NativeStatus {
    NativeStatus::Cirrus {
        status: status.map(String::from),
    }
}

fn travis(state: Option<&str>, previous_state: Option<&str>) -> NativeStatus {
    NativeStatus::Travis {
        state: state.map(String::from),
        previous_state: previous_state.map(String::from),
    }
}

fn teamcity(result: Option<&str>) -> NativeStatus {
    NativeStatus::TeamCity {
        result: result.map(String::from),
    }
}

mod cirrus_tests {
    use super::*;

    #[test]
    fn test_completed_is_success() {
        assert_eq!(normalize(&cirrus(Some("COMPLETED"))), BuildStatus::Success);
    }

    #[test]
    fn test_failure_vocabulary() {
        for native in ["FAILED", "ABORTED", "ERRORED"] {
            assert_eq!(
                normalize(&cirrus(Some(native))),
                BuildStatus::Failure,
                "{native} should normalize to failure"
            );
        }
    }

    #[test]
    fn test_executing_is_running() {
        assert_eq!(normalize(&cirrus(Some("EXECUTING"))), BuildStatus::Running);
    }

    #[test]
    fn test_queued_vocabulary() {
        assert_eq!(normalize(&cirrus(Some("CREATED"))), BuildStatus::Queued);
        assert_eq!(normalize(&cirrus(Some("TRIGGERED"))), BuildStatus::Queued);
    }

    /// A missing or unrecognized status must map to Unknown, never fail.
    #[test]
    fn test_missing_or_unmapped_is_unknown() {
        assert_eq!(normalize(&cirrus(None)), BuildStatus::Unknown);
        assert_eq!(normalize(&cirrus(Some("PAUSED"))), BuildStatus::Unknown);
        assert_eq!(normalize(&cirrus(Some(""))), BuildStatus::Unknown);
        // Casing matters for the GraphQL enum
        assert_eq!(normalize(&cirrus(Some("completed"))), BuildStatus::Unknown);
    }
}

mod travis_tests {
    use super::*;

    #[test]
    fn test_current_state_resolves() {
        assert_eq!(normalize(&travis(Some("passed"), None)), BuildStatus::Success);
        assert_eq!(normalize(&travis(Some("failed"), None)), BuildStatus::Failure);
        assert_eq!(
            normalize(&travis(Some("errored"), None)),
            BuildStatus::Failure
        );
    }

    /// An unresolved current build falls back to the previous build's state.
    #[test]
    fn test_started_falls_back_to_previous_state() {
        assert_eq!(
            normalize(&travis(Some("started"), Some("passed"))),
            BuildStatus::Success
        );
        assert_eq!(
            normalize(&travis(Some("started"), Some("failed"))),
            BuildStatus::Failure
        );
    }

    /// The fallback is fail-closed: an unknown previous state is a failure.
    #[test]
    fn test_unresolvable_previous_state_fails_closed() {
        assert_eq!(
            normalize(&travis(Some("started"), Some("unknown"))),
            BuildStatus::Failure
        );
        assert_eq!(
            normalize(&travis(Some("started"), None)),
            BuildStatus::Failure
        );
    }

    /// No last_build fields at all resolves to Failure, not Unknown.
    #[test]
    fn test_empty_payload_fails_closed() {
        assert_eq!(normalize(&travis(None, None)), BuildStatus::Failure);
    }
}

mod teamcity_tests {
    use super::*;

    #[test]
    fn test_explicit_fields() {
        assert_eq!(normalize(&teamcity(Some("success"))), BuildStatus::Success);
        assert_eq!(normalize(&teamcity(Some("failure"))), BuildStatus::Failure);
        assert_eq!(normalize(&teamcity(Some("running"))), BuildStatus::Running);
        assert_eq!(normalize(&teamcity(Some("queued"))), BuildStatus::Queued);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(normalize(&teamcity(Some("SUCCESS"))), BuildStatus::Success);
        assert_eq!(normalize(&teamcity(Some("Failure"))), BuildStatus::Failure);
    }

    #[test]
    fn test_unmapped_is_unknown() {
        assert_eq!(normalize(&teamcity(None)), BuildStatus::Unknown);
        assert_eq!(normalize(&teamcity(Some("skipped"))), BuildStatus::Unknown);
    }
}
