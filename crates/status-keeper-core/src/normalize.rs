//! Provider-native status normalization.
//!
//! Each CI provider exposes its own status vocabulary; some do not even agree
//! on how many states exist (the Travis branch endpoint only ever resolves to
//! pass or fail). [`normalize`] absorbs that asymmetry so the rest of the
//! system only handles [`BuildStatus`].
//!
//! Normalization is a pure, total function: every native value, including an
//! absent one, maps to a status. A provider API failure is a
//! [`ProviderError`](crate::ProviderError) raised by the client making the
//! call, never a status value.

use crate::BuildStatus;

/// A provider-native status value, tagged by provider shape.
///
/// Closed union: adding a provider forces every consumer through the
/// exhaustive match in [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeStatus {
    /// Cirrus GraphQL branch query: `lastDefaultBranchBuild.status`.
    Cirrus { status: Option<String> },

    /// Travis REST branch endpoint: `last_build.state` with
    /// `last_build.previous_state` as fallback.
    Travis {
        state: Option<String>,
        previous_state: Option<String>,
    },

    /// TeamCity build webhook: the `buildResult` field.
    TeamCity { result: Option<String> },
}

/// Map a provider-native status onto the canonical vocabulary.
pub fn normalize(native: &NativeStatus) -> BuildStatus {
    match native {
        NativeStatus::Cirrus { status } => from_cirrus(status.as_deref()),
        NativeStatus::Travis {
            state,
            previous_state,
        } => from_travis(state.as_deref(), previous_state.as_deref()),
        NativeStatus::TeamCity { result } => from_teamcity(result.as_deref()),
    }
}

/// Cirrus build statuses are the GraphQL `BuildStatus` enum members.
fn from_cirrus(status: Option<&str>) -> BuildStatus {
    match status {
        Some("COMPLETED") => BuildStatus::Success,
        Some("FAILED") | Some("ABORTED") | Some("ERRORED") => BuildStatus::Failure,
        Some("EXECUTING") => BuildStatus::Running,
        Some("CREATED") | Some("TRIGGERED") => BuildStatus::Queued,
        _ => BuildStatus::Unknown,
    }
}

/// Travis only resolves to pass or fail. When the current build has not
/// resolved yet, fall back to the previous build's state; when neither
/// resolves, fail closed.
fn from_travis(state: Option<&str>, previous_state: Option<&str>) -> BuildStatus {
    match state {
        Some("passed") => BuildStatus::Success,
        Some("failed") | Some("errored") => BuildStatus::Failure,
        _ => match previous_state {
            Some("passed") => BuildStatus::Success,
            _ => BuildStatus::Failure,
        },
    }
}

/// TeamCity reports the canonical vocabulary directly, modulo casing.
fn from_teamcity(result: Option<&str>) -> BuildStatus {
    let Some(result) = result else {
        return BuildStatus::Unknown;
    };
    if result.eq_ignore_ascii_case("success") {
        BuildStatus::Success
    } else if result.eq_ignore_ascii_case("failure") {
        BuildStatus::Failure
    } else if result.eq_ignore_ascii_case("running") {
        BuildStatus::Running
    } else if result.eq_ignore_ascii_case("queued") {
        BuildStatus::Queued
    } else {
        BuildStatus::Unknown
    }
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod normalize_tests;
