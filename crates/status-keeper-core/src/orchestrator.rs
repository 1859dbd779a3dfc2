//! Per-event orchestration.
//!
//! One [`Orchestrator::handle_build_result`] (or webhook handler) invocation
//! runs per inbound request. The per-target lock from the registry is held
//! across the whole lookup-mutate-aggregate-compare-notify sequence so that
//! near-simultaneous deliveries for the same target cannot lose an update or
//! double-notify. Handlers for different targets run concurrently.
//!
//! Failure semantics: provider and registry errors abort the invocation and
//! surface at the request boundary; the webhook sender's retry policy
//! governs redelivery. Only permanent notification failures are tolerated,
//! because by then the aggregate state has already been applied.

use crate::clients::{BranchStatusProvider, BuildServer, ChatClient, ReviewSystem};
use crate::normalize::{normalize, NativeStatus};
use crate::notify::NotificationDispatcher;
use crate::registry::BuildRegistry;
use crate::webhook::{WebhookEvent, WebhookRoute};
use crate::{
    BuildId, BuildStatus, NotificationError, ProviderError, StateError, TargetId, ValidationError,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, info, instrument, warn};

/// Marker branch value the build server sends when it could not resolve one.
const UNRESOLVED_BRANCH: &str = "UNRESOLVED";

/// Prefix that makes a revision comment a build command.
const COMMAND_PREFIX: &str = "@bot";

/// Comment posted after PR links were inserted into a summary.
const BACKPORT_COMMENT: &str = "[Bot Message]\n\
    One or more PR numbers were detected in the summary.\n\
    Links to those PRs have been inserted into the summary for reference.";

// ============================================================================
// Errors
// ============================================================================

/// Failure of one orchestrated event handling.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The event payload is missing fields or logically inconsistent.
    #[error("malformed event: {message}")]
    MalformedEvent { message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

impl OrchestratorError {
    fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEvent {
            message: message.into(),
        }
    }
}

// ============================================================================
// Inbound events
// ============================================================================

/// A build completion/progress report pushed by the build server.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildResultEvent {
    #[serde(rename = "buildName")]
    pub build_name: String,

    #[serde(rename = "buildTypeId")]
    pub build_type_id: String,

    #[serde(rename = "buildResult")]
    pub build_result: Option<String>,

    #[serde(rename = "buildURL")]
    pub build_url: Option<String>,

    pub branch: String,

    #[serde(rename = "buildId")]
    pub build_id: u64,

    #[serde(rename = "buildTargetPHID")]
    pub build_target_phid: Option<String>,
}

// ============================================================================
// Configuration
// ============================================================================

/// Knobs the orchestrator needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Build configuration triggered for staged diffs.
    pub staging_build_type_id: String,

    /// Path (on the default branch) of the build configuration document.
    pub build_config_path: String,

    /// Project whose members may issue trigger-CI commands.
    pub trusted_project_phid: String,

    /// Builds whose type id contains this keyword are never reported on.
    pub ignore_keyword: String,

    /// Chat channel for default-branch health announcements.
    pub dev_channel: String,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Ties the registry, the providers, and the notification dispatcher
/// together, one invocation per inbound event.
pub struct Orchestrator {
    registry: BuildRegistry,
    review: Arc<dyn ReviewSystem>,
    build_server: Arc<dyn BuildServer>,
    branch_providers: Vec<Arc<dyn BranchStatusProvider>>,
    notifier: NotificationDispatcher,
    config: OrchestratorConfig,
    /// Whether the last observed default-branch state was green. Guarded by
    /// its own lock; flips drive the chat announcements.
    default_branch_green: tokio::sync::Mutex<bool>,
}

impl Orchestrator {
    pub fn new(
        registry: BuildRegistry,
        review: Arc<dyn ReviewSystem>,
        build_server: Arc<dyn BuildServer>,
        branch_providers: Vec<Arc<dyn BranchStatusProvider>>,
        chat: Arc<dyn ChatClient>,
        config: OrchestratorConfig,
    ) -> Self {
        let notifier = NotificationDispatcher::new(
            Arc::clone(&review),
            chat,
            config.dev_channel.clone(),
        );
        Self {
            registry,
            review,
            build_server,
            branch_providers,
            notifier,
            config,
            default_branch_green: tokio::sync::Mutex::new(true),
        }
    }

    pub fn registry(&self) -> &BuildRegistry {
        &self.registry
    }

    /// Dispatch a verified review-system webhook to its handler.
    pub async fn handle(&self, event: WebhookEvent) -> Result<(), OrchestratorError> {
        match event.route {
            WebhookRoute::BackportCheck => self.handle_backport_check(&event.payload).await,
            WebhookRoute::TriggerCi => self.handle_trigger_ci(&event.payload).await,
        }
    }

    // ------------------------------------------------------------------------
    // Backport check
    // ------------------------------------------------------------------------

    /// Rewrite bare upstream PR references in a revision summary into links.
    #[instrument(skip_all)]
    pub async fn handle_backport_check(
        &self,
        payload: &serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        let phid = payload["object"]["phid"]
            .as_str()
            .ok_or_else(|| OrchestratorError::malformed("missing object.phid"))?;

        let revision = self.review.revision_by_phid(phid).await?;
        let linked = link_pull_requests(&revision.summary);
        if linked.found == 0 {
            debug!(revision = phid, "no backport references found");
            return Ok(());
        }

        info!(revision = phid, count = linked.found, "linking backport PRs");
        self.review
            .update_revision_summary(phid, &linked.summary)
            .await?;
        self.tolerate_permanent(
            self.review.comment_on_revision(phid, BACKPORT_COMMENT).await,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Trigger CI
    // ------------------------------------------------------------------------

    /// Scan revision comment transactions for `@bot <build> [build ...]`
    /// commands from authorized users and trigger the named builds.
    #[instrument(skip_all)]
    pub async fn handle_trigger_ci(
        &self,
        payload: &serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        let object = payload
            .get("object")
            .ok_or_else(|| OrchestratorError::malformed("missing object"))?;
        let object_type = object
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| OrchestratorError::malformed("missing object.type"))?;
        let revision_phid = object
            .get("phid")
            .and_then(|p| p.as_str())
            .ok_or_else(|| OrchestratorError::malformed("missing object.phid"))?;

        // Only comments on revisions can carry build commands.
        let transactions = payload
            .get("transactions")
            .and_then(|t| t.as_array())
            .ok_or_else(|| OrchestratorError::malformed("missing transactions"))?;
        if object_type != "DREV" || transactions.is_empty() {
            return Ok(());
        }

        let transaction_phids: Vec<String> = transactions
            .iter()
            .filter_map(|t| t.get("phid").and_then(|p| p.as_str()))
            .map(String::from)
            .collect();
        let comments = self
            .review
            .comment_transactions(revision_phid, &transaction_phids)
            .await?;
        if comments.is_empty() {
            return Ok(());
        }

        // Only members of the trusted project may command builds.
        let members = self
            .review
            .project_members(&self.config.trusted_project_phid)
            .await?;
        let mut builds: BTreeSet<String> = BTreeSet::new();
        for comment in comments
            .iter()
            .filter(|c| members.iter().any(|m| m == &c.author_phid))
        {
            builds.extend(parse_build_commands(&comment.content));
        }
        if builds.is_empty() {
            return Ok(());
        }

        let staging_ref = self.review.latest_staging_ref(revision_phid).await?;
        info!(revision = revision_phid, ?builds, %staging_ref, "triggering commanded builds");
        for build_name in builds {
            let properties = vec![("env.BUILD_NAME".to_string(), build_name.clone())];
            self.build_server
                .trigger_build(
                    &self.config.staging_build_type_id,
                    &staging_ref,
                    None,
                    &properties,
                )
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Build triggering
    // ------------------------------------------------------------------------

    /// Trigger one build and, when a target is given, register it.
    pub async fn trigger_build(
        &self,
        build_type_id: &str,
        branch: &str,
        target: Option<&str>,
        build_name: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let target_id = target.map(TargetId::new).transpose()?;
        let mut properties = Vec::new();
        if let Some(name) = build_name {
            properties.push(("env.BUILD_NAME".to_string(), name.to_string()));
        }

        let triggered = self
            .build_server
            .trigger_build(build_type_id, branch, target_id.as_ref(), &properties)
            .await?;

        if let Some(target_id) = &target_id {
            let entry = self.registry.entry(target_id);
            let mut state = entry.lock().await;
            state
                .target
                .queue_build(triggered.id, build_name.unwrap_or(build_type_id));
        }
        Ok(())
    }

    /// Trigger the on-diff build set for a staged diff and register every
    /// build under its target.
    #[instrument(skip(self))]
    pub async fn build_diff(
        &self,
        staging_ref: &str,
        target_phid: &str,
    ) -> Result<(), OrchestratorError> {
        let target_id = TargetId::new(target_phid)?;
        let content = self
            .review
            .file_content_from_default_branch(&self.config.build_config_path)
            .await?;
        let builds = on_diff_builds(&content)?;

        let entry = self.registry.entry(&target_id);
        let mut state = entry.lock().await;
        for build_name in builds {
            let properties = vec![("env.BUILD_NAME".to_string(), build_name.clone())];
            let triggered = self
                .build_server
                .trigger_build(
                    &self.config.staging_build_type_id,
                    staging_ref,
                    Some(&target_id),
                    &properties,
                )
                .await?;
            state.target.queue_build(triggered.id, build_name);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Build results
    // ------------------------------------------------------------------------

    /// Apply one build-server report: update the registry, recompute the
    /// aggregate, and notify downstream systems when it changed.
    #[instrument(skip(self, event), fields(build = event.build_id, branch = %event.branch))]
    pub async fn handle_build_result(
        &self,
        event: BuildResultEvent,
    ) -> Result<(), OrchestratorError> {
        if event.build_type_id.contains(&self.config.ignore_keyword) {
            return Ok(());
        }
        if event.branch == UNRESOLVED_BRANCH {
            return Err(OrchestratorError::malformed("build has no resolved branch"));
        }

        let status = normalize(&NativeStatus::TeamCity {
            result: event.build_result.clone(),
        });
        let guest_url = event
            .build_url
            .as_deref()
            .map(|url| self.build_server.guest_url(url));
        let is_default = is_default_branch(&event.branch);

        if let Some(phid) = &event.build_target_phid {
            self.apply_target_update(phid, &event, status, guest_url.as_deref())
                .await?;
        }

        // One red build on a diff gets called out on the revision itself.
        if !is_default && status == BuildStatus::Failure {
            if let Some(diff_id) = diff_id_from_branch(&event.branch) {
                if let Some(revision_phid) =
                    self.review.revision_phid_for_diff(diff_id).await?
                {
                    self.tolerate_permanent(
                        self.notifier
                            .comment_build_status(
                                &revision_phid,
                                status,
                                guest_url.as_deref(),
                                &event.build_name,
                            )
                            .await,
                    )?;
                }
            }
        }

        if is_default && status.is_terminal() {
            self.update_default_branch_health(&event.build_name, guest_url.as_deref(), status)
                .await?;
        }
        Ok(())
    }

    /// The locked read-mutate-aggregate-compare-notify sequence for one
    /// target.
    async fn apply_target_update(
        &self,
        target_phid: &str,
        event: &BuildResultEvent,
        status: BuildStatus,
        guest_url: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let target_id = TargetId::new(target_phid)?;
        let Some(entry) = self.registry.get(&target_id) else {
            // Builds triggered out of band report targets we never queued.
            debug!(%target_id, "status for untracked target, skipping");
            return Ok(());
        };

        let mut state = entry.lock().await;
        let build_id = BuildId::from(event.build_id);
        state
            .target
            .update_build_status(&build_id, status, self.registry.policy())?;

        let aggregate = state.target.aggregate();
        if state.last_notified != Some(aggregate) {
            // A transient dispatch failure propagates before the record is
            // advanced, so the sender's redelivery re-drives the
            // notification without re-applying state.
            self.tolerate_permanent(
                self.notifier
                    .announce_target_status(&target_id, aggregate)
                    .await,
            )?;
            state.last_notified = Some(aggregate);
        } else {
            debug!(%target_id, %aggregate, "aggregate unchanged, not notifying");
        }

        if let Some(url) = guest_url {
            let build_name = state
                .target
                .build(&build_id)
                .map(|b| b.name.clone())
                .unwrap_or_else(|| event.build_name.clone());
            self.tolerate_permanent(
                self.notifier
                    .announce_build_link(&target_id, &build_name, url)
                    .await,
            )?;
        }

        if state.target.is_finished() {
            info!(%target_id, %aggregate, "target finished");
        }
        Ok(())
    }

    /// Track red/green flips of the default branch and announce them.
    ///
    /// Recovery is only announced once every pollable provider agrees the
    /// branch is green again; the build server's own report alone is not
    /// enough when another provider is still red.
    async fn update_default_branch_health(
        &self,
        build_name: &str,
        url: Option<&str>,
        status: BuildStatus,
    ) -> Result<(), OrchestratorError> {
        let mut green = self.default_branch_green.lock().await;
        match status {
            BuildStatus::Failure if *green => {
                *green = false;
                let message = match url {
                    Some(url) => format!("Build '{build_name}' appears to be broken: {url}"),
                    None => format!("Build '{build_name}' appears to be broken."),
                };
                self.tolerate_permanent(self.notifier.post_dev_channel(&message).await)?;
            }
            BuildStatus::Success if !*green => {
                for provider in &self.branch_providers {
                    let native = provider.default_branch_status().await?;
                    if normalize(&native) != BuildStatus::Success {
                        debug!(provider = provider.name(), "default branch still red");
                        return Ok(());
                    }
                }
                *green = true;
                self.tolerate_permanent(
                    self.notifier.post_dev_channel("Master is green again.").await,
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Permanent notification failures are logged and swallowed: the state
    /// mutation already happened, and retrying a bad channel cannot succeed.
    fn tolerate_permanent(
        &self,
        result: Result<(), NotificationError>,
    ) -> Result<(), NotificationError> {
        match result {
            Err(err) if !err.is_transient() => {
                warn!(error = %err, "permanent notification failure, continuing");
                Ok(())
            }
            other => other,
        }
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Whether the branch is the repository's default branch.
pub fn is_default_branch(branch: &str) -> bool {
    branch == "refs/heads/master" || branch == "<default>"
}

/// Extract the diff id from a staged-diff ref (`refs/tags/phabricator/diff/<id>`).
pub fn diff_id_from_branch(branch: &str) -> Option<u64> {
    let parts: Vec<&str> = branch.split('/').collect();
    if parts.len() < 3 {
        return None;
    }
    if parts[parts.len() - 3] != "phabricator" || parts[parts.len() - 2] != "diff" {
        return None;
    }
    parts[parts.len() - 1].parse().ok()
}

/// Result of a summary rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedSummary {
    pub summary: String,
    pub found: usize,
}

fn upstream_pr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PR[ #]*(\d{3}\d+)").expect("valid regex"))
}

fn secp_pr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PR[ #]*(\d{2}\d?)([^\d]|$)").expect("valid regex"))
}

/// Rewrite bare PR references in a summary into inline review-system links.
///
/// References inside fenced code blocks, inline code spans, and
/// indentation-based code blocks are left untouched. Short PR numbers are
/// only linked against the secp256k1 repository when the line actually
/// mentions it, to keep false positives down.
pub fn link_pull_requests(summary: &str) -> LinkedSummary {
    let mut found = 0;
    let mut fence_delimiters = 0;
    let mut out = String::with_capacity(summary.len());

    for line in split_keeping_ends(summary) {
        fence_delimiters += line.matches("```").count();

        // Only link PRs that do not reside in fenced code blocks. A line
        // that opens a fence flips the parity before the check, so the
        // fence line itself is skipped too.
        if fence_delimiters % 2 != 0 {
            out.push_str(line);
            continue;
        }

        let mut rewritten = replace_pr_refs(
            line,
            upstream_pr_re(),
            "https://github.com/bitcoin/bitcoin/pull",
            &mut found,
        );
        // Be less aggressive about short secp256k1 PR numbers: require some
        // reference to the name first.
        if rewritten.to_lowercase().contains("secp") {
            rewritten = replace_pr_refs(
                &rewritten,
                secp_pr_re(),
                "https://github.com/bitcoin-core/secp256k1/pull",
                &mut found,
            );
        }
        out.push_str(&rewritten);
    }

    LinkedSummary {
        summary: out,
        found,
    }
}

/// Replace the PR references matched by `re` in one line, skipping matches
/// inside indented or inline-code spans.
fn replace_pr_refs(line: &str, re: &Regex, base_url: &str, found: &mut usize) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last = 0;
    for caps in re.captures_iter(line) {
        let whole = caps.get(0).expect("match always has group 0");
        out.push_str(&line[last..whole.start()]);

        // Indentation-based code blocks (2+ spaces) and unbalanced
        // backticks before the match mean we are inside code.
        let indented = line.starts_with("  ");
        let in_inline_code = line[..whole.start()].matches('`').count() % 2 == 1;
        if indented || in_inline_code {
            out.push_str(whole.as_str());
        } else {
            *found += 1;
            let number = caps.get(1).expect("PR number group").as_str();
            let remaining = caps.get(2).map(|g| g.as_str()).unwrap_or("");
            out.push_str(&format!("[[{base_url}/{number} | PR{number}]]{remaining}"));
        }
        last = whole.end();
    }
    out.push_str(&line[last..]);
    out
}

fn split_keeping_ends(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive('\n')
}

/// Extract build names from one comment.
///
/// Format: `@bot <build_name> [build_name ...]`. Names are deduplicated and
/// shell-quoted, since they end up in a build property consumed by shell
/// steps.
pub fn parse_build_commands(comment: &str) -> Vec<String> {
    let mut tokens = comment.split_whitespace();
    if tokens.next() != Some(COMMAND_PREFIX) {
        return Vec::new();
    }
    let unique: BTreeSet<&str> = tokens.collect();
    unique.into_iter().map(shell_quote).collect()
}

/// Quote a token for safe interpolation into a shell command line.
fn shell_quote(token: &str) -> String {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// Parse the build configuration document and return the builds that run on
/// diffs.
fn on_diff_builds(content: &str) -> Result<Vec<String>, OrchestratorError> {
    #[derive(Debug, Deserialize)]
    struct BuildConfigFile {
        #[serde(default)]
        builds: BTreeMap<String, BuildEntry>,
    }

    #[derive(Debug, Deserialize)]
    struct BuildEntry {
        #[serde(default, rename = "runOnDiff")]
        run_on_diff: bool,
    }

    let parsed: BuildConfigFile =
        serde_yaml::from_str(content).map_err(|e| ProviderError::Malformed {
            provider: "review system".to_string(),
            message: format!("build configuration: {e}"),
        })?;
    Ok(parsed
        .builds
        .into_iter()
        .filter(|(_, entry)| entry.run_on_diff)
        .map(|(name, _)| name)
        .collect())
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod orchestrator_tests;
