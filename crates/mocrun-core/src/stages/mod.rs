//! Stage controllers: one actor's part of the approval chain.
//!
//! Every stage runs the same sequence: locate the instance, act on the form,
//! submit, verify the captured notification. [`run_stage`] drives that
//! sequence for any [`StageController`] and folds advisory-class failures
//! into the returned [`StageReport`] instead of aborting.
//!
//! ```text
//! Created → Coordinated → Accepted → Owned (S3) → Planned (S4) → Approved
//! ```

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use tracing::{Instrument, debug, info, warn};

use crate::Result;
use crate::auth::Role;
use crate::catalog;
use crate::config::{AppConfig, Config, TimeoutsConfig};
use crate::descriptor::{ControlDescriptor, Notification};
use crate::error::{Error, InteractionError, WorkflowError};
use crate::page::{Key, Page};
use crate::resolver::ElementResolver;
use crate::store::{Stage, WorkflowContext, WorkflowId, WorkflowInstance};
use crate::wait::settle;

pub mod acceptor;
pub mod approver;
pub mod coordinator;
pub mod list;
pub mod owner;
pub mod requester;

pub use acceptor::AcceptorStage;
pub use approver::ApproverStage;
pub use coordinator::CoordinatorStage;
pub use list::{InstanceList, ListQuery};
pub use owner::{OwnerPlanningStage, OwnerRiskStage};
pub use requester::RequesterStage;

// =============================================================================
// Stage identity
// =============================================================================

/// The six runnable stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Request,
    Coordinate,
    Accept,
    OwnerRisk,
    OwnerPlanning,
    Approve,
}

impl StageKind {
    pub const ALL: [Self; 6] = [
        Self::Request,
        Self::Coordinate,
        Self::Accept,
        Self::OwnerRisk,
        Self::OwnerPlanning,
        Self::Approve,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Coordinate => "coordinate",
            Self::Accept => "accept",
            Self::OwnerRisk => "owner-risk",
            Self::OwnerPlanning => "owner-planning",
            Self::Approve => "approve",
        }
    }

    /// Actor who performs this stage.
    #[must_use]
    pub const fn role(self) -> Role {
        match self {
            Self::Request => Role::Requester,
            Self::Coordinate => Role::Coordinator,
            Self::Accept => Role::Acceptor,
            Self::OwnerRisk | Self::OwnerPlanning => Role::Owner,
            Self::Approve => Role::Approver,
        }
    }

    /// Lifecycle position after a successful run.
    #[must_use]
    pub const fn reaches(self) -> Stage {
        match self {
            Self::Request => Stage::Created,
            Self::Coordinate => Stage::Coordinated,
            Self::Accept => Stage::Accepted,
            Self::OwnerRisk => Stage::Owned,
            Self::OwnerPlanning => Stage::Planned,
            Self::Approve => Stage::Approved,
        }
    }

    /// Lifecycle position this stage starts from.
    #[must_use]
    pub const fn expects(self) -> Option<Stage> {
        match self {
            Self::Request => None,
            Self::Coordinate => Some(Stage::Created),
            Self::Accept => Some(Stage::Coordinated),
            Self::OwnerRisk => Some(Stage::Accepted),
            Self::OwnerPlanning => Some(Stage::Owned),
            Self::Approve => Some(Stage::Planned),
        }
    }

    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Request => Some(Self::Coordinate),
            Self::Coordinate => Some(Self::Accept),
            Self::Accept => Some(Self::OwnerRisk),
            Self::OwnerRisk => Some(Self::OwnerPlanning),
            Self::OwnerPlanning => Some(Self::Approve),
            Self::Approve => None,
        }
    }

    /// Notification phrases that count as success.
    #[must_use]
    pub const fn vocabulary(self) -> SuccessVocabulary {
        match self {
            Self::Request => SuccessVocabulary::new(&[
                "Submit for Approval successfully",
                "successfully",
                "Success",
            ]),
            Self::Coordinate => SuccessVocabulary::new(&["successfully"]),
            Self::Accept => SuccessVocabulary::new(&["success", "approved"]).case_insensitive(),
            Self::OwnerRisk => SuccessVocabulary::new(&["Submit for Endorsement successfully"]),
            Self::OwnerPlanning => {
                SuccessVocabulary::new(&["successfully", "submitted"]).case_insensitive()
            }
            Self::Approve => {
                SuccessVocabulary::new(&["success", "approved", "submitted successfully"])
                    .case_insensitive()
            }
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "request" | "requester" => Ok(Self::Request),
            "coordinate" | "coordinator" => Ok(Self::Coordinate),
            "accept" | "acceptor" => Ok(Self::Accept),
            "owner-risk" | "owner-s3" | "owner" => Ok(Self::OwnerRisk),
            "owner-planning" | "owner-s4" => Ok(Self::OwnerPlanning),
            "approve" | "approver" => Ok(Self::Approve),
            other => Err(format!(
                "unknown stage: {other}. Expected one of: request, coordinate, accept, owner-risk, owner-planning, approve"
            )),
        }
    }
}

/// Phrases accepted as a successful submit notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuccessVocabulary {
    phrases: &'static [&'static str],
    case_insensitive: bool,
}

impl SuccessVocabulary {
    #[must_use]
    pub const fn new(phrases: &'static [&'static str]) -> Self {
        Self {
            phrases,
            case_insensitive: false,
        }
    }

    #[must_use]
    pub const fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    #[must_use]
    pub fn phrases(&self) -> &'static [&'static str] {
        self.phrases
    }

    /// Whether `text` contains any accepted phrase.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        if self.case_insensitive {
            let text = text.to_lowercase();
            self.phrases
                .iter()
                .any(|phrase| text.contains(&phrase.to_lowercase()))
        } else {
            self.phrases.iter().any(|phrase| text.contains(phrase))
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// A failure that was recorded and stepped over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub step: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl Advisory {
    #[must_use]
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            remediation: None,
        }
    }

    #[must_use]
    pub fn from_error(step: impl Into<String>, error: &Error) -> Self {
        Self {
            step: step.into(),
            message: error.to_string(),
            remediation: error.remediation().map(|r| r.summary),
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Result of one [`run_stage`] invocation.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub role: Role,
    /// The instance acted on, with `stage` advanced when verified.
    pub instance: Option<WorkflowInstance>,
    /// True when this run originated the instance.
    pub originated: bool,
    pub reached: Stage,
    pub next: Option<StageKind>,
    pub notification: Option<Notification>,
    pub verified: bool,
    pub advisories: Vec<Advisory>,
    pub elapsed_ms: u64,
}

impl StageReport {
    #[must_use]
    pub fn instance_id(&self) -> Option<&WorkflowId> {
        self.instance.as_ref().map(|instance| &instance.id)
    }

    /// Context handed to the next stage in-process.
    #[must_use]
    pub fn context(&self) -> WorkflowContext {
        let mut ctx = WorkflowContext::originating();
        ctx.instance = self.instance.clone();
        ctx
    }

    #[must_use]
    pub fn has_advisories(&self) -> bool {
        !self.advisories.is_empty()
    }
}

// =============================================================================
// Shared controller state
// =============================================================================

/// Application settings every controller needs.
#[derive(Debug, Clone)]
pub struct StageEnv {
    pub app: AppConfig,
    pub timeouts: TimeoutsConfig,
    pub id_pattern: Regex,
}

impl StageEnv {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            app: config.app.clone(),
            timeouts: config.timeouts.clone(),
            id_pattern: config.app.id_regex()?,
        })
    }
}

/// Resolver, settings and collected results shared by the controllers.
#[derive(Debug)]
pub struct StageCore<'p, P: Page> {
    resolver: ElementResolver<'p, P>,
    env: StageEnv,
    instance: Option<WorkflowId>,
    notification: Option<Notification>,
    advisories: Vec<Advisory>,
}

impl<'p, P: Page> StageCore<'p, P> {
    #[must_use]
    pub fn new(page: &'p P, env: StageEnv) -> Self {
        Self::with_resolver(ElementResolver::new(page), env)
    }

    #[must_use]
    pub fn with_resolver(resolver: ElementResolver<'p, P>, env: StageEnv) -> Self {
        Self {
            resolver,
            env,
            instance: None,
            notification: None,
            advisories: Vec::new(),
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &ElementResolver<'p, P> {
        &self.resolver
    }

    #[must_use]
    pub fn env(&self) -> &StageEnv {
        &self.env
    }

    #[must_use]
    pub fn instance(&self) -> Option<&WorkflowId> {
        self.instance.as_ref()
    }

    pub fn set_instance(&mut self, id: WorkflowId) {
        self.instance = Some(id);
    }

    /// Replace `{id}` with the current instance id.
    #[must_use]
    pub fn interpolate(&self, template: &str) -> String {
        let id = self.instance.as_ref().map_or("", WorkflowId::as_str);
        template.replace("{id}", id)
    }

    /// Apply the configured element budget.
    #[must_use]
    pub fn control(&self, descriptor: ControlDescriptor) -> ControlDescriptor {
        descriptor.with_element_timeout(self.env.timeouts.element())
    }

    pub async fn click(&self, descriptor: ControlDescriptor) -> Result<()> {
        self.resolver.click(&self.control(descriptor)).await?;
        Ok(())
    }

    pub async fn force_click(&self, descriptor: ControlDescriptor) -> Result<()> {
        self.resolver.force_click(&self.control(descriptor)).await?;
        Ok(())
    }

    pub async fn fill(&self, descriptor: ControlDescriptor, text: impl Into<String>) -> Result<()> {
        self.resolver.fill(&self.control(descriptor), text).await?;
        Ok(())
    }

    pub async fn check(&self, descriptor: ControlDescriptor) -> Result<()> {
        self.resolver.check(&self.control(descriptor)).await?;
        Ok(())
    }

    /// Open a single-select dropdown and click the option labelled `label`.
    pub async fn choose(&self, trigger: ControlDescriptor, label: &str) -> Result<()> {
        self.click(trigger).await?;
        self.click(catalog::option(label)).await
    }

    /// Open a filtered dropdown, type `filter` into its search box when one is
    /// rendered, then click `option`.
    pub async fn choose_filtered(
        &self,
        trigger: ControlDescriptor,
        filter: &str,
        option: ControlDescriptor,
        force: bool,
    ) -> Result<()> {
        if force {
            self.force_click(trigger).await?;
        } else {
            self.click(trigger).await?;
        }
        if !filter.is_empty() && self.present(catalog::dropdown_filter()).await {
            self.fill(catalog::dropdown_filter(), filter).await?;
            self.settle("dropdown filter").await;
        }
        self.click(option).await
    }

    pub async fn press(&self, key: Key) -> Result<()> {
        self.resolver.press(key).await
    }

    /// Whether `descriptor` resolves within the element budget.
    pub async fn present(&self, descriptor: ControlDescriptor) -> bool {
        self.resolver
            .is_present(&descriptor, self.env.timeouts.element())
            .await
    }

    pub async fn settle(&self, reason: &str) {
        settle(self.env.timeouts.settle(), reason).await;
    }

    /// Longer pause for dependent dropdowns to repopulate.
    pub async fn cascade_settle(&self, reason: &str) {
        settle(self.env.timeouts.cascade_settle(), reason).await;
    }

    pub fn advisory(&mut self, step: &str, error: &Error) {
        warn!(step, error = %error, "Advisory recorded");
        self.advisories.push(Advisory::from_error(step, error));
    }

    pub fn note(&mut self, step: &str, message: impl Into<String>) {
        let advisory = Advisory::new(step, message);
        warn!(step, message = %advisory.message, "Advisory recorded");
        self.advisories.push(advisory);
    }

    /// Step over an optional control: absence, ambiguity, timeouts and
    /// advisory-class errors are recorded; anything else propagates.
    pub fn optional<T>(&mut self, step: &str, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if is_absence(&err) || err.is_advisory() => {
                self.advisory(step, &err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Record advisory-class errors only.
    pub fn soften<T>(&mut self, step: &str, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_advisory() => {
                self.advisory(step, &err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Search the list for the context's instance, or navigate straight to it.
    pub async fn locate(&mut self, ctx: &WorkflowContext) -> Result<()> {
        let id = ctx.require_instance()?.id.clone();
        InstanceList::new(&self.resolver, &self.env.app, &self.env.timeouts)
            .locate(&id, self.env.app.locate_mode)
            .await?;
        self.instance = Some(id);
        Ok(())
    }

    /// Read the notification surface; `None` when nothing rendered in time.
    pub async fn capture_notification(&mut self) -> Result<Option<Notification>> {
        let surface = catalog::notification(self.env.timeouts.alert());
        match self.resolver.capture_notification(&surface).await {
            Ok(notification) => {
                info!(text = %notification.text, source = %notification.source, "Notification captured");
                self.notification = Some(notification.clone());
                Ok(Some(notification))
            }
            Err(err) if is_absence(&err) => {
                debug!("No notification rendered");
                self.notification = None;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    #[must_use]
    pub fn notification(&self) -> Option<&Notification> {
        self.notification.as_ref()
    }

    /// Whether the captured notification matches `vocabulary`.
    #[must_use]
    pub fn verify(&self, vocabulary: &SuccessVocabulary) -> bool {
        self.notification
            .as_ref()
            .is_some_and(|n| vocabulary.matches(&n.text))
    }

    pub fn take_advisories(&mut self) -> Vec<Advisory> {
        std::mem::take(&mut self.advisories)
    }
}

fn is_absence(error: &Error) -> bool {
    matches!(
        error,
        Error::Interaction(
            InteractionError::ElementNotFound { .. }
                | InteractionError::AmbiguousMatch { .. }
                | InteractionError::Timeout { .. }
        )
    )
}

// =============================================================================
// Controller trait and runner
// =============================================================================

/// One actor's stage.
pub trait StageController: Send {
    /// Form data the stage enters.
    type Input: Sync;

    fn kind(&self) -> StageKind;

    /// Bring the instance's form on screen.
    fn locate(&mut self, ctx: &WorkflowContext) -> impl Future<Output = Result<()>> + Send;

    /// Fill in the stage's form.
    fn act(&mut self, input: &Self::Input) -> impl Future<Output = Result<()>> + Send;

    /// Trigger the terminal submit and capture the notification.
    fn submit(&mut self) -> impl Future<Output = Result<Option<Notification>>> + Send;

    /// Never errors; false when the outcome does not look like success.
    fn verify_outcome(&self) -> bool;

    /// Identifier of an instance this run created.
    fn originated(&mut self) -> impl Future<Output = Result<Option<WorkflowId>>> + Send {
        async { Ok(None) }
    }

    fn notification(&self) -> Option<Notification>;

    fn take_advisories(&mut self) -> Vec<Advisory>;
}

/// Run locate, act, submit and verify for one stage.
pub async fn run_stage<C: StageController>(
    controller: &mut C,
    ctx: &WorkflowContext,
    input: &C::Input,
) -> Result<StageReport> {
    let kind = controller.kind();
    let span = crate::logging::stage_span(kind, ctx.instance_id());

    async move {
        let started = Instant::now();

        if let Some((recorded, expected)) = out_of_order(kind, ctx) {
            warn!(
                recorded = %recorded,
                expected = %expected,
                "Recorded stage does not precede this one; continuing"
            );
        }

        controller.locate(ctx).await?;
        controller.act(input).await?;
        let notification = controller.submit().await?;
        let verified = controller.verify_outcome();
        let originated_id = controller.originated().await?;

        let mut advisories = controller.take_advisories();
        if !verified {
            let err = Error::from(WorkflowError::OutcomeVerificationFailed {
                stage: kind.to_string(),
                notification: notification.as_ref().map(|n| n.text.clone()),
            });
            warn!(error = %err, "Outcome not verified");
            advisories.push(Advisory::from_error("verify", &err));
        }

        let originated = originated_id.is_some();
        let instance = match originated_id {
            Some(id) => Some(WorkflowInstance {
                id,
                created_at: None,
                stage: None,
            }),
            None => ctx.instance.clone(),
        };
        let instance = instance.map(|mut instance| {
            if verified {
                instance.stage = Some(kind.reaches());
            }
            instance
        });

        let elapsed = started.elapsed();
        info!(
            verified,
            advisories = advisories.len(),
            elapsed_ms = duration_ms(elapsed),
            "Stage finished"
        );

        Ok(StageReport {
            stage: kind,
            role: kind.role(),
            instance,
            originated,
            reached: kind.reaches(),
            next: kind.next(),
            notification: notification.or_else(|| controller.notification()),
            verified,
            advisories,
            elapsed_ms: duration_ms(elapsed),
        })
    }
    .instrument(span)
    .await
}

/// `(recorded, expected)` when the instance's recorded stage is not the one
/// `kind` starts from. Unrecorded progress is never out of order.
fn out_of_order(kind: StageKind, ctx: &WorkflowContext) -> Option<(Stage, Stage)> {
    let expected = kind.expects()?;
    let recorded = ctx.instance.as_ref()?.stage?;
    (recorded != expected).then_some((recorded, expected))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip() {
        for kind in StageKind::ALL {
            assert_eq!(kind.as_str().parse::<StageKind>().unwrap(), kind);
        }
        assert_eq!("owner_s4".parse::<StageKind>().unwrap(), StageKind::OwnerPlanning);
        assert!("deploy".parse::<StageKind>().is_err());
    }

    #[test]
    fn stages_chain_in_lifecycle_order() {
        for pair in StageKind::ALL.windows(2) {
            assert_eq!(pair[0].next(), Some(pair[1]));
            assert_eq!(pair[1].expects(), Some(pair[0].reaches()));
            assert_eq!(pair[0].reaches().next(), Some(pair[1].reaches()));
        }
        assert_eq!(StageKind::Request.expects(), None);
        assert_eq!(StageKind::Approve.next(), None);
    }

    #[test]
    fn recorded_stage_is_checked_against_the_predecessor() {
        let mut ctx = WorkflowContext::for_instance(WorkflowId::new("eMOC_42").unwrap());
        assert_eq!(out_of_order(StageKind::Accept, &ctx), None);

        if let Some(instance) = ctx.instance.as_mut() {
            instance.stage = Some(Stage::Coordinated);
        }
        assert_eq!(out_of_order(StageKind::Accept, &ctx), None);
        assert_eq!(
            out_of_order(StageKind::Approve, &ctx),
            Some((Stage::Coordinated, Stage::Planned))
        );
        assert_eq!(out_of_order(StageKind::Request, &ctx), None);
    }

    #[test]
    fn requester_vocabulary_is_case_sensitive() {
        let vocabulary = StageKind::Request.vocabulary();
        assert!(vocabulary.matches("Submit for Approval successfully."));
        assert!(vocabulary.matches("Success"));
        assert!(!vocabulary.matches("Required field missing"));
        assert!(!vocabulary.matches("SUCCESSFULLY"));
    }

    #[test]
    fn acceptor_and_approver_ignore_case() {
        assert!(StageKind::Accept.vocabulary().matches("MOC APPROVED"));
        assert!(StageKind::Approve.vocabulary().matches("Submitted Successfully"));
        assert!(!StageKind::Approve.vocabulary().matches("Request failed"));
    }

    #[test]
    fn owner_risk_needs_the_full_phrase() {
        let vocabulary = StageKind::OwnerRisk.vocabulary();
        assert!(vocabulary.matches("Submit for Endorsement successfully"));
        assert!(!vocabulary.matches("Saved successfully"));
    }

    #[test]
    fn advisory_carries_remediation_summary() {
        let err = Error::from(crate::error::DatePickerError::DayNotFound { day: 31, attempts: 3 });
        let advisory = Advisory::from_error("proposed start date", &err);
        assert_eq!(advisory.step, "proposed start date");
        assert!(advisory.remediation.is_some());
        assert!(advisory.to_string().starts_with("proposed start date: "));
    }
}
