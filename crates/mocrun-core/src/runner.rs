//! Stage runner: login, run one stage, persist its results.
//!
//! The runner owns the glue around [`run_stage`]:
//! - logs the actor in through [`SessionAuthenticator`]
//! - builds the controller for the requested [`StageKind`]
//! - records an originated id through [`WorkflowStore::record_new`]
//! - writes a failure report (or a stage report) under the artifacts dir

use std::path::PathBuf;

use tracing::{info, warn};

use crate::Result;
use crate::auth::{ActorCredential, SessionAuthenticator};
use crate::config::Config;
use crate::diagnostics::{FailureReport, write_failure_report, write_stage_report};
use crate::page::Page;
use crate::resolver::ElementResolver;
use crate::stages::{
    AcceptorStage, ApproverStage, CoordinatorStage, InstanceList, ListQuery, OwnerPlanningStage,
    OwnerRiskStage, RequesterStage, StageController, StageEnv, StageKind, StageReport, run_stage,
};
use crate::store::{WorkflowContext, WorkflowInstance, WorkflowStore};

/// Runs stages against one page and one correlation store.
pub struct StageRunner<'a> {
    config: &'a Config,
    store: &'a dyn WorkflowStore,
    artifacts: Option<PathBuf>,
}

impl<'a> StageRunner<'a> {
    /// Artifacts follow `config.artifacts`.
    #[must_use]
    pub fn new(config: &'a Config, store: &'a dyn WorkflowStore) -> Self {
        let artifacts = config
            .artifacts
            .enabled
            .then(|| PathBuf::from(&config.artifacts.dir));
        Self {
            config,
            store,
            artifacts,
        }
    }

    #[must_use]
    pub fn artifacts_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.artifacts = dir;
        self
    }

    /// Context for `kind`: empty for the originating stage, otherwise the
    /// latest recorded instance, which must exist.
    pub fn context(&self, kind: StageKind) -> Result<WorkflowContext> {
        if kind.expects().is_none() {
            return Ok(WorkflowContext::originating());
        }
        let ctx = WorkflowContext::load(self.store)?;
        ctx.require_instance()?;
        Ok(ctx)
    }

    /// Log in as the stage's actor, then run the stage.
    pub async fn login_and_run<P: Page>(
        &self,
        kind: StageKind,
        page: &P,
        credential: &ActorCredential,
        ctx: &WorkflowContext,
    ) -> Result<StageReport> {
        let resolver = ElementResolver::new(page);
        let authenticator = SessionAuthenticator::from_config(self.config);
        if let Err(err) = authenticator.login(&resolver, credential).await {
            self.report_failure(FailureReport::new(kind, ctx.instance_id(), &err));
            return Err(err);
        }
        self.run(kind, page, ctx).await
    }

    /// Log in as `credential` and browse the instance list.
    ///
    /// Returns the number of rows left after the query.
    pub async fn login_and_browse<P: Page>(
        &self,
        page: &P,
        credential: &ActorCredential,
        query: &ListQuery,
    ) -> Result<usize> {
        let resolver = ElementResolver::new(page);
        SessionAuthenticator::from_config(self.config)
            .login(&resolver, credential)
            .await?;
        InstanceList::new(&resolver, &self.config.app, &self.config.timeouts)
            .browse(query)
            .await
    }

    /// Run `kind` on an already authenticated page.
    pub async fn run<P: Page>(
        &self,
        kind: StageKind,
        page: &P,
        ctx: &WorkflowContext,
    ) -> Result<StageReport> {
        let env = StageEnv::from_config(self.config)?;
        let data = &self.config.stages;
        match kind {
            StageKind::Request => {
                self.execute(&mut RequesterStage::new(page, env), ctx, &data.request)
                    .await
            }
            StageKind::Coordinate => {
                self.execute(&mut CoordinatorStage::new(page, env), ctx, &data.coordinate)
                    .await
            }
            StageKind::Accept => {
                self.execute(&mut AcceptorStage::new(page, env), ctx, &data.accept)
                    .await
            }
            StageKind::OwnerRisk => {
                self.execute(&mut OwnerRiskStage::new(page, env), ctx, &data.owner_risk)
                    .await
            }
            StageKind::OwnerPlanning => {
                self.execute(
                    &mut OwnerPlanningStage::new(page, env),
                    ctx,
                    &data.owner_planning,
                )
                .await
            }
            StageKind::Approve => {
                self.execute(&mut ApproverStage::new(page, env), ctx, &data.approve)
                    .await
            }
        }
    }

    /// Run one controller and persist what it produced.
    pub async fn execute<C: StageController>(
        &self,
        controller: &mut C,
        ctx: &WorkflowContext,
        input: &C::Input,
    ) -> Result<StageReport> {
        let report = match run_stage(controller, ctx, input).await {
            Ok(report) => report,
            Err(err) => {
                let failure = FailureReport::new(controller.kind(), ctx.instance_id(), &err)
                    .with_notification(controller.notification().as_ref())
                    .with_advisories(controller.take_advisories());
                self.report_failure(failure);
                return Err(err);
            }
        };

        if report.originated {
            if let Some(id) = report.instance_id() {
                let key = self.store.record_new(id)?;
                info!(instance_id = %id, key = %key, store = %self.store.describe(), "Originated instance recorded");
            }
        }
        if let Some(WorkflowInstance { id, stage: Some(stage), .. }) = &report.instance {
            self.store.record_stage(id, *stage)?;
        }

        if let Some(dir) = &self.artifacts {
            if let Err(err) = write_stage_report(dir, &report) {
                warn!(error = %err, "Failed to write stage report");
            }
        }
        Ok(report)
    }

    fn report_failure(&self, failure: FailureReport) {
        let Some(dir) = &self.artifacts else {
            return;
        };
        match write_failure_report(dir, &failure) {
            Ok(artifact) => info!(path = %artifact.output_path, "Failure report available"),
            Err(err) => warn!(error = %err, "Failed to write failure report"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::error::WorkflowError;
    use crate::auth::Role;
    use crate::page::memory::{MemoryPage, NodeSpec, PageEvent, Reaction};
    use crate::store::{MemoryStore, WorkflowId};

    #[test]
    fn originating_stage_needs_no_recorded_instance() {
        let config = Config::default();
        let store = MemoryStore::new();
        let runner = StageRunner::new(&config, &store);

        let ctx = runner.context(StageKind::Request).unwrap();
        assert!(ctx.instance.is_none());

        let err = runner.context(StageKind::Coordinate).unwrap_err();
        assert!(matches!(
            err,
            Error::Workflow(WorkflowError::NoWorkflowRecorded { .. })
        ));
    }

    #[test]
    fn later_stages_use_latest_instance() {
        let config = Config::default();
        let id = WorkflowId::new("eMOC_0004562").unwrap();
        let store = MemoryStore::with_latest(&id);
        let runner = StageRunner::new(&config, &store);

        let ctx = runner.context(StageKind::Approve).unwrap();
        assert_eq!(ctx.instance_id(), Some(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn browse_logs_in_before_touching_the_list() {
        let config = Config::default();
        let store = MemoryStore::new();
        let runner = StageRunner::new(&config, &store);

        let page = MemoryPage::new("about:blank");
        page.on_goto(
            "https://moc.otdm.ca/tabs/dashboard",
            Reaction::SetUrl("https://idp.otdm.ca/auth".to_string()),
        );
        page.add(NodeSpec::role("textbox").id("username"));
        page.add(NodeSpec::role("textbox").id("password"));
        let sign_in = page.add(NodeSpec::role("button").id("kc-login").name("Sign In"));
        page.on_click(
            sign_in,
            Reaction::SetUrl("https://moc.otdm.ca/tabs/dashboard".to_string()),
        );
        page.on_click(sign_in, Reaction::SetTitle("Host App".to_string()));
        let header = page.add(NodeSpec::role("columnheader").name("eMOC Number"));
        page.add(NodeSpec::role("row").css("table tbody tr"));
        page.add(NodeSpec::role("row").css("table tbody tr"));

        let credential = ActorCredential::new(Role::Approver, "moc_approver1", "pw");
        let query = ListQuery {
            status: None,
            sort: Some("eMOC Number".to_string()),
        };
        let rows = runner
            .login_and_browse(&page, &credential, &query)
            .await
            .unwrap();
        assert_eq!(rows, 2);

        let events = page.events();
        let signed_in = events
            .iter()
            .position(|e| *e == PageEvent::Click(sign_in))
            .unwrap();
        let sorted = events
            .iter()
            .position(|e| *e == PageEvent::Click(header))
            .unwrap();
        assert!(signed_in < sorted);
        assert_eq!(page.current_url(), "https://moc.otdm.ca/tabs/all-emocs");
    }
}
