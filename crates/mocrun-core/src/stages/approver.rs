//! Approver: Section 4.6 approval for implementation.

use tracing::info;

use super::{Advisory, StageController, StageCore, StageEnv, StageKind};
use crate::Result;
use crate::catalog::{self, acceptor, approver};
use crate::config::{ApprovalPath, ApproverData};
use crate::descriptor::Notification;
use crate::page::Page;
use crate::store::WorkflowContext;

#[derive(Debug)]
pub struct ApproverStage<'p, P: Page> {
    core: StageCore<'p, P>,
    path: ApprovalPath,
    decision: String,
}

impl<'p, P: Page> ApproverStage<'p, P> {
    #[must_use]
    pub fn new(page: &'p P, env: StageEnv) -> Self {
        Self {
            core: StageCore::new(page, env),
            path: ApprovalPath::default(),
            decision: String::new(),
        }
    }

    #[must_use]
    pub fn core(&self) -> &StageCore<'p, P> {
        &self.core
    }
}

impl<P: Page> StageController for ApproverStage<'_, P> {
    type Input = ApproverData;

    fn kind(&self) -> StageKind {
        StageKind::Approve
    }

    async fn locate(&mut self, ctx: &WorkflowContext) -> Result<()> {
        self.core.locate(ctx).await?;
        let section = self.core.click(approver::assignment_section()).await;
        self.core.optional("approver assignment section", section)?;
        Ok(())
    }

    async fn act(&mut self, input: &ApproverData) -> Result<()> {
        self.path = input.path;
        self.decision = input.decision.clone();

        let agreed = self.core.check(catalog::agreement_checkbox()).await;
        self.core.optional("agreement checkbox", agreed)?;

        match input.path {
            ApprovalPath::Release => {
                self.core.click(acceptor::release_approval()).await?;
                self.core.settle("release approval").await;
                self.core.click(acceptor::approve()).await?;
                self.core.fill(acceptor::comment(), &input.comment).await?;
            }
            ApprovalPath::Decision => {
                self.core.fill(approver::comment(), &input.comment).await?;
            }
        }
        info!(path = ?input.path, "Approval entered");
        Ok(())
    }

    async fn submit(&mut self) -> Result<Option<Notification>> {
        match self.path {
            ApprovalPath::Release => self.core.click(acceptor::remark_approve()).await?,
            ApprovalPath::Decision => {
                self.core
                    .click(approver::decision(&self.decision))
                    .await?;
            }
        }
        self.core.settle("approval saved").await;
        self.core.capture_notification().await
    }

    fn verify_outcome(&self) -> bool {
        self.core.verify(&StageKind::Approve.vocabulary())
    }

    fn notification(&self) -> Option<Notification> {
        self.core.notification().cloned()
    }

    fn take_advisories(&mut self) -> Vec<Advisory> {
        self.core.take_advisories()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LocateMode};
    use crate::page::memory::{MemoryPage, NodeSpec, Reaction};
    use crate::stages::run_stage;
    use crate::store::WorkflowId;

    fn env() -> StageEnv {
        let mut config = Config::default();
        config.app.locate_mode = LocateMode::DirectUrl;
        config.timeouts.element_ms = 100;
        config.timeouts.alert_ms = 100;
        config.timeouts.settle_ms = 0;
        StageEnv::from_config(&config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn decision_path_uses_comment_fallbacks() {
        let page = MemoryPage::new("about:blank");
        page.add(NodeSpec::generic().text("4.6 Approval for Implementation"));
        let comment = page.add(NodeSpec::role("textbox").placeholder("Enter comment"));
        let reject = page.add(NodeSpec::role("button").name("Reject"));
        let alert = page.add(NodeSpec::role("alert").text("Rejected").hidden());
        page.on_click(reject, Reaction::Show(alert));

        let mut stage = ApproverStage::new(&page, env());
        let ctx = WorkflowContext::for_instance(WorkflowId::new("eMOC_0000042").unwrap());
        let data = ApproverData {
            path: ApprovalPath::Decision,
            decision: "Reject".to_string(),
            ..ApproverData::default()
        };

        let report = run_stage(&mut stage, &ctx, &data).await.unwrap();
        assert_eq!(page.value_of(comment), "approved by approver1");
        assert_eq!(page.clicks_on(reject), 1);
        // "Rejected" is not in the approval vocabulary.
        assert!(!report.verified);
        assert!(report.advisories.iter().any(|a| a.step == "agreement checkbox"));
        assert!(report.advisories.iter().any(|a| a.step == "verify"));
    }
}
