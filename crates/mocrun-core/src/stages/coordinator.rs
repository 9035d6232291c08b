//! Coordinator: screen the request and pass or reject it.

use tracing::{info, warn};

use super::{Advisory, StageController, StageCore, StageEnv, StageKind};
use crate::Result;
use crate::catalog::{self, coordinator};
use crate::config::{CoordinatorData, Decision};
use crate::descriptor::Notification;
use crate::page::{Key, Page};
use crate::store::WorkflowContext;

#[derive(Debug)]
pub struct CoordinatorStage<'p, P: Page> {
    core: StageCore<'p, P>,
    decision: Decision,
}

impl<'p, P: Page> CoordinatorStage<'p, P> {
    #[must_use]
    pub fn new(page: &'p P, env: StageEnv) -> Self {
        Self {
            core: StageCore::new(page, env),
            decision: Decision::default(),
        }
    }

    #[must_use]
    pub fn core(&self) -> &StageCore<'p, P> {
        &self.core
    }

    /// The decision buttons sit below the fold of the review drawer; scroll
    /// once and retry when the first click fails.
    async fn click_decision(&self, decision: Decision) -> Result<()> {
        let button = coordinator::decision(decision.label());
        match self.core.force_click(button.clone()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(decision = decision.label(), error = %err, "Decision click failed; scrolling");
                self.core.press(Key::PageDown).await?;
                self.core.settle("drawer scroll").await;
                self.core.force_click(button).await
            }
        }
    }
}

impl<P: Page> StageController for CoordinatorStage<'_, P> {
    type Input = CoordinatorData;

    fn kind(&self) -> StageKind {
        StageKind::Coordinate
    }

    async fn locate(&mut self, ctx: &WorkflowContext) -> Result<()> {
        self.core.locate(ctx).await
    }

    async fn act(&mut self, input: &CoordinatorData) -> Result<()> {
        self.decision = input.decision;
        self.core.settle("review drawer").await;
        self.click_decision(input.decision).await?;
        self.core.check(catalog::agreement_checkbox()).await?;
        let justification = self.core.interpolate(&input.justification);
        self.core
            .fill(coordinator::justification(), justification)
            .await?;
        info!(decision = input.decision.label(), "Decision entered");
        Ok(())
    }

    async fn submit(&mut self) -> Result<Option<Notification>> {
        self.core
            .click(coordinator::confirm(self.decision.label()))
            .await?;
        self.core.settle("decision prompt").await;
        self.core.click(coordinator::yes()).await?;
        self.core.settle("decision saved").await;
        self.core.capture_notification().await
    }

    fn verify_outcome(&self) -> bool {
        self.core.verify(&StageKind::Coordinate.vocabulary())
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
    use crate::page::memory::{InjectedFailure, MemoryPage, NodeSpec, Reaction};
    use crate::stages::run_stage;
    use crate::store::WorkflowId;

    fn env() -> StageEnv {
        let mut config = Config::default();
        config.app.locate_mode = LocateMode::DirectUrl;
        config.timeouts.element_ms = 200;
        config.timeouts.alert_ms = 200;
        config.timeouts.settle_ms = 0;
        StageEnv::from_config(&config).unwrap()
    }

    fn coordinator_page() -> (MemoryPage, crate::page::memory::NodeId) {
        let page = MemoryPage::new("about:blank");
        let pass = page.add(NodeSpec::role("button").name("Pass"));
        page.add(
            NodeSpec::role("checkbox")
                .name("I have read and agree to the terms")
                .checked(false),
        );
        page.add(NodeSpec::role("textbox").name("Justification of decision"));
        let confirm = page.add(NodeSpec::role("button").name("Pass eMOC"));
        let yes = page.add(NodeSpec::role("button").name("Yes").hidden());
        let alert = page.add(NodeSpec::role("alert").hidden());
        page.on_click(confirm, Reaction::Show(yes));
        page.on_click(yes, Reaction::SetText(alert, "MOC passed successfully".to_string()));
        page.on_click(yes, Reaction::Show(alert));
        (page, pass)
    }

    #[tokio::test(start_paused = true)]
    async fn pass_decision_is_verified() {
        let (page, _) = coordinator_page();
        let mut stage = CoordinatorStage::new(&page, env());
        let ctx = WorkflowContext::for_instance(WorkflowId::new("eMOC_0000042").unwrap());

        let report = run_stage(&mut stage, &ctx, &CoordinatorData::default())
            .await
            .unwrap();
        assert!(report.verified);
        assert!(report.advisories.is_empty());
        assert!(
            page.events().iter().any(|e| matches!(
                e,
                crate::page::memory::PageEvent::Fill(_, text)
                    if text == "MOC eMOC_0000042 approved by coordinator - All requirements met"
            ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn decision_click_retries_after_scroll() {
        let (page, pass) = coordinator_page();
        page.fail_next_click(pass, InjectedFailure::Intercepted);
        page.fail_next_click(pass, InjectedFailure::Intercepted);
        page.fail_next_click(pass, InjectedFailure::Intercepted);
        let stage = CoordinatorStage::new(&page, env());

        stage.click_decision(Decision::Pass).await.unwrap();
        assert_eq!(page.presses_of(Key::PageDown), 1);
    }
}
