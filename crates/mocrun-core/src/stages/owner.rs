//! Owner stages: Section 3 (stakeholders, plan document, risk assessment)
//! and the Section 4 execution-planning review.

use tracing::{debug, info, instrument};

use super::{Advisory, StageController, StageCore, StageEnv, StageKind};
use crate::Result;
use crate::catalog::{self, owner};
use crate::config::{OwnerPlanningData, OwnerRiskData, RiskMethod};
use crate::descriptor::{ControlDescriptor, Notification, Strategy};
use crate::drivers::{DatePickerDriver, ModalFlow, ModalFlowDriver, ModalStep, RowSelector};
use crate::page::{Key, Locator, Page};
use crate::store::WorkflowContext;

fn modal_dialog() -> ControlDescriptor {
    ControlDescriptor::new("modal dialog").or(Strategy::new(Locator::role("dialog")).first())
}

// =============================================================================
// Section 3
// =============================================================================

/// Risk assessment and submission for endorsement.
#[derive(Debug)]
pub struct OwnerRiskStage<'p, P: Page> {
    core: StageCore<'p, P>,
}

impl<'p, P: Page> OwnerRiskStage<'p, P> {
    #[must_use]
    pub fn new(page: &'p P, env: StageEnv) -> Self {
        Self {
            core: StageCore::new(page, env),
        }
    }

    #[must_use]
    pub fn core(&self) -> &StageCore<'p, P> {
        &self.core
    }

    async fn run_modal(&self, flow: &ModalFlow) -> Result<()> {
        ModalFlowDriver::new(self.core.resolver())
            .step_settle(self.core.env().timeouts.settle())
            .run_flow(flow)
            .await
    }

    async fn add_stakeholder(&self, input: &OwnerRiskData) -> Result<()> {
        let core = &self.core;
        let flow = ModalFlow::new(
            "stakeholder",
            core.control(owner::add_stakeholder()),
            core.control(owner::stakeholder_row()),
        )
        .search(core.control(owner::modal_search()), &input.stakeholder_search)
        .row(RowSelector::Control(core.control(owner::stakeholder_row())))
        .step(ModalStep::Click(core.control(owner::stakeholder_role())))
        .step(ModalStep::Click(core.control(catalog::option(&input.stakeholder_role))))
        .confirm(core.control(owner::apply()))
        .save(core.control(owner::save()))
        .surface(modal_dialog());
        self.run_modal(&flow).await?;
        info!(stakeholder = %input.stakeholder_name, role = %input.stakeholder_role, "Stakeholder added");
        Ok(())
    }

    /// The plan document dialog mixes dropdowns with a segmented date field,
    /// so it is driven step by step rather than as a [`ModalFlow`].
    #[instrument(level = "debug", skip_all)]
    async fn add_plan_document(&mut self, input: &OwnerRiskData) -> Result<()> {
        self.core.click(owner::plan_document()).await?;
        self.core.settle("plan document dialog").await;
        self.core
            .fill(owner::plan_document_name(), &input.plan_document_name)
            .await?;
        self.core.choose(owner::dropdown("mocPhase"), &input.phase).await?;
        self.core
            .choose(owner::dropdown("documentType"), &input.document_type)
            .await?;
        self.core.choose(owner::department(), &input.department).await?;
        self.core.press(Key::Escape).await?;
        self.core.choose(owner::discipline(), &input.discipline).await?;
        self.core.press(Key::Escape).await?;
        self.core
            .choose(owner::sub_discipline(), &input.sub_discipline)
            .await?;
        self.core.press(Key::Escape).await?;
        self.core
            .choose(owner::dropdown("completionState"), &input.completion_state)
            .await?;

        let typed = DatePickerDriver::new(self.core.resolver())
            .type_date(0, &input.plan_date)
            .await;
        self.core.soften("plan date", typed)?;

        self.core
            .choose_filtered(
                owner::dropdown("endorsers"),
                &input.endorsers_filter,
                owner::endorser(&input.endorsers),
                false,
            )
            .await?;
        self.core
            .fill(owner::plan_description(), &input.description)
            .await?;
        self.core.click(owner::add_to_summary()).await?;
        self.core.settle("plan document summary").await;
        self.core.click(owner::save()).await?;
        self.core.settle("plan document save").await;
        info!(document = %input.plan_document_name, "Plan document added");
        Ok(())
    }

    async fn suggest_methods(&self, input: &OwnerRiskData) -> Result<()> {
        if input.suggested_method_answers.is_empty() {
            return Ok(());
        }
        let core = &self.core;
        let mut flow = ModalFlow::new(
            "suggested methods",
            core.control(owner::suggest_methods()),
            core.control(owner::suggestion_yes(0)),
        )
        .confirm(core.control(owner::apply()))
        .save(core.control(owner::save()))
        .surface(modal_dialog());
        for index in &input.suggested_method_answers {
            flow = flow.row(RowSelector::Control(core.control(owner::suggestion_yes(*index))));
        }
        self.run_modal(&flow).await
    }

    async fn add_risk_method(&self, index: usize, method: &RiskMethod) -> Result<()> {
        self.core.choose(owner::method_select(index), &method.method).await?;
        self.core.click(owner::matrix_action(index)).await?;
        self.core.settle("risk matrix").await;
        self.core.click(owner::rating(&method.rating)).await?;
        self.core.click(owner::save()).await?;
        self.core.settle("risk method save").await;
        debug!(index, method = %method.method, rating = %method.rating, "Risk method rated");
        Ok(())
    }

    async fn assess_risk(&mut self, input: &OwnerRiskData) -> Result<()> {
        for (index, method) in input.risk_methods.iter().enumerate() {
            if index > 0 {
                self.core.click(owner::another_method_yes()).await?;
                self.core.click(owner::add_another_method()).await?;
                self.core.settle("additional method").await;
            }
            self.add_risk_method(index, method).await?;
        }
        self.core.check(owner::risk_confirmation()).await?;
        let justification = self.core.interpolate(&input.risk_justification);
        self.core
            .fill(owner::risk_justification(), justification)
            .await
    }
}

impl<P: Page> StageController for OwnerRiskStage<'_, P> {
    type Input = OwnerRiskData;

    fn kind(&self) -> StageKind {
        StageKind::OwnerRisk
    }

    async fn locate(&mut self, ctx: &WorkflowContext) -> Result<()> {
        self.core.locate(ctx).await
    }

    async fn act(&mut self, input: &OwnerRiskData) -> Result<()> {
        self.add_stakeholder(input).await?;
        self.add_plan_document(input).await?;
        self.suggest_methods(input).await?;
        self.assess_risk(input).await?;
        info!(methods = input.risk_methods.len(), "Section 3 filled");
        Ok(())
    }

    async fn submit(&mut self) -> Result<Option<Notification>> {
        self.core.click(owner::submit_for_endorsement()).await?;
        self.core.settle("submit for endorsement").await;
        self.core.capture_notification().await
    }

    fn verify_outcome(&self) -> bool {
        self.core.verify(&StageKind::OwnerRisk.vocabulary())
    }

    fn notification(&self) -> Option<Notification> {
        self.core.notification().cloned()
    }

    fn take_advisories(&mut self) -> Vec<Advisory> {
        self.core.take_advisories()
    }
}

// =============================================================================
// Section 4
// =============================================================================

/// Execution-planning review. Submits only when a submit label is configured.
#[derive(Debug)]
pub struct OwnerPlanningStage<'p, P: Page> {
    core: StageCore<'p, P>,
    heading_found: bool,
    submit_label: Option<String>,
}

impl<'p, P: Page> OwnerPlanningStage<'p, P> {
    #[must_use]
    pub fn new(page: &'p P, env: StageEnv) -> Self {
        Self {
            core: StageCore::new(page, env),
            heading_found: false,
            submit_label: None,
        }
    }

    #[must_use]
    pub fn core(&self) -> &StageCore<'p, P> {
        &self.core
    }

    /// Record each label that is not rendered.
    async fn expect_sections(&mut self, kind: &str, labels: &[String]) -> usize {
        let mut found = 0;
        for label in labels {
            if self.core.present(owner::section(label)).await {
                found += 1;
            } else {
                self.core.note(kind, format!("'{label}' not rendered"));
            }
        }
        found
    }
}

impl<P: Page> StageController for OwnerPlanningStage<'_, P> {
    type Input = OwnerPlanningData;

    fn kind(&self) -> StageKind {
        StageKind::OwnerPlanning
    }

    async fn locate(&mut self, ctx: &WorkflowContext) -> Result<()> {
        self.core.locate(ctx).await
    }

    async fn act(&mut self, input: &OwnerPlanningData) -> Result<()> {
        self.submit_label = input.submit.clone();
        self.heading_found = self.core.present(owner::section(&input.heading)).await;
        if !self.heading_found {
            self.core
                .note("heading", format!("'{}' not rendered", input.heading));
        }
        let subsections = self.expect_sections("subsection", &input.subsections).await;
        let indicators = self.expect_sections("indicator", &input.indicators).await;
        info!(
            heading = self.heading_found,
            subsections,
            expected_subsections = input.subsections.len(),
            indicators,
            "Section 4 reviewed"
        );
        Ok(())
    }

    async fn submit(&mut self) -> Result<Option<Notification>> {
        let Some(label) = self.submit_label.clone() else {
            debug!("No Section 4 submit configured");
            return Ok(None);
        };
        self.core.click(catalog::named_button(&label)).await?;
        self.core.settle("section 4 submit").await;
        self.core.capture_notification().await
    }

    fn verify_outcome(&self) -> bool {
        if !self.heading_found {
            return false;
        }
        match self.submit_label {
            Some(_) => self.core.verify(&StageKind::OwnerPlanning.vocabulary()),
            None => true,
        }
    }

    fn notification(&self) -> Option<Notification> {
        self.core.notification().cloned()
    }

    fn take_advisories(&mut self) -> Vec<Advisory> {
        self.core.take_advisories()
    }
}
