//! Requester: create a Change - Facility instance and submit Section 1.

use std::time::Duration;

use tracing::{debug, info, instrument};

use super::{Advisory, StageController, StageCore, StageEnv, StageKind};
use crate::Result;
use crate::catalog::{self, request};
use crate::config::{DateEntry, RequestData};
use crate::descriptor::{ControlDescriptor, Notification};
use crate::drivers::{
    CalendarControls, DatePickerDriver, DateTarget, MissingOption, ModalFlow, ModalFlowDriver,
    MultiSelectDriver, OpenMode, RowSelector,
};
use crate::error::WorkflowError;
use crate::page::Page;
use crate::store::{WorkflowContext, WorkflowId};
use crate::wait::{Backoff, wait_until};

/// Drives Section 1 for the requester.
#[derive(Debug)]
pub struct RequesterStage<'p, P: Page> {
    core: StageCore<'p, P>,
}

impl<'p, P: Page> RequesterStage<'p, P> {
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

    fn multiselect(&self) -> MultiSelectDriver<'_, 'p, P> {
        let timeouts = &self.core.env().timeouts;
        MultiSelectDriver::new(self.core.resolver())
            .option_timeout(timeouts.element())
            .render_settle(timeouts.settle())
    }

    async fn select_many(
        &mut self,
        trigger: ControlDescriptor,
        mode: OpenMode,
        labels: &[String],
        missing: MissingOption,
    ) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let step = trigger.name.clone();
        let trigger = self.core.control(trigger);
        let report = self.multiselect().select(&trigger, &mode, labels, missing).await;
        match missing {
            MissingOption::Fail => {
                report?;
            }
            MissingOption::Skip => {
                if let Some(report) = self.core.optional(&step, report)? {
                    for label in report.missing {
                        self.core
                            .note(&step, format!("option '{label}' not offered; skipped"));
                    }
                }
            }
        }
        Ok(())
    }

    async fn fill_dates(&mut self, input: &RequestData) -> Result<()> {
        let dates = [
            ("proposed start date", input.proposed_start_date.as_str()),
            ("proposed end date", input.proposed_end_date.as_str()),
            (
                "estimated implementation date",
                input.estimated_implementation_date.as_str(),
            ),
        ];
        let settle = self.core.env().timeouts.settle();
        let controls = CalendarControls {
            open_settle: self.core.env().timeouts.calendar_open(),
            step_settle: settle.min(Duration::from_millis(150)),
            ..CalendarControls::default()
        };

        for (index, (step, date)) in dates.into_iter().enumerate() {
            let picker = DatePickerDriver::new(self.core.resolver()).with_controls(controls.clone());
            let result = match input.date_entry {
                DateEntry::Calendar => picker.select(&DateTarget::Ordinal(index), date).await,
                DateEntry::Typed => picker.type_date(index, date).await,
            };
            self.core.soften(step, result)?;
            self.core.settle("date field").await;
        }
        Ok(())
    }

    async fn add_asset(&mut self) -> Result<()> {
        let flow = ModalFlow::new(
            "asset",
            self.core.control(request::add_asset()),
            self.core.control(request::row_checkbox()),
        )
        .row(RowSelector::DataRow(0))
        .confirm(self.core.control(request::add_to_summary()))
        .save(self.core.control(request::save()))
        .surface(self.core.control(request::asset_dialog()));

        ModalFlowDriver::new(self.core.resolver())
            .step_settle(self.core.env().timeouts.settle())
            .run_flow(&flow)
            .await
    }

    async fn fill_budget(&mut self, input: &RequestData) -> Result<()> {
        let answered = self.core.click(request::budget_no()).await;
        self.core.optional("budget 'No'", answered)?;
        self.core.choose(request::budget_type(), &input.budget_type).await?;
        self.core.fill(request::estimated_cost(), &input.estimated_cost).await?;
        self.core.fill(request::account_type(), &input.account_type).await
    }
}

impl<P: Page> StageController for RequesterStage<'_, P> {
    type Input = RequestData;

    fn kind(&self) -> StageKind {
        StageKind::Request
    }

    /// Open a blank Change - Facility form from the dashboard.
    async fn locate(&mut self, _ctx: &WorkflowContext) -> Result<()> {
        self.core.click(request::create()).await?;
        self.core.click(request::change_facility()).await?;
        let heading = self.core.control(request::heading());
        self.core.resolver().resolve(&heading).await?;
        debug!("Change - Facility form open");
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    async fn act(&mut self, input: &RequestData) -> Result<()> {
        self.core.fill(request::title(), &input.title).await?;

        self.select_many(
            request::departments(),
            OpenMode::DoubleActivation {
                toggle: self.core.control(request::departments_toggle()),
            },
            &input.departments,
            MissingOption::Fail,
        )
        .await?;
        self.select_many(
            request::disciplines(),
            OpenMode::Single,
            &input.disciplines,
            MissingOption::Fail,
        )
        .await?;
        self.select_many(
            request::sub_disciplines(),
            OpenMode::Single,
            &input.sub_disciplines,
            MissingOption::Fail,
        )
        .await?;

        self.core.choose(request::driver(), &input.driver).await?;
        self.core.choose(request::priority(), &input.priority).await?;
        self.core
            .choose(request::privacy_policy(), &input.privacy_policy)
            .await?;

        self.select_many(request::sites(), OpenMode::Single, &input.sites, MissingOption::Fail)
            .await?;
        self.core.cascade_settle("fields after sites").await;
        self.select_many(request::fields(), OpenMode::Single, &input.fields, MissingOption::Skip)
            .await?;
        self.select_many(
            request::locations(),
            OpenMode::Single,
            &input.locations,
            MissingOption::Skip,
        )
        .await?;

        self.core.fill(request::description(), &input.description).await?;
        self.core
            .fill(request::justification(), &input.justification)
            .await?;

        self.fill_dates(input).await?;
        self.core.choose(request::duration(), &input.duration).await?;

        if input.add_asset {
            self.add_asset().await?;
        }

        self.fill_budget(input).await?;

        let acceptor = catalog::option(&input.request_acceptor);
        self.core
            .choose_filtered(
                request::request_acceptor(),
                &input.request_acceptor_filter,
                acceptor,
                false,
            )
            .await?;

        info!("Section 1 filled");
        Ok(())
    }

    async fn submit(&mut self) -> Result<Option<Notification>> {
        self.core.click(request::submit()).await?;
        self.core.settle("submit").await;
        self.core.capture_notification().await
    }

    fn verify_outcome(&self) -> bool {
        self.core.verify(&StageKind::Request.vocabulary())
    }

    /// Wait for the instance route and pull the id out of it.
    async fn originated(&mut self) -> Result<Option<WorkflowId>> {
        let page = self.core.resolver().page();
        let pattern = &self.core.env().id_pattern;
        if let Err(timeout) = wait_until(
            "instance URL",
            || async move { page.url().await.is_ok_and(|url| pattern.is_match(&url)) },
            self.core.env().timeouts.alert(),
            &Backoff::default(),
        )
        .await
        {
            debug!(
                waited_ms = timeout.elapsed.as_millis(),
                polls = timeout.retries,
                "Instance URL not reached, reading the current one"
            );
        }

        let url = page.url().await?;
        let id = WorkflowId::from_url(&url, pattern)
            .ok_or(WorkflowError::NoInstanceOriginated { url })?;
        info!(instance_id = %id, "Instance originated");
        self.core.set_instance(id.clone());
        Ok(Some(id))
    }

    fn notification(&self) -> Option<Notification> {
        self.core.notification().cloned()
    }

    fn take_advisories(&mut self) -> Vec<Advisory> {
        self.core.take_advisories()
    }
}
