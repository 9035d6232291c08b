//! Modal dialog flows: open, search, select rows, confirm, save, dismiss.

use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::Result;
use crate::descriptor::ControlDescriptor;
use crate::page::{Key, Page};
use crate::resolver::ElementResolver;
use crate::wait::settle;

/// Maximum Escape presses used to clear a modal.
pub const DISMISS_PRESSES: u32 = 3;

/// A row to select inside the modal grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSelector {
    /// The n-th data row (0-based), skipping the header/select-all checkbox.
    DataRow(usize),
    /// A specific control.
    Control(ControlDescriptor),
}

/// An extra action between row selection and confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalStep {
    Click(ControlDescriptor),
    Check(ControlDescriptor),
    Fill(ControlDescriptor, String),
    /// Open a dropdown and pick an option by label.
    Select(ControlDescriptor, String),
    Pause(Duration),
}

/// Declarative description of one modal interaction.
#[derive(Debug, Clone)]
pub struct ModalFlow {
    pub name: String,
    pub open: ControlDescriptor,
    pub search: Option<(ControlDescriptor, String)>,
    /// Checkbox locator used for [`RowSelector::DataRow`].
    pub row_checkbox: ControlDescriptor,
    pub rows: Vec<RowSelector>,
    pub extra: Vec<ModalStep>,
    pub confirm: Option<ControlDescriptor>,
    pub save: Option<ControlDescriptor>,
    /// The dialog element; when set, row lookups are scoped to it and
    /// dismissal stops once it disappears.
    pub surface: Option<ControlDescriptor>,
}

impl ModalFlow {
    #[must_use]
    pub fn new(name: impl Into<String>, open: ControlDescriptor, row_checkbox: ControlDescriptor) -> Self {
        Self {
            name: name.into(),
            open,
            search: None,
            row_checkbox,
            rows: Vec::new(),
            extra: Vec::new(),
            confirm: None,
            save: None,
            surface: None,
        }
    }

    #[must_use]
    pub fn search(mut self, field: ControlDescriptor, query: impl Into<String>) -> Self {
        self.search = Some((field, query.into()));
        self
    }

    #[must_use]
    pub fn row(mut self, row: RowSelector) -> Self {
        self.rows.push(row);
        self
    }

    #[must_use]
    pub fn step(mut self, step: ModalStep) -> Self {
        self.extra.push(step);
        self
    }

    #[must_use]
    pub fn confirm(mut self, confirm: ControlDescriptor) -> Self {
        self.confirm = Some(confirm);
        self
    }

    #[must_use]
    pub fn save(mut self, save: ControlDescriptor) -> Self {
        self.save = Some(save);
        self
    }

    #[must_use]
    pub fn surface(mut self, surface: ControlDescriptor) -> Self {
        self.surface = Some(surface);
        self
    }
}

/// Runs [`ModalFlow`]s. Any failing step aborts the flow.
#[derive(Debug)]
pub struct ModalFlowDriver<'r, 'p, P: Page> {
    resolver: &'r ElementResolver<'p, P>,
    step_settle: Duration,
}

impl<'r, 'p, P: Page> ModalFlowDriver<'r, 'p, P> {
    #[must_use]
    pub fn new(resolver: &'r ElementResolver<'p, P>) -> Self {
        Self {
            resolver,
            step_settle: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn step_settle(mut self, settle: Duration) -> Self {
        self.step_settle = settle;
        self
    }

    #[instrument(level = "debug", skip_all, fields(modal = %flow.name))]
    pub async fn run_flow(&self, flow: &ModalFlow) -> Result<()> {
        self.resolver.click(&flow.open).await?;
        settle(self.step_settle, "modal open").await;

        if let Some((field, query)) = &flow.search {
            self.resolver.fill(field, query.clone()).await?;
            settle(self.step_settle, "modal search").await;
        }

        for row in &flow.rows {
            let checkbox = match row {
                RowSelector::DataRow(n) => {
                    let desc = flow.row_checkbox.clone().nth(n + 1).allow_hidden();
                    match &flow.surface {
                        Some(surface) => desc.scoped(surface.clone()),
                        None => desc,
                    }
                }
                RowSelector::Control(desc) => desc.clone(),
            };
            self.resolver.check(&checkbox).await?;
            debug!(row = %checkbox.name, "Row selected");
        }

        for step in &flow.extra {
            match step {
                ModalStep::Click(desc) => {
                    self.resolver.click(desc).await?;
                }
                ModalStep::Check(desc) => {
                    self.resolver.check(desc).await?;
                }
                ModalStep::Fill(desc, text) => {
                    self.resolver.fill(desc, text.clone()).await?;
                }
                ModalStep::Select(desc, label) => {
                    self.resolver.select_option(desc, label.clone()).await?;
                }
                ModalStep::Pause(duration) => settle(*duration, "modal step").await,
            }
        }

        if let Some(confirm) = &flow.confirm {
            self.resolver.click(confirm).await?;
            settle(self.step_settle, "modal confirm").await;
        }
        if let Some(save) = &flow.save {
            self.resolver.click(save).await?;
            settle(self.step_settle, "modal save").await;
        }

        let presses = self.dismiss(flow).await?;
        info!(modal = %flow.name, rows = flow.rows.len(), escape_presses = presses, "Modal flow complete");
        Ok(())
    }

    async fn dismiss(&self, flow: &ModalFlow) -> Result<u32> {
        let mut presses = 0;
        while presses < DISMISS_PRESSES {
            if let Some(surface) = &flow.surface {
                if !self.resolver.is_present(surface, Duration::ZERO).await {
                    break;
                }
            }
            self.resolver.press(Key::Escape).await?;
            presses += 1;
            settle(Duration::from_millis(200), "modal dismiss").await;
        }
        Ok(presses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, InteractionError};
    use crate::page::Locator;
    use crate::page::memory::{MemoryPage, NodeId, NodeSpec, PageEvent, Reaction};

    fn desc(name: &str, locator: Locator) -> ControlDescriptor {
        ControlDescriptor::new(name).or(locator).with_timeout(Duration::from_millis(200))
    }

    struct AssetModal {
        open: NodeId,
        dialog: NodeId,
        search: NodeId,
        checkboxes: Vec<NodeId>,
        save: NodeId,
    }

    fn asset_modal(page: &MemoryPage) -> AssetModal {
        let open = page.add(NodeSpec::role("button").name("Add Asset"));
        let dialog = page.add(NodeSpec::role("dialog").name("Assets").hidden());
        let search = page.add_child(dialog, NodeSpec::role("textbox").placeholder("Search"));
        let checkboxes = (0..3)
            .map(|_| {
                page.add_child(
                    dialog,
                    NodeSpec::role("checkbox")
                        .css("input[type=\"checkbox\"]")
                        .checked(false),
                )
            })
            .collect();
        let save = page.add_child(dialog, NodeSpec::role("button").name("Save"));
        page.on_click(open, Reaction::Show(dialog));
        AssetModal {
            open,
            dialog,
            search,
            checkboxes,
            save,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn data_row_skips_header_and_dismisses_three_times() {
        let page = MemoryPage::new("about:blank");
        let modal = asset_modal(&page);
        let resolver = ElementResolver::new(&page);
        let driver = ModalFlowDriver::new(&resolver);

        let flow = ModalFlow::new(
            "asset",
            desc("add asset", Locator::role_named("button", "Add Asset")),
            desc("row checkbox", Locator::css("input[type=\"checkbox\"]")),
        )
        .search(desc("search", Locator::placeholder("Search")), "AA DAIRY")
        .row(RowSelector::DataRow(0))
        .save(desc("save", Locator::role_named("button", "Save")));

        driver.run_flow(&flow).await.unwrap();

        assert_eq!(page.clicks_on(modal.open), 1);
        assert_eq!(page.value_of(modal.search), "AA DAIRY");
        assert_eq!(page.is_checked(modal.checkboxes[0]), Some(false));
        assert_eq!(page.is_checked(modal.checkboxes[1]), Some(true));
        assert_eq!(page.clicks_on(modal.save), 1);
        assert_eq!(page.presses_of(Key::Escape), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dismissal_stops_when_surface_closes() {
        let page = MemoryPage::new("about:blank");
        let modal = asset_modal(&page);
        page.on_key(Key::Escape, Reaction::Hide(modal.dialog));
        let resolver = ElementResolver::new(&page);
        let driver = ModalFlowDriver::new(&resolver);

        let flow = ModalFlow::new(
            "asset",
            desc("add asset", Locator::role_named("button", "Add Asset")),
            desc("row checkbox", Locator::css("input[type=\"checkbox\"]")),
        )
        .surface(desc("dialog", Locator::role("dialog")))
        .row(RowSelector::DataRow(1));

        driver.run_flow(&flow).await.unwrap();
        assert_eq!(page.presses_of(Key::Escape), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_step_aborts_before_save() {
        let page = MemoryPage::new("about:blank");
        let modal = asset_modal(&page);
        let resolver = ElementResolver::new(&page);
        let driver = ModalFlowDriver::new(&resolver);

        let flow = ModalFlow::new(
            "asset",
            desc("add asset", Locator::role_named("button", "Add Asset")),
            desc("row checkbox", Locator::css("input[type=\"checkbox\"]")),
        )
        .row(RowSelector::DataRow(5))
        .save(desc("save", Locator::role_named("button", "Save")));

        let err = driver.run_flow(&flow).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Interaction(InteractionError::ElementNotFound { .. })
        ));
        assert_eq!(page.clicks_on(modal.save), 0);
        assert!(!page.events().contains(&PageEvent::Press(Key::Escape)));
    }
}
