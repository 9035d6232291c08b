//! Checkbox multi-select dropdowns.
//!
//! Closed → Open → (toggle)* → Closed. The panel never auto-closes; callers
//! always end with [`MultiSelectDriver::close`].

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Result;
use crate::descriptor::{ControlDescriptor, Strategy};
use crate::error::{Error, InteractionError};
use crate::page::{Key, Locator, Page};
use crate::resolver::ElementResolver;
use crate::wait::settle;

/// How the dropdown panel is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenMode {
    /// A single click on the trigger.
    Single,
    /// Click the trigger, then click the toggle twice (close-reopen idiom).
    DoubleActivation { toggle: ControlDescriptor },
}

/// What to do when an option label is not rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingOption {
    #[default]
    Fail,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PanelState {
    Closed,
    Open,
}

/// Result of [`MultiSelectDriver::select`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultiSelectReport {
    pub selected: Vec<String>,
    pub missing: Vec<String>,
}

/// Drives one multi-select dropdown at a time.
#[derive(Debug)]
pub struct MultiSelectDriver<'r, 'p, P: Page> {
    resolver: &'r ElementResolver<'p, P>,
    option_timeout: Duration,
    render_settle: Duration,
    state: PanelState,
}

impl<'r, 'p, P: Page> MultiSelectDriver<'r, 'p, P> {
    #[must_use]
    pub fn new(resolver: &'r ElementResolver<'p, P>) -> Self {
        Self {
            resolver,
            option_timeout: Duration::from_secs(5),
            render_settle: Duration::from_millis(300),
            state: PanelState::Closed,
        }
    }

    #[must_use]
    pub fn option_timeout(mut self, timeout: Duration) -> Self {
        self.option_timeout = timeout;
        self
    }

    #[must_use]
    pub fn render_settle(mut self, settle: Duration) -> Self {
        self.render_settle = settle;
        self
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == PanelState::Open
    }

    /// Open the panel and wait for options to render.
    pub async fn open(&mut self, trigger: &ControlDescriptor, mode: &OpenMode) -> Result<()> {
        self.resolver.click(trigger).await?;
        if let OpenMode::DoubleActivation { toggle } = mode {
            self.resolver.click(toggle).await?;
            self.resolver.click(toggle).await?;
        }
        settle(self.render_settle, "dropdown options").await;
        self.state = PanelState::Open;
        debug!(trigger = %trigger.name, "Dropdown opened");
        Ok(())
    }

    /// Ensure the option labelled `label` is checked.
    pub async fn toggle(&mut self, label: &str) -> Result<()> {
        let row = self.option_row(label);
        let checkbox = ControlDescriptor::new(format!("checkbox for '{label}'"))
            .or(Strategy::new(Locator::css("input[type=\"checkbox\"]")).first())
            .or(Strategy::new(Locator::role("checkbox")).first())
            .with_timeout(self.option_timeout)
            .allow_hidden()
            .scoped(row);
        self.resolver.check(&checkbox).await?;
        debug!(option = label, "Option checked");
        Ok(())
    }

    /// Close the panel with Escape.
    pub async fn close(&mut self) -> Result<()> {
        self.resolver.press(Key::Escape).await?;
        self.state = PanelState::Closed;
        Ok(())
    }

    /// Open, check every label, close.
    pub async fn select(
        &mut self,
        trigger: &ControlDescriptor,
        mode: &OpenMode,
        labels: &[String],
        missing: MissingOption,
    ) -> Result<MultiSelectReport> {
        self.open(trigger, mode).await?;
        let mut report = MultiSelectReport::default();

        for label in labels {
            match self.toggle(label).await {
                Ok(()) => report.selected.push(label.clone()),
                Err(Error::Interaction(InteractionError::ElementNotFound { .. }))
                    if missing == MissingOption::Skip =>
                {
                    warn!(dropdown = %trigger.name, option = %label, "Option not rendered, skipping");
                    report.missing.push(label.clone());
                }
                Err(err) => {
                    if let Err(close_err) = self.close().await {
                        warn!(
                            dropdown = %trigger.name,
                            error = %close_err,
                            "Dropdown left open after a failed selection"
                        );
                    }
                    return Err(err);
                }
            }
        }

        self.close().await?;
        info!(
            dropdown = %trigger.name,
            selected = report.selected.len(),
            missing = report.missing.len(),
            "Dropdown selection complete"
        );
        Ok(report)
    }

    /// Option row: exact accessible name first, then case-insensitive partial.
    fn option_row(&self, label: &str) -> ControlDescriptor {
        ControlDescriptor::new(format!("option '{label}'"))
            .or(Strategy::new(Locator::role_named("option", label)).first())
            .or(Strategy::new(Locator::role_containing("option", label)).first())
            .or(Strategy::new(Locator::text(label)).first())
            .with_timeout(self.option_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::memory::{InjectedFailure, MemoryPage, NodeId, NodeSpec, Reaction};

    struct Dropdown {
        trigger: NodeId,
        options: Vec<(String, NodeId)>,
    }

    fn dropdown(page: &MemoryPage, id: &str, labels: &[&str]) -> Dropdown {
        let trigger = page.add(NodeSpec::role("combobox").id(id));
        let panel = page.add(NodeSpec::role("listbox").hidden());
        let options = labels
            .iter()
            .map(|label| {
                let row = page.add_child(panel, NodeSpec::role("option").name(*label));
                let checkbox = page.add_child(
                    row,
                    NodeSpec::role("checkbox")
                        .css("input[type=\"checkbox\"]")
                        .checked(false)
                        .hidden(),
                );
                ((*label).to_string(), checkbox)
            })
            .collect();
        page.on_click(trigger, Reaction::Show(panel));
        page.on_key(Key::Escape, Reaction::Hide(panel));
        Dropdown { trigger, options }
    }

    fn trigger(id: &str) -> ControlDescriptor {
        ControlDescriptor::new(id.to_string()).or(Locator::id(id))
    }

    #[tokio::test(start_paused = true)]
    async fn selects_labels_and_closes_with_escape() {
        let page = MemoryPage::new("about:blank");
        let dd = dropdown(&page, "mocDepartment", &["Downstream", "Engineering", "Finance"]);
        let resolver = ElementResolver::new(&page);
        let mut driver = MultiSelectDriver::new(&resolver).option_timeout(Duration::from_millis(200));

        let labels = vec!["Downstream".to_string(), "Engineering".to_string()];
        let report = driver
            .select(&trigger("mocDepartment"), &OpenMode::Single, &labels, MissingOption::Fail)
            .await
            .unwrap();

        assert_eq!(report.selected, labels);
        assert!(!driver.is_open());
        assert_eq!(page.is_checked(dd.options[0].1), Some(true));
        assert_eq!(page.is_checked(dd.options[1].1), Some(true));
        assert_eq!(page.is_checked(dd.options[2].1), Some(false));
        assert_eq!(page.presses_of(Key::Escape), 1);
        assert_eq!(page.clicks_on(dd.trigger), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn toggling_twice_leaves_option_checked() {
        let page = MemoryPage::new("about:blank");
        let dd = dropdown(&page, "mocSite", &["AA DAIRY"]);
        let resolver = ElementResolver::new(&page);
        let mut driver = MultiSelectDriver::new(&resolver).option_timeout(Duration::from_millis(200));

        driver.open(&trigger("mocSite"), &OpenMode::Single).await.unwrap();
        driver.toggle("AA DAIRY").await.unwrap();
        driver.toggle("AA DAIRY").await.unwrap();
        assert_eq!(page.is_checked(dd.options[0].1), Some(true));
        assert_eq!(page.clicks_on(dd.options[0].1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_label_falls_back_to_contains() {
        let page = MemoryPage::new("about:blank");
        let dd = dropdown(&page, "mocLocation", &["AA DAIRY 1 (North)"]);
        let resolver = ElementResolver::new(&page);
        let mut driver = MultiSelectDriver::new(&resolver).option_timeout(Duration::from_millis(200));

        driver.open(&trigger("mocLocation"), &OpenMode::Single).await.unwrap();
        driver.toggle("aa dairy 1").await.unwrap();
        assert_eq!(page.is_checked(dd.options[0].1), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_policy_records_missing_options() {
        let page = MemoryPage::new("about:blank");
        dropdown(&page, "mocField", &["1"]);
        let resolver = ElementResolver::new(&page);
        let mut driver = MultiSelectDriver::new(&resolver).option_timeout(Duration::from_millis(100));

        let report = driver
            .select(
                &trigger("mocField"),
                &OpenMode::Single,
                &["1".to_string(), "99".to_string()],
                MissingOption::Skip,
            )
            .await
            .unwrap();
        assert_eq!(report.selected, vec!["1".to_string()]);
        assert_eq!(report.missing, vec!["99".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_policy_closes_panel_and_errors() {
        let page = MemoryPage::new("about:blank");
        dropdown(&page, "mocField", &["1"]);
        let resolver = ElementResolver::new(&page);
        let mut driver = MultiSelectDriver::new(&resolver).option_timeout(Duration::from_millis(100));

        let err = driver
            .select(&trigger("mocField"), &OpenMode::Single, &["99".to_string()], MissingOption::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Interaction(InteractionError::ElementNotFound { .. })));
        assert!(!driver.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_close_keeps_the_selection_error() {
        let page = MemoryPage::new("about:blank");
        dropdown(&page, "mocField", &["1"]);
        page.fail_next_press(Key::Escape, InjectedFailure::Intercepted);
        let resolver = ElementResolver::new(&page);
        let mut driver = MultiSelectDriver::new(&resolver).option_timeout(Duration::from_millis(100));

        let err = driver
            .select(&trigger("mocField"), &OpenMode::Single, &["99".to_string()], MissingOption::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Interaction(InteractionError::ElementNotFound { .. })));
        // Escape never landed, so the panel is still tracked as open.
        assert!(driver.is_open());
        assert_eq!(page.presses_of(Key::Escape), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn double_activation_clicks_toggle_twice() {
        let page = MemoryPage::new("about:blank");
        dropdown(&page, "mocDepartment", &["Downstream"]);
        let toggle = page.add(NodeSpec::role("button").name("Toggle departments"));
        let resolver = ElementResolver::new(&page);
        let mut driver = MultiSelectDriver::new(&resolver);

        let mode = OpenMode::DoubleActivation {
            toggle: ControlDescriptor::new("toggle")
                .or(Locator::role_named("button", "Toggle departments")),
        };
        driver.open(&trigger("mocDepartment"), &mode).await.unwrap();
        assert_eq!(page.clicks_on(toggle), 2);
        assert!(driver.is_open());
    }
}
