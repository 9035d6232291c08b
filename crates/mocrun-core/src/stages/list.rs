//! The "All eMOCs" list: search, filter, sort and open an instance.

use tracing::{debug, info, instrument};

use crate::Result;
use crate::catalog;
use crate::config::{AppConfig, LocateMode, TimeoutsConfig};
use crate::error::WorkflowError;
use crate::page::{Key, Page};
use crate::resolver::ElementResolver;
use crate::store::WorkflowId;
use crate::wait::settle;

/// What to show when browsing the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Status filter, e.g. "Pending Approval".
    pub status: Option<String>,
    /// Column header to sort by, e.g. "Created".
    pub sort: Option<String>,
}

/// Operations on the instance list page.
#[derive(Debug)]
pub struct InstanceList<'r, 'p, P: Page> {
    resolver: &'r ElementResolver<'p, P>,
    app: &'r AppConfig,
    timeouts: &'r TimeoutsConfig,
}

impl<'r, 'p, P: Page> InstanceList<'r, 'p, P> {
    #[must_use]
    pub fn new(
        resolver: &'r ElementResolver<'p, P>,
        app: &'r AppConfig,
        timeouts: &'r TimeoutsConfig,
    ) -> Self {
        Self {
            resolver,
            app,
            timeouts,
        }
    }

    /// Navigate to the list and select the "all" tab when it is rendered.
    pub async fn open_list(&self) -> Result<()> {
        self.resolver.page().goto(&self.app.list_url()).await?;
        let tab = catalog::list::all_tab().with_element_timeout(self.timeouts.element());
        if self.resolver.is_present(&tab, self.timeouts.element()).await {
            self.resolver.click(&tab).await?;
        }
        settle(self.timeouts.settle(), "list load").await;
        Ok(())
    }

    /// Type the literal id into the search box and wait for a cell whose text
    /// is exactly that id.
    #[instrument(level = "debug", skip_all, fields(instance_id = %id))]
    pub async fn search(&self, id: &WorkflowId) -> Result<()> {
        let search = catalog::list::search_box().with_element_timeout(self.timeouts.element());
        self.resolver.fill(&search, id.as_str()).await?;
        self.resolver.press(Key::Enter).await?;

        let cell = catalog::list::instance_cell(id.as_str());
        if !self.resolver.is_present(&cell, self.timeouts.search()).await {
            return Err(WorkflowError::InstanceNotFound {
                id: id.to_string(),
            }
            .into());
        }
        debug!("Search result rendered");
        Ok(())
    }

    /// Click the row for `id`.
    pub async fn open(&self, id: &WorkflowId) -> Result<()> {
        let cell = catalog::list::instance_cell(id.as_str()).with_timeout(self.timeouts.search());
        self.resolver.click(&cell).await?;
        settle(self.timeouts.settle(), "instance open").await;
        info!(instance_id = %id, "Instance opened");
        Ok(())
    }

    /// Restrict the list to one status.
    pub async fn filter_by_status(&self, status: &str) -> Result<()> {
        let element = self.timeouts.element();
        self.resolver
            .click(&catalog::list::filter_button().with_element_timeout(element))
            .await?;
        self.resolver
            .click(&catalog::list::status_choice(status).with_element_timeout(element))
            .await?;
        settle(self.timeouts.settle(), "status filter").await;
        Ok(())
    }

    /// Click a column header to sort by it.
    pub async fn sort_by_column(&self, column: &str) -> Result<()> {
        self.resolver
            .click(&catalog::list::column_header(column).with_element_timeout(self.timeouts.element()))
            .await?;
        settle(self.timeouts.settle(), "column sort").await;
        Ok(())
    }

    /// Number of rendered rows; zero when the table is empty.
    pub async fn row_count(&self) -> Result<usize> {
        let rows = catalog::list::rows().with_element_timeout(self.timeouts.element());
        Ok(self.resolver.enumerate(&rows).await?.len())
    }

    /// Open the list, apply the query and count the rows left.
    #[instrument(level = "debug", skip_all)]
    pub async fn browse(&self, query: &ListQuery) -> Result<usize> {
        self.open_list().await?;
        if let Some(status) = &query.status {
            self.filter_by_status(status).await?;
        }
        if let Some(column) = &query.sort {
            self.sort_by_column(column).await?;
        }
        let rows = self.row_count().await?;
        info!(
            status = query.status.as_deref().unwrap_or("-"),
            sort = query.sort.as_deref().unwrap_or("-"),
            rows,
            "Instance list browsed"
        );
        Ok(rows)
    }

    /// Bring the instance form on screen.
    pub async fn locate(&self, id: &WorkflowId, mode: LocateMode) -> Result<()> {
        match mode {
            LocateMode::Search => {
                self.open_list().await?;
                self.search(id).await?;
                self.open(id).await
            }
            LocateMode::DirectUrl => {
                let url = self.app.instance_url(id.as_str());
                self.resolver.page().goto(&url).await?;
                settle(self.timeouts.settle(), "instance open").await;
                info!(instance_id = %id, url = %url, "Instance opened by URL");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::page::memory::{MemoryPage, NodeSpec, PageEvent, Reaction};

    fn timeouts() -> TimeoutsConfig {
        TimeoutsConfig {
            element_ms: 200,
            search_ms: 500,
            settle_ms: 0,
            ..TimeoutsConfig::default()
        }
    }

    fn id(s: &str) -> WorkflowId {
        WorkflowId::new(s).unwrap()
    }

    fn list_page(rows: &[&str]) -> MemoryPage {
        let page = MemoryPage::new("about:blank");
        page.add(NodeSpec::role("textbox").name("Search eMOCs..."));
        for row in rows {
            let cell = page.add(NodeSpec::role("cell").name(*row).hidden());
            page.on_key(Key::Enter, Reaction::Show(cell));
        }
        page
    }

    #[tokio::test(start_paused = true)]
    async fn search_proceeds_on_exact_cell_text() {
        let page = list_page(&["eMOC_0004562", "eMOC_00045621"]);
        let resolver = ElementResolver::new(&page);
        let app = AppConfig::default();
        let timeouts = timeouts();
        let list = InstanceList::new(&resolver, &app, &timeouts);

        list.search(&id("eMOC_0004562")).await.unwrap();
        assert!(page.events().contains(&PageEvent::Press(Key::Enter)));
    }

    #[tokio::test(start_paused = true)]
    async fn search_without_exact_row_fails() {
        let page = list_page(&["eMOC_00045621"]);
        let resolver = ElementResolver::new(&page);
        let app = AppConfig::default();
        let timeouts = timeouts();
        let list = InstanceList::new(&resolver, &app, &timeouts);

        let err = list.search(&id("eMOC_0004562")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Workflow(WorkflowError::InstanceNotFound { ref id }) if id == "eMOC_0004562"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn direct_url_skips_the_list() {
        let page = MemoryPage::new("about:blank");
        let resolver = ElementResolver::new(&page);
        let app = AppConfig::default();
        let timeouts = timeouts();
        let list = InstanceList::new(&resolver, &app, &timeouts);

        list.locate(&id("eMOC_0000007"), LocateMode::DirectUrl)
            .await
            .unwrap();
        assert_eq!(
            page.current_url(),
            "https://moc.otdm.ca/moc-builder/type/moc_facility_full/id/eMOC_0000007"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn browse_filters_then_sorts_then_counts() {
        let page = MemoryPage::new("about:blank");
        let filter = page.add(NodeSpec::role("button").css("button[class*=\"filter\"]"));
        let menu = page.add(NodeSpec::role("listbox").hidden());
        let pending = page.add_child(menu, NodeSpec::role("option").name("Pending Approval"));
        page.add_child(menu, NodeSpec::role("option").name("Draft"));
        page.on_click(filter, Reaction::Show(menu));
        let header = page.add(NodeSpec::role("columnheader").name("Created On"));
        for _ in 0..3 {
            page.add(NodeSpec::role("row").css("table tbody tr"));
        }
        let resolver = ElementResolver::new(&page);
        let app = AppConfig::default();
        let timeouts = timeouts();
        let list = InstanceList::new(&resolver, &app, &timeouts);

        let rows = list
            .browse(&ListQuery {
                status: Some("Pending Approval".to_string()),
                sort: Some("Created".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(rows, 3);

        let clicks: Vec<_> = page
            .events()
            .into_iter()
            .filter(|e| matches!(e, PageEvent::Click(_)))
            .collect();
        assert_eq!(
            clicks,
            vec![
                PageEvent::Click(filter),
                PageEvent::Click(pending),
                PageEvent::Click(header)
            ]
        );
        assert_eq!(
            page.current_url(),
            "https://moc.otdm.ca/tabs/all-emocs"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn browse_without_query_only_counts() {
        let page = MemoryPage::new("about:blank");
        page.add(NodeSpec::role("row").css("table tbody tr"));
        let resolver = ElementResolver::new(&page);
        let app = AppConfig::default();
        let timeouts = timeouts();
        let list = InstanceList::new(&resolver, &app, &timeouts);

        assert_eq!(list.browse(&ListQuery::default()).await.unwrap(), 1);
        assert!(
            !page
                .events()
                .iter()
                .any(|e| matches!(e, PageEvent::Click(_)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_status_choice_fails_the_browse() {
        let page = MemoryPage::new("about:blank");
        page.add(NodeSpec::role("button").css("button[class*=\"filter\"]"));
        let resolver = ElementResolver::new(&page);
        let app = AppConfig::default();
        let timeouts = timeouts();
        let list = InstanceList::new(&resolver, &app, &timeouts);

        let err = list
            .browse(&ListQuery {
                status: Some("Closed".to_string()),
                sort: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Interaction(crate::error::InteractionError::ElementNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn row_count_is_zero_for_empty_table() {
        let page = MemoryPage::new("about:blank");
        let resolver = ElementResolver::new(&page);
        let app = AppConfig::default();
        let timeouts = timeouts();
        let list = InstanceList::new(&resolver, &app, &timeouts);

        assert_eq!(list.row_count().await.unwrap(), 0);
    }
}
