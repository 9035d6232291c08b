//! In-memory page with scripted reactions.
//!
//! Models just enough of a rendered document for the resolver and drivers:
//! a tree of nodes carrying role, accessible name, text, id, placeholder,
//! registered CSS selectors, visibility and checked state. Clicks, key
//! presses, fills and navigations are recorded as [`PageEvent`]s and can
//! trigger [`Reaction`]s (show a dropdown, raise an alert, change the URL).

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{ElementHandle, ElementState, Key, Locator, Page};
use crate::Result;
use crate::error::InteractionError;

/// Index of a node in a [`MemoryPage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub fn handle(self) -> ElementHandle {
        ElementHandle::new(format!("m{}", self.0))
    }

    fn from_handle(handle: &ElementHandle) -> Option<Self> {
        handle
            .token()
            .strip_prefix('m')
            .and_then(|n| n.parse().ok())
            .map(Self)
    }
}

/// Description of a node to insert.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    role: Option<String>,
    name: String,
    text: String,
    dom_id: Option<String>,
    placeholder: Option<String>,
    selectors: Vec<String>,
    hidden: bool,
    disabled: bool,
    checked: Option<bool>,
}

impl NodeSpec {
    /// A node with an ARIA role.
    #[must_use]
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Self::default()
        }
    }

    /// A node without a role (generic container).
    #[must_use]
    pub fn generic() -> Self {
        Self::default()
    }

    /// Accessible name. Also used as text when no text was set.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        if self.text.is_empty() {
            self.text.clone_from(&self.name);
        }
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.dom_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    /// Register a CSS selector this node answers to.
    #[must_use]
    pub fn css(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Disabled or `aria-disabled="true"`.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    #[must_use]
    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    spec: NodeSpec,
    parent: Option<NodeId>,
    attached: bool,
    value: String,
}

/// Something the page does in response to an event.
#[derive(Debug, Clone)]
pub enum Reaction {
    Show(NodeId),
    Hide(NodeId),
    Detach(NodeId),
    SetText(NodeId, String),
    /// Each firing pops the next text; the last one sticks.
    CycleText(NodeId, VecDeque<String>),
    SetUrl(String),
    SetTitle(String),
}

/// Transient failure injected into the next click on a node or key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Detached,
    Intercepted,
}

/// Recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Click(NodeId),
    Fill(NodeId, String),
    Press(Key),
    NeutralClick,
    Goto(String),
}

#[derive(Debug, Default)]
struct DomState {
    nodes: Vec<Node>,
    url: String,
    title: String,
    events: Vec<PageEvent>,
    on_click: HashMap<NodeId, Vec<Reaction>>,
    on_fill: HashMap<NodeId, Vec<Reaction>>,
    on_key: HashMap<Key, Vec<Reaction>>,
    on_goto: Vec<(String, Vec<Reaction>)>,
    failures: HashMap<NodeId, VecDeque<InjectedFailure>>,
    key_failures: HashMap<Key, VecDeque<InjectedFailure>>,
}

impl DomState {
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn is_attached(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.node(current) {
                Some(node) if node.attached => cursor = node.parent,
                _ => return false,
            }
        }
        true
    }

    fn is_visible(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.node(current) {
                Some(node) if !node.spec.hidden => cursor = node.parent,
                _ => return false,
            }
        }
        true
    }

    fn is_descendant(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.node(id).and_then(|n| n.parent);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.node(current).and_then(|n| n.parent);
        }
        false
    }

    fn matches(node: &Node, locator: &Locator) -> bool {
        let spec = &node.spec;
        match locator {
            Locator::Role { role, name } => {
                spec.role.as_deref() == Some(role.as_str())
                    && name.as_ref().is_none_or(|m| m.matches(&spec.name))
            }
            Locator::Id { id } => spec.dom_id.as_deref() == Some(id.as_str()),
            Locator::Text { text } => !spec.text.is_empty() && text.matches(&spec.text),
            Locator::Placeholder { placeholder } => spec
                .placeholder
                .as_deref()
                .is_some_and(|p| placeholder.matches(p)),
            Locator::Css { selector } => spec.selectors.iter().any(|s| s == selector),
        }
    }

    fn resolve(&self, handle: &ElementHandle) -> Result<NodeId> {
        NodeId::from_handle(handle)
            .filter(|id| self.is_attached(*id))
            .ok_or_else(|| {
                InteractionError::Detached {
                    descriptor: handle.token().to_string(),
                }
                .into()
            })
    }

    fn apply(&mut self, reactions: Vec<Reaction>) {
        for reaction in reactions {
            match reaction {
                Reaction::Show(id) => self.set_hidden(id, false),
                Reaction::Hide(id) => self.set_hidden(id, true),
                Reaction::Detach(id) => {
                    if let Some(node) = self.nodes.get_mut(id.0) {
                        node.attached = false;
                    }
                }
                Reaction::SetText(id, text) => self.set_text(id, text),
                Reaction::CycleText(..) => {}
                Reaction::SetUrl(url) => self.url = url,
                Reaction::SetTitle(title) => self.title = title,
            }
        }
    }

    fn set_hidden(&mut self, id: NodeId, hidden: bool) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.spec.hidden = hidden;
        }
    }

    fn set_text(&mut self, id: NodeId, text: String) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.spec.text.clone_from(&text);
            node.spec.name = text;
        }
    }

    /// Fire reactions, advancing cycling texts in place.
    fn fire(&mut self, reactions: Option<&mut Vec<Reaction>>) -> Vec<Reaction> {
        let Some(reactions) = reactions else {
            return Vec::new();
        };
        let mut fired = Vec::with_capacity(reactions.len());
        for reaction in reactions.iter_mut() {
            if let Reaction::CycleText(id, texts) = reaction {
                let next = if texts.len() > 1 {
                    texts.pop_front()
                } else {
                    texts.front().cloned()
                };
                if let Some(text) = next {
                    fired.push(Reaction::SetText(*id, text));
                }
            } else {
                fired.push(reaction.clone());
            }
        }
        fired
    }
}

/// In-memory [`Page`] implementation.
#[derive(Debug, Default)]
pub struct MemoryPage {
    state: Mutex<DomState>,
}

impl MemoryPage {
    /// Create an empty page at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(DomState {
                url: url.into(),
                ..DomState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DomState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert a top-level node.
    pub fn add(&self, spec: NodeSpec) -> NodeId {
        self.insert(None, spec)
    }

    /// Insert a node under `parent`.
    pub fn add_child(&self, parent: NodeId, spec: NodeSpec) -> NodeId {
        self.insert(Some(parent), spec)
    }

    fn insert(&self, parent: Option<NodeId>, spec: NodeSpec) -> NodeId {
        let mut state = self.lock();
        let id = NodeId(state.nodes.len());
        state.nodes.push(Node {
            spec,
            parent,
            attached: true,
            value: String::new(),
        });
        id
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.lock().title = title.into();
    }

    pub fn on_click(&self, node: NodeId, reaction: Reaction) {
        self.lock().on_click.entry(node).or_default().push(reaction);
    }

    pub fn on_fill(&self, node: NodeId, reaction: Reaction) {
        self.lock().on_fill.entry(node).or_default().push(reaction);
    }

    pub fn on_key(&self, key: Key, reaction: Reaction) {
        self.lock().on_key.entry(key).or_default().push(reaction);
    }

    /// React to navigations whose URL starts with `prefix`.
    pub fn on_goto(&self, prefix: impl Into<String>, reaction: Reaction) {
        let prefix = prefix.into();
        let mut state = self.lock();
        if let Some((_, reactions)) = state.on_goto.iter_mut().find(|(p, _)| *p == prefix) {
            reactions.push(reaction);
        } else {
            state.on_goto.push((prefix, vec![reaction]));
        }
    }

    /// Make the next click on `node` fail once with `failure`.
    pub fn fail_next_click(&self, node: NodeId, failure: InjectedFailure) {
        self.lock()
            .failures
            .entry(node)
            .or_default()
            .push_back(failure);
    }

    /// Make the next press of `key` fail once with `failure`.
    pub fn fail_next_press(&self, key: Key, failure: InjectedFailure) {
        self.lock()
            .key_failures
            .entry(key)
            .or_default()
            .push_back(failure);
    }

    pub fn show(&self, node: NodeId) {
        self.lock().set_hidden(node, false);
    }

    pub fn hide(&self, node: NodeId) {
        self.lock().set_hidden(node, true);
    }

    /// All recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<PageEvent> {
        self.lock().events.clone()
    }

    /// Number of clicks recorded on `node`.
    #[must_use]
    pub fn clicks_on(&self, node: NodeId) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| **e == PageEvent::Click(node))
            .count()
    }

    /// Number of times `key` was pressed.
    #[must_use]
    pub fn presses_of(&self, key: Key) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| **e == PageEvent::Press(key))
            .count()
    }

    #[must_use]
    pub fn is_checked(&self, node: NodeId) -> Option<bool> {
        self.lock().node(node).and_then(|n| n.spec.checked)
    }

    #[must_use]
    pub fn value_of(&self, node: NodeId) -> String {
        self.lock()
            .node(node)
            .map(|n| n.value.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_visible(&self, node: NodeId) -> bool {
        let state = self.lock();
        state.is_attached(node) && state.is_visible(node)
    }

    #[must_use]
    pub fn current_url(&self) -> String {
        self.lock().url.clone()
    }

    fn do_click(&self, element: &ElementHandle, force: bool) -> Result<()> {
        let mut state = self.lock();
        let id = state.resolve(element)?;

        if let Some(failure) = state.failures.get_mut(&id).and_then(VecDeque::pop_front) {
            let descriptor = element.token().to_string();
            return Err(match failure {
                InjectedFailure::Detached => InteractionError::Detached { descriptor },
                InjectedFailure::Intercepted => InteractionError::Intercepted { descriptor },
            }
            .into());
        }

        let enabled = state.node(id).is_some_and(|n| !n.spec.disabled);
        if !force && (!state.is_visible(id) || !enabled) {
            return Err(InteractionError::Intercepted {
                descriptor: element.token().to_string(),
            }
            .into());
        }

        state.events.push(PageEvent::Click(id));
        if let Some(node) = state.nodes.get_mut(id.0) {
            if let Some(checked) = node.spec.checked {
                node.spec.checked = Some(!checked);
            }
        }
        let mut reactions = state.on_click.remove(&id);
        let fired = state.fire(reactions.as_mut());
        if let Some(reactions) = reactions {
            state.on_click.insert(id, reactions);
        }
        state.apply(fired);
        Ok(())
    }

    fn do_fill(&self, element: &ElementHandle, value: &str) -> Result<()> {
        let mut state = self.lock();
        let id = state.resolve(element)?;
        if let Some(node) = state.nodes.get_mut(id.0) {
            node.value = value.to_string();
        }
        state.events.push(PageEvent::Fill(id, value.to_string()));
        let mut reactions = state.on_fill.remove(&id);
        let fired = state.fire(reactions.as_mut());
        if let Some(reactions) = reactions {
            state.on_fill.insert(id, reactions);
        }
        state.apply(fired);
        Ok(())
    }

    fn do_press(&self, key: Key) {
        let mut state = self.lock();
        state.events.push(PageEvent::Press(key));
        let mut reactions = state.on_key.remove(&key);
        let fired = state.fire(reactions.as_mut());
        if let Some(reactions) = reactions {
            state.on_key.insert(key, reactions);
        }
        state.apply(fired);
    }

    fn do_goto(&self, url: &str) {
        let mut state = self.lock();
        state.url = url.to_string();
        state.events.push(PageEvent::Goto(url.to_string()));
        let matching: Vec<Reaction> = state
            .on_goto
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .flat_map(|(_, reactions)| reactions.iter().cloned())
            .collect();
        state.apply(matching);
    }
}

impl Page for MemoryPage {
    async fn query(
        &self,
        locator: &Locator,
        within: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>> {
        let state = self.lock();
        let scope = match within {
            Some(handle) => Some(state.resolve(handle)?),
            None => None,
        };
        Ok(state
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i), node))
            .filter(|(id, _)| state.is_attached(*id))
            .filter(|(id, _)| scope.is_none_or(|s| state.is_descendant(*id, s)))
            .filter(|(_, node)| DomState::matches(node, locator))
            .map(|(id, _)| id.handle())
            .collect())
    }

    async fn inspect(&self, element: &ElementHandle) -> Result<ElementState> {
        let state = self.lock();
        let id = state.resolve(element)?;
        let node = state.node(id).ok_or_else(|| InteractionError::Detached {
            descriptor: element.token().to_string(),
        })?;
        Ok(ElementState {
            attached: true,
            visible: state.is_visible(id),
            enabled: !node.spec.disabled,
            checked: node.spec.checked,
            text: node.spec.text.trim().to_string(),
        })
    }

    async fn click(&self, element: &ElementHandle, force: bool) -> Result<()> {
        self.do_click(element, force)
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<()> {
        self.do_fill(element, value)
    }

    async fn press(&self, key: Key) -> Result<()> {
        let injected = self
            .lock()
            .key_failures
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = injected {
            let descriptor = format!("{key:?} key");
            return Err(match failure {
                InjectedFailure::Detached => InteractionError::Detached { descriptor },
                InjectedFailure::Intercepted => InteractionError::Intercepted { descriptor },
            }
            .into());
        }
        self.do_press(key);
        Ok(())
    }

    async fn click_neutral(&self) -> Result<()> {
        self.lock().events.push(PageEvent::NeutralClick);
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.do_goto(url);
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.lock().title.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_respects_scope_and_attachment() {
        let page = MemoryPage::new("https://app.test/");
        let dialog = page.add(NodeSpec::role("dialog").name("Add Asset"));
        let inside = page.add_child(dialog, NodeSpec::role("button").name("Save"));
        let outside = page.add(NodeSpec::role("button").name("Save"));

        let all = page
            .query(&Locator::role_named("button", "Save"), None)
            .await
            .unwrap();
        assert_eq!(all, vec![inside.handle(), outside.handle()]);

        let scoped = page
            .query(&Locator::role_named("button", "Save"), Some(&dialog.handle()))
            .await
            .unwrap();
        assert_eq!(scoped, vec![inside.handle()]);

        page.on_click(outside, Reaction::Detach(dialog));
        page.click(&outside.handle(), false).await.unwrap();
        let after = page
            .query(&Locator::role_named("button", "Save"), None)
            .await
            .unwrap();
        assert_eq!(after, vec![outside.handle()]);
        assert!(page.inspect(&inside.handle()).await.is_err());
    }

    #[tokio::test]
    async fn hidden_parent_hides_children() {
        let page = MemoryPage::new("about:blank");
        let panel = page.add(NodeSpec::generic().hidden());
        let option = page.add_child(panel, NodeSpec::role("option").name("AA DAIRY"));
        assert!(!page.inspect(&option.handle()).await.unwrap().visible);
        page.show(panel);
        assert!(page.inspect(&option.handle()).await.unwrap().visible);
    }

    #[tokio::test]
    async fn checkbox_click_toggles_and_injected_failure_fires_once() {
        let page = MemoryPage::new("about:blank");
        let checkbox = page.add(NodeSpec::role("checkbox").checked(false).hidden());
        page.fail_next_click(checkbox, InjectedFailure::Detached);

        let err = page.click(&checkbox.handle(), true).await.unwrap_err();
        assert!(err.to_string().contains("detached"));
        page.click(&checkbox.handle(), true).await.unwrap();
        assert_eq!(page.is_checked(checkbox), Some(true));

        // not forced and hidden: intercepted
        assert!(page.click(&checkbox.handle(), false).await.is_err());
    }

    #[tokio::test]
    async fn cycle_text_advances_per_click() {
        let page = MemoryPage::new("about:blank");
        let header = page.add(NodeSpec::generic().text("December 2025"));
        let next = page.add(NodeSpec::role("button").name("Next month"));
        page.on_click(
            next,
            Reaction::CycleText(
                header,
                VecDeque::from(vec!["January 2026".to_string(), "February 2026".to_string()]),
            ),
        );
        page.click(&next.handle(), false).await.unwrap();
        assert_eq!(page.inspect(&header.handle()).await.unwrap().text, "January 2026");
        page.click(&next.handle(), false).await.unwrap();
        page.click(&next.handle(), false).await.unwrap();
        assert_eq!(page.inspect(&header.handle()).await.unwrap().text, "February 2026");
    }
}
