//! Page capability: the only surface that touches a browser.
//!
//! Everything above this module (resolver, drivers, stage controllers) talks
//! to a [`Page`] through tagged [`Locator`] variants and opaque
//! [`ElementHandle`]s. Two implementations exist:
//!
//! - [`memory::MemoryPage`]: an in-memory document with scripted reactions
//! - `cdp::CdpPage`: Chromium over the DevTools protocol (behind the
//!   `browser` feature flag)

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::Result;

#[cfg(feature = "browser")]
pub mod cdp;
pub mod memory;

// =============================================================================
// Locators
// =============================================================================

/// How an accessible name or visible text is compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum NameMatch {
    /// Whitespace-trimmed equality.
    Exact(String),
    /// Case-insensitive substring.
    Contains(String),
}

impl NameMatch {
    #[must_use]
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }

    #[must_use]
    pub fn contains(value: impl Into<String>) -> Self {
        Self::Contains(value.into())
    }

    /// Compare against a rendered name or text.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(expected) => candidate.trim() == expected.trim(),
            Self::Contains(needle) => candidate
                .to_lowercase()
                .contains(&needle.trim().to_lowercase()),
        }
    }

    /// The raw value being matched.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Exact(v) | Self::Contains(v) => v,
        }
    }
}

impl fmt::Display for NameMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "\"{v}\""),
            Self::Contains(v) => write!(f, "~\"{v}\""),
        }
    }
}

/// One way of finding elements on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    /// ARIA role (explicit or implicit), optionally filtered by accessible name.
    Role {
        role: String,
        name: Option<NameMatch>,
    },
    /// DOM `id` attribute, without the leading `#`.
    Id { id: String },
    /// Visible text of the element itself.
    Text { text: NameMatch },
    /// `placeholder` attribute of an input.
    Placeholder { placeholder: NameMatch },
    /// Structural CSS selector (plain CSS only).
    Css { selector: String },
}

impl Locator {
    #[must_use]
    pub fn role(role: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn role_named(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: Some(NameMatch::exact(name)),
        }
    }

    #[must_use]
    pub fn role_containing(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: Some(NameMatch::contains(name)),
        }
    }

    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::Id {
            id: id.trim_start_matches('#').to_string(),
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: NameMatch::exact(text),
        }
    }

    #[must_use]
    pub fn text_containing(text: impl Into<String>) -> Self {
        Self::Text {
            text: NameMatch::contains(text),
        }
    }

    #[must_use]
    pub fn placeholder(placeholder: impl Into<String>) -> Self {
        Self::Placeholder {
            placeholder: NameMatch::contains(placeholder),
        }
    }

    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css {
            selector: selector.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role { role, name: None } => write!(f, "role={role}"),
            Self::Role {
                role,
                name: Some(name),
            } => write!(f, "role={role}[name={name}]"),
            Self::Id { id } => write!(f, "id=#{id}"),
            Self::Text { text } => write!(f, "text={text}"),
            Self::Placeholder { placeholder } => write!(f, "placeholder={placeholder}"),
            Self::Css { selector } => write!(f, "css={selector}"),
        }
    }
}

// =============================================================================
// Elements
// =============================================================================

/// Opaque reference to one element, valid until the element detaches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of the properties the resolver filters on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementState {
    pub attached: bool,
    pub visible: bool,
    /// Neither `disabled` nor `aria-disabled="true"`.
    pub enabled: bool,
    /// `Some` for checkboxes and radios.
    pub checked: Option<bool>,
    /// Trimmed visible text.
    pub text: String,
}

impl ElementState {
    /// Whether the element can be acted on.
    #[must_use]
    pub fn usable(&self, require_visible: bool) -> bool {
        self.attached && self.enabled && (self.visible || !require_visible)
    }
}

/// Keyboard keys the workflow needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Escape,
    Enter,
    PageDown,
    Tab,
}

impl Key {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Escape => "Escape",
            Self::Enter => "Enter",
            Self::PageDown => "PageDown",
            Self::Tab => "Tab",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Capability trait
// =============================================================================

/// Browser page capability.
///
/// Failures use [`crate::error::InteractionError`]: `Detached` and
/// `Intercepted` are transient and retried by the resolver.
pub trait Page: Send + Sync {
    /// All attached elements matching `locator`, in document order,
    /// optionally restricted to descendants of `within`.
    fn query(
        &self,
        locator: &Locator,
        within: Option<&ElementHandle>,
    ) -> impl Future<Output = Result<Vec<ElementHandle>>> + Send;

    /// Current state of an element.
    fn inspect(&self, element: &ElementHandle)
    -> impl Future<Output = Result<ElementState>> + Send;

    /// Click an element. `force` skips actionability checks.
    fn click(
        &self,
        element: &ElementHandle,
        force: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Replace the value of an input or textarea.
    fn fill(&self, element: &ElementHandle, value: &str)
    -> impl Future<Output = Result<()>> + Send;

    /// Press a key on the focused element.
    fn press(&self, key: Key) -> impl Future<Output = Result<()>> + Send;

    /// Click the neutral area at (50, 50) to drop focus from open widgets.
    fn click_neutral(&self) -> impl Future<Output = Result<()>> + Send;

    /// Navigate and wait for the document to load.
    fn goto(&self, url: &str) -> impl Future<Output = Result<()>> + Send;

    fn url(&self) -> impl Future<Output = Result<String>> + Send;

    fn title(&self) -> impl Future<Output = Result<String>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_match_exact_trims() {
        let m = NameMatch::exact("Save");
        assert!(m.matches("  Save "));
        assert!(!m.matches("Save draft"));
        assert!(!m.matches("save"));
    }

    #[test]
    fn name_match_contains_ignores_case() {
        let m = NameMatch::contains("aa dairy");
        assert!(m.matches("AA DAIRY 1"));
        assert!(!m.matches("AB DAIRY"));
    }

    #[test]
    fn locator_display_is_readable() {
        assert_eq!(
            Locator::role_named("button", "Save").to_string(),
            "role=button[name=\"Save\"]"
        );
        assert_eq!(Locator::id("#mocChangeTitle").to_string(), "id=#mocChangeTitle");
        assert_eq!(
            Locator::role_containing("option", "dairy").to_string(),
            "role=option[name=~\"dairy\"]"
        );
    }

    #[test]
    fn locators_serialize_as_tagged_variants() {
        let json = serde_json::to_value(Locator::id("mocOwnerId")).unwrap();
        assert_eq!(json["by"], "id");
        assert_eq!(json["id"], "mocOwnerId");
        let back: Locator = serde_json::from_value(json).unwrap();
        assert_eq!(back, Locator::id("mocOwnerId"));
    }

    #[test]
    fn usable_respects_visibility_waiver() {
        let hidden_checkbox = ElementState {
            attached: true,
            visible: false,
            enabled: true,
            checked: Some(false),
            text: String::new(),
        };
        assert!(!hidden_checkbox.usable(true));
        assert!(hidden_checkbox.usable(false));
    }
}
