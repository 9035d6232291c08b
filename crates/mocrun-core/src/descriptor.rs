//! Control descriptors: how to find one control, in fallback order.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::page::Locator;

/// Default per-strategy wait budget.
pub const DEFAULT_STRATEGY_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do when a strategy yields more than one usable match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    /// Exactly one match is expected; more is an ambiguity error.
    #[default]
    Unique,
    /// Take the first match in document order.
    First,
    /// Take the n-th (0-based) match; fewer matches count as none.
    Nth(usize),
}

impl Pick {
    /// Minimum number of usable matches this rule needs.
    #[must_use]
    pub const fn required(self) -> usize {
        match self {
            Self::Unique | Self::First => 1,
            Self::Nth(n) => n + 1,
        }
    }
}

/// One locating strategy with its own wait budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub locator: Locator,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub pick: Pick,
    /// Visually hidden controls (styled native checkboxes) waive this.
    pub require_visible: bool,
}

impl Strategy {
    #[must_use]
    pub fn new(locator: Locator) -> Self {
        Self {
            locator,
            timeout: DEFAULT_STRATEGY_TIMEOUT,
            pick: Pick::Unique,
            require_visible: true,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn first(mut self) -> Self {
        self.pick = Pick::First;
        self
    }

    #[must_use]
    pub fn nth(mut self, index: usize) -> Self {
        self.pick = Pick::Nth(index);
        self
    }

    #[must_use]
    pub fn allow_hidden(mut self) -> Self {
        self.require_visible = false;
        self
    }

    /// Human-readable form used in diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.pick {
            Pick::Unique => self.locator.to_string(),
            Pick::First => format!("{} >> first", self.locator),
            Pick::Nth(n) => format!("{} >> nth={n}", self.locator),
        }
    }
}

impl From<Locator> for Strategy {
    fn from(locator: Locator) -> Self {
        Self::new(locator)
    }
}

/// A named control with an ordered list of strategies.
///
/// ```
/// use mocrun_core::descriptor::ControlDescriptor;
/// use mocrun_core::page::Locator;
///
/// let save = ControlDescriptor::new("asset modal save")
///     .or(Locator::role_named("button", "Save"))
///     .or(Locator::css("button.btn-primary"));
/// assert_eq!(save.strategies.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDescriptor {
    pub name: String,
    pub strategies: Vec<Strategy>,
    /// Resolved first; strategies then match inside it.
    pub scope: Option<Box<ControlDescriptor>>,
}

impl ControlDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategies: Vec::new(),
            scope: None,
        }
    }

    /// Append a fallback strategy.
    #[must_use]
    pub fn or(mut self, strategy: impl Into<Strategy>) -> Self {
        self.strategies.push(strategy.into());
        self
    }

    /// Restrict matching to descendants of `scope`.
    #[must_use]
    pub fn scoped(mut self, scope: ControlDescriptor) -> Self {
        self.scope = Some(Box::new(scope));
        self
    }

    /// Apply a wait budget to every strategy.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        for strategy in &mut self.strategies {
            strategy.timeout = timeout;
        }
        self
    }

    /// Rebase budgets on a configured element timeout: default budgets become
    /// `timeout`, explicit ones are capped by it. Applies to scopes too.
    #[must_use]
    pub fn with_element_timeout(mut self, timeout: Duration) -> Self {
        for strategy in &mut self.strategies {
            strategy.timeout = if strategy.timeout == DEFAULT_STRATEGY_TIMEOUT {
                timeout
            } else {
                strategy.timeout.min(timeout)
            };
        }
        self.scope = self
            .scope
            .map(|scope| Box::new(scope.with_element_timeout(timeout)));
        self
    }

    #[must_use]
    pub fn first(mut self) -> Self {
        for strategy in &mut self.strategies {
            strategy.pick = Pick::First;
        }
        self
    }

    /// Ordinal addressing: take the `index`-th match of every strategy.
    #[must_use]
    pub fn nth(mut self, index: usize) -> Self {
        for strategy in &mut self.strategies {
            strategy.pick = Pick::Nth(index);
        }
        self
    }

    #[must_use]
    pub fn allow_hidden(mut self) -> Self {
        for strategy in &mut self.strategies {
            strategy.require_visible = false;
        }
        self
    }

    /// Scopes from outermost to innermost.
    #[must_use]
    pub fn scope_chain(&self) -> Vec<&ControlDescriptor> {
        let mut chain = Vec::new();
        let mut cursor = self.scope.as_deref();
        while let Some(scope) = cursor {
            chain.push(scope);
            cursor = scope.scope.as_deref();
        }
        chain.reverse();
        chain
    }
}

impl fmt::Display for ControlDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What to do with a resolved control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", content = "value", rename_all = "snake_case")]
pub enum Interaction {
    Click,
    /// Click without actionability checks.
    ForceClick,
    /// Check a checkbox; no-op when already checked.
    Check,
    Fill(String),
    /// Click the option with this label inside an open list.
    SelectOption(String),
}

/// Result of a successful resolve-then-act sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionOutcome {
    pub success: bool,
    pub alert_text: Option<String>,
    /// Which strategy produced the element.
    pub strategy_index: usize,
    /// Resolve-then-act attempts, including the successful one.
    pub attempts: u32,
}

/// Text captured from the alert surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub text: String,
    /// Which surface produced it.
    pub source: String,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
