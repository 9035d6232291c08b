//! Multi-strategy element resolution with bounded retry.
//!
//! [`ElementResolver::resolve`] walks a [`ControlDescriptor`]'s strategies in
//! declared order, polling each for a usable match within its own budget.
//! [`ElementResolver::perform`] wraps resolve-then-act in
//! [`with_smart_retry_outcome`] so a detached element or an intercepted click
//! re-resolves from scratch instead of surfacing immediately.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::Result;
use crate::descriptor::{
    ControlDescriptor, Interaction, InteractionOutcome, Notification, Pick, Strategy,
};
use crate::error::{Error, InteractionError, Severity};
use crate::page::{ElementHandle, Key, Locator, Page};
use crate::retry::{RetryPolicy, with_smart_retry_outcome};
use crate::wait::{Backoff, WaitFor, wait_for};

/// A resolved control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub handle: ElementHandle,
    /// Index of the strategy that produced the match.
    pub strategy_index: usize,
    /// Whether the producing strategy required visibility.
    pub require_visible: bool,
}

/// Locates and operates controls on a [`Page`].
#[derive(Debug)]
pub struct ElementResolver<'p, P: Page> {
    page: &'p P,
    retry: RetryPolicy,
    poll: Backoff,
}

impl<'p, P: Page> ElementResolver<'p, P> {
    #[must_use]
    pub fn new(page: &'p P) -> Self {
        Self {
            page,
            retry: RetryPolicy::interaction(),
            poll: Backoff::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn page(&self) -> &'p P {
        self.page
    }

    /// Resolve a descriptor to exactly one usable element.
    pub async fn resolve(&self, descriptor: &ControlDescriptor) -> Result<Resolved> {
        let within = self.resolve_scope(descriptor).await?;

        for (index, strategy) in descriptor.strategies.iter().enumerate() {
            let matches = self
                .poll_strategy(&descriptor.name, strategy, within.as_ref())
                .await?;
            let count = matches.len();
            let picked = match strategy.pick {
                Pick::Unique if count > 1 => {
                    return Err(InteractionError::AmbiguousMatch {
                        descriptor: descriptor.name.clone(),
                        strategy: strategy.describe(),
                        count,
                    }
                    .into());
                }
                Pick::Unique | Pick::First => matches.into_iter().next(),
                Pick::Nth(n) => matches.into_iter().nth(n),
            };
            match picked {
                Some(handle) => {
                    debug!(
                        descriptor = %descriptor.name,
                        strategy_index = index,
                        strategy = %strategy.describe(),
                        "Resolved control"
                    );
                    return Ok(Resolved {
                        handle,
                        strategy_index: index,
                        require_visible: strategy.require_visible,
                    });
                }
                None => {
                    debug!(
                        descriptor = %descriptor.name,
                        strategy_index = index,
                        matches = count,
                        "Strategy produced no usable match"
                    );
                }
            }
        }

        Err(InteractionError::ElementNotFound {
            descriptor: descriptor.name.clone(),
            strategies_tried: descriptor.strategies.iter().map(Strategy::describe).collect(),
        }
        .into())
    }

    /// All usable matches of the first strategy that yields any.
    ///
    /// Pick rules are ignored; this is what ordinal addressing counts against.
    pub async fn enumerate(&self, descriptor: &ControlDescriptor) -> Result<Vec<ElementHandle>> {
        let within = self.resolve_scope(descriptor).await?;
        for strategy in &descriptor.strategies {
            let probe = Strategy {
                pick: Pick::First,
                ..strategy.clone()
            };
            let matches = self
                .poll_strategy(&descriptor.name, &probe, within.as_ref())
                .await?;
            if !matches.is_empty() {
                return Ok(matches);
            }
        }
        Ok(Vec::new())
    }

    /// Whether the descriptor resolves within `timeout`.
    pub async fn is_present(&self, descriptor: &ControlDescriptor, timeout: Duration) -> bool {
        let bounded = descriptor.clone().with_timeout(timeout);
        match self.resolve(&bounded).await {
            Ok(_) => true,
            // More than one match is still presence.
            Err(Error::Interaction(InteractionError::AmbiguousMatch { .. })) => true,
            Err(Error::Interaction(InteractionError::ElementNotFound { .. })) => false,
            Err(err) => {
                warn!(descriptor = %descriptor.name, error = %err, "Presence check failed");
                false
            }
        }
    }

    /// Resolve then act, re-resolving on transient failures.
    #[instrument(level = "debug", skip_all, fields(descriptor = %descriptor.name))]
    pub async fn perform(
        &self,
        descriptor: &ControlDescriptor,
        interaction: &Interaction,
    ) -> Result<InteractionOutcome> {
        let outcome = with_smart_retry_outcome(&self.retry, || async {
            let resolved = self.resolve(descriptor).await?;
            self.act(&resolved, interaction)
                .await
                .map_err(|e| attribute(e, &descriptor.name))?;
            Ok(resolved.strategy_index)
        })
        .await;

        match outcome.result {
            Ok(strategy_index) => Ok(InteractionOutcome {
                success: true,
                alert_text: None,
                strategy_index,
                attempts: outcome.attempts,
            }),
            Err(err) => {
                warn!(
                    descriptor = %descriptor.name,
                    attempts = outcome.attempts,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    error = %err,
                    "Interaction failed"
                );
                Err(err)
            }
        }
    }

    async fn act(&self, resolved: &Resolved, interaction: &Interaction) -> Result<()> {
        let handle = &resolved.handle;
        match interaction {
            Interaction::Click => self.page.click(handle, false).await,
            Interaction::ForceClick => self.page.click(handle, true).await,
            Interaction::Check => {
                let state = self.page.inspect(handle).await?;
                if state.checked == Some(true) {
                    return Ok(());
                }
                self.page.click(handle, !resolved.require_visible).await
            }
            Interaction::Fill(text) => self.page.fill(handle, text).await,
            Interaction::SelectOption(label) => {
                self.page.click(handle, false).await?;
                let option = ControlDescriptor::new(format!("option '{label}'"))
                    .or(Locator::role_named("option", label.clone()))
                    .or(Strategy::new(Locator::text(label.clone())).first());
                let picked = self.resolve(&option).await?;
                self.page.click(&picked.handle, false).await
            }
        }
    }

    pub async fn click(&self, descriptor: &ControlDescriptor) -> Result<InteractionOutcome> {
        self.perform(descriptor, &Interaction::Click).await
    }

    pub async fn force_click(&self, descriptor: &ControlDescriptor) -> Result<InteractionOutcome> {
        self.perform(descriptor, &Interaction::ForceClick).await
    }

    pub async fn fill(
        &self,
        descriptor: &ControlDescriptor,
        text: impl Into<String>,
    ) -> Result<InteractionOutcome> {
        self.perform(descriptor, &Interaction::Fill(text.into())).await
    }

    /// Check a checkbox. Already-checked boxes are left alone.
    pub async fn check(&self, descriptor: &ControlDescriptor) -> Result<InteractionOutcome> {
        self.perform(descriptor, &Interaction::Check).await
    }

    pub async fn select_option(
        &self,
        descriptor: &ControlDescriptor,
        label: impl Into<String>,
    ) -> Result<InteractionOutcome> {
        self.perform(descriptor, &Interaction::SelectOption(label.into()))
            .await
    }

    pub async fn press(&self, key: Key) -> Result<()> {
        self.page.press(key).await
    }

    /// Trimmed visible text of the resolved control.
    pub async fn text_of(&self, descriptor: &ControlDescriptor) -> Result<String> {
        let resolved = self.resolve(descriptor).await?;
        let state = self
            .page
            .inspect(&resolved.handle)
            .await
            .map_err(|e| attribute(e, &descriptor.name))?;
        Ok(state.text)
    }

    /// Read the notification surface described by `descriptor`.
    ///
    /// The first non-empty text wins; multiple alerts are tolerated.
    pub async fn capture_notification(
        &self,
        descriptor: &ControlDescriptor,
    ) -> Result<Notification> {
        let surface = descriptor.clone().first();
        let resolved = self.resolve(&surface).await?;
        let state = self
            .page
            .inspect(&resolved.handle)
            .await
            .map_err(|e| attribute(e, &descriptor.name))?;
        let source = surface
            .strategies
            .get(resolved.strategy_index)
            .map_or_else(|| descriptor.name.clone(), Strategy::describe);
        debug!(source = %source, text = %state.text, "Captured notification");
        Ok(Notification {
            text: state.text,
            source,
        })
    }

    async fn resolve_scope(&self, descriptor: &ControlDescriptor) -> Result<Option<ElementHandle>> {
        let mut within: Option<ElementHandle> = None;
        for scope in descriptor.scope_chain() {
            let resolved = self.resolve_in(scope, within.as_ref()).await?;
            within = Some(resolved);
        }
        Ok(within)
    }

    /// Resolve a scope level (no nested scope) inside `within`.
    async fn resolve_in(
        &self,
        descriptor: &ControlDescriptor,
        within: Option<&ElementHandle>,
    ) -> Result<ElementHandle> {
        for strategy in &descriptor.strategies {
            let matches = self.poll_strategy(&descriptor.name, strategy, within).await?;
            let count = matches.len();
            let picked = match strategy.pick {
                Pick::Unique if count > 1 => {
                    return Err(InteractionError::AmbiguousMatch {
                        descriptor: descriptor.name.clone(),
                        strategy: strategy.describe(),
                        count,
                    }
                    .into());
                }
                Pick::Unique | Pick::First => matches.into_iter().next(),
                Pick::Nth(n) => matches.into_iter().nth(n),
            };
            if let Some(handle) = picked {
                return Ok(handle);
            }
        }
        Err(InteractionError::ElementNotFound {
            descriptor: descriptor.name.clone(),
            strategies_tried: descriptor.strategies.iter().map(Strategy::describe).collect(),
        }
        .into())
    }

    /// Poll one strategy until enough usable matches appear or its budget runs out.
    ///
    /// An empty result means the strategy is exhausted.
    async fn poll_strategy(
        &self,
        name: &str,
        strategy: &Strategy,
        within: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>> {
        let page = self.page;
        let locator = &strategy.locator;
        let require_visible = strategy.require_visible;
        let required = strategy.pick.required();

        let polled = wait_for(
            format!("{name} via {}", strategy.describe()),
            || async move {
                match usable_matches(page, locator, within, require_visible).await {
                    Ok(found) if found.len() >= required => WaitFor::Ready(Ok(found)),
                    Ok(found) => WaitFor::not_ready(format!("{} usable matches", found.len())),
                    // A broken connection will not heal within one strategy's budget.
                    Err(err @ Error::Interaction(InteractionError::Backend(_))) => {
                        WaitFor::Ready(Err(err))
                    }
                    Err(err) if err.severity() == Severity::Transient => {
                        WaitFor::not_ready(err.to_string())
                    }
                    Err(err) => WaitFor::Ready(Err(err)),
                }
            },
            strategy.timeout,
            &self.poll,
        )
        .await;

        match polled {
            Ok(result) => result,
            Err(timeout) => {
                debug!(
                    descriptor = name,
                    strategy = %strategy.describe(),
                    retries = timeout.retries,
                    "Strategy budget exhausted"
                );
                Ok(Vec::new())
            }
        }
    }
}

async fn usable_matches<P: Page>(
    page: &P,
    locator: &Locator,
    within: Option<&ElementHandle>,
    require_visible: bool,
) -> Result<Vec<ElementHandle>> {
    let candidates = page.query(locator, within).await?;
    let mut usable = Vec::with_capacity(candidates.len());
    for handle in candidates {
        match page.inspect(&handle).await {
            Ok(state) if state.usable(require_visible) => usable.push(handle),
            Ok(_) => {}
            // Detached between query and inspect.
            Err(Error::Interaction(InteractionError::Detached { .. })) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(usable)
}

/// Replace the page's element token with the descriptor name in transient errors.
fn attribute(err: Error, name: &str) -> Error {
    match err {
        Error::Interaction(InteractionError::Detached { .. }) => InteractionError::Detached {
            descriptor: name.to_string(),
        }
        .into(),
        Error::Interaction(InteractionError::Intercepted { .. }) => {
            InteractionError::Intercepted {
                descriptor: name.to_string(),
            }
            .into()
        }
        other => other,
    }
}
