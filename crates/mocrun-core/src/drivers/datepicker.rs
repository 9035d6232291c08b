//! Calendar popup driver.
//!
//! Opens a "Choose date" trigger, navigates the calendar to the target month,
//! clicks the day cell, and dismisses the popup. A day that never renders is
//! reported as [`DatePickerError::DayNotFound`], which callers treat as an
//! advisory.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::Result;
use crate::date::CalendarDate;
use crate::descriptor::{ControlDescriptor, Strategy};
use crate::error::{DatePickerError, Error, Severity};
use crate::page::{Key, Locator, Page};
use crate::resolver::ElementResolver;
use crate::retry::{RetryPolicy, with_retry};
use crate::wait::settle;

/// Upper bound on month navigation clicks (twenty years).
pub const MAX_MONTH_STEPS: u32 = 240;

/// Which date trigger to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateTarget {
    /// The n-th (0-based) "Choose date" trigger in document order.
    Ordinal(usize),
    /// A labelled or scoped trigger.
    Scoped(ControlDescriptor),
}

/// Calendar widget selectors and pacing.
#[derive(Debug, Clone)]
pub struct CalendarControls {
    pub trigger: ControlDescriptor,
    pub calendar: ControlDescriptor,
    pub header: ControlDescriptor,
    pub next_month: ControlDescriptor,
    pub previous_month: ControlDescriptor,
    pub open_settle: Duration,
    pub step_settle: Duration,
}

impl Default for CalendarControls {
    fn default() -> Self {
        let quick = Duration::from_millis(500);
        Self {
            trigger: ControlDescriptor::new("date trigger")
                .or(Locator::role_named("button", "Choose date")),
            calendar: ControlDescriptor::new("calendar")
                .or(Strategy::new(Locator::css(".MuiDateCalendar-root")).first())
                .or(Strategy::new(Locator::role("dialog")).first())
                .with_timeout(quick),
            header: ControlDescriptor::new("calendar header")
                .or(Strategy::new(Locator::css(".MuiPickersCalendarHeader-label")).first())
                .with_timeout(quick),
            next_month: ControlDescriptor::new("next month")
                .or(Locator::role_named("button", "Next month")),
            previous_month: ControlDescriptor::new("previous month")
                .or(Locator::role_named("button", "Previous month")),
            open_settle: Duration::from_millis(1500),
            step_settle: Duration::from_millis(150),
        }
    }
}

/// Drives calendar popups.
#[derive(Debug)]
pub struct DatePickerDriver<'r, 'p, P: Page> {
    resolver: &'r ElementResolver<'p, P>,
    controls: CalendarControls,
    scan_policy: RetryPolicy,
}

impl<'r, 'p, P: Page> DatePickerDriver<'r, 'p, P> {
    #[must_use]
    pub fn new(resolver: &'r ElementResolver<'p, P>) -> Self {
        Self {
            resolver,
            controls: CalendarControls::default(),
            scan_policy: RetryPolicy::day_scan(),
        }
    }

    #[must_use]
    pub fn with_controls(mut self, controls: CalendarControls) -> Self {
        self.controls = controls;
        self
    }

    /// Pick `date` (MM/DD/YYYY or YYYY-MM-DD) through the target trigger.
    pub async fn select(&self, target: &DateTarget, date: &str) -> Result<()> {
        let date = CalendarDate::parse(date)?;

        let trigger = match target {
            DateTarget::Ordinal(index) => {
                let available = self.resolver.enumerate(&self.controls.trigger).await?.len();
                if *index >= available {
                    return Err(DatePickerError::IndexOutOfRange {
                        index: *index,
                        available,
                    }
                    .into());
                }
                self.controls.trigger.clone().nth(*index)
            }
            DateTarget::Scoped(descriptor) => descriptor.clone(),
        };

        self.dismiss_stale_calendar().await?;

        self.resolver.force_click(&trigger).await?;
        settle(self.controls.open_settle, "calendar open").await;

        let picked = match self.navigate_to_month(&date).await {
            Ok(()) => self.click_day(date.day).await,
            Err(err) => Err(err),
        };

        // Dismissed on every path, including a failed navigation.
        if let Err(err) = self.close_calendar().await {
            if picked.is_ok() {
                return Err(err);
            }
            warn!(trigger = %trigger.name, error = %err, "Calendar not dismissed");
        }

        match picked {
            Ok(()) => {
                info!(trigger = %trigger.name, date = %date, "Date selected");
                Ok(())
            }
            Err(err) => {
                warn!(trigger = %trigger.name, date = %date, error = %err, "Date not selected");
                Err(err)
            }
        }
    }

    /// Type `date` into the `index`-th segmented date field (month, day and
    /// year spinbuttons) without opening the calendar.
    pub async fn type_date(&self, index: usize, date: &str) -> Result<()> {
        let date = CalendarDate::parse(date)?;
        let segments = [
            ("Month", format!("{:02}", date.month)),
            ("Day", format!("{:02}", date.day)),
            ("Year", format!("{:04}", date.year)),
        ];
        for (segment, value) in segments {
            let field = ControlDescriptor::new(format!("{segment} segment #{index}"))
                .or(Strategy::new(Locator::role_named("spinbutton", segment)).nth(index));
            self.resolver.click(&field).await?;
            self.resolver.fill(&field, value).await?;
        }
        info!(index, date = %date, "Date typed");
        Ok(())
    }

    async fn close_calendar(&self) -> Result<()> {
        settle(Duration::from_millis(500), "calendar close").await;
        self.resolver.press(Key::Escape).await?;
        settle(Duration::from_millis(300), "calendar close").await;
        self.resolver.page().click_neutral().await
    }

    async fn dismiss_stale_calendar(&self) -> Result<()> {
        if !self
            .resolver
            .is_present(&self.controls.calendar, Duration::ZERO)
            .await
        {
            return Ok(());
        }
        debug!("Closing calendar left open by a previous picker");
        self.resolver.press(Key::Escape).await?;
        settle(Duration::from_millis(300), "calendar dismiss").await;
        self.resolver.press(Key::Escape).await?;
        settle(Duration::from_millis(500), "calendar dismiss").await;
        self.resolver.page().click_neutral().await
    }

    /// Page the calendar to the target month. Unknown headers fall back to day-only matching.
    async fn navigate_to_month(&self, date: &CalendarDate) -> Result<()> {
        let Some(shown) = self.shown_month().await else {
            warn!(target = %date, "Calendar header unreadable, matching day in the displayed month");
            return Ok(());
        };

        let delta = shown.months_until(&date.month_start());
        if delta == 0 {
            return Ok(());
        }
        let steps = u32::try_from(delta.unsigned_abs())
            .unwrap_or(u32::MAX)
            .min(MAX_MONTH_STEPS);
        let button = if delta > 0 {
            &self.controls.next_month
        } else {
            &self.controls.previous_month
        };
        debug!(from = %shown, to = %date, steps, "Navigating calendar");

        for _ in 0..steps {
            self.resolver.click(button).await?;
            settle(self.controls.step_settle, "calendar month change").await;
        }

        if let Some(now) = self.shown_month().await {
            if now.months_until(&date.month_start()) != 0 {
                warn!(shown = %now, target = %date, "Calendar did not reach the target month");
            }
        }
        Ok(())
    }

    async fn shown_month(&self) -> Option<CalendarDate> {
        let header = self.resolver.text_of(&self.controls.header).await.ok()?;
        CalendarDate::from_month_header(&header)
    }

    async fn click_day(&self, day: u32) -> Result<()> {
        let mut attempts = 0u32;
        let result = with_retry(&self.scan_policy, || {
            attempts += 1;
            let attempt = attempts;
            async move {
                if self.scan_once(day).await? {
                    Ok(())
                } else {
                    debug!(day, attempt, "Day cell not rendered yet");
                    Err(DatePickerError::DayNotFound { day, attempts: attempt }.into())
                }
            }
        })
        .await;

        result.map_err(|err| match err {
            Error::DatePicker(DatePickerError::DayNotFound { .. }) => {
                DatePickerError::DayNotFound { day, attempts }.into()
            }
            other => other,
        })
    }

    /// One pass over the day cells inside the open calendar. Returns whether
    /// a cell was clicked.
    async fn scan_once(&self, day: u32) -> Result<bool> {
        // Day numbers outside the popup (pagination, table cells) must never match.
        if !self
            .resolver
            .is_present(&self.controls.calendar, Duration::ZERO)
            .await
        {
            debug!(day, "Calendar container not rendered");
            return Ok(false);
        }
        let cells = ControlDescriptor::new(format!("day {day}"))
            .or(Strategy::new(Locator::role("gridcell")).first())
            .or(Strategy::new(Locator::role("button")).first())
            .with_timeout(Duration::ZERO)
            .scoped(self.controls.calendar.clone());

        let page = self.resolver.page();
        for handle in self.resolver.enumerate(&cells).await? {
            let Ok(state) = page.inspect(&handle).await else {
                continue;
            };
            if state.text.trim().parse::<u32>().ok() != Some(day) {
                continue;
            }
            match page.click(&handle, true).await {
                Ok(()) => return Ok(true),
                Err(err) if err.severity() == Severity::Transient => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }
}
