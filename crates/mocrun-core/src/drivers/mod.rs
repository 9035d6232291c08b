//! Widget drivers built on the resolver.
//!
//! Each driver owns the interaction protocol for one composite widget:
//! - [`multiselect`]: checkbox dropdowns, including cascading ones
//! - [`datepicker`]: calendar popups opened from a "Choose date" trigger
//! - [`modal`]: open / search / select rows / confirm / save dialogs

pub mod datepicker;
pub mod modal;
pub mod multiselect;

pub use datepicker::{CalendarControls, DatePickerDriver, DateTarget};
pub use modal::{ModalFlow, ModalFlowDriver, ModalStep, RowSelector};
pub use multiselect::{MissingOption, MultiSelectDriver, MultiSelectReport, OpenMode};
