//! Control catalog for the eMOC application.
//!
//! Each function returns a [`ControlDescriptor`] with the strategies that
//! locate one logical control, most specific first. Stage controllers never
//! build raw locators themselves.

use std::time::Duration;

use crate::descriptor::{ControlDescriptor, Strategy};
use crate::page::Locator;

/// Short budget for fallback strategies behind a primary one.
const FALLBACK_TIMEOUT: Duration = Duration::from_millis(1000);

fn button(name: &str) -> ControlDescriptor {
    ControlDescriptor::new(format!("button '{name}'")).or(Locator::role_named("button", name))
}

/// A button by exact accessible name.
#[must_use]
pub fn named_button(name: &str) -> ControlDescriptor {
    button(name)
}

/// The first option with this label in an open list.
#[must_use]
pub fn option(label: &str) -> ControlDescriptor {
    ControlDescriptor::new(format!("option '{label}'"))
        .or(Strategy::new(Locator::role_named("option", label)).first())
        .or(Strategy::new(Locator::role_containing("option", label))
            .first()
            .timeout(FALLBACK_TIMEOUT))
}

/// Search box inside an open PrimeNG dropdown.
#[must_use]
pub fn dropdown_filter() -> ControlDescriptor {
    ControlDescriptor::new("dropdown filter")
        .or(Strategy::new(Locator::css(".p-dropdown-filter")).first())
}

/// Toast or alert carrying the outcome of a submit.
#[must_use]
pub fn notification(timeout: Duration) -> ControlDescriptor {
    ControlDescriptor::new("notification")
        .or(Strategy::new(Locator::role("alert")).timeout(timeout))
        .or(Strategy::new(Locator::role("status")).timeout(FALLBACK_TIMEOUT))
        .or(Strategy::new(Locator::css(".p-toast-message")).timeout(FALLBACK_TIMEOUT))
        .or(Strategy::new(Locator::css(".success-alert")).timeout(FALLBACK_TIMEOUT))
        .or(Strategy::new(Locator::css("[class*=\"success\"]")).timeout(FALLBACK_TIMEOUT))
        .first()
}

/// "I have read and agree to the ..." checkbox shown before every decision.
#[must_use]
pub fn agreement_checkbox() -> ControlDescriptor {
    ControlDescriptor::new("agreement checkbox")
        .or(Strategy::new(Locator::role_containing(
            "checkbox",
            "I have read and agree to the",
        ))
        .first())
        .or(Strategy::new(Locator::role("checkbox"))
            .first()
            .timeout(FALLBACK_TIMEOUT))
}

pub mod login {
    use super::*;

    #[must_use]
    pub fn username() -> ControlDescriptor {
        ControlDescriptor::new("username").or(Locator::id("username"))
    }

    #[must_use]
    pub fn password() -> ControlDescriptor {
        ControlDescriptor::new("password").or(Locator::id("password"))
    }

    #[must_use]
    pub fn submit() -> ControlDescriptor {
        ControlDescriptor::new("sign in")
            .or(Locator::id("kc-login"))
            .or(Locator::role_named("button", "Sign In"))
    }
}

pub mod list {
    use super::*;

    #[must_use]
    pub fn all_tab() -> ControlDescriptor {
        ControlDescriptor::new("all eMOCs tab")
            .or(Locator::role_named("tab", "All MOCs"))
            .or(Strategy::new(Locator::role_named("tab", "All eMOCs")).timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn search_box() -> ControlDescriptor {
        ControlDescriptor::new("eMOC search")
            .or(Locator::role_named("textbox", "Search eMOCs..."))
            .or(Strategy::new(Locator::placeholder("Search eMOCs")).timeout(FALLBACK_TIMEOUT))
            .or(Strategy::new(Locator::css("input[type=\"search\"]"))
                .first()
                .timeout(FALLBACK_TIMEOUT))
    }

    /// Cell whose text is exactly the instance id.
    #[must_use]
    pub fn instance_cell(id: &str) -> ControlDescriptor {
        ControlDescriptor::new(format!("row for {id}"))
            .or(Strategy::new(Locator::role_named("cell", id)).first())
            .or(Strategy::new(Locator::text(id)).first().timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn rows() -> ControlDescriptor {
        ControlDescriptor::new("eMOC rows")
            .or(Strategy::new(Locator::css("table tbody tr")).first())
            .or(Strategy::new(Locator::role("row")).first())
    }

    #[must_use]
    pub fn filter_button() -> ControlDescriptor {
        ControlDescriptor::new("filter")
            .or(Strategy::new(Locator::css("button[class*=\"filter\"]")).first())
            .or(Strategy::new(Locator::css("[aria-label*=\"filter\"]")).first())
    }

    #[must_use]
    pub fn status_choice(status: &str) -> ControlDescriptor {
        ControlDescriptor::new(format!("status '{status}'"))
            .or(Strategy::new(Locator::role_named("option", status)).first())
            .or(Strategy::new(Locator::text(status)).first())
    }

    #[must_use]
    pub fn column_header(column: &str) -> ControlDescriptor {
        ControlDescriptor::new(format!("column '{column}'"))
            .or(Strategy::new(Locator::role_containing("columnheader", column)).first())
            .or(Strategy::new(Locator::text_containing(column)).first())
    }
}

pub mod request {
    use super::*;

    #[must_use]
    pub fn create() -> ControlDescriptor {
        button("Create MOC")
    }

    #[must_use]
    pub fn change_facility() -> ControlDescriptor {
        button("Change - Facility")
    }

    #[must_use]
    pub fn heading() -> ControlDescriptor {
        ControlDescriptor::new("form heading").or(Locator::role_named("heading", "Change - Facility"))
    }

    #[must_use]
    pub fn title() -> ControlDescriptor {
        ControlDescriptor::new("title").or(Locator::id("mocChangeTitle"))
    }

    #[must_use]
    pub fn departments() -> ControlDescriptor {
        ControlDescriptor::new("departments")
            .or(Strategy::new(Locator::text("Select Department(s)")).first())
            .or(Strategy::new(Locator::css("#mocChangeDepartments > .p-multiselect-trigger"))
                .timeout(FALLBACK_TIMEOUT))
    }

    /// Panel icon clicked twice after opening the departments dropdown.
    #[must_use]
    pub fn departments_toggle() -> ControlDescriptor {
        ControlDescriptor::new("departments toggle").or(Strategy::new(Locator::css(".p-icon")).first())
    }

    #[must_use]
    pub fn disciplines() -> ControlDescriptor {
        ControlDescriptor::new("disciplines")
            .or(Locator::css("#mocChangeDisciplines > .p-multiselect-trigger"))
            .or(Strategy::new(Locator::text("Select Discipline(s)"))
                .first()
                .timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn sub_disciplines() -> ControlDescriptor {
        ControlDescriptor::new("sub-disciplines")
            .or(Strategy::new(Locator::text_containing("Select Sub-Discipline")).first())
            .or(Strategy::new(Locator::css("#mocChangeSubDisciplines > .p-multiselect-trigger"))
                .timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn driver() -> ControlDescriptor {
        ControlDescriptor::new("driver").or(Locator::id("mocChangeDriver"))
    }

    #[must_use]
    pub fn priority() -> ControlDescriptor {
        ControlDescriptor::new("priority")
            .or(Strategy::new(Locator::css("#mocChangePriority span")).first())
            .or(Locator::id("mocChangePriority"))
    }

    #[must_use]
    pub fn privacy_policy() -> ControlDescriptor {
        ControlDescriptor::new("privacy policy").or(Locator::id("mocChangePrivacyPolicy"))
    }

    #[must_use]
    pub fn sites() -> ControlDescriptor {
        ControlDescriptor::new("sites")
            .or(Locator::css("#mocChangeSite > .p-multiselect-trigger"))
            .or(Strategy::new(Locator::id("mocChangeSite")).timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn fields() -> ControlDescriptor {
        ControlDescriptor::new("fields")
            .or(Locator::css("#mocChangeField > .p-multiselect-trigger"))
            .or(Strategy::new(Locator::text("Select Field(s)"))
                .first()
                .timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn locations() -> ControlDescriptor {
        ControlDescriptor::new("locations")
            .or(Strategy::new(Locator::text("Select Location(s)")).first())
            .or(Strategy::new(Locator::css("#mocChangeLocation > .p-multiselect-trigger"))
                .timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn description() -> ControlDescriptor {
        ControlDescriptor::new("description").or(Locator::id("mocChangeDescription"))
    }

    #[must_use]
    pub fn justification() -> ControlDescriptor {
        ControlDescriptor::new("justification").or(Locator::id("mocChangeChangeJustification"))
    }

    #[must_use]
    pub fn duration() -> ControlDescriptor {
        ControlDescriptor::new("duration")
            .or(Locator::role_named("button", "Select an option"))
            .or(Locator::id("mocChangeDuration"))
            .scoped(ControlDescriptor::new("duration field").or(Locator::id("mocChangeDuration")))
    }

    #[must_use]
    pub fn add_asset() -> ControlDescriptor {
        button("Add Asset")
    }

    #[must_use]
    pub fn row_checkbox() -> ControlDescriptor {
        ControlDescriptor::new("asset row checkbox")
            .or(Locator::css("input[type=\"checkbox\"]"))
            .or(Locator::role("checkbox"))
    }

    #[must_use]
    pub fn asset_dialog() -> ControlDescriptor {
        ControlDescriptor::new("asset dialog").or(Strategy::new(Locator::role("dialog")).first())
    }

    #[must_use]
    pub fn add_to_summary() -> ControlDescriptor {
        button("Add to Summary")
    }

    #[must_use]
    pub fn save() -> ControlDescriptor {
        ControlDescriptor::new("save").or(Strategy::new(Locator::role_named("button", "Save")).first())
    }

    /// "No" answer of the budget question.
    #[must_use]
    pub fn budget_no() -> ControlDescriptor {
        ControlDescriptor::new("budget 'No'").or(Strategy::new(Locator::role_named("radio", "No")).first())
    }

    #[must_use]
    pub fn budget_type() -> ControlDescriptor {
        ControlDescriptor::new("budget type").or(Locator::id("mocChangeBudgetType"))
    }

    #[must_use]
    pub fn estimated_cost() -> ControlDescriptor {
        ControlDescriptor::new("estimated cost").or(Locator::id("mocChangeBudgetEstimatedCost"))
    }

    #[must_use]
    pub fn account_type() -> ControlDescriptor {
        ControlDescriptor::new("account type").or(Locator::id("mocChangeBudgetAccountType"))
    }

    #[must_use]
    pub fn request_acceptor() -> ControlDescriptor {
        ControlDescriptor::new("request acceptor")
            .or(Strategy::new(Locator::css("#mocChangeRequestAcceptor span")).first())
            .or(Locator::id("mocChangeRequestAcceptor"))
    }

    #[must_use]
    pub fn submit() -> ControlDescriptor {
        ControlDescriptor::new("submit for approval")
            .or(Locator::id("btnSubmitForApprovalSection1"))
            .or(Strategy::new(Locator::role_named("button", "Submit for Approval")).timeout(FALLBACK_TIMEOUT))
    }
}

pub mod coordinator {
    use super::*;

    /// Pass / Reject toggle in the screening panel.
    #[must_use]
    pub fn decision(label: &str) -> ControlDescriptor {
        button(label)
    }

    #[must_use]
    pub fn justification() -> ControlDescriptor {
        ControlDescriptor::new("decision justification")
            .or(Locator::role_named("textbox", "Justification of decision"))
            .or(Strategy::new(Locator::placeholder("Justification"))
                .first()
                .timeout(FALLBACK_TIMEOUT))
    }

    /// "Pass eMOC" / "Reject eMOC".
    #[must_use]
    pub fn confirm(label: &str) -> ControlDescriptor {
        button(&format!("{label} eMOC"))
    }

    #[must_use]
    pub fn yes() -> ControlDescriptor {
        button("Yes")
    }
}

pub mod acceptor {
    use super::*;

    #[must_use]
    pub fn tab() -> ControlDescriptor {
        ControlDescriptor::new("acceptor tab").or(Locator::role_named("tab", "Acceptor"))
    }

    #[must_use]
    pub fn owner() -> ControlDescriptor {
        ControlDescriptor::new("MOC owner")
            .or(Strategy::new(Locator::css("#mocOwnerId span")).first())
            .or(Locator::id("mocOwnerId"))
    }

    #[must_use]
    pub fn owner_option(name: &str) -> ControlDescriptor {
        ControlDescriptor::new(format!("owner '{name}'"))
            .or(Strategy::new(Locator::role_containing("option", name)).first())
    }

    #[must_use]
    pub fn release_approval() -> ControlDescriptor {
        button("Release Approval")
    }

    #[must_use]
    pub fn approve() -> ControlDescriptor {
        button("Approve")
    }

    #[must_use]
    pub fn comment() -> ControlDescriptor {
        ControlDescriptor::new("comment")
            .or(Locator::role_named("textbox", "Add comment"))
            .or(Strategy::new(Locator::placeholder("Add comment"))
                .first()
                .timeout(FALLBACK_TIMEOUT))
    }

    /// Approve inside the "Approve Remark Button" confirmation dialog.
    #[must_use]
    pub fn remark_approve() -> ControlDescriptor {
        button("Approve").scoped(
            ControlDescriptor::new("approve remark dialog")
                .or(Locator::role_named("dialog", "Approve Remark Button"))
                .or(Strategy::new(Locator::role("dialog")).first().timeout(FALLBACK_TIMEOUT)),
        )
    }
}

pub mod owner {
    use super::*;

    #[must_use]
    pub fn add_stakeholder() -> ControlDescriptor {
        button("Add Stakeholder")
    }

    #[must_use]
    pub fn modal_search() -> ControlDescriptor {
        ControlDescriptor::new("modal search")
            .or(Strategy::new(Locator::role_named("textbox", "Search")).first())
            .or(Strategy::new(Locator::placeholder("Search")).first().timeout(FALLBACK_TIMEOUT))
    }

    /// Checkbox of the first selectable stakeholder row.
    #[must_use]
    pub fn stakeholder_row() -> ControlDescriptor {
        ControlDescriptor::new("stakeholder row checkbox")
            .or(Strategy::new(Locator::css("input[type=\"checkbox\"]")).first())
            .allow_hidden()
            .scoped(
                ControlDescriptor::new("selectable row")
                    .or(Strategy::new(Locator::role_containing("cell", "Row Selected")).first()),
            )
    }

    #[must_use]
    pub fn stakeholder_role() -> ControlDescriptor {
        ControlDescriptor::new("stakeholder role")
            .or(Strategy::new(Locator::css(".stakeholderModal-bulkField .p-dropdown-label")).first())
            .or(Strategy::new(Locator::text("Select Role")).first().timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn apply() -> ControlDescriptor {
        ControlDescriptor::new("apply").or(Strategy::new(Locator::role_named("button", "Apply")).first())
    }

    #[must_use]
    pub fn save() -> ControlDescriptor {
        ControlDescriptor::new("save").or(Strategy::new(Locator::role_named("button", "Save")).first())
    }

    #[must_use]
    pub fn plan_document() -> ControlDescriptor {
        button("Plan Document")
    }

    #[must_use]
    pub fn plan_document_name() -> ControlDescriptor {
        ControlDescriptor::new("plan document name").or(Locator::id("planDocumentName"))
    }

    /// PrimeNG single-select label inside the element with this id.
    #[must_use]
    pub fn dropdown(id: &str) -> ControlDescriptor {
        ControlDescriptor::new(id.to_string())
            .or(Locator::css(format!("#{id} > .p-dropdown-label")))
            .or(Strategy::new(Locator::id(id)).timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn department() -> ControlDescriptor {
        ControlDescriptor::new("plan department")
            .or(Strategy::new(Locator::text("Select Department(s)")).first())
    }

    #[must_use]
    pub fn discipline() -> ControlDescriptor {
        ControlDescriptor::new("plan discipline")
            .or(Strategy::new(Locator::text_containing("Select Discipline")).first())
    }

    #[must_use]
    pub fn sub_discipline() -> ControlDescriptor {
        ControlDescriptor::new("plan sub-discipline")
            .or(Strategy::new(Locator::role_named("button", "Select Sub-Discipline")).first())
            .or(Strategy::new(Locator::text_containing("Select Sub-Discipline"))
                .first()
                .timeout(FALLBACK_TIMEOUT))
    }

    /// Entry in the filtered endorsers list.
    #[must_use]
    pub fn endorser(name: &str) -> ControlDescriptor {
        ControlDescriptor::new(format!("endorser '{name}'"))
            .or(Strategy::new(Locator::text(name)).first())
            .scoped(
                ControlDescriptor::new("option list")
                    .or(Strategy::new(Locator::role_named("listbox", "Option List")).first())
                    .or(Strategy::new(Locator::role("listbox")).first().timeout(FALLBACK_TIMEOUT)),
            )
    }

    #[must_use]
    pub fn plan_description() -> ControlDescriptor {
        ControlDescriptor::new("plan description").or(Locator::id("description"))
    }

    #[must_use]
    pub fn add_to_summary() -> ControlDescriptor {
        button("Add to Summary")
    }

    #[must_use]
    pub fn suggest_methods() -> ControlDescriptor {
        button("Suggest Assessment Method(s)")
    }

    /// The `index`-th "yes" answer of the suggestion questionnaire.
    #[must_use]
    pub fn suggestion_yes(index: usize) -> ControlDescriptor {
        ControlDescriptor::new(format!("suggestion answer #{index}"))
            .or(Strategy::new(Locator::id("radio-moc_ynn_yes")).nth(index))
            .allow_hidden()
    }

    /// Method selector of the `index`-th risk method row.
    #[must_use]
    pub fn method_select(index: usize) -> ControlDescriptor {
        ControlDescriptor::new(format!("risk method #{index}"))
            .or(Strategy::new(Locator::text_containing("Select an option")).nth(index))
    }

    /// Opens the rating matrix of the `index`-th risk method row.
    #[must_use]
    pub fn matrix_action(index: usize) -> ControlDescriptor {
        ControlDescriptor::new(format!("matrix action #{index}"))
            .or(Strategy::new(Locator::role_named("button", "action")).nth(index))
            .or(Strategy::new(Locator::role_containing("button", "action"))
                .nth(index * 2)
                .timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn rating(rating: &str) -> ControlDescriptor {
        ControlDescriptor::new(format!("rating '{rating}'"))
            .or(Strategy::new(Locator::role_named("cell", rating)).first())
    }

    /// "Yes" to the additional-method question.
    #[must_use]
    pub fn another_method_yes() -> ControlDescriptor {
        ControlDescriptor::new("additional method 'Yes'")
            .or(Strategy::new(Locator::text("Yes")).first())
    }

    #[must_use]
    pub fn add_another_method() -> ControlDescriptor {
        button("Add Another Method")
    }

    /// Closing yes/no question of the risk section.
    #[must_use]
    pub fn risk_confirmation() -> ControlDescriptor {
        ControlDescriptor::new("risk confirmation")
            .or(Strategy::new(Locator::id("radio-moc_yn_yes")).nth(1))
            .allow_hidden()
    }

    #[must_use]
    pub fn risk_justification() -> ControlDescriptor {
        ControlDescriptor::new("risk justification").or(Locator::id("riskJustification"))
    }

    #[must_use]
    pub fn submit_for_endorsement() -> ControlDescriptor {
        ControlDescriptor::new("submit for endorsement")
            .or(Locator::id("btnSubmitForEndorsementSection2"))
            .or(Strategy::new(Locator::role_named("button", "Submit for Endorsement"))
                .timeout(FALLBACK_TIMEOUT))
    }

    /// Section heading or subsection title.
    #[must_use]
    pub fn section(title: &str) -> ControlDescriptor {
        ControlDescriptor::new(format!("section '{title}'"))
            .or(Strategy::new(Locator::role_containing("heading", title)).first())
            .or(Strategy::new(Locator::text_containing(title)).first())
    }
}

pub mod approver {
    use super::*;

    #[must_use]
    pub fn assignment_section() -> ControlDescriptor {
        ControlDescriptor::new("approver assignment")
            .or(Strategy::new(Locator::text_containing("4.6")).first())
            .or(Strategy::new(Locator::text_containing("Approver Assignment")).first())
    }

    #[must_use]
    pub fn comment() -> ControlDescriptor {
        ControlDescriptor::new("approval comment")
            .or(Strategy::new(Locator::role_named("textbox", "Add comment")).first())
            .or(Strategy::new(Locator::placeholder("Add comment")).first())
            .or(Strategy::new(Locator::placeholder("comment")).first().timeout(FALLBACK_TIMEOUT))
            .or(Strategy::new(Locator::css("textarea[aria-label*=\"comment\" i]"))
                .first()
                .timeout(FALLBACK_TIMEOUT))
    }

    #[must_use]
    pub fn decision(label: &str) -> ControlDescriptor {
        ControlDescriptor::new(format!("decision '{label}'"))
            .or(Locator::role_named("button", label))
            .or(Strategy::new(Locator::role_containing("button", label)).first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Pick;

    #[test]
    fn notification_prefers_alert_role() {
        let alert = notification(Duration::from_secs(10));
        assert_eq!(alert.strategies[0].locator, Locator::role("alert"));
        assert_eq!(alert.strategies[0].timeout, Duration::from_secs(10));
        assert!(alert.strategies.iter().all(|s| s.pick == Pick::First));
        assert_eq!(alert.strategies.len(), 5);
    }

    #[test]
    fn scoped_controls_resolve_scope_first() {
        let approve = acceptor::remark_approve();
        let chain = approve.scope_chain();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name, "approve remark dialog");
    }

    #[test]
    fn ordinal_controls_use_nth() {
        assert_eq!(owner::suggestion_yes(3).strategies[0].pick, Pick::Nth(3));
        assert_eq!(owner::matrix_action(1).strategies[1].pick, Pick::Nth(2));
        assert!(!owner::suggestion_yes(0).strategies[0].require_visible);
    }

    #[test]
    fn instance_cell_matches_exact_id() {
        let cell = list::instance_cell("eMOC_0004562");
        assert_eq!(
            cell.strategies[0].locator,
            Locator::role_named("cell", "eMOC_0004562")
        );
    }
}
