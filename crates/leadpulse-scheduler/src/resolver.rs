//! Recipient resolution: who is eligible to receive a notification.

use leadpulse_core::types::{Category, Lead, Member, RecipientScope};

/// Members eligible for `category`, in storage listing order.
///
/// Assignment-scoped categories narrow-cast to the assignee when the lead has
/// one; an unreachable or unknown assignee yields an empty set rather than the
/// owner/manager fallback.
pub fn resolve<'a>(members: &'a [Member], lead: Option<&Lead>, category: Category) -> Vec<&'a Member> {
    match category.scope() {
        RecipientScope::TenantWide => members.iter().filter(|m| m.is_reachable()).collect(),
        RecipientScope::RoleScoped => lead_managers(members),
        RecipientScope::AssignmentScoped => match lead.and_then(Lead::assignee) {
            Some(assignee) => members
                .iter()
                .filter(|m| m.id == assignee && m.is_reachable())
                .take(1)
                .collect(),
            None => lead_managers(members),
        },
    }
}

fn lead_managers(members: &[Member]) -> Vec<&Member> {
    members
        .iter()
        .filter(|m| m.role.is_lead_manager() && m.is_reachable())
        .collect()
}
