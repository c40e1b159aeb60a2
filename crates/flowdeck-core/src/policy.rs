//! Who may see or change what. All checks assume both sides already share an
//! organisation; callers reject cross-tenant lookups first via [`same_tenant`].

use crate::model::{Meeting, MeetingAttendee, Task, User};

pub fn same_tenant(actor: &User, organisation_id: i64) -> bool {
    actor.organisation_id == organisation_id
}

pub fn can_access_task(actor: &User, task: &Task, assignee_ids: &[i64]) -> bool {
    if !same_tenant(actor, task.organisation_id) {
        return false;
    }
    if actor.is_admin() {
        return true;
    }
    if actor.is_manager() && actor.department_id.is_some() && actor.department_id == task.department_id {
        return true;
    }
    assignee_ids.contains(&actor.id) || task.created_by_id == actor.id
}

pub fn can_edit_task(actor: &User, task: &Task) -> bool {
    same_tenant(actor, task.organisation_id) && (actor.is_manager() || task.created_by_id == actor.id)
}

pub fn can_access_meeting(actor: &User, meeting: &Meeting, attendees: &[MeetingAttendee]) -> bool {
    if !same_tenant(actor, meeting.organisation_id) {
        return false;
    }
    actor.is_admin()
        || meeting.organizer_id == actor.id
        || attendees.iter().any(|a| a.user_id == actor.id)
        || !meeting.is_private
}

pub fn can_edit_meeting(actor: &User, meeting: &Meeting) -> bool {
    same_tenant(actor, meeting.organisation_id) && (actor.is_admin() || meeting.organizer_id == actor.id)
}

/// Admins review anyone in the tenant; managers review their own department; nobody reviews themselves.
pub fn can_review_leave(actor: &User, requester: &User) -> bool {
    if actor.id == requester.id || !same_tenant(actor, requester.organisation_id) {
        return false;
    }
    if actor.is_admin() {
        return true;
    }
    actor.is_manager() && actor.department_id.is_some() && actor.department_id == requester.department_id
}

pub fn can_manage_user(actor: &User, target: &User) -> bool {
    same_tenant(actor, target.organisation_id)
        && (actor.is_admin()
            || (actor.is_manager()
                && actor.department_id.is_some()
                && actor.department_id == target.department_id))
}
