use chrono::{Duration, NaiveDate, Utc};
use flowdeck_core::{
    AttendanceResponse, DeliveryState, LeaveStatus, LeaveType, MeetingView, MessageTarget,
    NewNotification, NotificationKind, QuotaBucket, RoleName, SortOrder, TaskPriority, TaskQuery,
    TaskScope, TaskSort, TaskStatus, User,
};
use flowdeck_store::{
    MeetingFilter, MeetingUpdate, NewAgendaItem, NewHoliday, NewLeaveRequest, NewMeeting,
    NewMessage, NewOrganisation, NewTask, NewTimeLog, NewUser, Store, StoreError, TaskUpdate,
};
use tempfile::TempDir;

struct Tenant {
    org_id: i64,
    dept_id: i64,
    admin: User,
    manager: User,
    member: User,
}

fn org(email: &str) -> NewOrganisation {
    NewOrganisation {
        name: "Acme".into(),
        email: email.into(),
        phone: None,
        address: None,
        website: None,
    }
}

fn user(org_id: i64, dept: Option<i64>, email: &str, roles: Vec<RoleName>) -> NewUser {
    NewUser {
        email: email.into(),
        password_hash: "hash".into(),
        name: email.split('@').next().unwrap_or(email).to_string(),
        organisation_id: org_id,
        department_id: dept,
        roles,
        job_title: None,
        is_email_verified: true,
    }
}

fn tenant(store: &Store, domain: &str) -> Tenant {
    let (organisation, admin) = store
        .register_organisation(&org(&format!("info@{domain}")), |id| {
            user(id, None, &format!("admin@{domain}"), vec![RoleName::Admin])
        })
        .unwrap();
    let dept = store
        .create_department(organisation.id, "Engineering", None)
        .unwrap();
    let manager = store
        .create_user(&user(
            organisation.id,
            Some(dept.id),
            &format!("manager@{domain}"),
            vec![RoleName::Manager],
        ))
        .unwrap();
    let member = store
        .create_user(&user(
            organisation.id,
            Some(dept.id),
            &format!("member@{domain}"),
            vec![RoleName::Member],
        ))
        .unwrap();
    Tenant {
        org_id: organisation.id,
        dept_id: dept.id,
        admin,
        manager,
        member,
    }
}

fn task(t: &Tenant, title: &str, assignees: Vec<i64>) -> NewTask {
    NewTask {
        title: title.into(),
        description: None,
        status: TaskStatus::Todo,
        priority: TaskPriority::Medium,
        organisation_id: t.org_id,
        department_id: Some(t.dept_id),
        created_by_id: t.manager.id,
        start_date: None,
        due_date: None,
        estimated_hours: None,
        deliverables: Vec::new(),
        assignee_ids: assignees,
        tag_ids: Vec::new(),
    }
}

#[test]
fn test_duplicate_emails_conflict() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");

    let err = store
        .create_user(&user(t.org_id, None, "MEMBER@acme.io", vec![RoleName::Member]))
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");

    let err = store
        .register_organisation(&org("info@acme.io"), |id| {
            user(id, None, "other@acme.io", vec![RoleName::Admin])
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert!(store.find_user_credentials("other@acme.io").unwrap().is_none());
}

#[test]
fn test_department_members_join_team_channel() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");

    let channels = store.channels_for_user(t.member.id).unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "Engineering - Team Chat");
    assert_eq!(channels[0].department_id, Some(t.dept_id));
    assert!(store.channels_for_user(t.admin.id).unwrap().is_empty());
}

#[test]
fn test_list_tasks_filters_sorts_and_pages() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let now = Utc::now();

    for (i, priority) in [TaskPriority::Low, TaskPriority::Urgent, TaskPriority::High]
        .into_iter()
        .enumerate()
    {
        let mut new = task(&t, &format!("Task {i}"), vec![t.member.id]);
        new.priority = priority;
        new.due_date = Some(now + Duration::days(i as i64 + 1));
        store.create_task(&new).unwrap();
    }
    store
        .create_task(&task(&t, "Unassigned 100%_done", vec![]))
        .unwrap();

    let mut query = TaskQuery::new(TaskScope::AssignedTo(t.member.id));
    query.sort = TaskSort::Priority;
    query.order = SortOrder::Desc;
    let (tasks, total) = store.list_tasks(&query).unwrap();
    assert_eq!(total, 3);
    let priorities: Vec<_> = tasks.iter().map(|t| t.priority).collect();
    assert_eq!(
        priorities,
        vec![TaskPriority::Urgent, TaskPriority::High, TaskPriority::Low]
    );

    query.per_page = 2;
    query.page = 2;
    let (page, total) = store.list_tasks(&query).unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 1);

    let mut search = TaskQuery::new(TaskScope::Organisation(t.org_id));
    search.search = Some("100%_".into());
    let (found, _) = store.list_tasks(&search).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "Unassigned 100%_done");
}

#[test]
fn test_status_change_writes_history_and_completed_date_once() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let created = store.create_task(&task(&t, "Ship", vec![t.member.id])).unwrap();

    let change = store
        .change_task_status(created.id, t.member.id, TaskStatus::Done)
        .unwrap();
    assert_eq!(change, Some((TaskStatus::Todo, TaskStatus::Done)));
    let done = store.get_task(created.id).unwrap().unwrap();
    let completed = done.completed_date.expect("completed date");

    assert_eq!(
        store
            .change_task_status(created.id, t.member.id, TaskStatus::Done)
            .unwrap(),
        None
    );
    let again = store.get_task(created.id).unwrap().unwrap();
    assert_eq!(again.completed_date, Some(completed));

    let history = store.task_history(created.id, 20).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_value.as_deref(), Some("todo"));
    assert_eq!(history[0].new_value.as_deref(), Some("done"));
}

#[test]
fn test_update_task_reports_new_assignees_only_within_tenant() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let other = tenant(&store, "globex.io");
    let created = store.create_task(&task(&t, "Plan", vec![t.member.id])).unwrap();

    let outcome = store
        .update_task(
            created.id,
            t.manager.id,
            &TaskUpdate {
                assignee_ids: Some(vec![t.member.id, t.manager.id, other.member.id]),
                status: Some(TaskStatus::InProgress),
                ..TaskUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(outcome.added_assignees, vec![t.manager.id]);
    assert_eq!(
        outcome.status_change,
        Some((TaskStatus::Todo, TaskStatus::InProgress))
    );
    assert_eq!(
        store.task_assignee_ids(created.id).unwrap(),
        vec![t.manager.id, t.member.id]
    );
}

#[test]
fn test_time_logs_roll_up_actual_hours() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let created = store.create_task(&task(&t, "Build", vec![t.member.id])).unwrap();
    let start = Utc::now();

    for hours in [1.5, 2.25] {
        store
            .add_time_log(&NewTimeLog {
                task_id: created.id,
                user_id: t.member.id,
                start_time: start,
                end_time: None,
                duration_hours: hours,
                description: None,
            })
            .unwrap();
    }
    let task = store.get_task(created.id).unwrap().unwrap();
    assert!((task.actual_hours - 3.75).abs() < f64::EPSILON);

    let err = store
        .add_time_log(&NewTimeLog {
            task_id: created.id,
            user_id: t.member.id,
            start_time: start,
            end_time: None,
            duration_hours: 0.0,
            description: None,
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidOperation(_)));
}

#[test]
fn test_least_loaded_assignment_skips_busy_users() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    store.create_task(&task(&t, "Busy", vec![t.manager.id])).unwrap();
    let open = store.create_task(&task(&t, "Open", vec![])).unwrap();

    let picked = store.assign_least_loaded(t.dept_id, open.id).unwrap();
    assert_eq!(picked, Some(t.member.id));
    assert_eq!(store.task_assignee_ids(open.id).unwrap(), vec![t.member.id]);
}

#[test]
fn test_direct_message_ticks_are_monotonic() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let now = Utc::now();

    let sent = store
        .insert_message(&NewMessage::text(
            t.manager.id,
            MessageTarget::Direct(t.member.id),
            "hello",
        ))
        .unwrap();
    assert_eq!(sent.delivery_state(), DeliveryState::Sent);

    let delivered = store.deliver_pending_for(t.member.id, now).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].sender_id, t.manager.id);
    assert_eq!(delivered[0].state, DeliveryState::Delivered);
    assert!(store.deliver_pending_for(t.member.id, now).unwrap().is_empty());

    let later = now + Duration::seconds(5);
    let read = store.mark_conversation_read(t.member.id, t.manager.id, later).unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].state, DeliveryState::Read);

    let stored = store.get_message(sent.id).unwrap().unwrap();
    assert_eq!(stored.delivered_at, Some(now));
    assert_eq!(stored.read_at, Some(later));
    assert!(store
        .advance_delivery(sent.id, DeliveryState::Delivered, later)
        .unwrap()
        .is_none());
}

#[test]
fn test_reading_undelivered_message_stamps_both() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let now = Utc::now();
    let sent = store
        .insert_message(&NewMessage::text(
            t.member.id,
            MessageTarget::Direct(t.manager.id),
            "ping",
        ))
        .unwrap();

    let receipt = store
        .advance_delivery(sent.id, DeliveryState::Read, now)
        .unwrap()
        .expect("state changed");
    assert_eq!(receipt.state, DeliveryState::Read);
    let stored = store.get_message(sent.id).unwrap().unwrap();
    assert!(stored.is_delivered && stored.is_read);
    assert_eq!(stored.delivered_at, stored.read_at);
}

#[test]
fn test_channel_messages_carry_no_ticks() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let channel = store.channels_for_user(t.member.id).unwrap().remove(0);
    let msg = store
        .insert_message(&NewMessage::text(
            t.member.id,
            MessageTarget::Channel(channel.id),
            "standup in 5",
        ))
        .unwrap();

    assert!(store
        .advance_delivery(msg.id, DeliveryState::Read, Utc::now())
        .unwrap()
        .is_none());
    let history = store.channel_messages(channel.id, 50).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].delivery_state(), DeliveryState::Sent);
}

#[test]
fn test_recent_conversations_count_unread_per_peer() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    for text in ["one", "two"] {
        store
            .insert_message(&NewMessage::text(
                t.manager.id,
                MessageTarget::Direct(t.member.id),
                text,
            ))
            .unwrap();
    }
    store
        .insert_message(&NewMessage::text(
            t.member.id,
            MessageTarget::Direct(t.admin.id),
            "hi admin",
        ))
        .unwrap();

    let recent = store.recent_conversations(t.member.id, 10).unwrap();
    assert_eq!(recent.len(), 2);
    let with_manager = recent.iter().find(|c| c.peer_id == t.manager.id).unwrap();
    assert_eq!(with_manager.unread, 2);
    assert_eq!(with_manager.last_message, "two");
    assert_eq!(store.unread_direct_count(t.member.id).unwrap(), 2);

    let conversation = store.direct_conversation(t.member.id, t.manager.id, 1).unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].content, "two");
}

#[test]
fn test_notifications_are_private_to_their_owner() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let note = store
        .create_notification(&NewNotification::new(
            t.member.id,
            NotificationKind::System,
            "Welcome",
            "Hello",
        ))
        .unwrap();

    let err = store.mark_notification_read(t.manager.id, note.id).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    let read = store.mark_notification_read(t.member.id, note.id).unwrap();
    assert!(read.is_read);
    assert_eq!(store.unread_notification_count(t.member.id).unwrap(), 0);
    assert_eq!(store.mark_all_notifications_read(t.member.id).unwrap(), 0);
}

#[test]
fn test_meetings_visible_to_attendees_and_admins() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let now = Utc::now();
    let meeting = store
        .create_meeting(&NewMeeting {
            title: "Planning".into(),
            description: None,
            meeting_type: Default::default(),
            location: None,
            meeting_link: None,
            start_time: now + Duration::hours(1),
            end_time: now + Duration::hours(2),
            priority: Default::default(),
            is_private: true,
            organisation_id: t.org_id,
            department_id: Some(t.dept_id),
            task_id: None,
            organizer_id: t.manager.id,
            attendee_ids: vec![t.member.id],
            agenda: vec![
                NewAgendaItem {
                    title: "Goals".into(),
                    description: None,
                    duration_minutes: Some(10),
                },
                NewAgendaItem {
                    title: "Risks".into(),
                    description: None,
                    duration_minutes: None,
                },
            ],
        })
        .unwrap();

    let filter = MeetingFilter::default();
    let (for_member, _) = store.list_meetings_for(&t.member, &filter, now).unwrap();
    assert_eq!(for_member.len(), 1);
    let (for_admin, _) = store.list_meetings_for(&t.admin, &filter, now).unwrap();
    assert_eq!(for_admin.len(), 1);
    let past = MeetingFilter {
        view: MeetingView::Past,
        ..MeetingFilter::default()
    };
    assert_eq!(store.list_meetings_for(&t.member, &past, now).unwrap().1, 0);

    let agenda = store.meeting_agenda(meeting.id).unwrap();
    assert_eq!(
        agenda.iter().map(|a| a.title.as_str()).collect::<Vec<_>>(),
        vec!["Goals", "Risks"]
    );

    let reply = store
        .respond_to_meeting(meeting.id, t.member.id, AttendanceResponse::Accepted)
        .unwrap();
    assert_eq!(reply.status, AttendanceResponse::Accepted);
    assert!(store
        .respond_to_meeting(meeting.id, t.admin.id, AttendanceResponse::Declined)
        .is_err());

    let (_, added) = store
        .update_meeting(
            meeting.id,
            &MeetingUpdate {
                attendee_ids: Some(vec![t.member.id, t.admin.id]),
                ..MeetingUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(added, vec![t.admin.id]);
}

#[test]
fn test_leave_usage_and_review_scope() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let member = store.set_leave_quota(t.member.id, 10, 5, 2, t.manager.id).unwrap();
    let start = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

    let first = store
        .create_leave_request(&NewLeaveRequest {
            user_id: member.id,
            leave_type: LeaveType::Vacation,
            start_date: start,
            end_date: start + Duration::days(2),
            total_days: 3,
            reason: None,
        })
        .unwrap();
    store
        .create_leave_request(&NewLeaveRequest {
            user_id: member.id,
            leave_type: LeaveType::Annual,
            start_date: start + Duration::days(10),
            end_date: start + Duration::days(11),
            total_days: 2,
            reason: None,
        })
        .unwrap();

    let pending = store.pending_leave_for_reviewer(&t.manager).unwrap();
    assert_eq!(pending.len(), 2);
    assert!(store.pending_leave_for_reviewer(&member).unwrap().is_empty());

    store
        .review_leave(first.id, t.manager.id, LeaveStatus::Approved, Some("ok"))
        .unwrap();
    let err = store
        .review_leave(first.id, t.manager.id, LeaveStatus::Rejected, None)
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let balance = store.leave_balance(&member, QuotaBucket::Annual, 2025).unwrap();
    assert_eq!((balance.approved, balance.pending), (3, 2));
    assert_eq!(balance.remaining(), 5);
    assert!(balance.ensure_can_take(6).is_err());
    assert_eq!(
        store.leave_days_used(member.id, QuotaBucket::Annual, 2024).unwrap(),
        (0, 0)
    );
}

#[test]
fn test_leave_request_cannot_overdraw_quota() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let member = store.set_leave_quota(t.member.id, 5, 2, 2, t.manager.id).unwrap();
    let start = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
    let request = |leave_type, offset: i64, days: i64| NewLeaveRequest {
        user_id: member.id,
        leave_type,
        start_date: start + Duration::days(offset),
        end_date: start + Duration::days(offset + days - 1),
        total_days: days,
        reason: None,
    };

    store
        .create_leave_request(&request(LeaveType::Annual, 0, 4))
        .unwrap();
    // The pending 4 days leave 1 in the bucket, shared with vacation.
    let err = store
        .create_leave_request(&request(LeaveType::Vacation, 10, 2))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidOperation(ref msg) if msg.contains("only 1 remain")));
    assert_eq!(
        store.leave_days_used(member.id, QuotaBucket::Annual, 2025).unwrap(),
        (0, 4)
    );

    store
        .create_leave_request(&request(LeaveType::Vacation, 10, 1))
        .unwrap();
    store
        .create_leave_request(&request(LeaveType::Sick, 20, 2))
        .unwrap();
    // Emergency leave has no quota.
    store
        .create_leave_request(&request(LeaveType::Emergency, 30, 10))
        .unwrap();
    assert_eq!(store.leave_requests_for(member.id).unwrap().len(), 4);
}

#[test]
fn test_holidays_include_global_entries() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    let day = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
    for organisation_id in [None, Some(t.org_id)] {
        store
            .create_holiday(&NewHoliday {
                name: "Holiday".into(),
                date: day,
                holiday_type: "public".into(),
                description: None,
                organisation_id,
            })
            .unwrap();
    }
    let found = store
        .holidays_between(t.org_id, day - Duration::days(1), day)
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[test]
fn test_user_stats_completion_rate() {
    let store = Store::in_memory().unwrap();
    let t = tenant(&store, "acme.io");
    for title in ["a", "b", "c"] {
        store.create_task(&task(&t, title, vec![t.member.id])).unwrap();
    }
    let (tasks, _) = store
        .list_tasks(&TaskQuery::new(TaskScope::AssignedTo(t.member.id)))
        .unwrap();
    store
        .change_task_status(tasks[0].id, t.member.id, TaskStatus::Done)
        .unwrap();

    let stats = store.user_stats(t.member.id, Utc::now()).unwrap();
    assert_eq!(stats.total_tasks, 3);
    assert_eq!(stats.completed_tasks, 1);
    assert_eq!(stats.completion_rate, 33.33);
    assert_eq!(store.department_completion(t.dept_id).unwrap(), 33.33);

    let overview = store.org_overview(t.org_id).unwrap();
    assert_eq!(overview.total_users, 3);
    assert_eq!(overview.departments.len(), 1);
    assert_eq!(overview.top_performers[0].user_id, t.member.id);
}

#[test]
fn test_on_disk_store_persists_between_opens() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("flowdeck.db");
    {
        let store = Store::open(&path).unwrap();
        tenant(&store, "acme.io");
    }
    let reopened = Store::open(&path).unwrap();
    assert!(reopened
        .find_user_credentials("admin@acme.io")
        .unwrap()
        .is_some());
}
