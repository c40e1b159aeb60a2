//! Demo tenant for local development: departments, a handful of users,
//! tasks in every column and a short chat history.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use flowdeck_core::{
    validation, ChannelType, Deliverable, MessageTarget, PasswordHasher, RoleName, TaskPriority,
    TaskStatus,
};
use flowdeck_store::{NewMessage, NewOrganisation, NewTask, NewUser, Store};
use serde::Serialize;
use tracing::info;

pub const DEMO_ORG_EMAIL: &str = "demo@flowdeck.org";
pub const DEMO_ADMIN_EMAIL: &str = "admin@flowdeck.org";

const DEPARTMENTS: &[(&str, &str)] = &[
    ("Engineering", "Software development team"),
    ("Design", "UI/UX design team"),
    ("Marketing", "Marketing and growth team"),
    ("Sales", "Sales and business development"),
];

// (name, email, job title, department, role)
const USERS: &[(&str, &str, &str, &str, RoleName)] = &[
    ("John Smith", "john.smith@flowdeck.org", "Senior Developer", "Engineering", RoleName::Member),
    ("Sarah Johnson", "sarah.j@flowdeck.org", "Product Manager", "Engineering", RoleName::Manager),
    ("Mike Chen", "mike.chen@flowdeck.org", "UI/UX Designer", "Design", RoleName::Member),
    ("Emily Davis", "emily.d@flowdeck.org", "Lead Designer", "Design", RoleName::Manager),
    ("David Brown", "david.b@flowdeck.org", "Marketing Manager", "Marketing", RoleName::Manager),
    ("Lisa Wilson", "lisa.w@flowdeck.org", "Content Writer", "Marketing", RoleName::Member),
    ("Rachel Green", "rachel.g@flowdeck.org", "Sales Manager", "Sales", RoleName::Manager),
    ("Tom Anderson", "tom.a@flowdeck.org", "Sales Executive", "Sales", RoleName::Member),
];

#[derive(Debug, Serialize)]
pub struct SeedReport {
    pub organisation_id: i64,
    pub admin_email: String,
    /// Every seeded account shares this generated password.
    pub password: String,
    pub users: usize,
    pub tasks: usize,
    pub messages: usize,
}

/// Returns `None` when the demo organisation already exists.
pub fn seed_demo(store: &Store) -> Result<Option<SeedReport>> {
    if store
        .list_organisations()?
        .iter()
        .any(|org| org.email.eq_ignore_ascii_case(DEMO_ORG_EMAIL))
    {
        info!("Demo organisation already present, skipping seed");
        return Ok(None);
    }

    let password = validation::generate_random_password(16);
    let password_hash = PasswordHasher::new()
        .hash(&password)
        .context("hashing demo password")?;

    let org = store.create_organisation(&NewOrganisation {
        name: "Demo Organisation".into(),
        email: DEMO_ORG_EMAIL.into(),
        phone: Some("+1234567890".into()),
        address: None,
        website: None,
    })?;

    let mut departments = Vec::with_capacity(DEPARTMENTS.len());
    for (name, description) in DEPARTMENTS {
        departments.push(store.create_department(org.id, name, Some(description))?);
    }
    let department_id = |name: &str| {
        departments
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.id)
    };

    let new_user = |name: &str, email: &str, title: &str, dept: &str, role: RoleName| NewUser {
        email: email.to_string(),
        password_hash: password_hash.clone(),
        name: name.to_string(),
        organisation_id: org.id,
        department_id: department_id(dept),
        roles: vec![role],
        job_title: Some(title.to_string()),
        is_email_verified: true,
    };

    let admin = store.create_user(&new_user(
        "Admin User",
        DEMO_ADMIN_EMAIL,
        "System Administrator",
        "Engineering",
        RoleName::Admin,
    ))?;
    let mut users = vec![admin.clone()];
    for (name, email, title, dept, role) in USERS {
        users.push(store.create_user(&new_user(*name, *email, *title, *dept, *role))?);
    }
    let by_email = |email: &str| {
        users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.id)
            .unwrap_or(admin.id)
    };

    let now = Utc::now();
    let tasks = [
        (
            "Set up CI pipeline",
            TaskStatus::Done,
            TaskPriority::High,
            "Engineering",
            "sarah.j@flowdeck.org",
            vec!["john.smith@flowdeck.org"],
            -3,
        ),
        (
            "Implement read receipts",
            TaskStatus::InProgress,
            TaskPriority::Urgent,
            "Engineering",
            "sarah.j@flowdeck.org",
            vec!["john.smith@flowdeck.org"],
            2,
        ),
        (
            "Refresh onboarding screens",
            TaskStatus::Todo,
            TaskPriority::Medium,
            "Design",
            "emily.d@flowdeck.org",
            vec!["mike.chen@flowdeck.org"],
            7,
        ),
        (
            "Write launch blog post",
            TaskStatus::Todo,
            TaskPriority::Low,
            "Marketing",
            "david.b@flowdeck.org",
            vec!["lisa.w@flowdeck.org"],
            14,
        ),
        (
            "Quarterly pipeline review",
            TaskStatus::InProgress,
            TaskPriority::High,
            "Sales",
            "rachel.g@flowdeck.org",
            vec!["tom.a@flowdeck.org", "rachel.g@flowdeck.org"],
            -1,
        ),
    ];
    for (title, status, priority, dept, creator, assignees, due_in_days) in &tasks {
        store.create_task(&NewTask {
            title: title.to_string(),
            description: None,
            status: *status,
            priority: *priority,
            organisation_id: org.id,
            department_id: department_id(*dept),
            created_by_id: by_email(*creator),
            start_date: Some(now - Duration::days(7)),
            due_date: Some(now + Duration::days(*due_in_days)),
            estimated_hours: Some(8.0),
            deliverables: vec![
                Deliverable {
                    title: "Draft".into(),
                    completed: *status != TaskStatus::Todo,
                },
                Deliverable {
                    title: "Review".into(),
                    completed: *status == TaskStatus::Done,
                },
            ],
            assignee_ids: assignees.iter().copied().map(&by_email).collect(),
            tag_ids: Vec::new(),
        })?;
    }

    let everyone: Vec<i64> = users.iter().map(|u| u.id).collect();
    let general = store.create_channel(
        org.id,
        "General",
        Some("Company-wide announcements"),
        ChannelType::Custom,
        None,
        admin.id,
        &everyone,
    )?;
    let john = by_email("john.smith@flowdeck.org");
    let sarah = by_email("sarah.j@flowdeck.org");
    let messages = [
        NewMessage::text(admin.id, MessageTarget::Channel(general.id), "Welcome to FlowDeck!"),
        NewMessage::text(sarah, MessageTarget::Channel(general.id), "Sprint planning at 10:00."),
        NewMessage::text(sarah, MessageTarget::Direct(john), "How are the read receipts going?"),
        NewMessage::text(john, MessageTarget::Direct(sarah), "Delivered ticks work, read is next."),
    ];
    for message in &messages {
        store.insert_message(message)?;
    }

    info!(
        organisation_id = org.id,
        users = users.len(),
        tasks = tasks.len(),
        "Seeded demo organisation"
    );
    Ok(Some(SeedReport {
        organisation_id: org.id,
        admin_email: DEMO_ADMIN_EMAIL.to_string(),
        password,
        users: users.len(),
        tasks: tasks.len(),
        messages: messages.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_is_idempotent() {
        let store = Store::in_memory().unwrap();
        let report = seed_demo(&store).unwrap().expect("first run seeds");
        assert_eq!(report.users, USERS.len() + 1);
        assert_eq!(store.list_departments(report.organisation_id).unwrap().len(), 4);

        assert!(seed_demo(&store).unwrap().is_none());
        assert_eq!(store.list_users(report.organisation_id).unwrap().len(), USERS.len() + 1);
    }

    #[test]
    fn seeded_admin_can_log_in() {
        let store = Store::in_memory().unwrap();
        let report = seed_demo(&store).unwrap().unwrap();
        let (user, hash) = store
            .find_user_credentials(&report.admin_email)
            .unwrap()
            .unwrap();
        assert!(user.is_admin());
        assert!(PasswordHasher::new().verify(&report.password, &hash));
    }
}
