//! Wire format shared with the client. Keys are camelCase and dates travel
//! as plain `YYYY-MM-DD` strings; the checklist under an event is keyed
//! `todo`, singular, matching what shipping clients already send.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::auth::repo::User;
use crate::sync::engine::{EventNode, ProjectNode, TodoNode};
use crate::sync::store::{EventFields, EventTree, ProjectFields, ProjectTree, TodoFields, TodoRecord};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

fn default_true() -> bool {
    true
}

/// Body of POST /sync: the client's complete current forest.
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub projects: Vec<ProjectPayload>,
}

/// Submitted project. A missing `id` marks a node created on the client
/// since the last sync.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPayload {
    #[serde(default)]
    pub id: Option<i64>,
    pub project_title: String,
    #[serde(with = "iso_date")]
    pub due_date: Date,
    #[serde(default)]
    pub events: Vec<EventPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default)]
    pub id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(with = "iso_date")]
    pub due_date: Date,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_true")]
    pub notes_shown: bool,
    #[serde(default = "default_true")]
    pub todo_shown: bool,
    #[serde(default, rename = "todo")]
    pub todos: Vec<TodoPayload>,
}

#[derive(Debug, Deserialize)]
pub struct TodoPayload {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub content: Option<String>,
}

impl From<ProjectPayload> for ProjectNode {
    fn from(p: ProjectPayload) -> Self {
        Self {
            id: p.id,
            fields: ProjectFields {
                title: p.project_title,
                due_date: p.due_date,
            },
            events: p.events.into_iter().map(EventNode::from).collect(),
        }
    }
}

impl From<EventPayload> for EventNode {
    fn from(e: EventPayload) -> Self {
        Self {
            id: e.id,
            fields: EventFields {
                title: e.title,
                collapsed: e.collapsed,
                due_date: e.due_date,
                notes: e.notes,
                todo_shown: e.todo_shown,
                notes_shown: e.notes_shown,
            },
            todos: e.todos.into_iter().map(TodoNode::from).collect(),
        }
    }
}

impl From<TodoPayload> for TodoNode {
    fn from(t: TodoPayload) -> Self {
        Self {
            id: t.id,
            fields: TodoFields {
                checked: t.checked,
                content: t.content,
            },
        }
    }
}

/// Body of every successful forest response: the caller's identity plus the
/// persisted forest as it stands after this request.
#[derive(Debug, Serialize)]
pub struct ForestResponse {
    pub user_db_id: i64,
    pub user_version_tag: String,
    pub projects: Vec<ProjectView>,
}

impl ForestResponse {
    pub fn new(user: &User, forest: Vec<ProjectTree>) -> Self {
        Self {
            user_db_id: user.id,
            user_version_tag: user.version_tag.clone(),
            projects: forest.into_iter().map(ProjectView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    pub id: i64,
    pub project_title: String,
    #[serde(with = "iso_date")]
    pub due_date: Date,
    pub events: Vec<EventView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: i64,
    pub title: String,
    pub collapsed: bool,
    #[serde(with = "iso_date")]
    pub due_date: Date,
    pub notes: Option<String>,
    pub notes_shown: bool,
    pub todo_shown: bool,
    #[serde(rename = "todo")]
    pub todos: Vec<TodoView>,
}

#[derive(Debug, Serialize)]
pub struct TodoView {
    pub id: i64,
    pub checked: bool,
    pub content: Option<String>,
}

impl From<ProjectTree> for ProjectView {
    fn from(tree: ProjectTree) -> Self {
        Self {
            id: tree.project.id,
            project_title: tree.project.title,
            due_date: tree.project.due_date,
            events: tree.events.into_iter().map(EventView::from).collect(),
        }
    }
}

impl From<EventTree> for EventView {
    fn from(tree: EventTree) -> Self {
        Self {
            id: tree.event.id,
            title: tree.event.title,
            collapsed: tree.event.collapsed,
            due_date: tree.event.due_date,
            notes: tree.event.notes,
            notes_shown: tree.event.notes_shown,
            todo_shown: tree.event.todo_shown,
            todos: tree.todos.into_iter().map(TodoView::from).collect(),
        }
    }
}

impl From<TodoRecord> for TodoView {
    fn from(record: TodoRecord) -> Self {
        Self {
            id: record.id,
            checked: record.checked,
            content: record.content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::date;

    use crate::sync::store::{EventRecord, ProjectRecord};

    #[test]
    fn parses_a_freshly_created_todo_with_defaults() {
        let todo: TodoPayload = serde_json::from_value(json!({})).unwrap();
        assert_eq!(todo.id, None);
        assert!(!todo.checked);
        assert_eq!(todo.content, None);
    }

    #[test]
    fn parses_dates_as_calendar_dates() {
        let project: ProjectPayload = serde_json::from_value(json!({
            "projectTitle": "trip",
            "dueDate": "2024-03-01",
        }))
        .unwrap();
        assert_eq!(project.due_date, date!(2024 - 03 - 01));
        assert_eq!(project.id, None);
        assert!(project.events.is_empty());
    }

    #[test]
    fn rejects_a_malformed_due_date() {
        let result: Result<ProjectPayload, _> = serde_json::from_value(json!({
            "projectTitle": "trip",
            "dueDate": "03/01/2024",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn event_visibility_flags_default_to_shown() {
        let event: EventPayload = serde_json::from_value(json!({
            "title": "kickoff",
            "dueDate": "2024-02-02",
        }))
        .unwrap();
        assert!(event.notes_shown);
        assert!(event.todo_shown);
        assert!(!event.collapsed);
        assert!(event.todos.is_empty());
    }

    #[test]
    fn checklist_travels_under_the_singular_todo_key() {
        let event: EventPayload = serde_json::from_value(json!({
            "title": "kickoff",
            "dueDate": "2024-02-02",
            "todo": [{ "content": "agenda", "checked": true }],
        }))
        .unwrap();
        assert_eq!(event.todos.len(), 1);
        assert!(event.todos[0].checked);
        assert_eq!(event.todos[0].content.as_deref(), Some("agenda"));
    }

    #[test]
    fn serializes_with_the_client_key_names() {
        let user = User {
            id: 9,
            google_id: "sub-123".into(),
            version_tag: "tag-abc".into(),
        };
        let forest = vec![ProjectTree {
            project: ProjectRecord {
                id: 1,
                title: "trip".into(),
                due_date: date!(2024 - 03 - 01),
            },
            events: vec![EventTree {
                event: EventRecord {
                    id: 2,
                    title: "pack".into(),
                    collapsed: false,
                    due_date: date!(2024 - 02 - 20),
                    notes: None,
                    todo_shown: true,
                    notes_shown: false,
                },
                todos: vec![TodoRecord {
                    id: 3,
                    checked: false,
                    content: Some("passport".into()),
                }],
            }],
        }];

        let body = serde_json::to_value(ForestResponse::new(&user, forest)).unwrap();

        assert_eq!(body["user_db_id"], 9);
        assert_eq!(body["user_version_tag"], "tag-abc");
        let project = &body["projects"][0];
        assert_eq!(project["projectTitle"], "trip");
        assert_eq!(project["dueDate"], "2024-03-01");
        let event = &project["events"][0];
        assert_eq!(event["notesShown"], false);
        assert_eq!(event["todoShown"], true);
        assert_eq!(event["todo"][0]["content"], "passport");
    }
}
