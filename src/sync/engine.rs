//! Reconciliation of a client-submitted forest against the persisted one.
//!
//! The client always sends its complete current state. Each level works the
//! same way: submitted nodes carrying an id must match an existing row under
//! the same parent and are updated only where a field actually differs; nodes
//! without an id are inserted and receive their id before their children are
//! visited; existing rows the client did not mention are deleted together
//! with their descendants. A submitted id that matches nothing under its
//! parent aborts the whole call, whether it is stale, tampered with, or
//! pointing into someone else's data.
//!
//! A repeated id reconciles each time it appears, diffing against the
//! result of the previous occurrence, so the last submitted value wins.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::sync::store::{
    EventChanges, EventFields, EventRecord, ForestStore, ProjectChanges, ProjectFields,
    ProjectRecord, TodoChanges, TodoFields, TodoRecord,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("project {id} does not exist for user {user_id}")]
    ProjectNotFound { id: i64, user_id: i64 },
    #[error("event {id} does not belong to project {project_id}")]
    EventNotFound { id: i64, project_id: i64 },
    #[error("todo {id} does not belong to event {event_id}")]
    TodoNotFound { id: i64, event_id: i64 },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// One submitted project: an existing row when `id` is present, a brand new
/// one otherwise.
#[derive(Debug, Clone)]
pub struct ProjectNode {
    pub id: Option<i64>,
    pub fields: ProjectFields,
    pub events: Vec<EventNode>,
}

#[derive(Debug, Clone)]
pub struct EventNode {
    pub id: Option<i64>,
    pub fields: EventFields,
    pub todos: Vec<TodoNode>,
}

#[derive(Debug, Clone)]
pub struct TodoNode {
    pub id: Option<i64>,
    pub fields: TodoFields,
}

/// Make the persisted forest of `user_id` match `submitted`.
///
/// Resubmitting exactly what the store already holds issues no writes at
/// all. Any error leaves the transaction poisoned; the caller must roll
/// back rather than commit.
pub async fn reconcile_forest<S: ForestStore>(
    store: &mut S,
    user_id: i64,
    submitted: &[ProjectNode],
) -> Result<(), SyncError> {
    let existing = store.projects_for_user(user_id).await?;
    let mut known: HashMap<i64, ProjectRecord> =
        existing.iter().map(|p| (p.id, p.clone())).collect();
    let mut processed: HashSet<i64> = HashSet::new();

    for node in submitted {
        let project_id = match node.id {
            Some(id) => {
                let record = known
                    .get_mut(&id)
                    .ok_or(SyncError::ProjectNotFound { id, user_id })?;
                let changes = project_changes(record, &node.fields);
                if !changes.is_empty() {
                    changes.apply_to(record);
                    store.update_project(id, changes).await?;
                }
                id
            }
            None => store.insert_project(user_id, &node.fields).await?,
        };
        processed.insert(project_id);
        reconcile_events(store, project_id, &node.events).await?;
    }

    for record in &existing {
        if !processed.contains(&record.id) {
            store.delete_project(record.id).await?;
        }
    }
    Ok(())
}

async fn reconcile_events<S: ForestStore>(
    store: &mut S,
    project_id: i64,
    submitted: &[EventNode],
) -> Result<(), SyncError> {
    let existing = store.events_for_project(project_id).await?;
    let mut known: HashMap<i64, EventRecord> =
        existing.iter().map(|e| (e.id, e.clone())).collect();
    let mut processed: HashSet<i64> = HashSet::new();

    for node in submitted {
        let event_id = match node.id {
            Some(id) => {
                let record = known
                    .get_mut(&id)
                    .ok_or(SyncError::EventNotFound { id, project_id })?;
                let changes = event_changes(record, &node.fields);
                if !changes.is_empty() {
                    changes.apply_to(record);
                    store.update_event(id, changes).await?;
                }
                id
            }
            None => store.insert_event(project_id, &node.fields).await?,
        };
        processed.insert(event_id);
        reconcile_todos(store, event_id, &node.todos).await?;
    }

    for record in &existing {
        if !processed.contains(&record.id) {
            store.delete_event(record.id).await?;
        }
    }
    Ok(())
}

async fn reconcile_todos<S: ForestStore>(
    store: &mut S,
    event_id: i64,
    submitted: &[TodoNode],
) -> Result<(), SyncError> {
    let existing = store.todos_for_event(event_id).await?;
    let mut known: HashMap<i64, TodoRecord> =
        existing.iter().map(|t| (t.id, t.clone())).collect();
    let mut processed: HashSet<i64> = HashSet::new();

    for node in submitted {
        let todo_id = match node.id {
            Some(id) => {
                let record = known
                    .get_mut(&id)
                    .ok_or(SyncError::TodoNotFound { id, event_id })?;
                let changes = todo_changes(record, &node.fields);
                if !changes.is_empty() {
                    changes.apply_to(record);
                    store.update_todo(id, changes).await?;
                }
                id
            }
            None => store.insert_todo(event_id, &node.fields).await?,
        };
        processed.insert(todo_id);
    }

    for record in &existing {
        if !processed.contains(&record.id) {
            store.delete_todo(record.id).await?;
        }
    }
    Ok(())
}

fn project_changes(existing: &ProjectRecord, submitted: &ProjectFields) -> ProjectChanges {
    let mut changes = ProjectChanges::default();
    if existing.title != submitted.title {
        changes.title = Some(submitted.title.clone());
    }
    if existing.due_date != submitted.due_date {
        changes.due_date = Some(submitted.due_date);
    }
    changes
}

fn event_changes(existing: &EventRecord, submitted: &EventFields) -> EventChanges {
    let mut changes = EventChanges::default();
    if existing.title != submitted.title {
        changes.title = Some(submitted.title.clone());
    }
    if existing.collapsed != submitted.collapsed {
        changes.collapsed = Some(submitted.collapsed);
    }
    if existing.due_date != submitted.due_date {
        changes.due_date = Some(submitted.due_date);
    }
    if existing.notes != submitted.notes {
        changes.notes = Some(submitted.notes.clone());
    }
    if existing.todo_shown != submitted.todo_shown {
        changes.todo_shown = Some(submitted.todo_shown);
    }
    if existing.notes_shown != submitted.notes_shown {
        changes.notes_shown = Some(submitted.notes_shown);
    }
    changes
}

fn todo_changes(existing: &TodoRecord, submitted: &TodoFields) -> TodoChanges {
    let mut changes = TodoChanges::default();
    if existing.checked != submitted.checked {
        changes.checked = Some(submitted.checked);
    }
    if existing.content != submitted.content {
        changes.content = Some(submitted.content.clone());
    }
    changes
}
