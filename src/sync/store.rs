//! Persistence boundary for the forest: row types, the `ForestStore`
//! contract the reconciliation engine runs against, and its Postgres
//! implementation. All writes go through a `sqlx::Transaction`, so one
//! reconciliation is a single atomic unit; dropping the transaction without
//! committing rolls everything back.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, Postgres, QueryBuilder, Transaction};
use time::Date;

/// Persisted project row, scoped to the user it was loaded for.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ProjectRecord {
    pub id: i64,
    pub title: String,
    pub due_date: Date,
}

/// Persisted event row, scoped to its project.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub title: String,
    pub collapsed: bool,
    pub due_date: Date,
    pub notes: Option<String>,
    pub todo_shown: bool,
    pub notes_shown: bool,
}

/// Persisted todo row, scoped to its event.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TodoRecord {
    pub id: i64,
    pub checked: bool,
    pub content: Option<String>,
}

/// Full set of writable project fields, as submitted by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectFields {
    pub title: String,
    pub due_date: Date,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventFields {
    pub title: String,
    pub collapsed: bool,
    pub due_date: Date,
    pub notes: Option<String>,
    pub todo_shown: bool,
    pub notes_shown: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TodoFields {
    pub checked: bool,
    pub content: Option<String>,
}

/// Partial update for a project row. `None` means the column is untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectChanges {
    pub title: Option<String>,
    pub due_date: Option<Date>,
}

impl ProjectChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.due_date.is_none()
    }

    /// Fold the changed columns into an in-memory record.
    pub fn apply_to(&self, record: &mut ProjectRecord) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(due_date) = self.due_date {
            record.due_date = due_date;
        }
    }
}

/// Partial update for an event row. Nullable columns use a second `Option`
/// layer so "set to NULL" and "leave alone" stay distinguishable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventChanges {
    pub title: Option<String>,
    pub collapsed: Option<bool>,
    pub due_date: Option<Date>,
    pub notes: Option<Option<String>>,
    pub todo_shown: Option<bool>,
    pub notes_shown: Option<bool>,
}

impl EventChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.collapsed.is_none()
            && self.due_date.is_none()
            && self.notes.is_none()
            && self.todo_shown.is_none()
            && self.notes_shown.is_none()
    }

    pub fn apply_to(&self, record: &mut EventRecord) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(collapsed) = self.collapsed {
            record.collapsed = collapsed;
        }
        if let Some(due_date) = self.due_date {
            record.due_date = due_date;
        }
        if let Some(notes) = &self.notes {
            record.notes = notes.clone();
        }
        if let Some(todo_shown) = self.todo_shown {
            record.todo_shown = todo_shown;
        }
        if let Some(notes_shown) = self.notes_shown {
            record.notes_shown = notes_shown;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TodoChanges {
    pub checked: Option<bool>,
    pub content: Option<Option<String>>,
}

impl TodoChanges {
    pub fn is_empty(&self) -> bool {
        self.checked.is_none() && self.content.is_none()
    }

    pub fn apply_to(&self, record: &mut TodoRecord) {
        if let Some(checked) = self.checked {
            record.checked = checked;
        }
        if let Some(content) = &self.content {
            record.content = content.clone();
        }
    }
}

/// Transactional access to one user's forest.
///
/// Inserts return the freshly assigned id so nested children can reference
/// their parent right away. Updates carry only the changed columns; callers
/// must not pass an empty change set. Deletes remove the row and all of its
/// descendants inside the same unit of work.
#[async_trait]
pub trait ForestStore: Send {
    async fn projects_for_user(&mut self, user_id: i64) -> anyhow::Result<Vec<ProjectRecord>>;
    async fn events_for_project(&mut self, project_id: i64) -> anyhow::Result<Vec<EventRecord>>;
    async fn todos_for_event(&mut self, event_id: i64) -> anyhow::Result<Vec<TodoRecord>>;

    async fn insert_project(&mut self, user_id: i64, fields: &ProjectFields)
        -> anyhow::Result<i64>;
    async fn update_project(&mut self, project_id: i64, changes: ProjectChanges)
        -> anyhow::Result<()>;
    async fn delete_project(&mut self, project_id: i64) -> anyhow::Result<()>;

    async fn insert_event(&mut self, project_id: i64, fields: &EventFields)
        -> anyhow::Result<i64>;
    async fn update_event(&mut self, event_id: i64, changes: EventChanges) -> anyhow::Result<()>;
    async fn delete_event(&mut self, event_id: i64) -> anyhow::Result<()>;

    async fn insert_todo(&mut self, event_id: i64, fields: &TodoFields) -> anyhow::Result<i64>;
    async fn update_todo(&mut self, todo_id: i64, changes: TodoChanges) -> anyhow::Result<()>;
    async fn delete_todo(&mut self, todo_id: i64) -> anyhow::Result<()>;
}

#[async_trait]
impl ForestStore for Transaction<'_, Postgres> {
    async fn projects_for_user(&mut self, user_id: i64) -> anyhow::Result<Vec<ProjectRecord>> {
        let rows = sqlx::query_as::<_, ProjectRecord>(
            r#"
            SELECT id, title, due_date
            FROM projects
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut **self)
        .await
        .context("load projects")?;
        Ok(rows)
    }

    async fn events_for_project(&mut self, project_id: i64) -> anyhow::Result<Vec<EventRecord>> {
        let rows = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT id, title, collapsed, due_date, notes, todo_shown, notes_shown
            FROM events
            WHERE project_id = $1
            ORDER BY id
            "#,
        )
        .bind(project_id)
        .fetch_all(&mut **self)
        .await
        .context("load events")?;
        Ok(rows)
    }

    async fn todos_for_event(&mut self, event_id: i64) -> anyhow::Result<Vec<TodoRecord>> {
        let rows = sqlx::query_as::<_, TodoRecord>(
            r#"
            SELECT id, checked, content
            FROM todos
            WHERE event_id = $1
            ORDER BY id
            "#,
        )
        .bind(event_id)
        .fetch_all(&mut **self)
        .await
        .context("load todos")?;
        Ok(rows)
    }

    async fn insert_project(
        &mut self,
        user_id: i64,
        fields: &ProjectFields,
    ) -> anyhow::Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO projects (user_id, title, due_date)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(&fields.title)
        .bind(fields.due_date)
        .fetch_one(&mut **self)
        .await
        .context("insert project")?;
        Ok(id)
    }

    async fn update_project(
        &mut self,
        project_id: i64,
        changes: ProjectChanges,
    ) -> anyhow::Result<()> {
        debug_assert!(!changes.is_empty());
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE projects SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(title) = changes.title {
                set.push("title = ").push_bind_unseparated(title);
            }
            if let Some(due_date) = changes.due_date {
                set.push("due_date = ").push_bind_unseparated(due_date);
            }
        }
        qb.push(" WHERE id = ").push_bind(project_id);
        qb.build()
            .execute(&mut **self)
            .await
            .context("update project")?;
        Ok(())
    }

    async fn delete_project(&mut self, project_id: i64) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            DELETE FROM todos
            WHERE event_id IN (SELECT id FROM events WHERE project_id = $1)
            "#,
        )
        .bind(project_id)
        .execute(&mut **self)
        .await
        .context("delete project todos")?;

        sqlx::query(r#"DELETE FROM events WHERE project_id = $1"#)
            .bind(project_id)
            .execute(&mut **self)
            .await
            .context("delete project events")?;

        sqlx::query(r#"DELETE FROM projects WHERE id = $1"#)
            .bind(project_id)
            .execute(&mut **self)
            .await
            .context("delete project")?;
        Ok(())
    }

    async fn insert_event(&mut self, project_id: i64, fields: &EventFields) -> anyhow::Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO events (project_id, title, collapsed, due_date, notes, todo_shown, notes_shown)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(project_id)
        .bind(&fields.title)
        .bind(fields.collapsed)
        .bind(fields.due_date)
        .bind(&fields.notes)
        .bind(fields.todo_shown)
        .bind(fields.notes_shown)
        .fetch_one(&mut **self)
        .await
        .context("insert event")?;
        Ok(id)
    }

    async fn update_event(&mut self, event_id: i64, changes: EventChanges) -> anyhow::Result<()> {
        debug_assert!(!changes.is_empty());
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE events SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(title) = changes.title {
                set.push("title = ").push_bind_unseparated(title);
            }
            if let Some(collapsed) = changes.collapsed {
                set.push("collapsed = ").push_bind_unseparated(collapsed);
            }
            if let Some(due_date) = changes.due_date {
                set.push("due_date = ").push_bind_unseparated(due_date);
            }
            if let Some(notes) = changes.notes {
                set.push("notes = ").push_bind_unseparated(notes);
            }
            if let Some(todo_shown) = changes.todo_shown {
                set.push("todo_shown = ").push_bind_unseparated(todo_shown);
            }
            if let Some(notes_shown) = changes.notes_shown {
                set.push("notes_shown = ").push_bind_unseparated(notes_shown);
            }
        }
        qb.push(" WHERE id = ").push_bind(event_id);
        qb.build()
            .execute(&mut **self)
            .await
            .context("update event")?;
        Ok(())
    }

    async fn delete_event(&mut self, event_id: i64) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM todos WHERE event_id = $1"#)
            .bind(event_id)
            .execute(&mut **self)
            .await
            .context("delete event todos")?;

        sqlx::query(r#"DELETE FROM events WHERE id = $1"#)
            .bind(event_id)
            .execute(&mut **self)
            .await
            .context("delete event")?;
        Ok(())
    }

    async fn insert_todo(&mut self, event_id: i64, fields: &TodoFields) -> anyhow::Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO todos (event_id, checked, content)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(fields.checked)
        .bind(&fields.content)
        .fetch_one(&mut **self)
        .await
        .context("insert todo")?;
        Ok(id)
    }

    async fn update_todo(&mut self, todo_id: i64, changes: TodoChanges) -> anyhow::Result<()> {
        debug_assert!(!changes.is_empty());
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE todos SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(checked) = changes.checked {
                set.push("checked = ").push_bind_unseparated(checked);
            }
            if let Some(content) = changes.content {
                set.push("content = ").push_bind_unseparated(content);
            }
        }
        qb.push(" WHERE id = ").push_bind(todo_id);
        qb.build()
            .execute(&mut **self)
            .await
            .context("update todo")?;
        Ok(())
    }

    async fn delete_todo(&mut self, todo_id: i64) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM todos WHERE id = $1"#)
            .bind(todo_id)
            .execute(&mut **self)
            .await
            .context("delete todo")?;
        Ok(())
    }
}

/// A project with everything beneath it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectTree {
    pub project: ProjectRecord,
    pub events: Vec<EventTree>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventTree {
    pub event: EventRecord,
    pub todos: Vec<TodoRecord>,
}

/// Load the user's entire persisted forest, ordered by id at every level.
pub async fn load_forest<S: ForestStore>(
    store: &mut S,
    user_id: i64,
) -> anyhow::Result<Vec<ProjectTree>> {
    let mut forest = Vec::new();
    for project in store.projects_for_user(user_id).await? {
        let mut events = Vec::new();
        for event in store.events_for_project(project.id).await? {
            let todos = store.todos_for_event(event.id).await?;
            events.push(EventTree { event, todos });
        }
        forest.push(ProjectTree { project, events });
    }
    Ok(forest)
}

/// Serialize reconciliations for one user. Postgres releases the lock when
/// the surrounding transaction commits or rolls back.
pub async fn lock_user_forest(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .context("acquire per-user sync lock")?;
    Ok(())
}

/// Pin the surrounding transaction to one snapshot. Must run before the
/// first read, so the three per-level loads cannot straddle another
/// session's commit.
pub async fn pin_snapshot(tx: &mut Transaction<'_, Postgres>) -> anyhow::Result<()> {
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut **tx)
        .await
        .context("pin read snapshot")?;
    Ok(())
}
