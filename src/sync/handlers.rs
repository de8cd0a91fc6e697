use anyhow::Context;
use axum::{extract::State, Json};
use tracing::{info, instrument};

use crate::auth::extractors::AuthIdentity;
use crate::auth::repo::User;
use crate::error::ApiError;
use crate::state::AppState;
use crate::sync::dto::{ForestResponse, SyncRequest};
use crate::sync::engine::{self, ProjectNode};
use crate::sync::store::{self, load_forest};

/// GET /forest: the caller's persisted forest as it currently stands.
#[instrument(skip(state))]
pub async fn fetch_forest(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<Json<ForestResponse>, ApiError> {
    let user = User::resolve(&state.db, &identity.subject).await?;

    let mut tx = state.db.begin().await.context("begin forest read")?;
    store::pin_snapshot(&mut tx).await?;
    let forest = load_forest(&mut tx, user.id).await?;
    tx.commit().await.context("commit forest read")?;

    Ok(Json(ForestResponse::new(&user, forest)))
}

/// POST /sync: reconcile the submitted forest against the persisted one and
/// return the result. The whole reconciliation is one transaction; on any
/// failure nothing is kept.
#[instrument(skip(state, payload))]
pub async fn sync_forest(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<ForestResponse>, ApiError> {
    let user = User::resolve(&state.db, &identity.subject).await?;
    let submitted: Vec<ProjectNode> = payload.projects.into_iter().map(ProjectNode::from).collect();

    let mut tx = state.db.begin().await.context("begin sync transaction")?;
    store::lock_user_forest(&mut tx, user.id).await?;
    engine::reconcile_forest(&mut tx, user.id, &submitted).await?;
    let forest = load_forest(&mut tx, user.id).await?;
    tx.commit().await.context("commit sync transaction")?;

    info!(user_id = user.id, projects = forest.len(), "forest synchronized");
    Ok(Json(ForestResponse::new(&user, forest)))
}
