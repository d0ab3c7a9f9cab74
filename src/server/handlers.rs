//! Tree API endpoints.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    Json,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};

use super::repository::{RevisionInfo, TreeChange, TreeRepository};
use super::{error, success, ApiResult, AppState};
use crate::remote::tree::{is_connected_path, normalize, overlaps};

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// GET /api/revision - Current revision info.
pub async fn get_revision(State(state): State<AppState>) -> ApiResult<RevisionInfo> {
    let info = state.repo.revision_info().await;
    let revision_id = info.revision_id;
    success(info, revision_id)
}

/// GET /api/tree - The whole tree.
pub async fn get_root(State(state): State<AppState>) -> ApiResult<Value> {
    let revision_id = state.repo.revision_id().await;
    success(state.repo.get("").await.unwrap_or(Value::Null), revision_id)
}

/// GET /api/tree/{*path} - Value at a path, `null` when absent.
pub async fn get_node(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Value> {
    let revision_id = state.repo.revision_id().await;

    // Anyone who got this far is connected.
    if is_connected_path(&path) {
        return success(Value::Bool(true), revision_id);
    }

    success(state.repo.get(&path).await.unwrap_or(Value::Null), revision_id)
}

/// PUT /api/tree/{*path} - Replace the subtree at a path.
pub async fn put_node(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(value): Json<Value>,
) -> ApiResult<Value> {
    write(&state, &path, value).await
}

/// DELETE /api/tree/{*path} - Remove the subtree at a path.
pub async fn delete_node(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Value> {
    write(&state, &path, Value::Null).await
}

async fn write(state: &AppState, path: &str, value: Value) -> ApiResult<Value> {
    match state.repo.set(path, value).await {
        Ok(revision_id) => success(json!({ "path": normalize(path) }), revision_id),
        Err(e) => {
            tracing::warn!("Write to '{}' rejected: {}", path, e);
            let revision_id = state.repo.revision_id().await;
            error(e, revision_id)
        }
    }
}

/// GET /api/subscribe/{*path} - Server-sent events carrying the value at
/// a path: the current value first, then every distinct change.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Sse<KeepAliveStream<EventStream>> {
    let path = normalize(&path);
    tracing::debug!("Subscriber attached to '{}'", path);

    let events: EventStream = if is_connected_path(&path) {
        stream::once(async { Ok(value_event(&Some(Value::Bool(true)))) })
            .chain(stream::pending())
            .boxed()
    } else {
        // Register before the first read so no write falls in between.
        let changes = state.repo.changes();
        value_updates(state.repo.clone(), changes, path)
            .map(|value| Ok(value_event(&value)))
            .boxed()
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}

struct Watch {
    repo: Arc<TreeRepository>,
    changes: broadcast::Receiver<TreeChange>,
    path: String,
    last: Option<Option<Value>>,
}

/// The value at `path` now, then again whenever a write changes it.
fn value_updates(
    repo: Arc<TreeRepository>,
    changes: broadcast::Receiver<TreeChange>,
    path: String,
) -> BoxStream<'static, Option<Value>> {
    let watch = Watch {
        repo,
        changes,
        path,
        last: None,
    };

    stream::unfold(watch, |mut watch| async move {
        if watch.last.is_some() {
            loop {
                match watch.changes.recv().await {
                    Ok(change) if !overlaps(&change.path, &watch.path) => continue,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Subscriber to '{}' lagged by {}", watch.path, skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }

                let value = watch.repo.get(&watch.path).await;
                if watch.last.as_ref() != Some(&value) {
                    watch.last = Some(value);
                    break;
                }
            }
        } else {
            watch.last = Some(watch.repo.get(&watch.path).await);
        }

        let value = watch.last.clone().flatten();
        Some((value, watch))
    })
    .boxed()
}

fn value_event(value: &Option<Value>) -> Event {
    let data = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    Event::default().data(data)
}
