//! Background task endpoints

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, KeepAliveStream},
        Json, Sse,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, BoxStream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    models::{TaskEvent, TaskId, TaskSnapshot},
    utils::{AppError, AppResult},
    AppState,
};

/// Create routes for task endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/{id}", get(get_task))
        .route("/{id}/cancel", post(cancel_task))
        .route("/{id}/events", get(task_events))
}

fn parse_task_id(id: &str) -> AppResult<TaskId> {
    Uuid::parse_str(id).map_err(|_| AppError::BadRequest("Invalid task ID".to_string()))
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskSnapshot>> {
    Json(state.orchestrator.list().await)
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<TaskSnapshot>> {
    let id = parse_task_id(&id)?;
    Ok(Json(state.orchestrator.status(id).await?))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<TaskSnapshot>> {
    let id = parse_task_id(&id)?;
    Ok(Json(state.orchestrator.cancel(id).await?))
}

fn sse_event(event: &TaskEvent) -> Option<Event> {
    let name = match event {
        TaskEvent::Started { .. } => "started",
        TaskEvent::Progress { .. } => "progress",
        TaskEvent::Finished { .. } => "finished",
    };
    Event::default().event(name).json_data(event).ok()
}

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// Server-Sent Events stream of one task
///
/// Opens with the current snapshot; finished tasks get only the snapshot.
/// Lagged receivers skip the missed events.
async fn task_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Sse<KeepAliveStream<EventStream>>> {
    let id = parse_task_id(&id)?;

    // Subscribe first so no event slips in between the snapshot and the stream
    let receiver = state.orchestrator.subscribe();
    let snapshot = state.orchestrator.status(id).await?;
    let initial = Event::default()
        .event("snapshot")
        .json_data(&snapshot)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let head = stream::once(async move { Ok::<_, Infallible>(initial) });

    if snapshot.status.is_terminal() {
        return Ok(Sse::new(head.boxed()).keep_alive(KeepAlive::default()));
    }

    // Ends after the task's `finished` event
    let events = BroadcastStream::new(receiver);
    let updates = stream::unfold(Some(events), move |events| async move {
        let mut events = events?;
        while let Some(result) = events.next().await {
            match result {
                Ok(event) if event.task_id() == id => {
                    let finished = matches!(event, TaskEvent::Finished { .. });
                    return Some((event, (!finished).then_some(events)));
                }
                _ => continue,
            }
        }
        None
    })
    .filter_map(|event| async move { sse_event(&event).map(Ok) });

    Ok(Sse::new(head.chain(updates).boxed()).keep_alive(KeepAlive::default()))
}
