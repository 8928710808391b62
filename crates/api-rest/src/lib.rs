//! # API REST
//!
//! REST API implementation for CareLink.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - The SSE event stream (`GET /events`)
//! - REST-specific concerns (JSON serialization, CORS)
//!
//! Write endpoints never block on background work: discharging a visit
//! enqueues the sync task and returns its job id immediately, and live
//! broadcasts from handlers are fire-and-forget UI feedback on top of the
//! durable notification rows.

#![warn(rust_2018_idioms)]

use axum::{
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{Json, Response},
    routing::{delete, get, post},
    Router,
};
use carelink_core::collab::{
    AccessPolicy, Action, AllowAll, DeliveryService, GlobalRecordSync, LocalCaseSheetService,
    LogDeliveryService,
};
use carelink_core::memory::MemoryStore;
use carelink_core::{
    AuditAction, CoreConfig, CoreError, CoreResult, NewAuditLogEntry, NewNotification,
    NonEmptyText, Notification, NotificationChannel, Staff, Stores, VitalThresholds,
};
use carelink_realtime::{event_stream, BroadcastEvent, Broadcaster, ChannelKey, ChannelRegistry};
use carelink_tasks::workflows::{
    DeliverNotificationArgs, DischargeSyncArgs, DischargeSyncTask, NotificationCleanupTask,
    NotificationDeliveryTask, NotificationSweepTask, VitalsMonitorTask,
    DELIVER_NOTIFICATION_TASK, DISCHARGE_SYNC_TASK,
};
use carelink_tasks::{JobState, TaskOutcome, TaskQueue, WorkerEnv};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

/// Application state for the REST API server
///
/// Contains shared state that needs to be accessible to all request
/// handlers: the resolved configuration, the store handles, the live
/// channel registry, the task queue and the authorisation gate.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<CoreConfig>,
    pub stores: Stores,
    pub registry: ChannelRegistry,
    pub queue: Arc<TaskQueue>,
    pub policy: Arc<dyn AccessPolicy>,
}

/// Build the application state for the single-binary deployment: one
/// in-memory store backing every store trait, a fresh channel registry,
/// and a task queue with every workflow registered.
///
/// Returns the state together with the [`WorkerEnv`] to hand to
/// `TaskQueue::spawn_workers`.
///
/// # Errors
/// Returns an error if `artefact_base_url` is empty.
pub fn build_state(
    cfg: Arc<CoreConfig>,
    artefact_base_url: &str,
) -> CoreResult<(AppState, WorkerEnv)> {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::from_backend(store.clone());
    let registry = ChannelRegistry::new();
    let queue = Arc::new(TaskQueue::new());

    let emr = Arc::new(GlobalRecordSync::new(store));
    let case_sheets = Arc::new(LocalCaseSheetService::new(artefact_base_url)?);
    let delivery: HashMap<NotificationChannel, Arc<dyn DeliveryService>> = [
        NotificationChannel::Email,
        NotificationChannel::InApp,
        NotificationChannel::Push,
    ]
    .into_iter()
    .map(|channel| (channel, Arc::new(LogDeliveryService) as Arc<dyn DeliveryService>))
    .collect();

    queue.register(Arc::new(DischargeSyncTask::new(
        emr,
        case_sheets,
        cfg.default_max_retries(),
    )));
    queue.register(Arc::new(NotificationDeliveryTask::new(delivery)));
    queue.register(Arc::new(NotificationSweepTask));
    queue.register(Arc::new(VitalsMonitorTask::new(
        VitalThresholds::default(),
        cfg.vitals_window(),
        cfg.default_max_retries(),
    )));
    queue.register(Arc::new(NotificationCleanupTask::new(
        cfg.notification_retention_days(),
    )));

    let env = WorkerEnv {
        stores: stores.clone(),
        broadcaster: Arc::new(registry.clone()),
    };

    Ok((
        AppState {
            cfg,
            stores,
            registry,
            queue,
            policy: Arc::new(AllowAll),
        },
        env,
    ))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        events,
        discharge_visit,
        list_notifications,
        delete_notification,
        send_message,
        lab_result_ready,
        get_task,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        DischargeReq,
        DischargeRes,
        NotificationView,
        SendMessageReq,
        SendMessageRes,
        LabResultReadyReq,
        LabResultReadyRes,
        TaskView,
    ))
)]
struct ApiDoc;

/// Build the router with every endpoint, the Swagger UI and CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/visits/:id/discharge", post(discharge_visit))
        .route("/notifications", get(list_notifications))
        .route("/notifications/:id", delete(delete_notification))
        .route("/messages", post(send_message))
        .route("/lab-results", post(lab_result_ready))
        .route("/tasks/:id", get(get_task))
        .merge(
            SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorRes>);

/// Map a domain error onto an HTTP status: missing resources are 404,
/// state-machine violations 409, malformed input 400, everything else a
/// logged 500.
fn error_response(e: CoreError) -> ApiError {
    let status = match &e {
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::InvalidState { .. } => StatusCode::CONFLICT,
        CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CoreError::Store(_) | CoreError::Collaborator { .. } | CoreError::Serialization(_) => {
            tracing::error!(error = %e, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorRes {
            error: e.to_string(),
        }),
    )
}

/// Check the authorisation gate, turning a denial into a 403.
fn authorize(state: &AppState, staff: &Staff, action: Action) -> Result<(), ApiError> {
    if state.policy.authorize(staff, action) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(ErrorRes {
                error: format!("not permitted: {action:?}"),
            }),
        ))
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Used for monitoring and load balancer health checks.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "CareLink REST API is alive".into(),
    })
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Staff member opening the stream; their channel is derived from
    /// their role at connect time.
    pub staff_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/events",
    params(EventsQuery),
    responses(
        (status = 200, description = "Server-sent event stream", content_type = "text/event-stream"),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 404, description = "Unknown staff member", body = ErrorRes)
    )
)]
/// Open the live event stream for a staff member
///
/// Derives the staff member's channel once from their role, subscribes,
/// and streams `text/event-stream` frames: a `connected` event first,
/// then broadcast events as data records, with a comment-frame heartbeat
/// whenever the heartbeat interval passes without traffic. The
/// subscription is removed whichever way the connection ends.
#[axum::debug_handler]
async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let staff = state
        .stores
        .staff
        .get_staff(query.staff_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(CoreError::not_found("staff", query.staff_id)))?;
    authorize(&state, &staff, Action::SubscribeEvents)?;

    let channel = ChannelKey::for_staff(&staff);
    tracing::info!(staff_id = %staff.id, channel = %channel, "SSE subscriber connected");

    let subscription = state.registry.subscribe(channel);
    let frames = event_stream(subscription, state.cfg.heartbeat_interval())
        .map(|frame| Ok::<_, Infallible>(frame.to_wire()));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        // Reverse proxies must not buffer the stream, or heartbeats never
        // reach the client.
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(frames))
        .map_err(|e| error_response(CoreError::Store(e.to_string())))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DischargeReq {
    /// Blank summaries are rejected at the parse boundary.
    #[schema(value_type = String)]
    pub summary: NonEmptyText,
    /// Staff member performing the discharge.
    pub discharged_by: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DischargeRes {
    pub visit_id: Uuid,
    /// Job id of the enqueued EMR sync; poll `GET /tasks/{id}`.
    pub task_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/visits/{id}/discharge",
    request_body = DischargeReq,
    params(("id" = Uuid, Path, description = "Visit id")),
    responses(
        (status = 202, description = "Visit discharged, sync enqueued", body = DischargeRes),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 404, description = "Unknown visit or staff member", body = ErrorRes),
        (status = 409, description = "Visit is not active", body = ErrorRes)
    )
)]
/// Discharge a visit
///
/// Transitions an active visit to discharged with the given summary,
/// records the discharge in the audit log and enqueues the EMR
/// synchronisation task. Does not block on the sync: the response
/// carries the job id for observability.
#[axum::debug_handler]
async fn discharge_visit(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<DischargeReq>,
) -> Result<(StatusCode, Json<DischargeRes>), ApiError> {
    let staff = state
        .stores
        .staff
        .get_staff(req.discharged_by)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(CoreError::not_found("staff", req.discharged_by)))?;
    authorize(&state, &staff, Action::DischargeVisit)?;

    let visit = state
        .stores
        .visits
        .discharge_visit(id, req.summary.into())
        .await
        .map_err(error_response)?;

    state
        .stores
        .audit
        .append_audit(NewAuditLogEntry {
            action: AuditAction::Discharge,
            resource_type: "visit",
            resource_id: visit.id,
            after_state: json!({ "status": "discharged", "discharged_by": staff.id }),
        })
        .await
        .map_err(error_response)?;

    let task_id = state
        .queue
        .enqueue(
            DISCHARGE_SYNC_TASK,
            json!(DischargeSyncArgs { visit_id: visit.id }),
        )
        .map_err(error_response)?;

    tracing::info!(visit_id = %visit.id, task_id = %task_id, "discharge accepted, sync enqueued");
    Ok((
        StatusCode::ACCEPTED,
        Json(DischargeRes {
            visit_id: visit.id,
            task_id,
        }),
    ))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RecipientQuery {
    pub recipient: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationView {
    pub id: Uuid,
    pub channel: String,
    pub subject: String,
    pub message: String,
    pub status: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub failure_reason: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationView {
    fn from(n: Notification) -> Self {
        let channel = match n.channel {
            NotificationChannel::Email => "email",
            NotificationChannel::InApp => "in_app",
            NotificationChannel::Push => "push",
        };
        let status = match n.status {
            carelink_core::NotificationStatus::Pending => "pending",
            carelink_core::NotificationStatus::Sent => "sent",
            carelink_core::NotificationStatus::Delivered => "delivered",
            carelink_core::NotificationStatus::Failed => "failed",
        };
        Self {
            id: n.id,
            channel: channel.into(),
            subject: n.subject,
            message: n.message,
            status: status.into(),
            retry_count: n.retry_count,
            max_retries: n.max_retries,
            failure_reason: n.failure_reason,
            sent_at: n.sent_at,
            delivered_at: n.delivered_at,
            failed_at: n.failed_at,
            created_at: n.created_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/notifications",
    params(RecipientQuery),
    responses(
        (status = 200, description = "Notifications for the recipient, oldest first", body = [NotificationView]),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 404, description = "Unknown recipient", body = ErrorRes)
    )
)]
/// List a recipient's durable notifications
///
/// The guaranteed delivery path: clients poll this alongside the SSE
/// stream, which is best-effort only.
#[axum::debug_handler]
async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<RecipientQuery>,
) -> Result<Json<Vec<NotificationView>>, ApiError> {
    let recipient = state
        .stores
        .staff
        .get_staff(query.recipient)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(CoreError::not_found("staff", query.recipient)))?;
    authorize(&state, &recipient, Action::ReadNotifications)?;

    let notifications = state
        .stores
        .notifications
        .list_notifications_for(query.recipient)
        .await
        .map_err(error_response)?;

    Ok(Json(
        notifications.into_iter().map(NotificationView::from).collect(),
    ))
}

#[utoipa::path(
    delete,
    path = "/notifications/{id}",
    params(
        ("id" = Uuid, Path, description = "Notification id"),
        RecipientQuery
    ),
    responses(
        (status = 204, description = "Notification deleted"),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 404, description = "No such notification for this recipient", body = ErrorRes)
    )
)]
/// Delete one of the recipient's own notifications
///
/// Owner-scoped: a notification id belonging to another recipient is a
/// 404, never a cross-user delete.
#[axum::debug_handler]
async fn delete_notification(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    Query(query): Query<RecipientQuery>,
) -> Result<StatusCode, ApiError> {
    let recipient = state
        .stores
        .staff
        .get_staff(query.recipient)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(CoreError::not_found("staff", query.recipient)))?;
    authorize(&state, &recipient, Action::DeleteNotification)?;

    let deleted = state
        .stores
        .notifications
        .delete_notification(id, query.recipient)
        .await
        .map_err(error_response)?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error_response(CoreError::not_found("notification", id)))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessageReq {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub thread_id: Uuid,
    #[schema(value_type = String)]
    pub body: NonEmptyText,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SendMessageRes {
    pub message_id: Uuid,
    pub notification_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/messages",
    request_body = SendMessageReq,
    responses(
        (status = 201, description = "Message recorded and pushed", body = SendMessageRes),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 404, description = "Unknown sender or recipient", body = ErrorRes)
    )
)]
/// Send a secure message to another staff member
///
/// Creates the durable in-app notification, enqueues its delivery, and
/// broadcasts a `secure_message` preview to the recipient's live channel
/// for immediate UI feedback.
#[axum::debug_handler]
async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageReq>,
) -> Result<(StatusCode, Json<SendMessageRes>), ApiError> {
    let sender = state
        .stores
        .staff
        .get_staff(req.sender_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(CoreError::not_found("staff", req.sender_id)))?;
    authorize(&state, &sender, Action::SendMessage)?;

    let recipient = state
        .stores
        .staff
        .get_staff(req.recipient_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(CoreError::not_found("staff", req.recipient_id)))?;

    let notification = state
        .stores
        .notifications
        .create_notification(NewNotification {
            recipient_id: recipient.id,
            channel: NotificationChannel::InApp,
            address: recipient.id.to_string(),
            subject: "New secure message".into(),
            message: req.body.to_string(),
            max_retries: state.cfg.default_max_retries(),
        })
        .await
        .map_err(error_response)?;

    state
        .queue
        .enqueue(
            DELIVER_NOTIFICATION_TASK,
            json!(DeliverNotificationArgs {
                notification_id: notification.id,
            }),
        )
        .map_err(error_response)?;

    let message_id = Uuid::new_v4();
    let preview: String = req.body.as_str().chars().take(80).collect();
    state.registry.broadcast(
        &ChannelKey::for_staff(&recipient),
        BroadcastEvent::secure_message(req.thread_id, message_id, preview),
    );

    Ok((
        StatusCode::CREATED,
        Json(SendMessageRes {
            message_id,
            notification_id: notification.id,
        }),
    ))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LabResultReadyReq {
    pub doctor_id: Uuid,
    #[schema(value_type = String)]
    pub patient_name: NonEmptyText,
    #[schema(value_type = String)]
    pub test_type: NonEmptyText,
    pub test_id: Uuid,
    pub action: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LabResultReadyRes {
    pub notification_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/lab-results",
    request_body = LabResultReadyReq,
    responses(
        (status = 201, description = "Result recorded and pushed to the doctor", body = LabResultReadyRes),
        (status = 404, description = "Unknown doctor", body = ErrorRes)
    )
)]
/// Announce a ready lab result
///
/// Called by the lab pipeline when a result lands: creates the durable
/// notification for the ordering doctor, enqueues its delivery, and
/// broadcasts `lab_result_ready` on the doctor's channel.
#[axum::debug_handler]
async fn lab_result_ready(
    State(state): State<AppState>,
    Json(req): Json<LabResultReadyReq>,
) -> Result<(StatusCode, Json<LabResultReadyRes>), ApiError> {
    let doctor = state
        .stores
        .staff
        .get_staff(req.doctor_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(CoreError::not_found("staff", req.doctor_id)))?;

    let notification = state
        .stores
        .notifications
        .create_notification(NewNotification {
            recipient_id: doctor.id,
            channel: NotificationChannel::InApp,
            address: doctor.id.to_string(),
            subject: format!("Lab result ready: {}", req.test_type),
            message: format!(
                "{} for {} is ready. {}",
                req.test_type, req.patient_name, req.action
            ),
            max_retries: state.cfg.default_max_retries(),
        })
        .await
        .map_err(error_response)?;

    state
        .queue
        .enqueue(
            DELIVER_NOTIFICATION_TASK,
            json!(DeliverNotificationArgs {
                notification_id: notification.id,
            }),
        )
        .map_err(error_response)?;

    state.registry.broadcast(
        &ChannelKey::Doctor(doctor.id),
        BroadcastEvent::lab_result_ready(req.patient_name, req.test_type, req.test_id, req.action),
    );

    Ok((
        StatusCode::CREATED,
        Json(LabResultReadyRes {
            notification_id: notification.id,
        }),
    ))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskView {
    pub id: Uuid,
    pub task_name: String,
    pub state: String,
    pub attempt: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<Value>,
    pub last_error: Option<String>,
}

fn job_state_name(state: JobState) -> &'static str {
    match state {
        JobState::Queued => "queued",
        JobState::Running => "running",
        JobState::Retrying => "retrying",
        JobState::Succeeded => "succeeded",
        JobState::Failed => "failed",
    }
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job record", body = TaskView),
        (status = 404, description = "Unknown job", body = ErrorRes)
    )
)]
/// Look up a background job
///
/// Observability endpoint for the ids returned by write endpoints: shows
/// the job's state, attempts, result and last error.
#[axum::debug_handler]
async fn get_task(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<TaskView>, ApiError> {
    let job = state
        .queue
        .job(id)
        .ok_or_else(|| error_response(CoreError::not_found("task", id)))?;

    let result = job.outcome.map(|outcome| match outcome {
        TaskOutcome::Completed(value) => value,
        TaskOutcome::Skipped(reason) => json!({ "skipped": reason }),
    });

    Ok(Json(TaskView {
        id: job.id,
        task_name: job.task_name,
        state: job_state_name(job.state).into(),
        attempt: job.attempt,
        max_retries: job.max_retries,
        enqueued_at: job.enqueued_at,
        result,
        last_error: job.last_error,
    }))
}
