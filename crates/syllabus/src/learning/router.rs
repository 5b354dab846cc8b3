use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::access::{Principal, Role};
use super::assessment::AttemptSubmission;
use super::domain::{
    CompletionKey, ContentItemId, CourseId, EnrollmentId, PageInfo, PlanId, Target, TestId, UserId,
};
use super::error::EngineError;
use super::progress::VideoEvent;
use super::repository::{ArtifactStore, RecordStore};
use super::service::{LearningService, SettingsUpdate};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLES_HEADER: &str = "x-user-roles";

#[derive(Debug, Deserialize)]
pub struct EnrollmentRequest {
    /// Defaults to the caller.
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub target: Target,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct BulkEnrollmentRequest {
    pub user_ids: Vec<UserId>,
    pub target: Target,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ContentProgressRequest {
    pub progress: f64,
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialRequest {
    pub target: Target,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

type Shared<S, A> = State<Arc<LearningService<S, A>>>;

/// Router exposing the learning engine. Identity comes pre-authenticated in the
/// `x-user-id` / `x-user-roles` headers.
pub fn learning_router<S, A>(service: Arc<LearningService<S, A>>) -> Router
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    Router::new()
        .route("/api/v1/enrollments", post(enroll_handler::<S, A>))
        .route("/api/v1/enrollments/bulk", post(bulk_enroll_handler::<S, A>))
        .route(
            "/api/v1/enrollments/:enrollment_id",
            get(enrollment_handler::<S, A>).delete(remove_handler::<S, A>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_id/approve",
            post(approve_handler::<S, A>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_id/drop",
            post(drop_handler::<S, A>),
        )
        .route(
            "/api/v1/courses/:course_id/enrollments",
            delete(purge_course_handler::<S, A>),
        )
        .route(
            "/api/v1/plans/:plan_id/enrollments",
            delete(purge_plan_handler::<S, A>),
        )
        .route(
            "/api/v1/content/:item_id/progress",
            post(content_progress_handler::<S, A>).get(content_progress_view_handler::<S, A>),
        )
        .route(
            "/api/v1/videos/:item_id/progress",
            post(video_progress_handler::<S, A>).get(video_progress_view_handler::<S, A>),
        )
        .route(
            "/api/v1/videos/:item_id/analytics",
            get(video_analytics_handler::<S, A>),
        )
        .route(
            "/api/v1/tests/:test_id/attempts",
            post(submit_attempt_handler::<S, A>).get(attempt_summary_handler::<S, A>),
        )
        .route(
            "/api/v1/courses/:course_id/completion",
            get(course_completion_handler::<S, A>),
        )
        .route(
            "/api/v1/plans/:plan_id/completion",
            get(plan_completion_handler::<S, A>),
        )
        .route(
            "/api/v1/plans/:plan_id/progress",
            get(plan_progress_handler::<S, A>),
        )
        .route(
            "/api/v1/credentials/certificate",
            post(certificate_handler::<S, A>),
        )
        .route("/api/v1/credentials/badge", post(badge_handler::<S, A>))
        .route(
            "/api/v1/settings",
            get(settings_handler::<S, A>).put(update_settings_handler::<S, A>),
        )
        .with_state(service)
}

/// Identity forwarded by the gateway; unknown role names are ignored.
pub fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, EngineError> {
    let id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(EngineError::Unauthorized)?;
    let roles: Vec<Role> = headers
        .get(USER_ROLES_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|raw| raw.split(',').filter_map(Role::parse).collect())
        .unwrap_or_default();
    let roles = if roles.is_empty() {
        vec![Role::Learner]
    } else {
        roles
    };
    Ok(Principal::new(id, roles))
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::BadRequest(_) => StatusCode::BAD_REQUEST,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: EngineError) -> Response {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "request failed");
    }
    let payload = json!({
        "error": err.to_string(),
        "kind": err.kind(),
    });
    (status, Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, EngineError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

fn subject(principal: &Principal, query: UserQuery) -> UserId {
    query
        .user_id
        .map(UserId::new)
        .unwrap_or_else(|| principal.id.clone())
}

pub(crate) async fn enroll_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Json(request): Json<EnrollmentRequest>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let user_id = request.user_id.clone().unwrap_or_else(|| principal.id.clone());
        service.request_enrollment(&principal, &user_id, &request.target, request.due_date)
    });
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn bulk_enroll_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Json(request): Json<BulkEnrollmentRequest>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        service.bulk_enroll(&principal, &request.user_ids, &request.target, request.due_date)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn enrollment_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let id = EnrollmentId::new(enrollment_id);
    let result = principal_from_headers(&headers).and_then(|principal| {
        let enrollment = service.enrollment(&id)?;
        if enrollment.user_id == principal.id || principal.is_admin() {
            Ok(enrollment)
        } else {
            Err(EngineError::forbidden("enrollment belongs to another user"))
        }
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn approve_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let id = EnrollmentId::new(enrollment_id);
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.approve_enrollment(&principal, &id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn drop_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let id = EnrollmentId::new(enrollment_id);
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.drop_enrollment(&principal, &id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn remove_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let id = EnrollmentId::new(enrollment_id);
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.remove_enrollment(&principal, &id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn purge_course_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(course_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let target = Target::Course(CourseId::new(course_id));
    purge(&service, &headers, &target)
}

pub(crate) async fn purge_plan_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(plan_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let target = Target::Plan(PlanId::new(plan_id));
    purge(&service, &headers, &target)
}

fn purge<S, A>(service: &LearningService<S, A>, headers: &HeaderMap, target: &Target) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let result = principal_from_headers(headers)
        .and_then(|principal| service.purge_enrollments(&principal, target))
        .map(|removed| {
            json!({
                "target": target,
                "removed": removed.len(),
            })
        });
    respond(StatusCode::OK, result)
}

pub(crate) async fn content_progress_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Json(request): Json<ContentProgressRequest>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let item_id = ContentItemId::new(item_id);
    let page = PageInfo {
        current_page: request.current_page,
        total_pages: request.total_pages,
    };
    let result = principal_from_headers(&headers).and_then(|principal| {
        service.record_content_progress(&principal, &item_id, request.progress, Some(page))
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn video_progress_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Json(event): Json<VideoEvent>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let item_id = ContentItemId::new(item_id);
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.record_video_progress(&principal, &item_id, event));
    respond(StatusCode::OK, result)
}

pub(crate) async fn content_progress_view_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let item_id = ContentItemId::new(item_id);
    let result = principal_from_headers(&headers).and_then(|principal| {
        let user_id = subject(&principal, query);
        service
            .content_progress(&principal, &user_id, &item_id)?
            .ok_or_else(|| EngineError::not_found(format!("progress of {user_id} on {item_id}")))
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn video_progress_view_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let item_id = ContentItemId::new(item_id);
    let result = principal_from_headers(&headers).and_then(|principal| {
        let user_id = subject(&principal, query);
        service
            .video_progress(&principal, &user_id, &item_id)?
            .ok_or_else(|| EngineError::not_found(format!("progress of {user_id} on {item_id}")))
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn video_analytics_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let item_id = ContentItemId::new(item_id);
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.video_analytics(&principal, &item_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn submit_attempt_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(test_id): Path<String>,
    Json(submission): Json<AttemptSubmission>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let test_id = TestId::new(test_id);
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.submit_test_attempt(&principal, &test_id, submission));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn attempt_summary_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(test_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let test_id = TestId::new(test_id);
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.attempt_summary(&principal.id, &test_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn course_completion_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(course_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let course_id = CourseId::new(course_id);
    let result = principal_from_headers(&headers).and_then(|principal| {
        let user_id = subject(&principal, query);
        service.is_course_complete(&principal, &user_id, &course_id)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn plan_completion_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(plan_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let plan_id = PlanId::new(plan_id);
    let result = principal_from_headers(&headers).and_then(|principal| {
        let user_id = subject(&principal, query);
        service.is_plan_complete(&principal, &user_id, &plan_id)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn plan_progress_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Path(plan_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let plan_id = PlanId::new(plan_id);
    let result = principal_from_headers(&headers).and_then(|principal| {
        let user_id = subject(&principal, query);
        service.plan_progress(&principal, &user_id, &plan_id)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn certificate_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Json(request): Json<CredentialRequest>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let key = credential_key(&principal, request);
        service.issue_certificate(&principal, &key)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn badge_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Json(request): Json<CredentialRequest>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let key = credential_key(&principal, request);
        service.award_badge(&principal, &key)
    });
    respond(StatusCode::OK, result)
}

fn credential_key(principal: &Principal, request: CredentialRequest) -> CompletionKey {
    let user_id = request.user_id.unwrap_or_else(|| principal.id.clone());
    CompletionKey::aggregate(user_id, request.target)
}

pub(crate) async fn settings_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let result = principal_from_headers(&headers).and_then(|_| service.settings());
    respond(StatusCode::OK, result)
}

pub(crate) async fn update_settings_handler<S, A>(
    State(service): Shared<S, A>,
    headers: HeaderMap,
    Json(update): Json<SettingsUpdate>,
) -> Response
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.update_settings(&principal, update));
    respond(StatusCode::OK, result)
}
