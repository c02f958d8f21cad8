use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use reviewer_common::{
    Entity, PrStats, PrStatus, PullRequest, ReviewError, ReviewerSelector, Team, User, UserStats,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::service::{PullRequestWorkflow, StatsService, TeamMember, TeamService, UserService};
use crate::store::Store;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub workflow: PullRequestWorkflow,
    pub teams: TeamService,
    pub users: UserService,
    pub stats: StatsService,
    /// Requests still running after this long are cancelled.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        selector: Arc<ReviewerSelector>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            workflow: PullRequestWorkflow::new(store.clone(), selector),
            teams: TeamService::new(store.clone()),
            users: UserService::new(store.clone()),
            stats: StatsService::new(store),
            request_timeout,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTeamRequest {
    pub team_name: String,
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

#[derive(Deserialize)]
pub struct TeamNameRequest {
    pub team_name: String,
}

#[derive(Deserialize)]
pub struct SetIsActiveRequest {
    pub user_id: String,
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct CreatePullRequestRequest {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
}

#[derive(Deserialize)]
pub struct PullRequestIdRequest {
    pub pull_request_id: String,
}

#[derive(Deserialize)]
pub struct ReassignRequest {
    pub pull_request_id: String,
    pub old_user_id: String,
}

// ── Response payload types ────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct TeamResponse {
    pub team: Team,
}

#[derive(Serialize, Deserialize)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Serialize, Deserialize)]
pub struct PullRequestResponse {
    pub pr: PullRequest,
}

#[derive(Serialize, Deserialize)]
pub struct ReassignResponse {
    pub pr: PullRequest,
    pub replaced_by: String,
}

/// A review assignment as listed for a user.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PullRequestShort {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
    pub status: PrStatus,
}

impl From<PullRequest> for PullRequestShort {
    fn from(pr: PullRequest) -> Self {
        Self {
            pull_request_id: pr.pull_request_id,
            pull_request_name: pr.pull_request_name,
            author_id: pr.author_id,
            status: pr.status,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct UserReviewsResponse {
    pub user_id: String,
    pub pull_requests: Vec<PullRequestShort>,
}

#[derive(Serialize, Deserialize)]
pub struct UserStatsResponse {
    pub users: Vec<UserStats>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    InvalidRequest(String),
    Review(ReviewError),
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        ApiError::Review(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

fn status_for(err: &ReviewError) -> StatusCode {
    match err {
        ReviewError::AlreadyExists {
            entity: Entity::Team,
            ..
        } => StatusCode::BAD_REQUEST,
        ReviewError::AlreadyExists { .. } => StatusCode::CONFLICT,
        ReviewError::NotFound { .. } => StatusCode::NOT_FOUND,
        ReviewError::AlreadyMerged { .. }
        | ReviewError::ReviewerNotAssigned { .. }
        | ReviewError::NoCandidates
        | ReviewError::Conflict { .. } => StatusCode::CONFLICT,
        ReviewError::TooManyReviewers { .. } | ReviewError::InvalidReviewers(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ReviewError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ReviewError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg)
            }
            ApiError::Review(err) => {
                let status = status_for(&err);
                let message = match &err {
                    // Details were logged where the failure happened.
                    ReviewError::Internal { .. } => "internal error".to_string(),
                    other => other.to_string(),
                };
                if status != StatusCode::INTERNAL_SERVER_ERROR {
                    warn!(code = err.code(), %message, "request rejected");
                }
                (status, err.code(), message)
            }
        };
        (
            status,
            Json(serde_json::json!({"error": {"code": code, "message": message}})),
        )
            .into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/team/add", post(create_team))
        .route("/team/get", get(get_team))
        .route("/team/deactivate", post(deactivate_team))
        .route("/users/setIsActive", post(set_is_active))
        .route("/users/getReview", get(get_user_reviews))
        .route("/pullRequest/create", post(create_pull_request))
        .route("/pullRequest/merge", post(merge_pull_request))
        .route("/pullRequest/reassign", post(reassign_reviewer))
        .route("/stats/users", get(user_stats))
        .route("/stats/prs", get(pr_stats))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Run one operation under a fresh cancellation token that fires once the
/// configured request timeout elapses.
async fn with_deadline<T, F, Fut>(timeout: Duration, op: F) -> Result<T, ApiError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ReviewError>>,
{
    let cancel = CancellationToken::new();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };
    let result = op(cancel).await;
    timer.abort();
    result.map_err(ApiError::from)
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidRequest(format!("{} is required", field)));
    }
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "OK"
}

async fn create_team(
    State(state): State<SharedState>,
    payload: Result<Json<CreateTeamRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require("team_name", &req.team_name)?;
    for member in &req.members {
        require("user_id", &member.user_id)?;
    }
    let team = with_deadline(state.request_timeout, |cancel| async move {
        state.teams.create_team(&req.team_name, req.members, &cancel).await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(TeamResponse { team })))
}

async fn get_team(
    State(state): State<SharedState>,
    query: Result<Query<TeamNameRequest>, QueryRejection>,
) -> Result<Json<Team>, ApiError> {
    let Query(q) = query?;
    require("team_name", &q.team_name)?;
    let team = with_deadline(state.request_timeout, |cancel| async move {
        state.teams.get_team(&q.team_name, &cancel).await
    })
    .await?;
    Ok(Json(team))
}

async fn deactivate_team(
    State(state): State<SharedState>,
    payload: Result<Json<TeamNameRequest>, JsonRejection>,
) -> Result<Json<TeamResponse>, ApiError> {
    let Json(req) = payload?;
    require("team_name", &req.team_name)?;
    let team = with_deadline(state.request_timeout, |cancel| async move {
        state.teams.deactivate_team(&req.team_name, &cancel).await
    })
    .await?;
    Ok(Json(TeamResponse { team }))
}

async fn set_is_active(
    State(state): State<SharedState>,
    payload: Result<Json<SetIsActiveRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(req) = payload?;
    require("user_id", &req.user_id)?;
    let user = with_deadline(state.request_timeout, |cancel| async move {
        state
            .users
            .set_is_active(&req.user_id, req.is_active, &cancel)
            .await
    })
    .await?;
    Ok(Json(UserResponse { user }))
}

async fn get_user_reviews(
    State(state): State<SharedState>,
    query: Result<Query<UserIdQuery>, QueryRejection>,
) -> Result<Json<UserReviewsResponse>, ApiError> {
    let Query(q) = query?;
    require("user_id", &q.user_id)?;
    let user_id = q.user_id.clone();
    let prs = with_deadline(state.request_timeout, |cancel| async move {
        state.users.get_reviews(&user_id, &cancel).await
    })
    .await?;
    Ok(Json(UserReviewsResponse {
        user_id: q.user_id,
        pull_requests: prs.into_iter().map(PullRequestShort::from).collect(),
    }))
}

async fn create_pull_request(
    State(state): State<SharedState>,
    payload: Result<Json<CreatePullRequestRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require("pull_request_id", &req.pull_request_id)?;
    require("pull_request_name", &req.pull_request_name)?;
    require("author_id", &req.author_id)?;
    let pr = with_deadline(state.request_timeout, |cancel| async move {
        state
            .workflow
            .create_pr(
                &req.pull_request_id,
                &req.pull_request_name,
                &req.author_id,
                &cancel,
            )
            .await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(PullRequestResponse { pr })))
}

async fn merge_pull_request(
    State(state): State<SharedState>,
    payload: Result<Json<PullRequestIdRequest>, JsonRejection>,
) -> Result<Json<PullRequestResponse>, ApiError> {
    let Json(req) = payload?;
    require("pull_request_id", &req.pull_request_id)?;
    let pr = with_deadline(state.request_timeout, |cancel| async move {
        state.workflow.merge_pr(&req.pull_request_id, &cancel).await
    })
    .await?;
    Ok(Json(PullRequestResponse { pr }))
}

async fn reassign_reviewer(
    State(state): State<SharedState>,
    payload: Result<Json<ReassignRequest>, JsonRejection>,
) -> Result<Json<ReassignResponse>, ApiError> {
    let Json(req) = payload?;
    require("pull_request_id", &req.pull_request_id)?;
    require("old_user_id", &req.old_user_id)?;
    let (pr, replaced_by) = with_deadline(state.request_timeout, |cancel| async move {
        state
            .workflow
            .reassign_reviewer(&req.pull_request_id, &req.old_user_id, &cancel)
            .await
    })
    .await?;
    Ok(Json(ReassignResponse { pr, replaced_by }))
}

async fn user_stats(
    State(state): State<SharedState>,
) -> Result<Json<UserStatsResponse>, ApiError> {
    let users = with_deadline(state.request_timeout, |cancel| async move {
        state.stats.user_stats(&cancel).await
    })
    .await?;
    Ok(Json(UserStatsResponse { users }))
}

async fn pr_stats(State(state): State<SharedState>) -> Result<Json<PrStats>, ApiError> {
    let stats = with_deadline(state.request_timeout, |cancel| async move {
        state.stats.pr_stats(&cancel).await
    })
    .await?;
    Ok(Json(stats))
}
