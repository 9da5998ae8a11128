//! Control-plane HTTP API: create/start/pause/resume/stop a campaign,
//! inspect its state, and poll its event stream. Grounded on
//! `fc-router::api::mod`'s `AppState` + `create_router` + `#[utoipa::path]`
//! handler shape, trimmed to this crate's narrower surface (no circuit
//! breakers, no standby/traffic status, no dashboard HTML).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bc_common::error::{CoreError, ErrorEnvelope};
use bc_common::types::{Campaign, QueueItem};
use bc_events::BroadcastSubscriberSink;
use tokio::time::timeout;
use tracing::error;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod model;

use model::{
    CampaignEventsResponse, CreateCampaignRequest, CreateCampaignResponse, NextItemResponse, PauseCampaignRequest, RecipientDto,
};

use crate::orchestrator::{self, Orchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub events: Arc<BroadcastSubscriberSink>,
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Blast Campaign Execution Core API", version = "0.1.0", description = "Campaign lifecycle control plane"),
    paths(create_campaign, start_campaign, pause_campaign, resume_campaign, stop_campaign, get_campaign, next_item, campaign_events),
    components(schemas(
        RecipientDto,
        CreateCampaignRequest,
        CreateCampaignResponse,
        PauseCampaignRequest,
        NextItemResponse,
        CampaignEventsResponse,
        Campaign,
        QueueItem,
        ErrorEnvelope,
    )),
    tags((name = "campaigns", description = "Campaign lifecycle and inspection"))
)]
pub struct ApiDoc;

pub fn create_router(orchestrator: Arc<Orchestrator>, events: Arc<BroadcastSubscriberSink>) -> Router {
    let state = AppState { orchestrator, events };

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .route("/campaigns", post(create_campaign))
        .route("/campaigns/:id/start", post(start_campaign))
        .route("/campaigns/:id/pause", post(pause_campaign))
        .route("/campaigns/:id/resume", post(resume_campaign))
        .route("/campaigns/:id/stop", post(stop_campaign))
        .route("/campaigns/:id", get(get_campaign))
        .route("/campaigns/:id/next", get(next_item))
        .route("/campaigns/:id/events", get(campaign_events))
        .with_state(state)
}

fn error_response(err: CoreError) -> Response {
    let status = match err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::IllegalTransition(_) => StatusCode::CONFLICT,
        CoreError::RecipientInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::TransportTransient(_) | CoreError::TransportPermanent(_) | CoreError::ChannelUnhealthy(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorEnvelope::from(&err))).into_response()
}

/// Create a new campaign
///
/// Builds the queue item set (applying the partial shuffle) and persists
/// the campaign in SCHEDULED state. Does not start sending.
#[utoipa::path(
    post,
    path = "/campaigns",
    tag = "campaigns",
    request_body = CreateCampaignRequest,
    responses(
        (status = 200, description = "Campaign created", body = CreateCampaignResponse),
        (status = 400, description = "Invalid request", body = ErrorEnvelope)
    )
)]
async fn create_campaign(State(state): State<AppState>, Json(req): Json<CreateCampaignRequest>) -> Response {
    let config = bc_common::config::CampaignConfig::merge_user_config(&req.config);
    let recipients = req
        .recipients
        .into_iter()
        .map(|r| orchestrator::NewRecipient { address: r.address, label: r.label, rendered_message: r.rendered_message })
        .collect();

    let result = state
        .orchestrator
        .create_campaign(orchestrator::CreateCampaignRequest {
            tenant_id: req.tenant_id,
            channel_id: req.channel_id,
            name: req.name,
            config,
            recipients,
        })
        .await;

    match result {
        Ok(campaign_id) => Json(CreateCampaignResponse { campaign_id }).into_response(),
        Err(e) => {
            error!(error = %e, "failed to create campaign");
            error_response(e)
        }
    }
}

/// Start a campaign
#[utoipa::path(
    post,
    path = "/campaigns/{id}/start",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign id")),
    responses((status = 200, description = "Campaign started"), (status = 404, description = "Not found", body = ErrorEnvelope))
)]
async fn start_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.start(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

/// Pause a campaign
#[utoipa::path(
    post,
    path = "/campaigns/{id}/pause",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign id")),
    request_body = PauseCampaignRequest,
    responses((status = 200, description = "Campaign paused"), (status = 404, description = "Not found", body = ErrorEnvelope))
)]
async fn pause_campaign(State(state): State<AppState>, Path(id): Path<String>, Json(req): Json<PauseCampaignRequest>) -> Response {
    match state.orchestrator.pause(&id, req.note).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

/// Resume a paused campaign
#[utoipa::path(
    post,
    path = "/campaigns/{id}/resume",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign id")),
    responses((status = 200, description = "Campaign resumed"), (status = 404, description = "Not found", body = ErrorEnvelope))
)]
async fn resume_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.resume(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

/// Stop a campaign permanently
#[utoipa::path(
    post,
    path = "/campaigns/{id}/stop",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign id")),
    responses((status = 200, description = "Campaign stopped"), (status = 404, description = "Not found", body = ErrorEnvelope))
)]
async fn stop_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.stop(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

/// Fetch a campaign's current state
#[utoipa::path(
    get,
    path = "/campaigns/{id}",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign id")),
    responses((status = 200, description = "Campaign state", body = Campaign), (status = 404, description = "Not found", body = ErrorEnvelope))
)]
async fn get_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.get(&id).await {
        Ok(campaign) => Json(campaign).into_response(),
        Err(e) => error_response(e),
    }
}

/// Preview roughly when/what the next send will be
///
/// Best-effort only: the actual pre-send delay also depends on jitter and
/// chaos pauses drawn at send time, so this is an estimate, not a promise.
#[utoipa::path(
    get,
    path = "/campaigns/{id}/next",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign id")),
    responses((status = 200, description = "Next-send estimate", body = NextItemResponse), (status = 404, description = "Not found", body = ErrorEnvelope))
)]
async fn next_item(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.next_send_estimate(&id).await {
        Ok(wait) => Json(NextItemResponse { item: None, estimated_wait_secs: wait.as_secs_f64() }).into_response(),
        Err(e) => error_response(e),
    }
}

/// Poll recent events for a campaign's tenant
///
/// Not SSE or WebSocket: a short long-poll that waits up to 2 seconds for
/// at least one event before returning whatever it collected, possibly
/// empty.
#[utoipa::path(
    get,
    path = "/campaigns/{id}/events",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign id (used to resolve the tenant channel)")),
    responses((status = 200, description = "Buffered events", body = CampaignEventsResponse), (status = 404, description = "Not found", body = ErrorEnvelope))
)]
async fn campaign_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let campaign = match state.orchestrator.get(&id).await {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };

    let mut rx = state.events.subscribe(&campaign.tenant_id);
    let mut events = Vec::new();

    if let Ok(Ok(first)) = timeout(Duration::from_secs(2), rx.recv()).await {
        events.push(first);
    }
    loop {
        match rx.try_recv() {
            Ok(value) => events.push(value),
            Err(_) => break,
        }
    }

    Json(CampaignEventsResponse { events }).into_response()
}
