use bc_common::config::UserCampaignConfig;
use bc_common::types::QueueItem;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single recipient in a `CreateCampaignRequest`. The message body is
/// rendered client-side; the runner never does template substitution.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RecipientDto {
    pub address: String,
    pub label: Option<String>,
    pub rendered_message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCampaignRequest {
    pub tenant_id: String,
    pub channel_id: String,
    pub name: String,
    #[serde(default)]
    pub config: UserCampaignConfig,
    pub recipients: Vec<RecipientDto>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateCampaignResponse {
    pub campaign_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PauseCampaignRequest {
    pub note: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NextItemResponse {
    pub item: Option<QueueItem>,
    pub estimated_wait_secs: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CampaignEventsResponse {
    pub events: Vec<serde_json::Value>,
}
