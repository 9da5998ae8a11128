//! Durable storage for campaigns and their queue items: schema
//! management, atomic claim/complete, stats, and stale-claim recovery.

pub mod campaign_store;
pub mod message_queue_store;
pub mod recovery;
pub mod schema;

pub use campaign_store::CampaignStore;
pub use message_queue_store::{MessageQueueStore, QueueStats};
pub use recovery::RecoveryTask;
pub use schema::create_schema;
