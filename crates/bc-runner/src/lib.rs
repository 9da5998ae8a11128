//! Composes `bc-cache`, `bc-pacing`, `bc-health`, `bc-queue`, and
//! `bc-events` into the running system: one `CampaignRunner` worker per
//! live campaign, a periodic `EmergencyMonitor` sweep, an `Orchestrator`
//! composition root, and the control-plane HTTP API.

pub mod api;
pub mod business_hours;
pub mod emergency_monitor;
pub mod handle;
pub mod orchestrator;
pub mod runner;
pub mod shuffle;
pub mod transport;

pub use emergency_monitor::{EmergencyMonitor, EmergencyMonitorSettings};
pub use handle::{RunnerHandle, RunnerRegistry};
pub use orchestrator::{CreateCampaignRequest, NewRecipient, Orchestrator};
pub use runner::{CampaignRunner, RunnerDeps};
pub use transport::{HttpChatTransport, HttpChatTransportConfig};
