//! Severity-routed, deduplicated alerting

mod catalog;
mod router;
mod webhook;

pub use catalog::AlertCatalog;
pub use router::AlertRouter;
pub use webhook::{payload, HttpWebhookSender, WebhookSender};
