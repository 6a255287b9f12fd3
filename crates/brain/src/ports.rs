//! Collaborator ports for the read-only enrichment functions and the Slack
//! side channel. Production backends live outside the kernel; the inert
//! defaults keep a bare brain runnable.

use brain_domain::Result;

/// Service metadata lookup backing `lookup_service`.
#[async_trait::async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Returns a textual description of the service, or `None` when unknown.
    async fn lookup(&self, name: &str) -> Result<Option<String>>;
}

/// Long-term memory backing `consult_deep_memory`.
#[async_trait::async_trait]
pub trait DeepMemory: Send + Sync {
    async fn query(&self, query: &str) -> Result<String>;
}

/// Side-channel user notification backing `notify_user_slack`.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, email: &str, message: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inert defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NoopCatalog;

#[async_trait::async_trait]
impl ServiceCatalog for NoopCatalog {
    async fn lookup(&self, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

pub struct NoopDeepMemory;

#[async_trait::async_trait]
impl DeepMemory for NoopDeepMemory {
    async fn query(&self, _query: &str) -> Result<String> {
        Ok("deep memory is not configured".to_string())
    }
}

pub struct NoopNotifier;

#[async_trait::async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, email: &str, _message: &str) -> Result<()> {
        tracing::info!(email = %email, "notification dropped (no notifier configured)");
        Ok(())
    }
}
