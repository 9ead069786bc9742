//! 凭据库过期清理的后台任务。

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::AuthConfig;
use crate::config::VAULT_PRUNE_INTERVAL_SECS;

/// 启动后台任务（定期清除过期的缓存凭据）。
pub fn spawn_background_tasks(auth: Arc<AuthConfig>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(VAULT_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let removed = auth.vault.prune_expired(Utc::now().timestamp()).await;
            if removed > 0 {
                debug!(removed, "pruned expired credentials");
            }
        }
    });
}
