use std::sync::Arc;

use tokio::time::Instant;

use crate::dht::DhtInner;
use crate::proto::Message;
use crate::transport::Transport;

impl<T: Transport> DhtInner<T> {
    pub(crate) fn start_background_tasks(self: &Arc<Self>) {
        self.start_expiry_sweep();
        self.start_refresh_broadcast();
    }

    fn start_expiry_sweep(self: &Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.expiry_sweep_period);
        let cancel = self.cancel.clone();
        let this = Arc::downgrade(self);

        tokio::spawn(async move {
            tracing::debug!("expiry sweep started");

            let mut last_sweep = Instant::now();
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = cancel.cancelled() => break,
                }

                let Some(this) = this.upgrade() else {
                    break;
                };

                let now = Instant::now();
                let removed = this.storage.expire(now.duration_since(last_sweep));
                last_sweep = now;

                if removed > 0 {
                    tracing::debug!(
                        local_id = %this.local.id,
                        removed,
                        remaining = this.storage.len(),
                        "expired stored values"
                    );
                }
            }

            tracing::debug!("expiry sweep finished");
        });
    }

    fn start_refresh_broadcast(self: &Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.refresh_period);
        let cancel = self.cancel.clone();
        let this = Arc::downgrade(self);

        tokio::spawn(async move {
            tracing::debug!("refresh broadcast started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = cancel.cancelled() => break,
                }

                let Some(this) = this.upgrade() else {
                    break;
                };
                this.refresh_remembered().await;
            }

            tracing::debug!("refresh broadcast finished");
        });
    }

    /// Asks every remembered holder to reset the TTL of its copy.
    #[tracing::instrument(level = "debug", skip_all, fields(local_id = %self.local.id))]
    async fn refresh_remembered(self: &Arc<Self>) {
        let mut sent = 0usize;
        for (key, holders) in self.storage.remembered_snapshot() {
            for holder in holders {
                if holder.id == self.local.id {
                    if !self.storage.refresh(&key) {
                        tracing::warn!(%key, "remembered value is missing locally");
                    }
                    continue;
                }

                let this = self.clone();
                let message = Message::RefreshTtl {
                    requester: self.local.id,
                    key,
                };
                self.tasks
                    .spawn(async move { this.send(&holder, &message).await })
                    .await;
                sent += 1;
            }
        }

        if sent > 0 {
            tracing::trace!(sent, "sent refresh requests");
        }
    }
}
