//! Fallback poll of the guardian's unresolved alerts

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::surface::Surfacer;
use super::ClientConfig;
use crate::alerts::Alert;

pub(crate) async fn run_poll(
    config: Arc<ClientConfig>,
    surfacer: Arc<Surfacer>,
    mut shutdown: watch::Receiver<bool>,
) {
    let http = match reqwest::Client::builder().timeout(config.poll_interval).build() {
        Ok(http) => http,
        Err(e) => {
            warn!("Fallback poll disabled, HTTP client build failed: {}", e);
            return;
        }
    };
    let url = config.poll_url();

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mark = surfacer.mark();
                match fetch_unresolved(&http, &url).await {
                    Ok(alerts) => {
                        let surfaced = surfacer.offer_polled(&alerts, mark);
                        debug!(unresolved = alerts.len(), surfaced, "Fallback poll complete");
                    }
                    Err(e) => warn!("Fallback poll of {} failed: {}", url, e),
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("Fallback poll stopped");
}

/// `GET /api/guardians/{guardian_id}/alerts/unresolved`
pub async fn fetch_unresolved(http: &reqwest::Client, url: &str) -> Result<Vec<Alert>, reqwest::Error> {
    http.get(url).send().await?.error_for_status()?.json().await
}
