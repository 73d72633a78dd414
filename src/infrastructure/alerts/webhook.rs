//! Webhook-backed `AlertSink`: each alert is POSTed as a JSON envelope
//! `{kind, payload}` to the configured endpoint. The chat front-end owns
//! presentation; this sink only delivers structured payloads.

use crate::domain::alerts::{
    ApproachAlert, AutoTpAlert, LimitHitAlert, NewsActivatedAlert, NewsCancelAlert,
    SpreadHourCancelAlert, StopLossAlert,
};
use crate::domain::ports::AlertSink;
use crate::infrastructure::core::HttpClientFactory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use tracing::{debug, info};

pub struct WebhookAlertSink {
    http: ClientWithMiddleware,
    url: String,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    kind: &'a str,
    payload: &'a T,
}

impl WebhookAlertSink {
    pub fn new(url: String) -> Self {
        info!("Alert webhook sink configured");
        Self {
            http: HttpClientFactory::create_client(),
            url,
        }
    }

    async fn post<T: Serialize>(&self, kind: &str, payload: &T) -> Result<()> {
        if self.url.is_empty() {
            debug!("No alert webhook configured, dropping {} alert", kind);
            return Ok(());
        }
        let body = serde_json::to_string(&Envelope { kind, payload })
            .with_context(|| format!("Failed to serialize {kind} alert"))?;
        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to deliver {kind} alert"))?;

        let status = response.status();
        anyhow::ensure!(
            status.is_success(),
            "Alert webhook returned HTTP {status} for {kind}"
        );
        debug!("Delivered {} alert", kind);
        Ok(())
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn approach(&self, alert: &ApproachAlert) -> Result<()> {
        self.post("approach", alert).await
    }

    async fn limit_hit(&self, alert: &LimitHitAlert) -> Result<()> {
        self.post("limit_hit", alert).await
    }

    async fn stop_loss(&self, alert: &StopLossAlert) -> Result<()> {
        self.post("stop_loss", alert).await
    }

    async fn spread_hour_cancel(&self, alert: &SpreadHourCancelAlert) -> Result<()> {
        self.post("spread_hour_cancel", alert).await
    }

    async fn news_cancel(&self, alert: &NewsCancelAlert) -> Result<()> {
        self.post("news_cancel", alert).await
    }

    async fn news_activated(&self, alert: &NewsActivatedAlert) -> Result<()> {
        self.post("news_activated", alert).await
    }

    async fn auto_tp(&self, alert: &AutoTpAlert) -> Result<()> {
        self.post("auto_tp", alert).await
    }

    async fn admin_notification(&self, message: &str) -> Result<()> {
        #[derive(Serialize)]
        struct AdminPayload<'a> {
            message: &'a str,
        }
        self.post("admin_notification", &AdminPayload { message })
            .await
    }
}
