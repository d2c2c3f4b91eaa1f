//! Outbound draw announcements.
//!
//! Fire-and-forget POST to the internal notification service. A missing
//! shared secret turns every call into a logged no-op; transport errors and
//! non-2xx responses are logged and swallowed.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::pipeline::RunContext;
use crate::config::NotifierConfig;
use crate::types::DrawTime;

#[derive(Debug, Serialize)]
struct DrawResultPayload<'a> {
    draw_date: String,
    draw_time: &'a str,
    result_number: u8,
}

/// What happened to a single notify call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// Already announced earlier in this run.
    Duplicate,
    /// Notifier disabled or no secret configured.
    Disabled,
    Failed(String),
}

pub struct Notifier {
    http: Client,
    url: String,
    header: String,
    secret: Option<SecretString>,
    enabled: bool,
}

impl Notifier {
    pub fn new(config: &NotifierConfig, secret: Option<SecretString>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build notifier HTTP client")?;

        if config.enabled && secret.is_none() {
            warn!(
                env = %config.api_key_env,
                "Notifier secret not set, draw announcements will be skipped"
            );
        }

        Ok(Self {
            http,
            url: config.url.clone(),
            header: config.api_key_header.clone(),
            secret,
            enabled: config.enabled,
        })
    }

    /// Whether calls can actually reach the service.
    pub fn is_active(&self) -> bool {
        self.enabled && self.secret.is_some()
    }

    /// Announce one draw result. Never fails; the outcome is for reporting.
    pub async fn notify(
        &self,
        ctx: &mut RunContext,
        draw_date: NaiveDate,
        draw_time: DrawTime,
        result_number: u8,
    ) -> NotifyOutcome {
        let Some(secret) = self.secret.as_ref().filter(|_| self.enabled) else {
            warn!(%draw_date, %draw_time, "Notifier inactive, skipping announcement");
            return NotifyOutcome::Disabled;
        };

        // Marked before sending: a failed call is not retried within the run.
        if !ctx.mark_notified(draw_date, draw_time) {
            debug!(%draw_date, %draw_time, "Already announced this run");
            return NotifyOutcome::Duplicate;
        }

        let payload = DrawResultPayload {
            draw_date: draw_date.format("%Y-%m-%d").to_string(),
            draw_time: draw_time.as_str(),
            result_number,
        };

        let resp = match self
            .http
            .post(&self.url)
            .header(self.header.as_str(), secret.expose_secret().as_str())
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(run_id = %ctx.run_id, %draw_date, %draw_time, error = %e, "Notification request failed");
                return NotifyOutcome::Failed(e.to_string());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(
                run_id = %ctx.run_id,
                %draw_date,
                %draw_time,
                status = status.as_u16(),
                body = %body.chars().take(200).collect::<String>(),
                "Notification service returned an error"
            );
            return NotifyOutcome::Failed(format!("HTTP {status}"));
        }

        // Response body is informational only.
        match resp.json::<serde_json::Value>().await {
            Ok(body) => debug!(response = %body, "Notification acknowledged"),
            Err(e) => debug!(error = %e, "Notification response was not JSON"),
        }

        info!(run_id = %ctx.run_id, %draw_date, %draw_time, result_number, "Draw result announced");
        NotifyOutcome::Sent
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
