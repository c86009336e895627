use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::HardwareController;
use super::error::HardwareError;

/// Talks to the vendor's machine-control gateway over HTTP.
pub struct HttpHardwareController {
    api_key: String,
    client: Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct StartCommand<'a> {
    command: &'static str,
    machine_id: &'a str,
}

impl HttpHardwareController {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, HardwareError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn start_url(&self, machine_id: &str) -> String {
        format!("{}/machines/{machine_id}/start", self.base_url)
    }
}

#[async_trait]
impl HardwareController for HttpHardwareController {
    async fn start_cycle(&self, machine_id: &str) -> Result<(), HardwareError> {
        let response = self
            .client
            .post(self.start_url(machine_id))
            .bearer_auth(&self.api_key)
            .json(&StartCommand {
                command: "start_cycle",
                machine_id,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HardwareError::timed_out(self.timeout)
                } else {
                    HardwareError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(HardwareError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}
