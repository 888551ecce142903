// libs/video-call-cell/src/services/otp.rs
use regex::Regex;
use reqwest::Client;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{VerifyOtpRequest, VerifyOtpResponse, VideoCallError};

/// Client for the out-of-band OTP check that gates a clinician-initiated
/// call. The passcode itself is validated server-side; this client only
/// enforces the 6-digit format before submission.
pub struct OtpVerificationClient {
    client: Client,
    base_url: String,
    format: Regex,
}

impl OtpVerificationClient {
    pub fn new(config: &AppConfig) -> Result<Self, VideoCallError> {
        if config.api_base_url.is_empty() {
            return Err(VideoCallError::NotConfigured);
        }

        let format = Regex::new(r"^\d{6}$").map_err(|e| VideoCallError::Internal {
            message: format!("Invalid OTP pattern: {}", e),
        })?;

        Ok(Self {
            client: Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            format,
        })
    }

    pub fn is_valid_format(&self, otp: &str) -> bool {
        self.format.is_match(otp)
    }

    /// Submit the OTP for an appointment.
    /// POST /video/verify-otp
    pub async fn verify(&self, appointment_id: Uuid, otp: &str) -> Result<(), VideoCallError> {
        if !self.is_valid_format(otp) {
            return Err(VideoCallError::InvalidOtpFormat);
        }

        let url = format!("{}/video/verify-otp", self.base_url);
        debug!("Submitting OTP for appointment {} to {}", appointment_id, url);

        let response = self
            .client
            .post(&url)
            .json(&VerifyOtpRequest {
                appointment_id,
                otp: otp.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("OTP verification failed: {} - {}", status, body);
            return Err(VideoCallError::OtpRejected {
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let parsed: VerifyOtpResponse =
            serde_json::from_str(&body).map_err(|e| VideoCallError::Internal {
                message: format!("Failed to parse OTP response: {}", e),
            })?;

        if !parsed.success {
            let message = parsed.error.unwrap_or_else(|| "Invalid OTP".to_string());
            info!("OTP rejected for appointment {}: {}", appointment_id, message);
            return Err(VideoCallError::OtpRejected { message });
        }

        info!("OTP verified for appointment {}", appointment_id);
        Ok(())
    }
}
