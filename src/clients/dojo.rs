use chrono::{DateTime, Utc};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DojoError {
    #[error("cannot import scan: {raw_error_message}")]
    CannotImportScan { raw_error_message: String },
}

/// Defect-tracker import request, built by the SIEM layer from the shard
/// collection.
#[derive(Debug, Clone)]
pub struct ImportScanRequest {
    pub scan_type: String,
    pub scan_date: DateTime<Utc>,
    pub product_type_name: String,
    pub product_name: String,
    pub engagement_name: String,
    pub test_title: String,
    pub data: serde_json::Value,
    pub tags: Vec<String>,
}

pub trait DojoApi: Send + Sync {
    fn import_scan(&self, request: &ImportScanRequest) -> Result<(), DojoError>;
}

pub struct DojoClient {
    url: Url,
    api_key: String,
    http: reqwest::blocking::Client,
}

impl DojoClient {
    pub fn new(url: Url, api_key: String) -> Result<Self, DojoError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| DojoError::CannotImportScan {
                raw_error_message: err.to_string(),
            })?;
        Ok(DojoClient { url, api_key, http })
    }
}

impl DojoApi for DojoClient {
    fn import_scan(&self, request: &ImportScanRequest) -> Result<(), DojoError> {
        let cannot = |raw_error_message: String| DojoError::CannotImportScan { raw_error_message };
        let endpoint = self.url.join("api/v2/import-scan/").map_err(|e| cannot(e.to_string()))?;

        let body = serde_json::json!({
            "scan_type": request.scan_type,
            "scan_date": request.scan_date.format("%Y-%m-%d").to_string(),
            "product_type_name": request.product_type_name,
            "product_name": request.product_name,
            "engagement_name": request.engagement_name,
            "test_title": request.test_title,
            "auto_create_context": true,
            "tags": request.tags,
            "scan": request.data,
        });
        let response = self
            .http
            .post(endpoint)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&body)
            .send()
            .map_err(|e| cannot(e.to_string()))?;
        if !response.status().is_success() {
            return Err(cannot(format!("import refused with status {}", response.status())));
        }
        Ok(())
    }
}
