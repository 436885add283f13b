use crate::models::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LmError {
    #[error("license manager denied the request: {reason}")]
    Denied { reason: String },

    #[error("license manager is unreachable: {raw_error_message}")]
    Unreachable { raw_error_message: String },
}

/// `PostJob` response: license-manager ruleset id -> packed content URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicensedJob {
    pub ruleset_content: BTreeMap<String, String>,
}

/// Pre-authorization and post-update contract with the license manager.
pub trait LicenseManagerClient: Send + Sync {
    fn is_allowed_to_license_a_job(&self, customer: &str, tenant: &str, tenant_license_keys: &[String]) -> bool;

    fn post_job(
        &self,
        job_id: &str,
        customer: &str,
        tenant: &str,
        ruleset_map: &BTreeMap<String, Vec<String>>,
    ) -> Result<LicensedJob, LmError>;

    /// Best-effort, called for licensed on-prem runs only.
    fn update_job(
        &self,
        job_id: &str,
        customer: &str,
        created_at: Option<DateTime<Utc>>,
        started_at: Option<DateTime<Utc>>,
        stopped_at: Option<DateTime<Utc>>,
        status: JobStatus,
    ) -> Result<(), LmError>;
}

/// Canned license manager used by tests and local setups without a
/// reachable manager: grants everything it was constructed with.
#[derive(Default)]
pub struct StaticLicenseManagerClient {
    pub allowed: bool,
    pub ruleset_content: BTreeMap<String, String>,
}

impl StaticLicenseManagerClient {
    pub fn allowing(ruleset_content: BTreeMap<String, String>) -> Self {
        StaticLicenseManagerClient {
            allowed: true,
            ruleset_content,
        }
    }

    pub fn denying() -> Self {
        StaticLicenseManagerClient::default()
    }
}

impl LicenseManagerClient for StaticLicenseManagerClient {
    fn is_allowed_to_license_a_job(&self, _customer: &str, _tenant: &str, _tenant_license_keys: &[String]) -> bool {
        self.allowed
    }

    fn post_job(
        &self,
        _job_id: &str,
        _customer: &str,
        _tenant: &str,
        _ruleset_map: &BTreeMap<String, Vec<String>>,
    ) -> Result<LicensedJob, LmError> {
        if !self.allowed {
            return Err(LmError::Denied {
                reason: "not granted".to_string(),
            });
        }
        Ok(LicensedJob {
            ruleset_content: self.ruleset_content.clone(),
        })
    }

    fn update_job(
        &self,
        _job_id: &str,
        _customer: &str,
        _created_at: Option<DateTime<Utc>>,
        _started_at: Option<DateTime<Utc>>,
        _stopped_at: Option<DateTime<Utc>>,
        _status: JobStatus,
    ) -> Result<(), LmError> {
        Ok(())
    }
}

pub struct HttpLicenseManagerClient {
    base_url: Url,
    client_key: String,
    http: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct PostJobBody<'a> {
    job_id: &'a str,
    customer: &'a str,
    tenant: &'a str,
    ruleset_map: &'a BTreeMap<String, Vec<String>>,
}

#[derive(Serialize)]
struct UpdateJobBody<'a> {
    job_id: &'a str,
    customer: &'a str,
    created_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    status: JobStatus,
}

#[derive(Serialize)]
struct CheckPermissionBody<'a> {
    customer: &'a str,
    tenant: &'a str,
    tenant_license_keys: &'a [String],
}

impl HttpLicenseManagerClient {
    pub fn new(base_url: Url, client_key: String) -> Result<Self, LmError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| LmError::Unreachable {
                raw_error_message: err.to_string(),
            })?;
        Ok(HttpLicenseManagerClient {
            base_url,
            client_key,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, LmError> {
        self.base_url.join(path).map_err(|err| LmError::Unreachable {
            raw_error_message: err.to_string(),
        })
    }
}

impl LicenseManagerClient for HttpLicenseManagerClient {
    fn is_allowed_to_license_a_job(&self, customer: &str, tenant: &str, tenant_license_keys: &[String]) -> bool {
        let url = match self.endpoint("jobs/check-permission") {
            Ok(url) => url,
            Err(_) => return false,
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.client_key)
            .json(&CheckPermissionBody {
                customer,
                tenant,
                tenant_license_keys,
            })
            .send();
        match response {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!("license manager permission check failed: {err}");
                false
            }
        }
    }

    fn post_job(
        &self,
        job_id: &str,
        customer: &str,
        tenant: &str,
        ruleset_map: &BTreeMap<String, Vec<String>>,
    ) -> Result<LicensedJob, LmError> {
        let response = self
            .http
            .post(self.endpoint("jobs")?)
            .bearer_auth(&self.client_key)
            .json(&PostJobBody {
                job_id,
                customer,
                tenant,
                ruleset_map,
            })
            .send()
            .map_err(|err| LmError::Unreachable {
                raw_error_message: err.to_string(),
            })?;

        if !response.status().is_success() {
            let reason = response.text().unwrap_or_else(|_| "no reason given".to_string());
            return Err(LmError::Denied { reason });
        }
        response.json::<LicensedJob>().map_err(|err| LmError::Unreachable {
            raw_error_message: err.to_string(),
        })
    }

    fn update_job(
        &self,
        job_id: &str,
        customer: &str,
        created_at: Option<DateTime<Utc>>,
        started_at: Option<DateTime<Utc>>,
        stopped_at: Option<DateTime<Utc>>,
        status: JobStatus,
    ) -> Result<(), LmError> {
        let response = self
            .http
            .patch(self.endpoint("jobs")?)
            .bearer_auth(&self.client_key)
            .json(&UpdateJobBody {
                job_id,
                customer,
                created_at,
                started_at,
                stopped_at,
                status,
            })
            .send()
            .map_err(|err| LmError::Unreachable {
                raw_error_message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(LmError::Denied {
                reason: format!("update refused with status {}", response.status()),
            });
        }
        Ok(())
    }
}
