use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UdmError {
    #[error("cannot push UDM payload: {raw_error_message}")]
    CannotPush { raw_error_message: String },
}

/// UDM security-information sink. Payloads are pre-converted by the SIEM
/// layer; this client only ships them.
pub trait UdmApi: Send + Sync {
    fn create_udm_events(&self, events: &[serde_json::Value]) -> Result<(), UdmError>;
    fn create_udm_entities(&self, entities: &[serde_json::Value], log_type: &str) -> Result<(), UdmError>;
}

pub struct UdmClient {
    endpoint: Url,
    bearer_token: String,
    customer_id: String,
    http: reqwest::blocking::Client,
}

impl UdmClient {
    pub fn new(endpoint: Url, bearer_token: String, customer_id: String) -> Result<Self, UdmError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| UdmError::CannotPush {
                raw_error_message: err.to_string(),
            })?;
        Ok(UdmClient {
            endpoint,
            bearer_token,
            customer_id,
            http,
        })
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<(), UdmError> {
        let cannot = |raw_error_message: String| UdmError::CannotPush { raw_error_message };
        let url = self.endpoint.join(path).map_err(|e| cannot(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.bearer_token)
            .json(body)
            .send()
            .map_err(|e| cannot(e.to_string()))?;
        if !response.status().is_success() {
            return Err(cannot(format!("sink refused with status {}", response.status())));
        }
        Ok(())
    }
}

impl UdmApi for UdmClient {
    fn create_udm_events(&self, events: &[serde_json::Value]) -> Result<(), UdmError> {
        self.post(
            "v2/udmevents",
            &serde_json::json!({"customer_id": self.customer_id, "events": events}),
        )
    }

    fn create_udm_entities(&self, entities: &[serde_json::Value], log_type: &str) -> Result<(), UdmError> {
        self.post(
            "v2/entities",
            &serde_json::json!({
                "customer_id": self.customer_id,
                "log_type": log_type,
                "entities": entities,
            }),
        )
    }
}
