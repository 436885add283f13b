use crate::constants::{EKS_CLUSTER_NAME_HEADER, EKS_TOKEN_EXPIRES_IN_SEC, EKS_TOKEN_PREFIX};
use crate::runtime::block_on;
use base64::Engine;
use base64::engine::general_purpose;
use rusoto_core::{Client, HttpClient, Region};
use rusoto_credential::StaticProvider;
use rusoto_signature::SignedRequest;
use rusoto_sts::{GetCallerIdentityRequest, Sts, StsClient as RusotoStsClient};
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StsError {
    #[error("cannot get caller identity: {raw_error_message}")]
    CannotGetCallerIdentity { raw_error_message: String },

    #[error("cannot sign token request: {raw_error_message}")]
    CannotSignRequest { raw_error_message: String },
}

#[derive(Debug, Clone)]
pub struct AwsApiCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

pub struct StsClient {
    credentials: Option<AwsApiCredentials>,
    region: Region,
}

impl StsClient {
    pub fn from_keys(credentials: AwsApiCredentials, region: &str) -> Self {
        StsClient {
            credentials: Some(credentials),
            region: region.parse().unwrap_or_default(),
        }
    }

    /// Uses the instance profile / default provider chain.
    pub fn from_instance_profile() -> Self {
        StsClient {
            credentials: None,
            region: Region::default(),
        }
    }

    fn client(&self) -> RusotoStsClient {
        match &self.credentials {
            Some(credentials) => {
                let provider = StaticProvider::new(
                    credentials.access_key_id.clone(),
                    credentials.secret_access_key.clone(),
                    credentials.session_token.clone(),
                    None,
                );
                RusotoStsClient::new_with_client(
                    Client::new_with(provider, HttpClient::new().expect("unable to create new Http client")),
                    self.region.clone(),
                )
            }
            None => RusotoStsClient::new(self.region.clone()),
        }
    }

    /// Account id of whoever these credentials belong to.
    pub fn get_caller_identity_account(&self) -> Result<String, StsError> {
        let response = block_on(self.client().get_caller_identity(GetCallerIdentityRequest::default())).map_err(
            |err| StsError::CannotGetCallerIdentity {
                raw_error_message: err.to_string(),
            },
        )?;
        response.account.ok_or_else(|| StsError::CannotGetCallerIdentity {
            raw_error_message: "response carries no account".to_string(),
        })
    }
}

/// Builds EKS bearer tokens out of pre-signed `GetCallerIdentity` URLs, the
/// way aws-iam-authenticator does: `k8s-aws-v1.` + unpadded base64url of
/// the signed URL carrying the `x-k8s-aws-id` header.
pub struct TokenGenerator {
    credentials: AwsApiCredentials,
    region: String,
}

impl TokenGenerator {
    pub fn new(credentials: AwsApiCredentials, region: &str) -> Self {
        TokenGenerator {
            credentials,
            region: region.to_string(),
        }
    }

    pub fn get_token(&self, cluster_name: &str) -> Result<String, StsError> {
        let region: Region = self.region.parse().unwrap_or_default();
        let mut request = SignedRequest::new("GET", "sts", &region, "/");
        request.add_param("Action", "GetCallerIdentity");
        request.add_param("Version", "2011-06-15");
        request.add_header(EKS_CLUSTER_NAME_HEADER, cluster_name);

        let credentials = rusoto_credential::AwsCredentials::new(
            self.credentials.access_key_id.clone(),
            self.credentials.secret_access_key.clone(),
            self.credentials.session_token.clone(),
            None,
        );
        let url = request.generate_presigned_url(
            &credentials,
            &Duration::from_secs(EKS_TOKEN_EXPIRES_IN_SEC as u64),
            false,
        );
        Ok(format!(
            "{EKS_TOKEN_PREFIX}{}",
            general_purpose::URL_SAFE_NO_PAD.encode(url.as_bytes())
        ))
    }
}
