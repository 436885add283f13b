use crate::clients::sts::AwsApiCredentials;
use crate::runtime::block_on;
use aws_credential_types::Credentials;
use aws_sdk_eks::config::BehaviorVersion;
use aws_types::region::Region;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EksError {
    #[error("cannot describe cluster `{cluster_name}`: {raw_error_message}")]
    CannotDescribeCluster {
        cluster_name: String,
        raw_error_message: String,
    },
}

#[derive(Debug, Clone)]
pub struct EksClusterDescription {
    pub endpoint: String,
    /// Base64 encoded cluster CA bundle.
    pub certificate_authority: String,
}

pub struct EksClient {
    inner: aws_sdk_eks::Client,
}

impl EksClient {
    pub fn from_keys(credentials: &AwsApiCredentials, region: &str) -> Self {
        let creds = Credentials::from_keys(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
        );
        let config = aws_sdk_eks::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(creds)
            .build();
        EksClient {
            inner: aws_sdk_eks::Client::from_conf(config),
        }
    }

    pub fn describe_cluster(&self, cluster_name: &str) -> Result<Option<EksClusterDescription>, EksError> {
        let response = block_on(self.inner.describe_cluster().name(cluster_name).send()).map_err(|err| {
            EksError::CannotDescribeCluster {
                cluster_name: cluster_name.to_string(),
                raw_error_message: err.to_string(),
            }
        })?;

        let cluster = match response.cluster {
            Some(cluster) => cluster,
            None => return Ok(None),
        };
        let endpoint = match cluster.endpoint {
            Some(endpoint) => endpoint,
            None => return Ok(None),
        };
        let certificate_authority = cluster
            .certificate_authority
            .and_then(|ca| ca.data)
            .unwrap_or_default();

        Ok(Some(EksClusterDescription {
            endpoint,
            certificate_authority,
        }))
    }
}
