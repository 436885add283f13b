use crate::clients::eks::EksClient;
use crate::clients::sts::{AwsApiCredentials, StsClient, TokenGenerator};
use crate::constants::*;
use crate::credentials::kubeconfig::Kubeconfig;
use crate::models::Cloud;
use crate::models::job::BatchResults;
use crate::models::platform::{Platform, PlatformType};
use crate::models::tenant::{Application, ParentType, Tenant};
use crate::persistence::{ApplicationStore, LinkedEntities, ParentStore, TenantStore};
use crate::secrets::SecretStore;
use chrono::Utc;
use std::io::Write;
use tempfile::NamedTempFile;

pub mod kubeconfig;

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("no credentials found for the scanned target")]
    NoCredentials,

    #[error("credentials payload is malformed: {raw_error_message}")]
    Malformed { raw_error_message: String },

    #[error("cannot materialize credentials: {raw_error_message}")]
    CannotMaterialize { raw_error_message: String },
}

/// Usable cloud credentials, exported to the scan engine as environment
/// variables. File-backed variants own their temp file: the path stays
/// valid for as long as the value lives.
pub enum CloudCredentials {
    Aws {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
    Azure {
        tenant_id: String,
        client_id: String,
        client_secret: String,
        subscription_id: String,
    },
    Google {
        file: NamedTempFile,
    },
    Kubernetes {
        file: NamedTempFile,
    },
    /// The instance itself has access; nothing to export.
    InstanceProfile,
}

fn json_str(map: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    // payloads come both in env-var style and lowercase keys
    map.get(key)
        .or_else(|| map.get(key.to_lowercase().as_str()))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl CloudCredentials {
    pub fn from_json(cloud: Cloud, map: &serde_json::Map<String, serde_json::Value>) -> Result<Self, CredentialsError> {
        match cloud {
            Cloud::Aws => {
                let access_key_id = json_str(map, AWS_ACCESS_KEY_ID).ok_or_else(|| CredentialsError::Malformed {
                    raw_error_message: format!("`{AWS_ACCESS_KEY_ID}` is missing"),
                })?;
                let secret_access_key =
                    json_str(map, AWS_SECRET_ACCESS_KEY).ok_or_else(|| CredentialsError::Malformed {
                        raw_error_message: format!("`{AWS_SECRET_ACCESS_KEY}` is missing"),
                    })?;
                Ok(CloudCredentials::Aws {
                    access_key_id,
                    secret_access_key,
                    session_token: json_str(map, AWS_SESSION_TOKEN),
                })
            }
            Cloud::Azure => {
                let field = |key: &str| {
                    json_str(map, key).ok_or_else(|| CredentialsError::Malformed {
                        raw_error_message: format!("`{key}` is missing"),
                    })
                };
                Ok(CloudCredentials::Azure {
                    tenant_id: field(AZURE_TENANT_ID)?,
                    client_id: field(AZURE_CLIENT_ID)?,
                    client_secret: field(AZURE_CLIENT_SECRET)?,
                    subscription_id: field(AZURE_SUBSCRIPTION_ID)?,
                })
            }
            Cloud::Google => {
                // a service-account blob goes to disk, the engine reads it
                // through the standard variable
                let mut file = NamedTempFile::new().map_err(|err| CredentialsError::CannotMaterialize {
                    raw_error_message: err.to_string(),
                })?;
                let raw = serde_json::to_vec(map).map_err(|err| CredentialsError::Malformed {
                    raw_error_message: err.to_string(),
                })?;
                file.write_all(&raw)
                    .and_then(|()| file.flush())
                    .map_err(|err| CredentialsError::CannotMaterialize {
                        raw_error_message: err.to_string(),
                    })?;
                Ok(CloudCredentials::Google { file })
            }
            Cloud::Kubernetes => Err(CredentialsError::Malformed {
                raw_error_message: "kubernetes credentials are resolved through the platform".to_string(),
            }),
        }
    }

    pub fn as_env_vars(&self) -> Vec<(String, String)> {
        match self {
            CloudCredentials::Aws {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                let mut vars = vec![
                    (AWS_ACCESS_KEY_ID.to_string(), access_key_id.clone()),
                    (AWS_SECRET_ACCESS_KEY.to_string(), secret_access_key.clone()),
                ];
                if let Some(token) = session_token {
                    vars.push((AWS_SESSION_TOKEN.to_string(), token.clone()));
                }
                vars
            }
            CloudCredentials::Azure {
                tenant_id,
                client_id,
                client_secret,
                subscription_id,
            } => vec![
                (AZURE_TENANT_ID.to_string(), tenant_id.clone()),
                (AZURE_CLIENT_ID.to_string(), client_id.clone()),
                (AZURE_CLIENT_SECRET.to_string(), client_secret.clone()),
                (AZURE_SUBSCRIPTION_ID.to_string(), subscription_id.clone()),
            ],
            CloudCredentials::Google { file } => vec![(
                GOOGLE_APPLICATION_CREDENTIALS.to_string(),
                file.path().to_string_lossy().to_string(),
            )],
            CloudCredentials::Kubernetes { file } => {
                vec![(KUBECONFIG.to_string(), file.path().to_string_lossy().to_string())]
            }
            CloudCredentials::InstanceProfile => vec![],
        }
    }
}

/// Identity of the machine the worker runs on, used by the last fallback
/// step. Behind a trait so the chain is testable without cloud access.
pub trait InstanceIdentity: Send + Sync {
    fn aws_account_id(&self) -> Option<String>;
    fn azure_subscription_id(&self) -> Option<String>;
}

pub struct StsInstanceIdentity;

impl InstanceIdentity for StsInstanceIdentity {
    fn aws_account_id(&self) -> Option<String> {
        match StsClient::from_instance_profile().get_caller_identity_account() {
            Ok(account) => Some(account),
            Err(err) => {
                warn!("no instance credentials found: {err}");
                None
            }
        }
    }

    fn azure_subscription_id(&self) -> Option<String> {
        std::env::var(AZURE_SUBSCRIPTION_ID).ok()
    }
}

/// Priority-ordered fallback chain producing credentials for a tenant or a
/// platform. The first source yielding a non-empty result wins.
pub struct CredentialsResolver<'a> {
    pub secrets: &'a dyn SecretStore,
    pub tenants: &'a dyn TenantStore,
    pub parents: &'a dyn ParentStore,
    pub applications: &'a dyn ApplicationStore,
    pub instance_identity: &'a dyn InstanceIdentity,
    pub management_credentials_allowed: bool,
}

impl<'a> CredentialsResolver<'a> {
    fn linked(&self) -> LinkedEntities<'a> {
        LinkedEntities {
            parents: self.parents,
            applications: self.applications,
        }
    }

    fn from_secret(&self, key: &str, cloud: Cloud, consume: bool) -> Option<CloudCredentials> {
        let raw = match self.secrets.get_secret(key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!("cannot read secret `{key}`: {err}");
                return None;
            }
        };
        if consume
            && let Err(err) = self.secrets.delete_secret(key)
        {
            warn!("cannot remove consumed secret `{key}`: {err}");
        }
        let map: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(err) => {
                warn!("secret `{key}` is not a credentials object: {err}");
                return None;
            }
        };
        CloudCredentials::from_json(cloud, &map)
            .map_err(|err| warn!("secret `{key}` carries unusable credentials: {err}"))
            .ok()
    }

    fn application_credentials(&self, application: &Application, cloud: Cloud) -> Option<CloudCredentials> {
        if let Some(inline) = &application.credentials
            && let Some(map) = inline.as_object()
        {
            return CloudCredentials::from_json(cloud, map).ok();
        }
        let key = application.secret.as_deref()?;
        self.from_secret(key, cloud, false)
    }

    /// Resolution order is strict: staged secret, batch-results pointer,
    /// access parent, management parent (opt-in), instance profile.
    pub fn resolve(
        &self,
        tenant: &Tenant,
        credentials_key: Option<&str>,
        batch_results: Option<&BatchResults>,
    ) -> Result<CloudCredentials, CredentialsError> {
        // 1. staged secret named by the envelope; consumed once read
        if let Some(key) = credentials_key {
            info!("trying to get credentials from the staged secret");
            if let Some(credentials) = self.from_secret(key, tenant.cloud, true) {
                return Ok(credentials);
            }
        }
        // 2. event-driven path only
        if let Some(key) = batch_results.and_then(|br| br.credentials_key.as_deref()) {
            info!("trying to get credentials from batch results");
            if let Some(credentials) = self.from_secret(key, tenant.cloud, false) {
                return Ok(credentials);
            }
        }
        // 3. access parent linked to the tenant
        info!("trying to get credentials from the access parent");
        if let Some(application) = self.linked().linked_application(tenant, ParentType::CustodianAccess)
            && let Some(credentials) = self.application_credentials(&application, tenant.cloud)
        {
            return Ok(credentials);
        }
        // 4. management parent, explicitly allowed only
        if self.management_credentials_allowed {
            info!("trying to get management credentials");
            if let Some(parent_id) = &tenant.management_parent_id
                && let Some(parent) = self.parents.get(parent_id)
                && let Some(application) = self.applications.get(&parent.application_id)
                && let Some(credentials) = self.application_credentials(&application, tenant.cloud)
            {
                return Ok(credentials);
            }
        }
        // 5. instance profile, accepted only when the caller identity
        // matches the tenant
        info!("trying instance profile credentials");
        match tenant.cloud {
            Cloud::Aws => {
                if self.instance_identity.aws_account_id().as_deref() == Some(tenant.project.as_str()) {
                    info!("instance profile credentials match the tenant");
                    return Ok(CloudCredentials::InstanceProfile);
                }
            }
            Cloud::Azure => {
                if self.instance_identity.azure_subscription_id().as_deref() == Some(tenant.project.as_str()) {
                    info!("subscription id matches the tenant");
                    return Ok(CloudCredentials::InstanceProfile);
                }
            }
            _ => (),
        }
        Err(CredentialsError::NoCredentials)
    }

    /// Kubernetes platforms: stored kubeconfig and/or staged token, with an
    /// STS-token fallback for EKS clusters reachable through management
    /// credentials.
    pub fn resolve_platform(
        &self,
        platform: &Platform,
        credentials_key: Option<&str>,
    ) -> Result<CloudCredentials, CredentialsError> {
        let cannot = |raw_error_message: String| CredentialsError::CannotMaterialize { raw_error_message };

        let token: Option<String> = credentials_key.and_then(|key| match self.secrets.get_secret(key) {
            Ok(token) => {
                if token.is_some()
                    && let Err(err) = self.secrets.delete_secret(key)
                {
                    warn!("cannot remove consumed secret `{key}`: {err}");
                }
                token
            }
            Err(err) => {
                warn!("cannot read staged token `{key}`: {err}");
                None
            }
        });
        let kubeconfig_raw: Option<String> = self
            .applications
            .get(&platform.application_id)
            .and_then(|application| application.secret)
            .and_then(|secret| self.secrets.get_secret(&secret).ok().flatten());

        match (kubeconfig_raw, token) {
            (Some(raw), Some(token)) => {
                debug!("kubeconfig and custom token are provided, combining both");
                let mut config = Kubeconfig::from_yaml(&raw).map_err(|e| cannot(e.to_string()))?;
                let session = Utc::now().timestamp();
                let user = format!("user-{session}");
                let context = format!("context-{session}");
                let cluster = config
                    .cluster_names()
                    .into_iter()
                    .next()
                    .ok_or_else(|| cannot("kubeconfig names no cluster".to_string()))?;
                config.add_user(&user, &token);
                config.add_context(&context, &cluster, &user);
                config.set_current_context(&context);
                Ok(CloudCredentials::Kubernetes {
                    file: config.to_temp_file().map_err(|e| cannot(e.to_string()))?,
                })
            }
            (Some(raw), None) => {
                debug!("only kubeconfig is provided");
                let config = Kubeconfig::from_yaml(&raw).map_err(|e| cannot(e.to_string()))?;
                Ok(CloudCredentials::Kubernetes {
                    file: config.to_temp_file().map_err(|e| cannot(e.to_string()))?,
                })
            }
            (None, _) if platform.type_ != PlatformType::Eks => {
                warn!("no kubeconfig provided and platform is not EKS");
                Err(CredentialsError::NoCredentials)
            }
            (None, _) => {
                debug!("kubeconfig and token are not provided, using management creds for EKS");
                self.eks_token_credentials(platform)
            }
        }
    }

    fn eks_token_credentials(&self, platform: &Platform) -> Result<CloudCredentials, CredentialsError> {
        let tenant = self
            .tenants
            .get(&platform.tenant_name)
            .ok_or(CredentialsError::NoCredentials)?;
        let application = self
            .linked()
            .linked_application(&tenant, ParentType::AwsManagement)
            .ok_or_else(|| {
                warn!("management application is not found");
                CredentialsError::NoCredentials
            })?;
        let credentials = match self.application_credentials(&application, Cloud::Aws) {
            Some(CloudCredentials::Aws {
                access_key_id,
                secret_access_key,
                session_token,
            }) => AwsApiCredentials {
                access_key_id,
                secret_access_key,
                session_token,
            },
            _ => {
                warn!("no credentials in application: {}", application.id);
                return Err(CredentialsError::NoCredentials);
            }
        };

        let cluster = EksClient::from_keys(&credentials, &platform.region)
            .describe_cluster(&platform.name)
            .map_err(|err| {
                warn!("cannot describe cluster {}: {err}", platform.name);
                CredentialsError::NoCredentials
            })?
            .ok_or_else(|| {
                error!("no cluster with name: {} in region: {}", platform.name, platform.region);
                CredentialsError::NoCredentials
            })?;

        let token = TokenGenerator::new(credentials, AWS_DEFAULT_REGION)
            .get_token(&platform.name)
            .map_err(|err| CredentialsError::CannotMaterialize {
                raw_error_message: err.to_string(),
            })?;
        let config = Kubeconfig::for_token(&cluster.endpoint, &cluster.certificate_authority, &token, &platform.name);
        Ok(CloudCredentials::Kubernetes {
            file: config.to_temp_file().map_err(|err| CredentialsError::CannotMaterialize {
                raw_error_message: err.to_string(),
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tenant::Parent;
    use crate::persistence::memory::{InMemoryApplicationStore, InMemoryParentStore, InMemoryTenantStore};
    use crate::secrets::InMemorySecretStore;
    use maplit::hashmap;
    use serde_json::json;
    use std::collections::BTreeSet;

    struct NoIdentity;
    impl InstanceIdentity for NoIdentity {
        fn aws_account_id(&self) -> Option<String> {
            None
        }
        fn azure_subscription_id(&self) -> Option<String> {
            None
        }
    }

    struct FixedAwsIdentity(&'static str);
    impl InstanceIdentity for FixedAwsIdentity {
        fn aws_account_id(&self) -> Option<String> {
            Some(self.0.to_string())
        }
        fn azure_subscription_id(&self) -> Option<String> {
            None
        }
    }

    fn tenant_with_access_parent() -> (Tenant, InMemoryParentStore, InMemoryApplicationStore) {
        let tenant = Tenant {
            name: "t1".to_string(),
            customer_name: "ACME".to_string(),
            cloud: Cloud::Aws,
            project: "123456789012".to_string(),
            active: true,
            regions: BTreeSet::new(),
            parent_map: hashmap! {ParentType::CustodianAccess => "p-access".to_string()},
            management_parent_id: None,
        };
        let parents = InMemoryParentStore::with([Parent {
            id: "p-access".to_string(),
            customer_id: "ACME".to_string(),
            tenant_name: "t1".to_string(),
            type_: ParentType::CustodianAccess,
            application_id: "app-access".to_string(),
            is_deleted: false,
            meta: serde_json::Value::Null,
        }]);
        let applications = InMemoryApplicationStore::with([Application {
            id: "app-access".to_string(),
            customer_id: "ACME".to_string(),
            secret: None,
            credentials: Some(json!({
                "AWS_ACCESS_KEY_ID": "AKIAPARENT",
                "AWS_SECRET_ACCESS_KEY": "parent-secret",
            })),
            license_keys: Default::default(),
        }]);
        (tenant, parents, applications)
    }

    #[test]
    fn staged_secret_wins_and_is_consumed() {
        let (tenant, parents, applications) = tenant_with_access_parent();
        let secrets = InMemorySecretStore::with([(
            "k1".to_string(),
            json!({"AWS_ACCESS_KEY_ID": "AKIASTAGED", "AWS_SECRET_ACCESS_KEY": "s"}).to_string(),
        )]);
        let tenants = InMemoryTenantStore::default();
        let resolver = CredentialsResolver {
            secrets: &secrets,
            tenants: &tenants,
            parents: &parents,
            applications: &applications,
            instance_identity: &NoIdentity,
            management_credentials_allowed: false,
        };

        let credentials = resolver.resolve(&tenant, Some("k1"), None).unwrap();
        match credentials {
            CloudCredentials::Aws { access_key_id, .. } => assert_eq!(access_key_id, "AKIASTAGED"),
            _ => panic!("expected AWS credentials"),
        }
        // consumed after retrieval; the parent was never consulted
        assert_eq!(secrets.get_secret("k1").unwrap(), None);
    }

    #[test]
    fn falls_back_to_access_parent() {
        let (tenant, parents, applications) = tenant_with_access_parent();
        let secrets = InMemorySecretStore::default();
        let tenants = InMemoryTenantStore::default();
        let resolver = CredentialsResolver {
            secrets: &secrets,
            tenants: &tenants,
            parents: &parents,
            applications: &applications,
            instance_identity: &NoIdentity,
            management_credentials_allowed: false,
        };

        match resolver.resolve(&tenant, None, None).unwrap() {
            CloudCredentials::Aws { access_key_id, .. } => assert_eq!(access_key_id, "AKIAPARENT"),
            _ => panic!("expected AWS credentials"),
        }
    }

    #[test]
    fn instance_profile_requires_identity_match() {
        let (mut tenant, _, _) = tenant_with_access_parent();
        tenant.parent_map.clear();
        let secrets = InMemorySecretStore::default();
        let tenants = InMemoryTenantStore::default();
        let parents = InMemoryParentStore::default();
        let applications = InMemoryApplicationStore::default();

        let matching = CredentialsResolver {
            secrets: &secrets,
            tenants: &tenants,
            parents: &parents,
            applications: &applications,
            instance_identity: &FixedAwsIdentity("123456789012"),
            management_credentials_allowed: false,
        };
        assert!(matches!(
            matching.resolve(&tenant, None, None).unwrap(),
            CloudCredentials::InstanceProfile
        ));

        let mismatched = CredentialsResolver {
            secrets: &secrets,
            tenants: &tenants,
            parents: &parents,
            applications: &applications,
            instance_identity: &FixedAwsIdentity("999999999999"),
            management_credentials_allowed: false,
        };
        assert!(matches!(
            mismatched.resolve(&tenant, None, None),
            Err(CredentialsError::NoCredentials)
        ));
    }

    #[test]
    fn google_credentials_materialize_to_a_file() {
        let map = json!({"type": "service_account", "project_id": "proj-1"});
        let credentials = CloudCredentials::from_json(Cloud::Google, map.as_object().unwrap()).unwrap();
        let vars = credentials.as_env_vars();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].0, GOOGLE_APPLICATION_CREDENTIALS);
        let written = std::fs::read_to_string(&vars[0].1).unwrap();
        assert!(written.contains("proj-1"));
    }

    #[test]
    fn platform_kubeconfig_with_token_merges_a_user() {
        let kubeconfig = r#"
apiVersion: v1
kind: Config
clusters:
  - name: prod
    cluster:
      server: https://10.0.0.1
"#;
        let secrets = InMemorySecretStore::with([
            ("app-secret".to_string(), kubeconfig.to_string()),
            ("tok-key".to_string(), "bearer-token".to_string()),
        ]);
        let applications = InMemoryApplicationStore::with([Application {
            id: "app-k8s".to_string(),
            customer_id: "ACME".to_string(),
            secret: Some("app-secret".to_string()),
            credentials: None,
            license_keys: Default::default(),
        }]);
        let tenants = InMemoryTenantStore::default();
        let parents = InMemoryParentStore::default();
        let resolver = CredentialsResolver {
            secrets: &secrets,
            tenants: &tenants,
            parents: &parents,
            applications: &applications,
            instance_identity: &NoIdentity,
            management_credentials_allowed: false,
        };
        let platform = Platform {
            id: "p-1".to_string(),
            tenant_name: "t1".to_string(),
            customer_id: "ACME".to_string(),
            type_: PlatformType::Native,
            region: "eu-west-1".to_string(),
            name: "prod".to_string(),
            application_id: "app-k8s".to_string(),
        };

        let credentials = resolver.resolve_platform(&platform, Some("tok-key")).unwrap();
        let vars = credentials.as_env_vars();
        assert_eq!(vars[0].0, KUBECONFIG);
        let written = std::fs::read_to_string(&vars[0].1).unwrap();
        assert!(written.contains("bearer-token"));
        assert!(written.contains("prod"));
    }

    #[test]
    fn native_platform_without_kubeconfig_fails() {
        let secrets = InMemorySecretStore::default();
        let tenants = InMemoryTenantStore::default();
        let parents = InMemoryParentStore::default();
        let applications = InMemoryApplicationStore::default();
        let resolver = CredentialsResolver {
            secrets: &secrets,
            tenants: &tenants,
            parents: &parents,
            applications: &applications,
            instance_identity: &NoIdentity,
            management_credentials_allowed: false,
        };
        let platform = Platform {
            id: "p-1".to_string(),
            tenant_name: "t1".to_string(),
            customer_id: "ACME".to_string(),
            type_: PlatformType::Native,
            region: "eu-west-1".to_string(),
            name: "prod".to_string(),
            application_id: "missing".to_string(),
        };
        assert!(matches!(
            resolver.resolve_platform(&platform, None),
            Err(CredentialsError::NoCredentials)
        ));
    }
}
