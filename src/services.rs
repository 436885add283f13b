use crate::clients::batch::BatchClient;
use crate::clients::license_manager::LicenseManagerClient;
use crate::config::Config;
use crate::credentials::{CredentialsResolver, InstanceIdentity, StsInstanceIdentity};
use crate::object_storage::ObjectStorage;
use crate::persistence::{
    ApplicationStore, BatchResultsStore, JobStore, LicenseStore, ParentStore, RulesetStore, ScheduledJobStore,
    SettingsStore, TenantStore,
};
use crate::secrets::SecretStore;
use crate::siem::IntegrationService;
use std::sync::Arc;

/// The dependency-injection container: every external contract the
/// components need, constructed once at startup and handed around by
/// reference. No global state.
pub struct Services {
    pub config: Config,
    pub tenants: Arc<dyn TenantStore>,
    pub parents: Arc<dyn ParentStore>,
    pub applications: Arc<dyn ApplicationStore>,
    pub jobs: Arc<dyn JobStore>,
    pub rulesets: Arc<dyn RulesetStore>,
    pub licenses: Arc<dyn LicenseStore>,
    pub batch_results: Arc<dyn BatchResultsStore>,
    pub scheduled_jobs: Arc<dyn ScheduledJobStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub object_storage: Arc<dyn ObjectStorage>,
    pub batch: Arc<dyn BatchClient>,
    pub license_manager: Arc<dyn LicenseManagerClient>,
    pub instance_identity: Arc<dyn InstanceIdentity>,
    pub integrations: Arc<dyn IntegrationService>,
}

impl Services {
    pub fn credentials_resolver(&self) -> CredentialsResolver<'_> {
        CredentialsResolver {
            secrets: self.secrets.as_ref(),
            tenants: self.tenants.as_ref(),
            parents: self.parents.as_ref(),
            applications: self.applications.as_ref(),
            instance_identity: self.instance_identity.as_ref(),
            management_credentials_allowed: self.config.management_credentials_allowed,
        }
    }
}

/// In-memory wiring used by on-prem bootstrap paths and tests.
pub struct ServicesBuilder {
    config: Config,
    batch: Option<Arc<dyn BatchClient>>,
    license_manager: Option<Arc<dyn LicenseManagerClient>>,
    instance_identity: Option<Arc<dyn InstanceIdentity>>,
    tenants: Option<Arc<dyn TenantStore>>,
    parents: Option<Arc<dyn ParentStore>>,
    applications: Option<Arc<dyn ApplicationStore>>,
    rulesets: Option<Arc<dyn RulesetStore>>,
    licenses: Option<Arc<dyn LicenseStore>>,
    secrets: Option<Arc<dyn SecretStore>>,
    object_storage: Option<Arc<dyn ObjectStorage>>,
    integrations: Option<Arc<dyn IntegrationService>>,
}

impl ServicesBuilder {
    pub fn new(config: Config) -> Self {
        ServicesBuilder {
            config,
            batch: None,
            license_manager: None,
            instance_identity: None,
            tenants: None,
            parents: None,
            applications: None,
            rulesets: None,
            licenses: None,
            secrets: None,
            object_storage: None,
            integrations: None,
        }
    }

    pub fn batch(mut self, batch: Arc<dyn BatchClient>) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn license_manager(mut self, license_manager: Arc<dyn LicenseManagerClient>) -> Self {
        self.license_manager = Some(license_manager);
        self
    }

    pub fn instance_identity(mut self, instance_identity: Arc<dyn InstanceIdentity>) -> Self {
        self.instance_identity = Some(instance_identity);
        self
    }

    pub fn tenants(mut self, tenants: Arc<dyn TenantStore>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    pub fn parents(mut self, parents: Arc<dyn ParentStore>) -> Self {
        self.parents = Some(parents);
        self
    }

    pub fn applications(mut self, applications: Arc<dyn ApplicationStore>) -> Self {
        self.applications = Some(applications);
        self
    }

    pub fn rulesets(mut self, rulesets: Arc<dyn RulesetStore>) -> Self {
        self.rulesets = Some(rulesets);
        self
    }

    pub fn licenses(mut self, licenses: Arc<dyn LicenseStore>) -> Self {
        self.licenses = Some(licenses);
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn object_storage(mut self, object_storage: Arc<dyn ObjectStorage>) -> Self {
        self.object_storage = Some(object_storage);
        self
    }

    pub fn integrations(mut self, integrations: Arc<dyn IntegrationService>) -> Self {
        self.integrations = Some(integrations);
        self
    }

    pub fn build(self) -> Services {
        use crate::clients::batch::RecordingBatchClient;
        use crate::clients::license_manager::StaticLicenseManagerClient;
        use crate::object_storage::InMemoryObjectStorage;
        use crate::persistence::memory::*;
        use crate::secrets::InMemorySecretStore;

        Services {
            config: self.config,
            tenants: self.tenants.unwrap_or_else(|| Arc::new(InMemoryTenantStore::default())),
            parents: self.parents.unwrap_or_else(|| Arc::new(InMemoryParentStore::default())),
            applications: self
                .applications
                .unwrap_or_else(|| Arc::new(InMemoryApplicationStore::default())),
            jobs: Arc::new(InMemoryJobStore::default()),
            rulesets: self.rulesets.unwrap_or_else(|| Arc::new(InMemoryRulesetStore::default())),
            licenses: self.licenses.unwrap_or_else(|| Arc::new(InMemoryLicenseStore::default())),
            batch_results: Arc::new(InMemoryBatchResultsStore::default()),
            scheduled_jobs: Arc::new(InMemoryScheduledJobStore::default()),
            settings: Arc::new(InMemorySettingsStore::default()),
            secrets: self.secrets.unwrap_or_else(|| Arc::new(InMemorySecretStore::default())),
            object_storage: self
                .object_storage
                .unwrap_or_else(|| Arc::new(InMemoryObjectStorage::default())),
            batch: self.batch.unwrap_or_else(|| Arc::new(RecordingBatchClient::default())),
            license_manager: self
                .license_manager
                .unwrap_or_else(|| Arc::new(StaticLicenseManagerClient::denying())),
            instance_identity: self.instance_identity.unwrap_or_else(|| Arc::new(StsInstanceIdentity)),
            integrations: self
                .integrations
                .unwrap_or_else(|| Arc::new(crate::siem::NoIntegrations)),
        }
    }
}
