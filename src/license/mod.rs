use crate::errors::ApiError;
use crate::models::license::License;
use crate::models::tenant::{ParentType, Tenant};
use crate::persistence::{ApplicationStore, LicenseStore, LinkedEntities, ParentStore};
use chrono::Utc;

/// License resolution shared by every licensed submission path: licensing
/// application -> license key for the scan domain -> live license ->
/// per-customer tenant license key.
pub struct LicenseService<'a> {
    pub licenses: &'a dyn LicenseStore,
    pub parents: &'a dyn ParentStore,
    pub applications: &'a dyn ApplicationStore,
}

#[derive(Debug)]
pub struct TenantLicense {
    pub license: License,
    pub tenant_license_key: String,
}

impl<'a> LicenseService<'a> {
    pub fn get(&self, key: &str) -> Option<License> {
        self.licenses.get(key)
    }

    pub fn is_expired(&self, license: &License) -> bool {
        license.is_expired(Utc::now())
    }

    pub fn resolve_tenant_license(&self, tenant: &Tenant, domain: &str) -> Result<TenantLicense, ApiError> {
        let linked = LinkedEntities {
            parents: self.parents,
            applications: self.applications,
        };
        let application = linked
            .linked_application(tenant, ParentType::CustodianLicenses)
            .ok_or_else(|| {
                ApiError::validation(format!(
                    "Licensing application has not been linked to tenant: {}",
                    tenant.name
                ))
            })?;
        let license_key = application.license_key(domain).ok_or_else(|| {
            ApiError::validation(format!(
                "Customer {} has not been assigned a {domain} license yet",
                tenant.customer_name
            ))
        })?;
        let license = self.get(license_key);
        let license = match license {
            Some(license) if !self.is_expired(&license) => license,
            _ => return Err(ApiError::validation("Affected license has expired")),
        };
        let tenant_license_key = license
            .tenant_license_key(&tenant.customer_name)
            .ok_or_else(|| {
                ApiError::validation(format!(
                    "Customer {} holds no grant under license {}",
                    tenant.customer_name, license.key
                ))
            })?
            .to_string();
        Ok(TenantLicense {
            license,
            tenant_license_key,
        })
    }
}
