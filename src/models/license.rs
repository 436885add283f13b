use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub key: String,
    pub expiration: Option<DateTime<Utc>>,
    /// License-manager ids of the rule-sets this license grants.
    pub ruleset_ids: Vec<String>,
    /// customer name -> per-customer grant (tenant license key).
    pub customers: HashMap<String, CustomerLicenseGrant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerLicenseGrant {
    pub tenant_license_key: String,
}

impl License {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(expiration) => expiration <= now,
            None => false,
        }
    }

    pub fn tenant_license_key(&self, customer: &str) -> Option<&str> {
        self.customers
            .get(customer)
            .map(|grant| grant.tenant_license_key.as_str())
    }
}
