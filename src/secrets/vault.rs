use crate::runtime::block_on;
use crate::secrets::{SecretStore, SecretStoreError};
use serde::{Deserialize, Serialize};
use std::env;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;
use vaultrs_login::LoginClient;
use vaultrs_login::engines::approle::AppRoleLogin;

/// Secrets are stored as single-field KV2 entries.
#[derive(Debug, Serialize, Deserialize)]
struct SecretPayload {
    value: String,
}

pub enum VaultAuthType {
    Token,
    AppRole,
    Invalid,
}

pub struct VaultSecretStore {
    connection: VaultClient,
    mount: String,
}

impl VaultSecretStore {
    pub fn detect_auth_type() -> VaultAuthType {
        if env::var_os("VAULT_TOKEN").is_some() {
            VaultAuthType::Token
        } else if env::var_os("VAULT_ROLE_ID").is_some() && env::var_os("VAULT_SECRET_ID").is_some() {
            VaultAuthType::AppRole
        } else {
            VaultAuthType::Invalid
        }
    }

    fn get_env_var(env_var: &str) -> Result<String, SecretStoreError> {
        env::var(env_var).map_err(|_| SecretStoreError::Unreachable {
            raw_error_message: format!("environment variable `{env_var}` is not set"),
        })
    }

    pub fn new(mount: impl Into<String>) -> Result<VaultSecretStore, SecretStoreError> {
        let vault_addr = Self::get_env_var("VAULT_ADDR")?;
        let unreachable = |err: ClientError| SecretStoreError::Unreachable {
            raw_error_message: format!("{err:?}"),
        };

        let connection = match Self::detect_auth_type() {
            VaultAuthType::Token => {
                let token = Self::get_env_var("VAULT_TOKEN")?;
                VaultClient::new(
                    VaultClientSettingsBuilder::default()
                        .address(vault_addr)
                        .token(token.as_str())
                        .build()
                        .map_err(|err| SecretStoreError::Unreachable {
                            raw_error_message: err.to_string(),
                        })?,
                )
                .map_err(unreachable)?
            }
            VaultAuthType::AppRole => {
                let role_id = Self::get_env_var("VAULT_ROLE_ID")?;
                let secret_id = Self::get_env_var("VAULT_SECRET_ID")?;
                let mut client = VaultClient::new(
                    VaultClientSettingsBuilder::default()
                        .address(vault_addr)
                        .build()
                        .map_err(|err| SecretStoreError::Unreachable {
                            raw_error_message: err.to_string(),
                        })?,
                )
                .map_err(unreachable)?;

                let login = AppRoleLogin { role_id, secret_id };
                block_on(client.login("approle", &login)).map_err(|err| SecretStoreError::Unreachable {
                    raw_error_message: format!("{err:?}"),
                })?;
                client
            }
            VaultAuthType::Invalid => {
                return Err(SecretStoreError::Unreachable {
                    raw_error_message: "no usable Vault auth found in environment".to_string(),
                });
            }
        };

        Ok(VaultSecretStore {
            connection,
            mount: mount.into(),
        })
    }
}

impl SecretStore for VaultSecretStore {
    fn get_secret(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        match block_on(kv2::read::<SecretPayload>(&self.connection, &self.mount, name)) {
            Ok(payload) => Ok(Some(payload.value)),
            Err(ClientError::APIError { code: 404, .. }) => Ok(None),
            Err(err) => Err(SecretStoreError::CannotRead {
                name: name.to_string(),
                raw_error_message: format!("{err:?}"),
            }),
        }
    }

    fn save_secret(&self, name: &str, value: &str) -> Result<(), SecretStoreError> {
        let payload = SecretPayload {
            value: value.to_string(),
        };
        block_on(kv2::set(&self.connection, &self.mount, name, &payload))
            .map(|_| ())
            .map_err(|err| SecretStoreError::CannotWrite {
                name: name.to_string(),
                raw_error_message: format!("{err:?}"),
            })
    }

    fn delete_secret(&self, name: &str) -> Result<(), SecretStoreError> {
        match block_on(kv2::delete_metadata(&self.connection, &self.mount, name)) {
            Ok(()) | Err(ClientError::APIError { code: 404, .. }) => Ok(()),
            Err(err) => Err(SecretStoreError::CannotWrite {
                name: name.to_string(),
                raw_error_message: format!("{err:?}"),
            }),
        }
    }
}
