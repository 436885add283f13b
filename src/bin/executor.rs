use anyhow::Context;
use sentinel_engine::clients::batch::LocalBatchClient;
use sentinel_engine::clients::license_manager::HttpLicenseManagerClient;
use sentinel_engine::config::Config;
use sentinel_engine::constants::{
    AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN, ENV_LM_API_HOST, ENV_LM_CLIENT_KEY, ENV_VAULT_ADDR,
    SECRETS_MOUNT,
};
use sentinel_engine::errors::EXIT_CODE_UNEXPECTED;
use sentinel_engine::executor::Executor;
use sentinel_engine::executor::environment::ExecutorEnv;
use sentinel_engine::executor::process::{RegionScan, SCAN_REGION_FLAG, encode_failures, run_region_scan};
use sentinel_engine::object_storage::s3::S3;
use sentinel_engine::policy::engine::DryRunEngine;
use sentinel_engine::secrets::vault::VaultSecretStore;
use sentinel_engine::services::{Services, ServicesBuilder};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Worker entry point. Without arguments it runs the whole job; with
/// `--scan-region` it is the per-region child image spawned by itself.
fn main() {
    let args: Vec<String> = env::args().collect();
    let config = Config::from_env();
    sentinel_engine::logging::init(!config.on_prem);

    if args.iter().any(|a| a == SCAN_REGION_FLAG) {
        std::process::exit(child_main(&args));
    }

    match driver_main(config) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(EXIT_CODE_UNEXPECTED);
        }
    }
}

fn driver_main(config: Config) -> anyhow::Result<i32> {
    let env = ExecutorEnv::from_process_env()
        .map_err(anyhow::Error::msg)
        .context("invalid batch envelope")?;
    let services = build_services(config);
    let engine = DryRunEngine;
    let executor = Executor {
        services: &services,
        engine: &engine,
        executor_bin: executor_bin(),
    };
    Ok(executor.run(&env))
}

fn child_main(args: &[String]) -> i32 {
    let scan = match RegionScan::from_args(args) {
        Ok(scan) => scan,
        Err(err) => {
            eprintln!("invalid scan arguments: {err}");
            return EXIT_CODE_UNEXPECTED;
        }
    };
    let engine = DryRunEngine;
    let failed = run_region_scan(&engine, &scan);
    // the one stdout line the parent is waiting for
    println!("{}", encode_failures(&failed));
    0
}

fn executor_bin() -> PathBuf {
    env::current_exe().unwrap_or_else(|_| PathBuf::from("executor"))
}

/// Wires the container from the process environment: Vault and S3 when
/// reachable, in-memory fallbacks otherwise (local runs and tests).
fn build_services(config: Config) -> Services {
    let aws_region = config.aws_region.clone();
    let mut builder = ServicesBuilder::new(config);

    if env::var(ENV_VAULT_ADDR).is_ok() {
        match VaultSecretStore::new(SECRETS_MOUNT) {
            Ok(store) => builder = builder.secrets(Arc::new(store)),
            Err(err) => eprintln!("cannot reach vault, using in-memory secrets: {err}"),
        }
    }

    let storage = match (env::var(AWS_ACCESS_KEY_ID), env::var(AWS_SECRET_ACCESS_KEY)) {
        (Ok(access_key_id), Ok(secret_access_key)) => S3::new(
            access_key_id,
            secret_access_key,
            env::var(AWS_SESSION_TOKEN).ok(),
            aws_region.clone(),
        ),
        _ => S3::from_default_chain(aws_region),
    };
    builder = builder.object_storage(Arc::new(storage));

    if let Ok(host) = env::var(ENV_LM_API_HOST)
        && let Ok(base_url) = Url::parse(&host)
        && let Ok(client) =
            HttpLicenseManagerClient::new(base_url, env::var(ENV_LM_CLIENT_KEY).unwrap_or_default())
    {
        builder = builder.license_manager(Arc::new(client));
    }

    builder.batch(Arc::new(LocalBatchClient::new(executor_bin()))).build()
}
