use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use delegation_deploy::orchestrator::UnitOutcome;
use delegation_deploy::configurator::ConfigOutcome;
use delegation_deploy::provision::{self, ProvisionOptions, ProvisionSummary};
use delegation_deploy::Address;

use super::CmdResult;

#[derive(Args)]
pub struct ProvisionArgs {
    /// Network to provision (`hardhat` runs in-process)
    pub network: String,

    /// Path to provision.json
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Deploy this unit again even if it is recorded (can be repeated)
    #[arg(long = "redeploy", value_name = "UNIT")]
    pub redeploy: Vec<String>,
}

#[derive(Serialize)]
pub struct ProvisionOutput {
    pub command: String,
    pub network: String,
    pub deployer: Address,
    pub persistent: bool,
    pub units: Vec<UnitOutcome>,
    pub configuration: Vec<ConfigOutcome>,
    pub summary: ProvisionSummary,
}

pub fn run(args: ProvisionArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<ProvisionOutput> {
    let options = ProvisionOptions {
        config_path: args.config,
        redeploy: args.redeploy,
    };

    let report = provision::run(&args.network, &options).map_err(|e| {
        if e.code == delegation_deploy::ErrorCode::ConfigMissingKey {
            e.with_hint("Set the variable in the environment or in the configured .env file")
        } else {
            e
        }
    })?;

    let exit_code = if report.has_failures() { 1 } else { 0 };

    Ok((
        ProvisionOutput {
            command: "provision.run".to_string(),
            network: report.network,
            deployer: report.deployer,
            persistent: report.persistent,
            units: report.units,
            configuration: report.configuration,
            summary: report.summary,
        },
        exit_code,
    ))
}
