use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use delegation_deploy::beacon::BeaconUpgrade;
use delegation_deploy::provision::{self, ProvisionReport, UpgradeOptions};

use super::CmdResult;

#[derive(Args)]
pub struct UpgradeArgs {
    /// Network the beacon lives on
    pub network: String,

    /// Recorded beacon unit, e.g. DelegationOwnerBeacon
    pub beacon: String,

    /// Unit name for the new implementation, e.g. DelegationOwnerV2
    pub implementation: String,

    /// Contract the new implementation is deployed with
    #[arg(long, value_name = "CONTRACT")]
    pub kind: String,

    /// Path to provision.json
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Serialize)]
pub struct UpgradeOutput {
    pub command: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioned: Option<ProvisionReport>,
    pub upgrade: BeaconUpgrade,
}

pub fn run(args: UpgradeArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<UpgradeOutput> {
    let options = UpgradeOptions {
        config_path: args.config,
        beacon: args.beacon,
        implementation: args.implementation,
        logic_kind: args.kind,
    };

    let report = provision::upgrade(&args.network, &options)?;

    Ok((
        UpgradeOutput {
            command: "upgrade.beacon".to_string(),
            network: report.network,
            provisioned: report.provisioned,
            upgrade: report.upgrade,
        },
        0,
    ))
}
