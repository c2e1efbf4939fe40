use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use delegation_deploy::address_book::{ConfigurationLedger, DeploymentRecord};
use delegation_deploy::provision;

use super::CmdResult;

#[derive(Args)]
pub struct StatusArgs {
    /// Network whose namespace to inspect
    pub network: String,

    /// Path to provision.json
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Serialize)]
pub struct StatusOutput {
    pub command: String,
    pub network: String,
    pub persistent: bool,
    pub units: Vec<DeploymentRecord>,
    pub ledger: ConfigurationLedger,
}

pub fn run(args: StatusArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<StatusOutput> {
    let report = provision::status(&args.network, args.config.as_deref())?;

    Ok((
        StatusOutput {
            command: "status.show".to_string(),
            network: report.network,
            persistent: report.persistent,
            units: report.units,
            ledger: report.ledger,
        },
        0,
    ))
}
