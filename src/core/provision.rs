//! Provisioning entry points: full platform provisioning, namespace status
//! and beacon upgrades.

use std::path::PathBuf;

use serde::Serialize;

use crate::address_book::{AddressBook, ConfigurationLedger, DeploymentRecord};
use crate::artifacts::ArtifactStore;
use crate::beacon::{self, BeaconUpgrade};
use crate::chain::{memory, ChainClient, ConfirmationPolicy, MemoryChain, RpcChain};
use crate::config::{self, NetworkTarget, ResolvedNetwork};
use crate::configurator::{
    ConfigOutcome, ConfigStatus, PostDeployConfigurator, BIND_FACTORY, GRANT_CAPABILITIES,
};
use crate::defaults::{ProvisionConfig, BUILTIN_NETWORK};
use crate::environment::{Environment, EnvironmentValidator};
use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, UnitOutcome, UnitStatus};
use crate::paths;
use crate::platform::{self, GrantRequest};
use crate::types::{self, Address};

#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    pub config_path: Option<PathBuf>,
    /// Units to deploy again even though they are recorded.
    pub redeploy: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionSummary {
    pub deployed: u32,
    pub skipped: u32,
    pub configured: u32,
    pub already_configured: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionReport {
    pub network: String,
    pub deployer: Address,
    pub persistent: bool,
    pub units: Vec<UnitOutcome>,
    pub configuration: Vec<ConfigOutcome>,
    pub summary: ProvisionSummary,
}

impl ProvisionReport {
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}

/// Everything a run against one network needs.
struct Session {
    network: ResolvedNetwork,
    env: Environment,
    book: AddressBook,
    chain: Box<dyn ChainClient>,
}

fn open_session(network: &str, config_path: Option<&std::path::Path>) -> Result<Session> {
    let config = config::load(config_path)?;
    let env = Environment::load(&paths::expand(&config.env_file)?)?;

    // Nothing touches the chain or the namespace before this passes.
    EnvironmentValidator::platform().validate(&env)?;

    let resolved = config::resolve_network(&config, network, &env)?;
    let mut book = open_book(&config, &resolved)?;
    book.lock()?;

    let chain: Box<dyn ChainClient> = match &resolved.target {
        NetworkTarget::InMemory => Box::new(MemoryChain::new(
            resolved
                .settings
                .deployer
                .unwrap_or(memory::DEFAULT_DEPLOYER),
        )),
        NetworkTarget::Rpc { url } => Box::new(RpcChain::connect(
            url.clone(),
            resolved.settings.deployer,
            ArtifactStore::new(paths::expand(&config.artifacts_dir)?),
            resolved.settings.gas_limit,
        )?),
    };

    Ok(Session {
        network: resolved,
        env,
        book,
        chain,
    })
}

fn open_book(config: &ProvisionConfig, network: &ResolvedNetwork) -> Result<AddressBook> {
    if network.is_persistent() {
        AddressBook::open(&paths::expand(&config.deployments_dir)?, &network.name)
    } else {
        Ok(AddressBook::ephemeral(&network.name))
    }
}

/// Provision the platform on `network`.
pub fn run(network: &str, options: &ProvisionOptions) -> Result<ProvisionReport> {
    let mut session = open_session(network, options.config_path.as_deref())?;
    let policy = session.network.confirmation_policy();
    provision(
        session.chain.as_ref(),
        &mut session.book,
        &session.env,
        policy,
        &options.redeploy,
    )
}

/// Deploy every platform unit, then apply post-deploy configuration.
///
/// Deployment errors abort the run. Configuration actions are reported one
/// by one and a failed action does not stop the next.
pub fn provision(
    chain: &dyn ChainClient,
    book: &mut AddressBook,
    env: &Environment,
    policy: ConfirmationPolicy,
    redeploy: &[String],
) -> Result<ProvisionReport> {
    EnvironmentValidator::platform().validate(env)?;

    let units = Orchestrator::new(chain, book, env, policy)
        .with_redeploy(redeploy.iter().cloned())
        .run(&platform::units())?;

    let mut configurator = PostDeployConfigurator::new(chain, book, policy);
    let mut configuration = vec![bind_platform_factory(&mut configurator)];
    for request in platform::grant_requests() {
        configuration.push(grant_request(&mut configurator, &request));
    }

    let summary = summarize(&units, &configuration);
    if summary.failed > 0 {
        eprintln!(
            "[provision] {} configuration action(s) failed",
            summary.failed
        );
    }

    Ok(ProvisionReport {
        network: book.network().to_string(),
        deployer: chain.deployer(),
        persistent: book.is_persistent(),
        units,
        configuration,
        summary,
    })
}

fn bind_platform_factory(configurator: &mut PostDeployConfigurator<'_>) -> ConfigOutcome {
    let subject = platform::WALLET_REGISTRY;
    match try_bind_platform_factory(configurator) {
        Ok(outcome) => outcome.with_subject(subject),
        Err(err) => report_failure(BIND_FACTORY, subject, err),
    }
}

fn try_bind_platform_factory(configurator: &mut PostDeployConfigurator<'_>) -> Result<ConfigOutcome> {
    let registry = configurator.book().get(platform::WALLET_REGISTRY)?;
    let factory = configurator.book().get(platform::WALLET_FACTORY)?;
    configurator.bind_factory(registry, factory)
}

fn grant_request(
    configurator: &mut PostDeployConfigurator<'_>,
    request: &GrantRequest,
) -> ConfigOutcome {
    match try_grant_request(configurator, request) {
        Ok(outcome) => outcome.with_subject(request.asset),
        Err(err) => report_failure(GRANT_CAPABILITIES, request.asset, err),
    }
}

/// Resolve a request's unit names to addresses and submit it.
fn try_grant_request(
    configurator: &mut PostDeployConfigurator<'_>,
    request: &GrantRequest,
) -> Result<ConfigOutcome> {
    let book = configurator.book();
    let registry = book.get(platform::CAPABILITY_REGISTRY)?;
    let asset = book.get(request.asset)?;
    let targets = request
        .targets
        .iter()
        .map(|name| book.get(name))
        .collect::<Result<Vec<_>>>()?;
    let selectors = request
        .selectors
        .iter()
        .map(|raw| types::parse_selector("selector", raw))
        .collect::<Result<Vec<_>>>()?;
    let labels: Vec<String> = request.labels.iter().map(|l| l.to_string()).collect();

    configurator.grant_capabilities(registry, asset, &targets, &selectors, &labels)
}

fn report_failure(action: &str, subject: &str, err: Error) -> ConfigOutcome {
    let err = err.with_step(action);
    eprintln!(
        "[configure] {} for {} failed: {} ({})",
        action,
        subject,
        err.message,
        err.code.as_str()
    );
    ConfigOutcome::failed(action, &err).with_subject(subject)
}

fn summarize(units: &[UnitOutcome], configuration: &[ConfigOutcome]) -> ProvisionSummary {
    let mut summary = ProvisionSummary::default();
    for unit in units {
        match unit.status {
            UnitStatus::Deployed => summary.deployed += 1,
            UnitStatus::Skipped => summary.skipped += 1,
        }
    }
    for action in configuration {
        match action.status {
            ConfigStatus::Applied => summary.configured += 1,
            ConfigStatus::Skipped => summary.already_configured += 1,
            ConfigStatus::Failed => summary.failed += 1,
        }
    }
    summary
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub network: String,
    pub persistent: bool,
    pub units: Vec<DeploymentRecord>,
    pub ledger: ConfigurationLedger,
}

/// Recorded units and configuration of a namespace. Reads only; takes no
/// lock and contacts no node.
pub fn status(network: &str, config_path: Option<&std::path::Path>) -> Result<StatusReport> {
    let config = config::load(config_path)?;

    let settings = match config.networks.get(network) {
        Some(settings) => Some(settings),
        None if network == BUILTIN_NETWORK => None,
        None => {
            let mut tried: Vec<String> = config.networks.keys().cloned().collect();
            tried.push(BUILTIN_NETWORK.to_string());
            return Err(Error::validation_invalid_argument(
                "network",
                format!("Unknown network '{}'", network),
                Some(network.to_string()),
                Some(tried),
            ));
        }
    };

    let persistent = network != BUILTIN_NETWORK
        || settings.is_some_and(|s| s.rpc_url.is_some() || s.rpc_url_env.is_some());

    let book = if persistent {
        AddressBook::open(&paths::expand(&config.deployments_dir)?, network)?
    } else {
        AddressBook::ephemeral(network)
    };

    Ok(StatusReport {
        network: network.to_string(),
        persistent,
        units: book.records().cloned().collect(),
        ledger: book.ledger().clone(),
    })
}

// ============================================================================
// Beacon upgrade
// ============================================================================

#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub config_path: Option<PathBuf>,
    pub beacon: String,
    pub implementation: String,
    pub logic_kind: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeReport {
    pub network: String,
    /// Set when the namespace had to be provisioned first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioned: Option<ProvisionReport>,
    pub upgrade: BeaconUpgrade,
}

/// Point a recorded beacon at a new implementation unit.
///
/// An in-memory namespace starts empty, so it is provisioned first.
pub fn upgrade(network: &str, options: &UpgradeOptions) -> Result<UpgradeReport> {
    let mut session = open_session(network, options.config_path.as_deref())?;
    let policy = session.network.confirmation_policy();
    let chain = session.chain.as_ref();

    let provisioned = if session.book.is_persistent() {
        None
    } else {
        Some(provision(chain, &mut session.book, &session.env, policy, &[])?)
    };

    let mut orchestrator = Orchestrator::new(chain, &mut session.book, &session.env, policy);
    let upgrade = beacon::upgrade(
        &mut orchestrator,
        &options.beacon,
        &options.implementation,
        &options.logic_kind,
    )?;

    Ok(UpgradeReport {
        network: network.to_string(),
        provisioned,
        upgrade,
    })
}
