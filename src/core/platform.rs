//! The delegation wallet platform: its units, their wiring and the
//! capability grants seeded after deployment.

use crate::beacon;
use crate::environment::{FALLBACK_HANDLER, SAFE_PROXY_FACTORY, SAFE_TEMPLATE};
use crate::pipeline::UnitSpec;

// Unit names
pub const TEST_NFT: &str = "TestNft";
pub const TEST_NFT_PLATFORM: &str = "TestNftPlatform";
pub const OWNER_IMPLEMENTATION: &str = "DelegationOwnerImplementation";
pub const GUARD_IMPLEMENTATION: &str = "DelegationGuardImplementation";
pub const OWNER_BEACON: &str = "DelegationOwnerBeacon";
pub const GUARD_BEACON: &str = "DelegationGuardBeacon";
pub const CAPABILITY_REGISTRY: &str = "DelegationRecipes";
pub const WALLET_REGISTRY: &str = "DelegationWalletRegistry";
pub const TEST_LOAN_CONTROLLER: &str = "TestLoanController";
pub const WALLET_FACTORY: &str = "DelegationWalletFactory";

// Contract kinds
pub const OWNER_KIND: &str = "DelegationOwner";
pub const GUARD_KIND: &str = "DelegationGuard";
pub const BEACON_KIND: &str = "UpgradeableBeacon";
pub const PROXY_KIND: &str = "BeaconProxy";
pub const CAPABILITY_REGISTRY_KIND: &str = "DelegationRecipes";
pub const WALLET_REGISTRY_KIND: &str = "DelegationWalletRegistry";
pub const WALLET_FACTORY_KIND: &str = "DelegationWalletFactory";

// Configuration calls
pub const SET_FACTORY_SIGNATURE: &str = "setFactory(address)";
pub const UPGRADE_TO_SIGNATURE: &str = "upgradeTo(address)";

/// Function on the test platform delegated wallets may call for a test NFT.
pub const TEST_PLATFORM_SELECTOR: &str = "0x4816cbdf";
pub const TEST_PLATFORM_LABEL: &str = "TestNftPlatform - allowedFunction";

/// Every unit of the platform.
///
/// The vector lists units in a readable order; execution order is derived
/// from the dependency graph, not from this listing.
pub fn units() -> Vec<UnitSpec> {
    let [owner_impl, owner_beacon] = beacon::install(OWNER_IMPLEMENTATION, OWNER_KIND, OWNER_BEACON);
    let [guard_impl, guard_beacon] = beacon::install(GUARD_IMPLEMENTATION, GUARD_KIND, GUARD_BEACON);

    vec![
        UnitSpec::new(TEST_NFT, TEST_NFT),
        UnitSpec::new(TEST_NFT_PLATFORM, TEST_NFT_PLATFORM).unit_arg(TEST_NFT),
        owner_impl,
        guard_impl,
        owner_beacon,
        guard_beacon,
        UnitSpec::new(CAPABILITY_REGISTRY, CAPABILITY_REGISTRY_KIND),
        UnitSpec::new(WALLET_REGISTRY, WALLET_REGISTRY_KIND),
        UnitSpec::new(TEST_LOAN_CONTROLLER, TEST_LOAN_CONTROLLER),
        UnitSpec::new(WALLET_FACTORY, WALLET_FACTORY_KIND)
            .param_arg(SAFE_PROXY_FACTORY)
            .param_arg(SAFE_TEMPLATE)
            .param_arg(FALLBACK_HANDLER)
            .unit_arg(GUARD_BEACON)
            .unit_arg(OWNER_BEACON)
            .unit_arg(CAPABILITY_REGISTRY)
            .unit_arg(WALLET_REGISTRY),
    ]
}

/// Capability grants for one asset, expressed with unit names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub asset: &'static str,
    pub targets: Vec<&'static str>,
    pub selectors: Vec<&'static str>,
    pub labels: Vec<&'static str>,
}

pub fn grant_requests() -> Vec<GrantRequest> {
    vec![GrantRequest {
        asset: TEST_NFT,
        targets: vec![TEST_NFT_PLATFORM],
        selectors: vec![TEST_PLATFORM_SELECTOR],
        labels: vec![TEST_PLATFORM_LABEL],
    }]
}
