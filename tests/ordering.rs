use delegation_deploy::pipeline::{order_units, UnitSpec};
use delegation_deploy::platform;
use proptest::prelude::*;

fn position(order: &[UnitSpec], name: &str) -> usize {
    order.iter().position(|u| u.name == name).unwrap()
}

proptest! {
    /// Property: however the units are listed, the factory comes after both
    /// beacons and both registries, and every dependency precedes its dependent.
    #[test]
    fn prop_factory_follows_beacons_and_registries(
        units in Just(platform::units()).prop_shuffle()
    ) {
        let order = order_units(&units).unwrap();
        let factory = position(&order, platform::WALLET_FACTORY);

        for name in [
            platform::OWNER_BEACON,
            platform::GUARD_BEACON,
            platform::CAPABILITY_REGISTRY,
            platform::WALLET_REGISTRY,
        ] {
            prop_assert!(position(&order, name) < factory);
        }

        for unit in &order {
            for need in unit.needs() {
                prop_assert!(position(&order, need) < position(&order, &unit.name));
            }
        }
    }
}
