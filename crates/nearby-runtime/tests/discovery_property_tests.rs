//! Property-based tests for discovery announcements through the full runtime
//!
//! Whatever the interleaving of sightings and losses the provider reports, an
//! endpoint is announced exactly once per continuous known interval.

use std::collections::HashSet;

use nearby_harness::MockProvider;
use nearby_runtime::{EndpointId, NearbyBuilder, NearbyConfig, NearbyEvent};
use proptest::prelude::*;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone)]
enum Sighting {
    Found(&'static str),
    Lost(&'static str),
}

fn arb_sighting() -> impl Strategy<Value = Sighting> {
    let ids = prop::sample::select(vec!["AAAA", "BBBB", "CCCC"]);
    prop_oneof![
        3 => ids.clone().prop_map(Sighting::Found),
        1 => ids.prop_map(Sighting::Lost),
    ]
}

/// Events the registry should produce for `sightings`, computed without it
fn expected_events(sightings: &[Sighting]) -> Vec<NearbyEvent> {
    let mut known = HashSet::new();
    let mut events = Vec::new();
    for sighting in sightings {
        match sighting {
            Sighting::Found(id) => {
                if known.insert(*id) {
                    events.push(NearbyEvent::EndpointDiscovered {
                        endpoint_id: EndpointId::new(*id),
                        display_name: format!("name-{}", id),
                    });
                }
            }
            Sighting::Lost(id) => {
                if known.remove(id) {
                    events.push(NearbyEvent::EndpointLost {
                        endpoint_id: EndpointId::new(*id),
                    });
                }
            }
        }
    }
    events
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: discovery events match a once-per-known-interval model
    #[test]
    fn discovery_announced_once_per_known_interval(
        sightings in prop::collection::vec(arb_sighting(), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to build tokio runtime");

        let observed = runtime.block_on(async {
            let (provider, notifications) = MockProvider::new();
            let nearby = NearbyBuilder::new()
                .with_config(NearbyConfig::testing())
                .start(provider.clone(), notifications)
                .expect("Failed to start nearby connections");
            let mut events = nearby.subscribe();
            nearby
                .start_discovery()
                .await
                .expect("Failed to start discovery");

            for sighting in &sightings {
                match sighting {
                    Sighting::Found(id) => provider.found(id, &format!("name-{}", id)),
                    Sighting::Lost(id) => provider.lost(id),
                }
            }
            provider.found("ZZZZ", "sentinel");

            let mut observed = Vec::new();
            loop {
                let event = timeout(Duration::from_secs(2), events.recv())
                    .await
                    .expect("Timed out waiting for event")
                    .expect("Event bus closed");
                if event.endpoint_id() == &EndpointId::new("ZZZZ") {
                    break;
                }
                observed.push(event);
            }
            observed
        });

        prop_assert_eq!(observed, expected_events(&sightings));
    }
}
