use crate::{RouteError, RouteId, RoutingTable};
use ingressh_core::AccessConfig;

fn config(name: &str, namespace: &str, keys: &[&str]) -> AccessConfig {
    AccessConfig {
        name: name.to_string(),
        namespace: namespace.to_string(),
        authorized_keys: keys.iter().map(|k| k.to_string()).collect(),
        ..Default::default()
    }
}

/// Checks the two-way key/config index invariants: every bucket entry points
/// at a live config carrying the key, every stored key appears in a bucket,
/// and no bucket is empty.
fn assert_consistent(table: &RoutingTable) {
    for (key, ids) in &table.routes {
        assert!(!ids.is_empty(), "empty bucket left behind for key {key}");
        for id in ids {
            let config = table
                .configs
                .get(id)
                .unwrap_or_else(|| panic!("bucket for {key} references dead route {id:?}"));
            assert!(
                config.authorized_keys.iter().any(|k| k.trim() == key),
                "config {id:?} indexed under key {key} it does not carry",
            );
        }
    }
    for (id, config) in &table.configs {
        for key in &config.authorized_keys {
            let ids = table
                .routes
                .get(key.trim())
                .unwrap_or_else(|| panic!("no bucket for key {key} of {id:?}"));
            assert!(ids.contains(id));
        }
    }
}

#[test]
fn set_then_get_returns_the_config() {
    let mut table = RoutingTable::default();
    table.set(config("r1", "prod", &["key-a"]));

    let configs = table.get("key-a").expect("key-a routes");
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].name, "r1");
    assert_consistent(&table);
}

#[test]
fn unknown_key_is_an_authentication_failure() {
    let table = RoutingTable::default();
    assert!(matches!(
        table.get("key-z"),
        Err(RouteError::AuthenticationFailed)
    ));
}

#[test]
fn get_normalizes_whitespace() {
    let mut table = RoutingTable::default();
    table.set(config("r1", "prod", &["ssh-ed25519 AAAA"]));
    assert!(table.get("ssh-ed25519 AAAA\n").is_ok());
}

#[test]
fn multiple_configs_share_a_key() {
    let mut table = RoutingTable::default();
    table.set(config("r1", "prod", &["key-a"]));
    table.set(config("r2", "dev", &["key-a", "key-b"]));

    let configs = table.get("key-a").expect("key-a routes");
    let names: Vec<_> = configs.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["r1", "r2"]);
    assert_eq!(table.get("key-b").expect("key-b routes").len(), 1);
    assert_consistent(&table);
}

#[test]
fn update_rotates_keys() {
    // Existing config has keys {A, B}; the reconciler sets {B, C}.
    let mut table = RoutingTable::default();
    table.set(config("r1", "prod", &["key-a", "key-b"]));
    table.set(config("r1", "prod", &["key-b", "key-c"]));

    assert!(matches!(
        table.get("key-a"),
        Err(RouteError::AuthenticationFailed)
    ));
    assert_eq!(table.get("key-b").expect("key-b routes")[0].name, "r1");
    assert_eq!(table.get("key-c").expect("key-c routes")[0].name, "r1");
    assert_consistent(&table);
}

#[test]
fn update_is_observed_through_unchanged_keys() {
    let mut table = RoutingTable::default();
    table.set(config("r1", "prod", &["key-a"]));

    let mut updated = config("r1", "prod", &["key-a"]);
    updated.image = "alpine".to_string();
    table.set(updated);

    let configs = table.get("key-a").expect("key-a routes");
    assert_eq!(configs[0].image, "alpine");
    assert_consistent(&table);
}

#[test]
fn delete_drops_routes_and_empty_buckets() {
    let mut table = RoutingTable::default();
    table.set(config("r1", "prod", &["key-a", "key-b"]));
    table.set(config("r2", "prod", &["key-b"]));

    table.delete(&RouteId {
        name: "r1".to_string(),
        namespace: "prod".to_string(),
    });

    assert!(table.get("key-a").is_err());
    let remaining = table.get("key-b").expect("key-b routes");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "r2");
    assert_consistent(&table);
}

#[test]
fn delete_of_unknown_route_is_a_noop() {
    let mut table = RoutingTable::default();
    table.set(config("r1", "prod", &["key-a"]));
    table.delete(&RouteId {
        name: "ghost".to_string(),
        namespace: "prod".to_string(),
    });
    assert!(table.get("key-a").is_ok());
    assert_consistent(&table);
}

#[test]
fn same_name_different_namespace_are_distinct_routes() {
    let mut table = RoutingTable::default();
    table.set(config("r1", "prod", &["key-a"]));
    table.set(config("r1", "dev", &["key-a"]));

    assert_eq!(table.get("key-a").expect("key-a routes").len(), 2);
    table.delete(&RouteId {
        name: "r1".to_string(),
        namespace: "dev".to_string(),
    });
    assert_eq!(table.get("key-a").expect("key-a routes").len(), 1);
    assert_consistent(&table);
}

#[test]
fn randomized_edit_sequences_keep_the_index_consistent() {
    // A fixed pseudo-random walk over set/delete; the invariant check after
    // every step is the property under test.
    let mut table = RoutingTable::default();
    let keys = ["k0", "k1", "k2", "k3"];
    let mut state: u64 = 0x5DEECE66D;
    for step in 0..200 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let name = format!("r{}", state % 5);
        let namespace = if state & 0x10 == 0 { "prod" } else { "dev" };
        if state % 7 == 0 {
            table.delete(&RouteId {
                name,
                namespace: namespace.to_string(),
            });
        } else {
            let picked: Vec<&str> = keys
                .iter()
                .enumerate()
                .filter(|(i, _)| state >> (8 + i) & 1 == 1)
                .map(|(_, k)| *k)
                .collect();
            let picked = if picked.is_empty() { vec!["k0"] } else { picked };
            table.set(config(&name, namespace, &picked));
        }
        assert_consistent(&table);

        // Spot-check that get() reflects exactly the live fan-out.
        for key in keys {
            match table.get(key) {
                Ok(configs) => {
                    assert!(!configs.is_empty(), "step {step}: empty get result");
                    for config in configs {
                        assert!(config.authorized_keys.iter().any(|k| k == key));
                    }
                }
                Err(RouteError::AuthenticationFailed) => {
                    assert!(
                        !table
                            .configs
                            .values()
                            .any(|c| c.authorized_keys.iter().any(|k| k == key)),
                        "step {step}: key {key} is live but get() missed it",
                    );
                }
            }
        }
    }
}
