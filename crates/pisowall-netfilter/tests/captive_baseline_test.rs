#![allow(clippy::unwrap_used)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use pisowall_netfilter::{
    CaptiveRuleSet, Chain, DEFAULT_DENY_TAG, Fault, MemoryBackend, Policy, PortalLayout, Rule,
    RuleBackend, StateMatch, Table, Target,
};
use pretty_assertions::assert_eq;

fn layout() -> PortalLayout {
    PortalLayout {
        lan_interface: "wlan0".into(),
        wan_interface: "eth0".into(),
        portal_ip: Ipv4Addr::new(10, 0, 0, 1),
        portal_port: 80,
    }
}

fn rule_set() -> (Arc<MemoryBackend>, CaptiveRuleSet) {
    let backend = Arc::new(MemoryBackend::new());
    let rules = CaptiveRuleSet::new(backend.clone(), layout());
    (backend, rules)
}

#[tokio::test]
async fn setup_issues_baseline_in_order() {
    let (backend, rules) = rule_set();

    let report = rules.setup().await.unwrap();
    assert_eq!(report.state_match, StateMatch::Conntrack);
    assert_eq!(report.rules_installed, 11);

    insta::assert_snapshot!(backend.journal().join("\n"), @r"
    -t filter -F FORWARD
    -t nat -F PREROUTING
    -t nat -F POSTROUTING
    -t filter -A FORWARD -i wlan0 -p udp --dport 53 -m comment --comment pisowall:baseline -j ACCEPT
    -t filter -A FORWARD -i wlan0 -p tcp --dport 53 -m comment --comment pisowall:baseline -j ACCEPT
    -t filter -A FORWARD -i wlan0 -p udp --dport 67 -m comment --comment pisowall:baseline -j ACCEPT
    -t filter -A FORWARD -i wlan0 -p udp --dport 68 -m comment --comment pisowall:baseline -j ACCEPT
    -t filter -A FORWARD -i wlan0 -p udp --dport 123 -m comment --comment pisowall:baseline -j ACCEPT
    -t filter -A FORWARD -i wlan0 -d 10.0.0.1 -m comment --comment pisowall:baseline -j ACCEPT
    -t filter -A INPUT -i wlan0 -d 10.0.0.1 -p tcp --dport 80 -m comment --comment pisowall:baseline -j ACCEPT
    -t filter -A FORWARD -m conntrack --ctstate ESTABLISHED,RELATED -m comment --comment pisowall:baseline -j ACCEPT
    -t nat -A PREROUTING -i wlan0 -p tcp --dport 80 -m comment --comment pisowall:baseline -j DNAT --to-destination 10.0.0.1:80
    -t nat -A POSTROUTING -o eth0 -m comment --comment pisowall:baseline -j MASQUERADE
    -t filter -A FORWARD -m comment --comment pisowall:default-deny -j DROP
    ");
}

#[tokio::test]
async fn setup_is_repeatable_without_duplicating_rules() {
    let (backend, rules) = rule_set();
    rules.setup().await.unwrap();
    rules.setup().await.unwrap();

    assert_eq!(backend.rules(Table::Filter, &Chain::Forward).len(), 8);
    assert_eq!(backend.rules(Table::Filter, &Chain::Input).len(), 1);
    assert_eq!(backend.rules(Table::Nat, &Chain::Prerouting).len(), 1);
    assert_eq!(backend.rules(Table::Nat, &Chain::Postrouting).len(), 1);
}

#[tokio::test]
async fn head_inserted_client_rules_keep_default_deny_last() {
    let (backend, rules) = rule_set();
    rules.setup().await.unwrap();

    let client = Rule::new()
        .mac_source("aa:bb:cc:dd:ee:ff")
        .jump(Target::Accept);
    backend
        .insert_head(Table::Filter, &Chain::Forward, &client)
        .await
        .unwrap();

    let forward = backend.rules(Table::Filter, &Chain::Forward);
    assert_eq!(forward.first(), Some(&client));
    assert_eq!(
        forward.last().and_then(Rule::comment_tag),
        Some(DEFAULT_DENY_TAG)
    );
    assert!(rules.verify().await.unwrap().is_intact());
}

#[tokio::test]
async fn verify_detects_missing_default_deny() {
    let (backend, rules) = rule_set();
    rules.setup().await.unwrap();

    backend
        .append(
            Table::Filter,
            &Chain::Forward,
            &Rule::new().jump(Target::Accept),
        )
        .await
        .unwrap();

    let status = rules.verify().await.unwrap();
    assert!(!status.default_deny_last);
    assert!(!status.is_intact());
}

#[tokio::test]
async fn portal_on_the_gateway_is_reachable_through_input() {
    let (backend, rules) = rule_set();
    rules.setup().await.unwrap();

    let input = backend.rules(Table::Filter, &Chain::Input);
    assert_eq!(input, vec![rules.portal_input_accept()]);
    assert_eq!(input[0].target(), Some("ACCEPT"));
    assert!(input[0].args().windows(2).any(|w| w == ["--dport", "80"]));
    assert!(rules.verify().await.unwrap().portal_input_present);

    backend
        .delete(Table::Filter, &Chain::Input, &input[0])
        .await
        .unwrap();
    let status = rules.verify().await.unwrap();
    assert!(!status.portal_input_present);
    assert!(!status.is_intact());
}

#[tokio::test]
async fn teardown_opens_policies_and_empties_tables() {
    let (backend, rules) = rule_set();
    rules.setup().await.unwrap();

    let report = rules.teardown().await;
    assert!(report.is_clean());
    assert!(backend.rules(Table::Filter, &Chain::Forward).is_empty());
    assert!(backend.rules(Table::Nat, &Chain::Prerouting).is_empty());
    assert_eq!(
        backend.policy(Table::Filter, &Chain::Forward),
        Some(Policy::Accept)
    );
}

#[tokio::test]
async fn teardown_attempts_every_step_when_tool_is_gone() {
    let (backend, rules) = rule_set();
    backend.set_fault(Some(Fault::Unavailable));

    let report = rules.teardown().await;
    // three policies, two flushes, two chain deletions
    assert_eq!(report.failures.len(), 7);
}

#[tokio::test]
async fn setup_surfaces_unavailable_tool() {
    let (backend, rules) = rule_set();
    backend.set_fault(Some(Fault::Unavailable));
    assert!(rules.setup().await.unwrap_err().is_unavailable());
}
