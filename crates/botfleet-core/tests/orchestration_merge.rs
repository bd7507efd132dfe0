use std::sync::Arc;

use botfleet_core::compose::{merge_service, scan_services, MergeOutcome};
use botfleet_core::fakes::MemorySupervisor;
use botfleet_core::{CreateRequest, Disposition, Fleet, FleetError, FleetSettings};
use botfleet_env::fakes::FakeBuilder;

const HAND_WRITTEN: &str = "\
# Managed partly by hand. Keep the proxy first.
services:
  proxy:
    image: caddy:2
    ports:
      - \"443:443\"
    volumes:
      - ./Caddyfile:/etc/caddy/Caddyfile:ro

  nanobot-legacy:   # pre-botfleet instance
    image: python:3.11-slim
    command: [\"python\", \"-m\", \"nanobot\", \"gateway\"]
    environment:
      FOO: \"bar: baz\"
      MULTI: |
        line one
        line two

networks:
  default:
    name: fleet
";

async fn fleet_with_compose(compose: &str) -> (tempfile::TempDir, Fleet) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("requirements.txt"), "nanobot-ai\n").unwrap();
    std::fs::write(dir.path().join("docker-compose.yml"), compose).unwrap();
    let fleet = Fleet::with_parts(
        dir.path(),
        FleetSettings::default(),
        Arc::new(FakeBuilder::new("bin/nanobot")),
        Arc::new(MemorySupervisor::new("nanobot-")),
    );
    fleet.env().update().await.unwrap();
    (dir, fleet)
}

#[tokio::test]
async fn create_preserves_hand_written_stanzas() {
    let (_dir, fleet) = fleet_with_compose(HAND_WRITTEN).await;
    fleet.registry().create(&CreateRequest::new("alice")).unwrap();

    let merged = std::fs::read_to_string(fleet.registry().compose_path()).unwrap();
    let block = scan_services(HAND_WRITTEN, "services").unwrap();

    assert_eq!(&merged[..block.insert_at], &HAND_WRITTEN[..block.insert_at]);
    assert!(merged.ends_with(&HAND_WRITTEN[block.insert_at..]));
    assert_eq!(
        scan_services(&merged, "services").unwrap().keys,
        vec!["proxy", "nanobot-legacy", "alice"]
    );
}

#[tokio::test]
async fn recreating_a_removed_instance_does_not_duplicate_its_stanza() {
    let (dir, fleet) = fleet_with_compose(HAND_WRITTEN).await;
    fleet.registry().create(&CreateRequest::new("alice")).unwrap();
    let once = std::fs::read(fleet.registry().compose_path()).unwrap();

    std::fs::remove_dir_all(dir.path().join("instances/alice")).unwrap();
    fleet.registry().create(&CreateRequest::new("alice")).unwrap();

    let twice = std::fs::read(fleet.registry().compose_path()).unwrap();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn sequence_services_abort_without_side_effects() {
    let compose = "services:\n  - name: alice\n";
    let (dir, fleet) = fleet_with_compose(compose).await;

    let err = fleet
        .registry()
        .create(&CreateRequest::new("alice"))
        .unwrap_err();
    assert!(matches!(
        err,
        FleetError::OrchestrationMerge {
            disposition: Disposition::RolledBack,
            ..
        }
    ));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap(),
        compose
    );
    assert!(fleet.registry().list().unwrap().is_empty());
}

#[tokio::test]
async fn reserved_word_instance_names_are_quoted_service_keys() {
    let (_dir, fleet) = fleet_with_compose(HAND_WRITTEN).await;
    fleet.registry().create(&CreateRequest::new("true")).unwrap();
    fleet.registry().create(&CreateRequest::new("123")).unwrap();

    let merged = std::fs::read_to_string(fleet.registry().compose_path()).unwrap();
    assert!(merged.contains("\n  \"true\":\n"));
    assert!(merged.contains("\n  \"123\":\n"));
    assert_eq!(
        scan_services(&merged, "services").unwrap().keys,
        vec!["proxy", "nanobot-legacy", "true", "123"]
    );
}

#[test]
fn merging_twice_is_idempotent() {
    let stanza = botfleet_core::ServiceStanza::new("alice").scalar("image", "python:3.12-slim");
    let (once, first) = merge_service(HAND_WRITTEN, "services", &stanza).unwrap();
    let (twice, second) = merge_service(&once, "services", &stanza).unwrap();

    assert_eq!(first, MergeOutcome::Inserted);
    assert_eq!(second, MergeOutcome::AlreadyPresent);
    assert_eq!(once, twice);
    assert_eq!(twice.matches("\n  alice:\n").count(), 1);
}
