// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use common::{Harness, SSH_MANIFEST};
use serde_json::json;
use supervisor_core::domain::addon::{AddonDescriptor, AddonError, AddonStartup, AddonState};
use supervisor_core::domain::repository::AddonsRepository;
use supervisor_core::domain::resolution::{ContextType, IssueType, SuggestionType};

const MQTT_MANIFEST: &str = "\
name: Mosquitto
slug: mqtt
version: '6.4.0'
image: ghcr.io/addons/{arch}-mqtt
";

const SAMBA_MANIFEST: &str = "\
name: Samba
slug: samba
version: '12.3.0'
image: ghcr.io/addons/{arch}-samba
boot: manual
";

#[tokio::test]
async fn test_local_ssh_end_to_end() {
    let installer = Harness::new();
    installer.publish(SSH_MANIFEST).await;
    installer.manager.install("local_ssh").await.unwrap();
    assert!(installer.repository.contains("local_ssh"));

    // Docker has a stopped container when the Supervisor comes back.
    installer
        .runtime
        .with_container("addon_local_ssh", "ghcr.io/addons/amd64-ssh", "9.2.1", false);
    installer
        .discovery
        .send("local_ssh", "mqtt", json!({"host": "core-ssh", "port": 22}));

    let supervisor = installer.restarted();
    supervisor.manager.load().await;
    let addon = supervisor.manager.get_local("local_ssh").unwrap();
    assert_eq!(addon.version(), "9.2.1");
    assert_eq!(addon.state(), AddonState::Stopped);

    let mut events = supervisor.event_bus.subscribe_addon("local_ssh");
    let wait = supervisor.manager.start("local_ssh").await.unwrap();
    wait.await.unwrap();
    assert_eq!(addon.state(), AddonState::Started);

    let event = events.try_recv().unwrap();
    assert_eq!(
        event.to_home_assistant().unwrap(),
        json!({
            "type": "supervisor/event",
            "data": {"event": "addon", "slug": "local_ssh", "state": "started"},
        })
    );
    assert!(events.try_recv().is_err());

    supervisor.manager.uninstall("local_ssh", false).await.unwrap();
    let data = supervisor.repository.snapshot();
    assert!(!data.system.contains_key("local_ssh"));
    assert!(!data.user.contains_key("local_ssh"));
    assert!(supervisor.discovery.for_addon("local_ssh").is_empty());
    assert!(supervisor.manager.get_local("local_ssh").is_none());
}

#[tokio::test]
async fn test_boot_starts_only_auto_addons() {
    let supervisor = Harness::new();
    supervisor.publish(MQTT_MANIFEST).await;
    supervisor.publish(SAMBA_MANIFEST).await;
    supervisor.manager.install("local_mqtt").await.unwrap();
    supervisor.manager.install("local_samba").await.unwrap();

    supervisor.manager.boot(AddonStartup::Application).await;

    let mqtt = supervisor.manager.get_local("local_mqtt").unwrap();
    let samba = supervisor.manager.get_local("local_samba").unwrap();
    assert_eq!(mqtt.state(), AddonState::Started);
    assert_eq!(samba.state(), AddonState::Stopped);
    assert!(supervisor.runtime.container("addon_local_mqtt").unwrap().running);
    assert!(supervisor.runtime.container("addon_local_samba").is_none());
    assert!(supervisor.resolution.issues().is_empty());
}

#[tokio::test]
async fn test_boot_failure_becomes_issue() {
    let supervisor = Harness::new();
    supervisor.publish(MQTT_MANIFEST).await;
    supervisor.publish(SAMBA_MANIFEST).await;
    supervisor.manager.install("local_mqtt").await.unwrap();
    supervisor.manager.install("local_samba").await.unwrap();
    supervisor.runtime.fail_on("run");

    supervisor.manager.boot(AddonStartup::Application).await;

    let mqtt = supervisor.manager.get_local("local_mqtt").unwrap();
    let samba = supervisor.manager.get_local("local_samba").unwrap();
    assert_eq!(mqtt.state(), AddonState::Error);
    assert_eq!(samba.state(), AddonState::Stopped);

    let issues = supervisor.resolution.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].issue_type, IssueType::BootFail);
    assert_eq!(issues[0].context, ContextType::Addon);
    assert_eq!(issues[0].reference.as_deref(), Some("local_mqtt"));

    let mut suggestions: Vec<_> = supervisor
        .resolution
        .suggestions_for_issue(issues[0].uuid)
        .into_iter()
        .map(|s| s.suggestion_type)
        .collect();
    suggestions.sort_by_key(|s| format!("{:?}", s));
    assert_eq!(
        suggestions,
        vec![SuggestionType::DisableBoot, SuggestionType::ExecuteStart]
    );
}

#[tokio::test]
async fn test_boot_ignores_other_stages() {
    let supervisor = Harness::new();
    supervisor.publish(SSH_MANIFEST).await;
    supervisor.manager.install("local_ssh").await.unwrap();

    supervisor.manager.boot(AddonStartup::Application).await;
    assert_eq!(supervisor.runtime.call_count("run"), 0);

    supervisor.manager.boot(AddonStartup::Services).await;
    assert_eq!(supervisor.runtime.call_count("run"), 1);

    supervisor.manager.shutdown(AddonStartup::Services).await;
    let ssh = supervisor.manager.get_local("local_ssh").unwrap();
    assert_eq!(ssh.state(), AddonState::Stopped);
}

#[tokio::test]
async fn test_install_errors() {
    let supervisor = Harness::new();
    assert!(matches!(
        supervisor.manager.install("local_ssh").await,
        Err(AddonError::NotFound(_))
    ));

    supervisor.publish(SSH_MANIFEST).await;
    supervisor.manager.install("local_ssh").await.unwrap();
    let err = supervisor.manager.install("local_ssh").await.unwrap_err();
    assert!(matches!(err, AddonError::AlreadyInstalled(_)));
    assert!(!err.should_capture());
    assert_eq!(supervisor.repository.installed(), vec!["local_ssh".to_string()]);
}

#[tokio::test]
async fn test_install_blocked_by_free_space() {
    let supervisor = Harness::new();
    supervisor.publish(SSH_MANIFEST).await;
    *supervisor.host.free_space.write() = 0;

    let err = supervisor.manager.install("local_ssh").await.unwrap_err();
    assert!(matches!(err, AddonError::Job(_)));
    assert!(supervisor.repository.installed().is_empty());
    assert!(supervisor.jobs.jobs().is_empty());
}

#[tokio::test]
async fn test_failed_docker_install_rolls_back() {
    let supervisor = Harness::new();
    supervisor.publish(SSH_MANIFEST).await;
    supervisor.runtime.fail_on("install");

    let err = supervisor.manager.install("local_ssh").await.unwrap_err();
    assert!(err.should_capture());
    assert!(supervisor.repository.installed().is_empty());
    assert!(supervisor.manager.get_local("local_ssh").is_none());
}

#[tokio::test]
async fn test_update_restarts_running_addon() {
    let supervisor = Harness::new();
    supervisor.publish(MQTT_MANIFEST).await;
    supervisor.manager.install("local_mqtt").await.unwrap();
    supervisor.manager.start("local_mqtt").await.unwrap().await.unwrap();

    supervisor
        .publish(&MQTT_MANIFEST.replace("6.4.0", "6.4.1"))
        .await;
    let wait = supervisor.manager.update("local_mqtt", false).await.unwrap();
    wait.expect("running add-on is started again").await.unwrap();

    let mqtt = supervisor.manager.get_local("local_mqtt").unwrap();
    assert_eq!(mqtt.version(), "6.4.1");
    assert_eq!(mqtt.state(), AddonState::Started);
    assert_eq!(
        supervisor.runtime.container("addon_local_mqtt").unwrap().version,
        "6.4.1"
    );
    assert!(!supervisor.runtime.has_image("ghcr.io/addons/amd64-mqtt", "6.4.0"));
    assert_eq!(supervisor.repository.get("local_mqtt").unwrap().user.version, "6.4.1");
}

#[tokio::test]
async fn test_backup_and_restore_into_fresh_supervisor() {
    let source = Harness::new();
    source.publish(MQTT_MANIFEST).await;
    source.manager.install("local_mqtt").await.unwrap();
    let mqtt = source.manager.get_local("local_mqtt").unwrap();
    std::fs::write(mqtt.path_data().join("retained.db"), "topic=1").unwrap();

    let archive = source.manager.backup_addon("local_mqtt").await.unwrap();
    assert!(archive.exists());

    let target = Harness::new();
    target.manager.restore("local_mqtt", &archive).await.unwrap();
    let restored = target.manager.get_local("local_mqtt").unwrap();
    assert_eq!(restored.version(), "6.4.0");
    assert_eq!(restored.state(), AddonState::Stopped);
    assert_eq!(
        std::fs::read_to_string(restored.path_data().join("retained.db")).unwrap(),
        "topic=1"
    );
    assert!(target.repository.contains("local_mqtt"));
}
