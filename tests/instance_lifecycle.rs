//! Build, boot and shutdown of a full instance against a fake server.

#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use asterisk_fixture::{AstDir, Error, InstanceState};
use common::{Harness, marker, write_script};

#[tokio::test]
async fn test_build_provisions_sandbox() {
    let harness = Harness::new();
    let mut instance = harness.instance();

    instance.build().await.unwrap();
    assert_eq!(instance.state(), InstanceState::Built);

    let address = instance.server_address().unwrap();
    assert_eq!(address.to_string(), "127.0.0.1");
    assert!(instance.binary().unwrap().ends_with("fake-asterisk"));

    let etc = instance.astdir(AstDir::Etc, &[]);
    assert_eq!(
        std::fs::read_to_string(etc.join("bindaddr.conf")).unwrap(),
        "bindaddr=127.0.0.1\n"
    );
    assert_eq!(
        std::fs::read_to_string(etc.join("pjsip-bind.conf")).unwrap(),
        "bind=127.0.0.1:5060\n"
    );
    assert!(etc.join("extensions.conf").is_file());
    assert!(etc.join("pjsip.d/endpoints.conf").is_file());
    assert!(instance.astdir(AstDir::VarLib, &["sounds/en/silence"]).is_dir());
    assert!(instance.astdir(AstDir::Log, &[]).is_dir());

    let conf = std::fs::read_to_string(instance.asterisk_conf()).unwrap();
    assert!(conf.starts_with("[directories]\n"));
    assert!(conf.contains(&format!("astlogdir={}", instance.astdir(AstDir::Log, &[]).display())));
    assert!(conf.contains("#include "));

    let launcher = harness.root().join("asterisk");
    let mode = std::fs::metadata(&launcher).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o775);
    let script = std::fs::read_to_string(&launcher).unwrap();
    assert!(script.contains(&format!("-C \"{}\"", instance.asterisk_conf().display())));
}

#[tokio::test]
async fn test_build_twice_is_rejected() {
    let harness = Harness::new();
    let mut instance = harness.instance();
    instance.build().await.unwrap();

    let err = instance.build().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { operation: "build", .. }));
    assert!(!err.is_terminal());
    assert_eq!(instance.state(), InstanceState::Built);
}

#[tokio::test]
async fn test_install_configs_after_build() {
    let harness = Harness::new();
    let mut instance = harness.instance();
    instance.build().await.unwrap();

    let etc = instance.astdir(AstDir::Etc, &[]);
    std::fs::remove_file(etc.join("extensions.conf")).unwrap();

    assert_eq!(instance.install_configs("1").await.unwrap(), 2);
    assert!(etc.join("extensions.conf").is_file());
    assert_eq!(instance.install_configs("missing").await.unwrap(), 0);
}

#[tokio::test]
async fn test_start_and_stop() {
    let harness = Harness::new();
    let mut instance = harness.instance();
    instance.build().await.unwrap();

    instance.start().await.unwrap();
    assert_eq!(instance.state(), InstanceState::Running);

    let output = instance.cli_command("core show uptime").await.unwrap();
    assert_eq!(output.stdout.trim(), "core show uptime");
    // Already booted: no failed readiness queries.
    assert_eq!(instance.fully_booted().await.unwrap(), 0);

    instance.stop().await.unwrap();
    assert_eq!(instance.state(), InstanceState::Stopped);

    // No AMI events were observed, so no trace was written.
    assert!(!instance.trace_path().exists());
    instance.check_stopped().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let harness = Harness::new();
    let mut instance = harness.instance();
    instance.build().await.unwrap();
    instance.start().await.unwrap();

    instance.stop().await.unwrap();
    instance.stop().await.unwrap();

    let stops = std::fs::read_to_string(marker(&instance, ".stop-count")).unwrap();
    assert_eq!(stops.lines().count(), 1);
    assert_eq!(instance.state(), InstanceState::Stopped);
}

#[tokio::test]
async fn test_start_before_build_is_rejected() {
    let harness = Harness::new();
    let mut instance = harness.instance();
    assert!(matches!(
        instance.start().await,
        Err(Error::InvalidState { operation: "start", .. })
    ));
}

#[tokio::test]
async fn test_boot_timeout_kills_server() {
    let mut harness = Harness::new();
    harness.config.boot.max_attempts = 3;
    let mut instance = harness.instance();
    instance.build().await.unwrap();
    std::fs::write(marker(&instance, ".never-boot"), "").unwrap();

    let err = instance.start().await.unwrap_err();
    assert!(matches!(err, Error::BootTimeout { attempts: 3 }));
    assert!(err.is_terminal());
    assert_eq!(instance.state(), InstanceState::Failed);

    // The process reference was cleared; stop has nothing to do.
    instance.stop().await.unwrap();
    assert!(!marker(&instance, ".stop-count").exists());
    assert!(matches!(
        instance.start().await,
        Err(Error::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_leak_check_runs_refcounter() {
    let mut harness = Harness::new();
    let assets = harness.dir.path().join("assets");
    std::fs::create_dir_all(assets.join("scripts")).unwrap();
    std::fs::write(assets.join("scripts/refcounter.py"), "").unwrap();
    harness.config.paths.assets = Some(assets);
    harness.config.paths.python = write_script(
        harness.dir.path(),
        "fake-python",
        "#!/bin/sh\necho \"leaked: $2 $3 $4\"\nexit 1\n",
    );

    let mut instance = harness.instance();
    instance.build().await.unwrap();
    instance.start().await.unwrap();
    std::fs::write(instance.refdebug_log(), "0x1,+1,1,file.c,1,func,**constructor**\n").unwrap();
    assert!(instance.refdebug_enabled().await);

    instance.stop().await.unwrap();

    let (log, report) = match instance.check_stopped().await {
        Err(Error::LeakDetected { log, report }) => (log, report),
        other => panic!("expected LeakDetected, got {other:?}"),
    };
    assert_eq!(log, instance.refdebug_log());
    assert!(report.starts_with("leaked: -f"));
    assert!(report.ends_with("-n"));
}

#[tokio::test]
async fn test_refdebug_grace_applies_only_with_refs_log() {
    const GRACE_MS: u64 = 400;

    let mut harness = Harness::new();
    harness.config.shutdown.refdebug_grace_ms = GRACE_MS;
    let grace = Duration::from_millis(GRACE_MS);

    let mut plain = harness.instance();
    plain.build().await.unwrap();
    plain.start().await.unwrap();
    assert!(!plain.refdebug_enabled().await);
    let started = Instant::now();
    plain.stop().await.unwrap();
    assert!(started.elapsed() < grace, "stop took {:?}", started.elapsed());

    let mut other = Harness::new();
    other.config.shutdown.refdebug_grace_ms = GRACE_MS;
    let mut traced = other.instance();
    traced.build().await.unwrap();
    traced.start().await.unwrap();
    std::fs::write(traced.refdebug_log(), "").unwrap();
    let started = Instant::now();
    traced.stop().await.unwrap();
    assert!(started.elapsed() >= grace, "stop took {:?}", started.elapsed());
}
