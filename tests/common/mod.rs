//! Shared helpers for instance integration tests.
//!
//! The server is replaced by a POSIX shell script that understands the
//! two invocation shapes the harness uses:
//!
//! - `-f -C <conf>` - stay in the foreground until `core stop gracefully`
//! - `-C <conf> -rx <command>` - answer one CLI command and exit
//!
//! Marker files next to `asterisk.conf` carry state between invocations.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use asterisk_fixture::{AddressAllocator, AsteriskInstance, FixedRunDirectory, HarnessConfig};
use tempfile::TempDir;

const FAKE_ASTERISK: &str = r#"#!/bin/sh
conf=""
cmd=""
foreground=0
while [ $# -gt 0 ]; do
    case "$1" in
        -f) foreground=1 ;;
        -C) shift; conf="$1" ;;
        -rx) shift; cmd="$1" ;;
    esac
    shift
done
state="$(dirname "$conf")"

if [ "$foreground" = 1 ]; then
    touch "$state/.running"
    while [ ! -f "$state/.stopped" ]; do sleep 0.02; done
    exit 0
fi

[ -f "$state/.running" ] || { echo "Unable to connect to remote asterisk" >&2; exit 1; }
case "$cmd" in
    "core waitfullybooted")
        [ -f "$state/.never-boot" ] && exit 1
        echo "Asterisk has fully booted."
        ;;
    "core stop gracefully")
        echo stop >> "$state/.stop-count"
        touch "$state/.stopped"
        ;;
    *)
        echo "$cmd"
        ;;
esac
"#;

/// A test sandbox with a fake server binary.
pub struct Harness {
    pub dir: TempDir,
    pub config: HarnessConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let binary = write_script(dir.path(), "fake-asterisk", FAKE_ASTERISK);

        let mut config = HarnessConfig::default();
        config.network.hold_port = 0;
        config.boot.delay_ms = 10;
        config.boot.max_attempts = 50;
        config.shutdown.refdebug_grace_ms = 10;
        config.paths.binary = binary;

        Self { dir, config }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("run")
    }

    /// Create an instance with id `1` over this harness.
    pub fn instance(&self) -> AsteriskInstance {
        let run_dir = Arc::new(FixedRunDirectory::new(
            "1",
            self.root(),
            Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures"),
        ));
        AsteriskInstance::new(
            run_dir,
            Arc::new(AddressAllocator::new(Ipv4Addr::new(127, 0, 0, 0))),
            self.config.clone(),
        )
    }
}

/// Write an executable shell script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Marker file the fake server keeps next to `asterisk.conf`.
pub fn marker(instance: &AsteriskInstance, name: &str) -> PathBuf {
    instance.asterisk_conf().with_file_name(name)
}
