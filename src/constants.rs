//! Default values shared across the harness.
//!
//! Every value here can be overridden through [`crate::config::HarnessConfig`].

use std::net::Ipv4Addr;

/// First address of the loopback pool. Allocation starts one above it.
pub const BASE_ADDRESS: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 0);

/// Highest value any allocated octet may take.
pub const MAX_OCTET: u8 = 254;

/// Number of trailing octets the allocator may advance.
pub const MUTABLE_OCTETS: usize = 3;

/// Port held open on each allocated address for the instance's lifetime.
pub const HOLD_PORT: u16 = 29999;

/// Asterisk manager interface port.
pub const AMI_PORT: u16 = 5038;

/// SIP transport port written into `pjsip-bind.conf`.
pub const SIP_PORT: u16 = 5060;

/// Maximum number of `core waitfullybooted` attempts.
pub const BOOT_MAX_ATTEMPTS: u32 = 100;

/// Delay before each boot readiness query, in milliseconds.
pub const BOOT_DELAY_MS: u64 = 100;

/// Wait before shutdown when the refs debug log exists, in milliseconds.
pub const REFDEBUG_GRACE_MS: u64 = 6400;

/// Wait after a watched action so late events still arrive, in milliseconds.
pub const EVENT_SETTLE_MS: u64 = 50;

/// Default server binary, resolved through `PATH`.
pub const DEFAULT_BINARY: &str = "asterisk";

/// Default interpreter for the refcounter script.
pub const DEFAULT_PYTHON: &str = "python3";

/// Default configuration file name for the CLI.
pub const CONFIG_FILE: &str = "asterisk-fixture.toml";

/// Name of the AMI trace file inside the log directory.
pub const TRACE_FILE: &str = "ami-events.json";

/// Name of the reference debug log inside the log directory.
pub const REFDEBUG_LOG: &str = "refs";

/// CLI command polled until the server reports full initialization.
pub const CMD_WAIT_FULLY_BOOTED: &str = "core waitfullybooted";

/// CLI command issued to begin graceful shutdown.
pub const CMD_STOP_GRACEFULLY: &str = "core stop gracefully";
