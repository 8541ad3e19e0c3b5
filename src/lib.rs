//! Isolated Asterisk instances for integration tests.
//!
//! Each [`AsteriskInstance`] gets its own loopback address, a private
//! directory tree with generated configuration, a foreground server
//! process and an AMI event stream that is traced to disk and republished
//! on an in-process bus.
//!
//! ```no_run
//! use std::sync::Arc;
//! use asterisk_fixture::{AddressAllocator, AsteriskInstance, HarnessConfig, TempRunDirectory};
//!
//! # async fn example() -> asterisk_fixture::Result<()> {
//! let run_dir = Arc::new(TempRunDirectory::new("1", "tests/fixtures")?);
//! let mut instance =
//!     AsteriskInstance::new(run_dir, AddressAllocator::shared(), HarnessConfig::default());
//! instance.build().await?;
//! instance.start().await?;
//! instance.cli_command("core show uptime").await?;
//! instance.stop().await?;
//! instance.check_stopped().await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod ami;
pub mod assets;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod instance;
pub mod layout;
pub mod process;
pub mod sandbox;

pub use address::{AddressAllocator, AddressReservation};
pub use config::HarnessConfig;
pub use error::{Error, Result};
pub use instance::{AsteriskInstance, InstanceState};
pub use layout::AstDir;
pub use process::BootPolicy;
pub use sandbox::{FixedRunDirectory, RunDirectory, TempRunDirectory};
