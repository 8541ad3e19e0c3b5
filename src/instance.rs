//! Lifecycle facade for one sandboxed Asterisk instance.
//!
//! ```text
//! Unbuilt --build--> Built --start--> Starting --boot ok--> Running
//!                                        |                     |
//!                                  boot timeout              stop
//!                                        v                     v
//!                                     Failed        Stopping --> Stopped
//! ```
//!
//! `build` reserves an address, resolves the binary and provisions the
//! sandbox. `start` spawns the server, waits for it to boot, attaches the
//! AMI tracer and connects the administrative session. `stop` shuts the
//! server down and finalizes the trace; calling it again is a no-op.
//! Any failure in `build` or `start` is terminal: discard the instance.

use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::address::{AddressAllocator, AddressReservation};
use crate::ami::{
    AmiClient, AmiEndpoint, AmiEvent, EventBus, EventCollection, EventSink, EventTracer,
    check_events, watch_events,
};
use crate::config::HarnessConfig;
use crate::constants::{REFDEBUG_LOG, TRACE_FILE};
use crate::error::{Error, Result};
use crate::layout::{self, AstDir, DirectoryLayout, ProvisionPlan};
use crate::process::{self, CommandOutput, ProcessController};
use crate::sandbox::RunDirectory;

/// Where an instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Unbuilt,
    Built,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unbuilt => "unbuilt",
            Self::Built => "built",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One sandboxed Asterisk server under test.
pub struct AsteriskInstance {
    layout: DirectoryLayout,
    allocator: Arc<AddressAllocator>,
    config: HarnessConfig,
    reservation: Option<AddressReservation>,
    controller: ProcessController,
    sink: EventSink,
    ami: Option<Box<dyn AmiClient>>,
    state: InstanceState,
}

impl fmt::Debug for AsteriskInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsteriskInstance")
            .field("id", &self.id())
            .field("root", &self.layout.run_dir().run_root())
            .field("address", &self.server_address())
            .field("state", &self.state)
            .field("pid", &self.controller.pid())
            .finish_non_exhaustive()
    }
}

impl AsteriskInstance {
    /// Create an unbuilt instance in `run_dir`, drawing its address from
    /// `allocator`.
    pub fn new(
        run_dir: Arc<dyn RunDirectory>,
        allocator: Arc<AddressAllocator>,
        config: HarnessConfig,
    ) -> Self {
        let layout = DirectoryLayout::new(run_dir);
        let controller = ProcessController::new(layout.asterisk_conf());
        Self {
            layout,
            allocator,
            config,
            reservation: None,
            controller,
            sink: EventSink::new(Arc::new(EventBus::new())),
            ami: None,
            state: InstanceState::Unbuilt,
        }
    }

    /// Attach the client used for the administrative session.
    #[must_use]
    pub fn with_ami_client(mut self, client: Box<dyn AmiClient>) -> Self {
        self.ami = Some(client);
        self
    }

    /// Instance identifier from the run directory.
    #[must_use]
    pub fn id(&self) -> &str {
        self.layout.run_dir().instance_id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Harness configuration in effect.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Sandbox layout, for config generators that resolve role paths.
    #[must_use]
    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Absolute path of `segments` below the directory for `role`.
    #[must_use]
    pub fn astdir(&self, role: AstDir, segments: &[&str]) -> PathBuf {
        self.layout.astdir(role, segments)
    }

    /// Root configuration file passed to the server.
    #[must_use]
    pub fn asterisk_conf(&self) -> PathBuf {
        self.layout.asterisk_conf()
    }

    /// Address assigned to this instance, once allocated.
    #[must_use]
    pub fn server_address(&self) -> Option<Ipv4Addr> {
        self.reservation.as_ref().map(AddressReservation::address)
    }

    /// Manager interface endpoint, once an address is allocated.
    #[must_use]
    pub fn ami_endpoint(&self) -> Option<AmiEndpoint> {
        self.server_address().map(|host| AmiEndpoint {
            host,
            port: self.config.network.ami_port,
        })
    }

    /// Resolved server binary, once built.
    #[must_use]
    pub fn binary(&self) -> Option<&Path> {
        self.controller.binary()
    }

    /// Bus carrying this instance's AMI events.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        self.sink.bus()
    }

    /// Sink the administrative session feeds.
    #[must_use]
    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Location of the AMI trace file.
    #[must_use]
    pub fn trace_path(&self) -> PathBuf {
        self.astdir(AstDir::Log, &[TRACE_FILE])
    }

    /// Location of the reference debug log.
    #[must_use]
    pub fn refdebug_log(&self) -> PathBuf {
        self.astdir(AstDir::Log, &[REFDEBUG_LOG])
    }

    /// Returns true if the server has written a reference debug log.
    pub async fn refdebug_enabled(&self) -> bool {
        tokio::fs::try_exists(self.refdebug_log())
            .await
            .unwrap_or(false)
    }

    /// Reserve a loopback address for this instance. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressSpaceExhausted`] or [`Error::AddressBind`].
    pub fn assign_address(&mut self) -> Result<Ipv4Addr> {
        if let Some(address) = self.server_address() {
            return Ok(address);
        }
        let reservation = self.allocator.reserve(self.config.network.hold_port)?;
        let address = reservation.address();
        self.reservation = Some(reservation);
        info!(instance = %self.id(), %address, "Assigned address");
        Ok(address)
    }

    /// Reserve an address, resolve the binary and provision the sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless unbuilt. Address, binary and
    /// filesystem failures leave the instance `Failed`.
    pub async fn build(&mut self) -> Result<()> {
        if self.state != InstanceState::Unbuilt {
            return Err(Error::invalid_state("build", self.state));
        }

        match self.provision().await {
            Ok(()) => {
                self.state = InstanceState::Built;
                info!(instance = %self.id(), root = %self.layout.run_dir().run_root().display(), "Instance built");
                Ok(())
            },
            Err(e) => {
                self.state = InstanceState::Failed;
                Err(e)
            },
        }
    }

    async fn provision(&mut self) -> Result<()> {
        let address = self.assign_address()?;
        let binary = process::resolve_binary(&self.config.paths.binary)?;
        debug!(instance = %self.id(), binary = %binary.display(), "Resolved binary");

        let plan = ProvisionPlan {
            binary: &binary,
            address,
            sip_port: self.config.network.sip_port,
            assets: self.config.paths.assets.as_deref(),
        };
        layout::provision(&self.layout, &plan).await?;
        self.controller.set_binary(binary);
        Ok(())
    }

    /// Copy `asterisk-<id>/**/*.conf` fixtures into the config directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileSystem`] if a fixture cannot be copied.
    pub async fn install_configs(&self, id: &str) -> Result<usize> {
        layout::install_configs(&self.layout, id).await
    }

    /// Spawn the server, wait for it to boot and open the AMI session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless built. A boot timeout kills
    /// the server and leaves the instance `Failed`. If the AMI connection
    /// fails the server keeps running; call [`AsteriskInstance::stop`].
    pub async fn start(&mut self) -> Result<()> {
        if self.state != InstanceState::Built {
            return Err(Error::invalid_state("start", self.state));
        }

        self.state = InstanceState::Starting;
        if let Err(e) = self.controller.start(self.config.boot_policy()).await {
            self.state = InstanceState::Failed;
            return Err(e);
        }
        self.state = InstanceState::Running;

        self.sink.attach_tracer(EventTracer::new(self.trace_path()));
        let endpoint = self.ami_endpoint();
        if let (Some(client), Some(endpoint)) = (self.ami.as_mut(), endpoint) {
            client.connect(endpoint, self.sink.clone()).await?;
        }

        info!(instance = %self.id(), pid = self.controller.pid(), "Instance running");
        Ok(())
    }

    /// Wait until the server reports full initialization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BootTimeout`] once the boot policy is exhausted.
    pub async fn fully_booted(&self) -> Result<u32> {
        self.controller
            .wait_fully_booted(self.config.boot_policy())
            .await
    }

    /// Run one CLI command against the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] before `build`, or the command's failure.
    pub async fn cli_command(&self, command: &str) -> Result<CommandOutput> {
        self.controller.cli_command(command).await
    }

    /// Stop the server, close the AMI session and finalize the trace.
    ///
    /// A no-op when no server process is held, so repeated calls are safe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Process`] if the exit cannot be awaited, or
    /// [`Error::Trace`] if the trace cannot be closed.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.controller.has_process() {
            return Ok(());
        }
        self.state = InstanceState::Stopping;

        let grace = if self.refdebug_enabled().await {
            Some(self.config.refdebug_grace())
        } else {
            None
        };
        let stopped = self.controller.stop(grace).await;

        if let Some(client) = self.ami.as_mut() {
            client.disconnect().await;
        }
        let finished = match self.sink.detach_tracer() {
            Some(mut tracer) => tracer.finish().map(Some),
            None => Ok(None),
        };
        self.state = InstanceState::Stopped;

        stopped?;
        if let Some(events) = finished? {
            debug!(instance = %self.id(), events, "AMI trace closed");
        }
        info!(instance = %self.id(), "Instance stopped");
        Ok(())
    }

    /// Check the stopped server for leaked references.
    ///
    /// Succeeds without running anything when no reference debug log exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeakDetected`] when the refcounter reports leaks, or
    /// [`Error::BinaryNotFound`] if the script or interpreter is missing.
    pub async fn check_stopped(&self) -> Result<()> {
        if !self.refdebug_enabled().await {
            return Ok(());
        }

        let script = self
            .config
            .refcounter_script()
            .ok_or_else(|| Error::BinaryNotFound {
                name: "refcounter.py".to_string(),
                reason: "paths.assets is not configured".to_string(),
            })?;
        let python = process::resolve_binary(&self.config.paths.python)?;
        let log = self.refdebug_log();

        info!(instance = %self.id(), log = %log.display(), "Checking for reference leaks");
        process::run_refcounter(&python, &script, &log).await
    }

    /// Collect every AMI event named `name` until the collection is stopped.
    #[must_use]
    pub fn collect_events(&self, name: &str) -> EventCollection {
        self.bus().subscribe(name)
    }

    /// Run `action` while watching `names`, waiting the configured settle
    /// delay afterwards. Returns the action's output and matched events.
    pub async fn watch_events<F, Fut, T>(&self, names: &[&str], action: F) -> (T, Vec<AmiEvent>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        watch_events(self.bus(), names, self.config.settle(), action).await
    }

    /// Watch `names` around `action` and require the matches to equal
    /// `expected`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EventMismatch`] describing the first difference.
    pub async fn check_ami_events<F, Fut, T>(
        &self,
        names: &[&str],
        expected: &[Value],
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (output, events) = self.watch_events(names, action).await;
        if let Err(mismatch) = check_events(&events, expected) {
            warn!(instance = %self.id(), %mismatch, "AMI events mismatch");
            return Err(mismatch.into());
        }
        Ok(output)
    }
}
