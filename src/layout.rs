//! Sandbox layout and configuration provisioning.
//!
//! Asterisk resolves everything it touches through the `[directories]`
//! section of `asterisk.conf`. This module maps each directory role onto a
//! path inside the sandbox, creates the tree, and generates the files an
//! instance needs before it can boot:
//!
//! - `asterisk` - launcher script in the sandbox root
//! - `bindaddr.conf` / `pjsip-bind.conf` - address-derived fragments
//! - `asterisk.conf` - root configuration, written last
//!
//! `asterisk.conf` includes `asterisk-options.conf` by reference. That file
//! is supplied by the test suite and only has to exist when the server starts.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::assets::copy_matching;
use crate::error::{Error, Result};
use crate::sandbox::RunDirectory;

/// Directory roles declared in `asterisk.conf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstDir {
    Etc,
    VarLib,
    Db,
    Key,
    Data,
    Spool,
    Run,
    Log,
}

impl AstDir {
    /// All roles, in the order they are written to `asterisk.conf`.
    pub const ALL: [AstDir; 8] = [
        AstDir::Etc,
        AstDir::VarLib,
        AstDir::Db,
        AstDir::Key,
        AstDir::Data,
        AstDir::Spool,
        AstDir::Run,
        AstDir::Log,
    ];

    /// Key used in the `[directories]` section.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Etc => "astetcdir",
            Self::VarLib => "astvarlibdir",
            Self::Db => "astdbdir",
            Self::Key => "astkeydir",
            Self::Data => "astdatadir",
            Self::Spool => "astspooldir",
            Self::Run => "astrundir",
            Self::Log => "astlogdir",
        }
    }

    /// Path relative to the sandbox root.
    #[must_use]
    pub const fn relative_path(self) -> &'static str {
        match self {
            Self::Etc => "etc/asterisk",
            Self::VarLib | Self::Key | Self::Data => "var/lib/asterisk",
            Self::Db | Self::Spool => "var/spool",
            Self::Run => "run",
            Self::Log => "var/log",
        }
    }

    /// Subdirectories that must exist below this role's directory.
    #[must_use]
    pub const fn subdirectories(self) -> &'static [&'static str] {
        match self {
            Self::VarLib => &["keys", "moh", "documentation", "sounds/en/silence"],
            Self::Etc => &[
                "acl.d",
                "cli_permissions.d",
                "confbridge.d",
                "extensions.d",
                "http.d",
                "manager.d",
                "musiconhold.d",
                "pjsip.d",
                "sorcery.d",
            ],
            _ => &[""],
        }
    }

    /// Look up a role by its `[directories]` key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|dir| dir.key() == key)
    }
}

impl fmt::Display for AstDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Resolves role-relative paths inside an instance sandbox.
#[derive(Clone)]
pub struct DirectoryLayout {
    run_dir: Arc<dyn RunDirectory>,
}

impl fmt::Debug for DirectoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryLayout")
            .field("root", &self.run_dir.run_root())
            .finish()
    }
}

impl DirectoryLayout {
    /// Create a layout over the given run directory.
    pub fn new(run_dir: Arc<dyn RunDirectory>) -> Self {
        Self { run_dir }
    }

    /// The run directory this layout resolves against.
    #[must_use]
    pub fn run_dir(&self) -> &Arc<dyn RunDirectory> {
        &self.run_dir
    }

    /// Absolute path of `segments` below the directory for `role`.
    #[must_use]
    pub fn astdir(&self, role: AstDir, segments: &[&str]) -> PathBuf {
        let mut all = Vec::with_capacity(segments.len() + 1);
        all.push(role.relative_path());
        all.extend_from_slice(segments);
        self.run_dir.run_path(&all)
    }

    /// Path of the root configuration file passed to the server.
    #[must_use]
    pub fn asterisk_conf(&self) -> PathBuf {
        self.astdir(AstDir::Etc, &["asterisk.conf"])
    }

    /// Path of the launcher script in the sandbox root.
    #[must_use]
    pub fn launcher(&self) -> PathBuf {
        self.run_dir.run_path(&["asterisk"])
    }

    /// Every directory that provisioning creates.
    #[must_use]
    pub fn required_directories(&self) -> Vec<PathBuf> {
        AstDir::ALL
            .into_iter()
            .flat_map(|role| {
                role.subdirectories()
                    .iter()
                    .map(move |sub| self.astdir(role, &[*sub]))
            })
            .collect()
    }
}

/// Inputs for [`provision`] that are decided before the sandbox exists.
#[derive(Debug, Clone)]
pub struct ProvisionPlan<'a> {
    /// Resolved server binary baked into the launcher script.
    pub binary: &'a Path,
    /// Address the instance binds to.
    pub address: Ipv4Addr,
    /// SIP transport port.
    pub sip_port: u16,
    /// Directory holding `documentation/`, `sounds/` and `configs/`.
    pub assets: Option<&'a Path>,
}

/// Build the sandbox: directories, launcher, assets and generated configs.
///
/// `asterisk.conf` is written last so it reflects every earlier decision.
///
/// # Errors
///
/// Returns [`Error::FileSystem`] for any failed directory, copy or write.
pub async fn provision(layout: &DirectoryLayout, plan: &ProvisionPlan<'_>) -> Result<()> {
    create_directories(layout).await?;
    write_launcher(layout, plan.binary).await?;

    if let Some(assets) = plan.assets {
        copy_matching(
            &assets.join("documentation"),
            "**/*",
            &layout.astdir(AstDir::VarLib, &["documentation"]),
        )
        .await?;
        copy_matching(
            &assets.join("sounds"),
            "**/*",
            &layout.astdir(AstDir::VarLib, &["sounds/en"]),
        )
        .await?;
        copy_matching(
            &assets.join("configs"),
            "**/*",
            &layout.astdir(AstDir::Etc, &[]),
        )
        .await?;
    }

    write_file(
        &layout.astdir(AstDir::Etc, &["bindaddr.conf"]),
        &format!("bindaddr={}\n", plan.address),
    )
    .await?;
    write_file(
        &layout.astdir(AstDir::Etc, &["pjsip-bind.conf"]),
        &format!("bind={}:{}\n", plan.address, plan.sip_port),
    )
    .await?;

    install_configs(layout, layout.run_dir.instance_id()).await?;

    write_file(&layout.asterisk_conf(), &render_asterisk_conf(layout)).await?;
    debug!(root = %layout.run_dir.run_root().display(), "Sandbox provisioned");
    Ok(())
}

/// Copy the suite's `asterisk-<id>/**/*.conf` fixtures into the config directory.
///
/// # Errors
///
/// Returns [`Error::FileSystem`] if a matching fixture cannot be copied.
pub async fn install_configs(layout: &DirectoryLayout, id: &str) -> Result<usize> {
    let source = layout.run_dir.fixture_path(&[&format!("asterisk-{id}")]);
    copy_matching(&source, "**/*.conf", &layout.astdir(AstDir::Etc, &[])).await
}

async fn create_directories(layout: &DirectoryLayout) -> Result<()> {
    let dirs = layout.required_directories();
    try_join_all(dirs.iter().map(|dir| async move {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::fs(format!("create {}", dir.display()), e))
    }))
    .await?;
    Ok(())
}

async fn write_launcher(layout: &DirectoryLayout, binary: &Path) -> Result<()> {
    let launcher = layout.launcher();
    let script = format!(
        "#!/usr/bin/env sh\nexec {} -C \"{}\" \"$@\"\n",
        binary.display(),
        layout.asterisk_conf().display()
    );
    write_file(&launcher, &script).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o775))
            .await
            .map_err(|e| Error::fs(format!("chmod {}", launcher.display()), e))?;
    }
    Ok(())
}

/// Render `asterisk.conf` with one line per directory role.
#[must_use]
pub fn render_asterisk_conf(layout: &DirectoryLayout) -> String {
    let mut lines = vec!["[directories]".to_string()];
    lines.extend(
        AstDir::ALL
            .into_iter()
            .map(|role| format!("{}={}", role.key(), layout.astdir(role, &[]).display())),
    );
    lines.push(String::new());
    lines.push(format!(
        "#include {}",
        layout
            .astdir(AstDir::Etc, &["asterisk-options.conf"])
            .display()
    ));
    lines.push(String::new());
    lines.join("\n")
}

async fn write_file(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| Error::fs(format!("write {}", path.display()), e))
}
