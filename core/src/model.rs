//! Typed records describing what was found on the target, aggregated in a
//! [`FactsContainer`] that the encoder later walks.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::catalog::CveBinarySpec;
use crate::error::Result;

/// Discriminant for objects discovered on the target filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MicronixFileKind {
    File,
    Directory,
    SystemExecutable,
    UserExecutable,
    SharedObject,
}

impl MicronixFileKind {
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            Self::SystemExecutable | Self::UserExecutable | Self::SharedObject
        )
    }

    /// The PDDL object type a file of this kind is declared with.
    pub fn pddl_type(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::File => "file",
            Self::SystemExecutable | Self::UserExecutable | Self::SharedObject => "executable",
        }
    }
}

/// A file, directory or executable on the target, carrying the attributes
/// `stat` and `file` report for it.
///
/// Paths are canonical (`readlink -f` has already run on the remote side)
/// and lowercased before being stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicronixFile {
    pub path: String,
    /// Permission bits as parsed from `stat %a`, in `[0, 0o7777]`.
    pub octal_perms: u32,
    pub user: String,
    pub group: String,
    /// Raw `file` output for the path, lowercased.
    pub raw_type: String,
    pub kind: MicronixFileKind,
    /// CVE predicates attached by the extractor's catalog matching.
    pub cve_capabilities: Vec<String>,
    /// Indices into [`FactsContainer::executables`] for the shared objects
    /// this executable links against.
    pub so_deps: Vec<usize>,
}

impl MicronixFile {
    pub fn new(path: &str, octal_perms: u32, user: &str, group: &str, raw_type: &str) -> Self {
        let path = path.to_lowercase();
        let raw_type = raw_type.to_lowercase();
        let kind = classify(&path, &raw_type);

        Self {
            path,
            octal_perms,
            user: user.to_string(),
            group: group.to_string(),
            raw_type,
            kind,
            cve_capabilities: Vec::new(),
            so_deps: Vec::new(),
        }
    }

    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl fmt::Display for MicronixFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            MicronixFileKind::File => "file",
            MicronixFileKind::Directory => "directory",
            MicronixFileKind::SystemExecutable => "system executable",
            MicronixFileKind::UserExecutable => "user executable",
            MicronixFileKind::SharedObject => "shared object",
        };

        write!(
            f,
            "{prefix} {}, {}:{} ({:o})",
            self.path, self.user, self.group, self.octal_perms
        )
    }
}

fn classify(path: &str, raw_type: &str) -> MicronixFileKind {
    if raw_type.contains("directory") {
        return MicronixFileKind::Directory;
    }

    if raw_type.contains("shared object") {
        return MicronixFileKind::SharedObject;
    }

    if raw_type.contains("executable") {
        // We do not know what executables living in user-controlled
        // locations do.
        if path.starts_with("/home") || path.starts_with("/opt") {
            return MicronixFileKind::UserExecutable;
        }
        return MicronixFileKind::SystemExecutable;
    }

    MicronixFileKind::File
}

static CRONTAB_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(
        r"^\s*(?P<minute>[*0-9/]+)\s+(?P<hour>[*0-9]+)\s+(?P<day_month>[*0-9]+)\s+(?P<month>[*0-9\w]+)\s+(?P<day_week>[*0-9\w]+)\s+(?P<user>[\w0-9_-]+)\s+(?P<cmd>.*)",
    )
    .unwrap();
    re
});

/// One schedule line of `/etc/crontab`. Comment and environment lines do not
/// match the pattern and are skipped by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub user: String,
    pub cmd: String,
    pub minute: String,
    pub hour: String,
    pub day_month: String,
    pub month: String,
    pub day_week: String,
}

impl CronJob {
    pub fn parse(line: &str) -> Option<Self> {
        let caps = CRONTAB_LINE_RE.captures(line)?;

        Some(Self {
            user: caps["user"].to_string(),
            cmd: caps["cmd"].to_string(),
            minute: caps["minute"].to_string(),
            hour: caps["hour"].to_string(),
            day_month: caps["day_month"].to_string(),
            month: caps["month"].to_string(),
            day_week: caps["day_week"].to_string(),
        })
    }
}

impl fmt::Display for CronJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cronjob: {}, {}", self.user, self.cmd)
    }
}

/// A systemd unit file under `/etc/systemd` together with the first token of
/// every `Exec*=` directive it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub unit_file: MicronixFile,
    pub cmds: Vec<String>,
}

/// A shell initialization file found under `/home`, with the shells that
/// source it on session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcFile {
    pub file: MicronixFile,
    pub shells: Vec<String>,
}

/// Everything one extraction run learned about the target. Built once by the
/// extractor, optionally persisted for reuse, then consumed by the encoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactsContainer {
    /// The user we are logged in as.
    pub current_user: String,
    /// The group we are logged in as.
    pub current_group: String,
    pub system_users: BTreeSet<String>,
    /// Login shell per user, from `/etc/passwd`.
    pub users_shell: BTreeMap<String, String>,
    /// Group name to member users.
    pub system_groups: BTreeMap<String, Vec<String>>,
    /// Executables under the points-of-interest directories, in discovery
    /// order, plus shared objects synthesized while resolving dependencies.
    pub executables: Vec<MicronixFile>,
    /// Files writable by the current user but not owned by them. These are
    /// interesting as they might be used to escalate.
    pub writable_files: Vec<MicronixFile>,
    /// Directories writable by the current user but not owned by them.
    pub writable_directories: Vec<MicronixFile>,
    /// SUID / SGID files on the system.
    pub setugid_files: Vec<MicronixFile>,
    pub cronjobs: Vec<CronJob>,
    /// Systemd services in /etc, which we assume are enabled.
    pub systemd_services: Vec<ServiceUnit>,
    pub rcfiles: Vec<RcFile>,
    /// CVE catalog entries considered during extraction.
    pub binaries_with_cve: Vec<CveBinarySpec>,
}

impl FactsContainer {
    /// Index of the executable stored under `path`, if any. Paths in the
    /// container are lowercased, so the lookup key must be too.
    pub fn executable_index(&self, path: &str) -> Option<usize> {
        self.executables.iter().position(|x| x.path == path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
