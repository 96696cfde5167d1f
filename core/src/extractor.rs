//! Drives the reconnaissance command sequence over a [`Transport`], parses
//! the output of every step and populates a [`FactsContainer`].

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::debug;
use tracing::info;
use tracing::warn;
use wildmatch::WildMatch;

use crate::catalog::ConditionKind;
use crate::catalog::CveBinarySpec;
use crate::catalog::CveCatalog;
use crate::catalog::CveDependencies;
use crate::commands;
use crate::error::MicronixErr;
use crate::error::Result;
use crate::model::CronJob;
use crate::model::FactsContainer;
use crate::model::MicronixFile;
use crate::model::RcFile;
use crate::model::ServiceUnit;
use crate::transport::Transport;

/// How many paths go into one batched `file`/`stat` invocation.
const FILE_STAT_BATCH: usize = 100;

/// How many paths go into one batched `ldd` invocation.
const LDD_BATCH: usize = 1000;

/// Probe file name used by the `user_can_create_file` CVE condition.
const CREATE_FILE_PROBE: &str = "touch NLZEnKsM2k.txt";

/// RC file names searched for under `/home`, with the shells that source
/// them on session start.
const RC_FILES: &[(&str, &[&str])] = &[
    (".bashrc", &["bash"]),
    (".bash_profile", &["bash"]),
    (".bash_login", &["bash"]),
    (".profile", &["bash", "zsh", "fish", "ksh", "csh", "tcsh"]),
    (".zshrc", &["zsh"]),
    (".zprofile", &["zsh"]),
    (".zlogin", &["zsh"]),
    (".zshenv", &["zsh"]),
    (".cshrc", &["csh"]),
    (".tcshrc", &["tcsh"]),
    (".kshrc", &["ksh"]),
    (".login_conf", &["bash", "zsh", "fish", "ksh", "csh", "tcsh"]),
    (".bash_logout", &["bash"]),
    (".zlogout", &["zsh"]),
];

static UID_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"uid=[0-9]+\((?P<user>[a-zA-Z0-9_-]+)\)").unwrap();
    re
});

static GID_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"gid=[0-9]+\((?P<group>[a-zA-Z0-9_-]+)\)").unwrap();
    re
});

static STAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"(?P<type>.*):(?P<path>.*):(?P<perm>.*):(?P<user>.*):(?P<group>.*)").unwrap();
    re
});

static FILE_OUTPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"(?P<path>.*):\s*(?P<type>.*)").unwrap();
    re
});

static EXEC_DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"Exec[\w]*=[-!@]*(?P<cmd>[a-zA-Z0-9_/\.-]+)").unwrap();
    re
});

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"(?P<version>\d+(\.\d+)+)").unwrap();
    re
});

/// One parsed line of `ldd` output.
#[derive(Debug, PartialEq, Eq)]
enum LddLine {
    /// A new per-executable section, e.g. `/bin/bash:`.
    Section(String),
    /// A resolvable dependency path.
    Dep(String),
    /// Unresolvable, in-memory or informational line.
    Skip,
}

fn parse_ldd_line(line: &str) -> LddLine {
    static NOT_FOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
        #[expect(clippy::unwrap_used)]
        let re = Regex::new(r"^\s+.* => not found$").unwrap();
        re
    });
    static NOT_DYNAMIC_RE: LazyLock<Regex> = LazyLock::new(|| {
        #[expect(clippy::unwrap_used)]
        let re = Regex::new(r"^\s+not a dynamic executable$").unwrap();
        re
    });
    static VDSO_RE: LazyLock<Regex> = LazyLock::new(|| {
        #[expect(clippy::unwrap_used)]
        let re = Regex::new(r"^\s+((linux-vdso\.so)|(linux-gate\.so)).*$").unwrap();
        re
    });
    static DEP_ARROW_RE: LazyLock<Regex> = LazyLock::new(|| {
        #[expect(clippy::unwrap_used)]
        let re = Regex::new(r"^\s+.*? => (?P<dep>.*?) .*$").unwrap();
        re
    });
    static DEP_PLAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
        #[expect(clippy::unwrap_used)]
        let re = Regex::new(r"^\s+(?P<dep>.*?) .*$").unwrap();
        re
    });
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        #[expect(clippy::unwrap_used)]
        let re = Regex::new(r"^(?P<path>.*):$").unwrap();
        re
    });

    // Dependency not found, e.g. `    libfoo.so => not found`.
    if NOT_FOUND_RE.is_match(line) {
        return LddLine::Skip;
    }

    // A script slipped into the executable list.
    if NOT_DYNAMIC_RE.is_match(line) {
        return LddLine::Skip;
    }

    // The dependency lives in memory, not on disk.
    if VDSO_RE.is_match(line) {
        return LddLine::Skip;
    }

    // `    libc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f22634aa000)`
    if let Some(caps) = DEP_ARROW_RE.captures(line) {
        return LddLine::Dep(caps["dep"].to_string());
    }

    // `    /lib64/ld-linux-x86-64.so.2 (0x00007f2263870000)`
    if let Some(caps) = DEP_PLAIN_RE.captures(line) {
        return LddLine::Dep(caps["dep"].to_string());
    }

    // `/bin/bash:` starts a new section.
    if let Some(caps) = SECTION_RE.captures(line) {
        return LddLine::Section(caps["path"].to_string());
    }

    LddLine::Skip
}

struct StatRecord {
    path: String,
    perms: u32,
    user: String,
    group: String,
}

/// Parses one line of `stat ... -c '%F:%n:%a:%U:%G'` output.
fn parse_stat_line(line: &str) -> Result<StatRecord> {
    let caps = STAT_RE
        .captures(line)
        .ok_or_else(|| MicronixErr::parse("stat", format!("unparseable line {line:?}")))?;

    let perms = u32::from_str_radix(&caps["perm"], 8)
        .map_err(|_| MicronixErr::parse("stat", format!("bad permission field in {line:?}")))?;
    if perms > 0o7777 {
        return Err(MicronixErr::parse(
            "stat",
            format!("permission bits out of range in {line:?}"),
        ));
    }

    Ok(StatRecord {
        path: caps["path"].to_string(),
        perms,
        user: caps["user"].to_string(),
        group: caps["group"].to_string(),
    })
}

pub struct FactsExtractor<T> {
    transport: T,
    container: FactsContainer,
    cve_catalog: CveCatalog,
}

impl<T: Transport> FactsExtractor<T> {
    pub fn new(transport: T, cve_catalog: CveCatalog) -> Self {
        Self {
            transport,
            container: FactsContainer::default(),
            cve_catalog,
        }
    }

    pub fn container(&self) -> &FactsContainer {
        &self.container
    }

    pub fn into_container(self) -> FactsContainer {
        self.container
    }

    /// Runs the whole reconnaissance sequence. Identity, user, group and
    /// executable enumeration failures abort the run; the remaining steps
    /// leave their field empty and keep going.
    pub async fn extract(&mut self, check_unpatched_cves: bool) -> Result<()> {
        info!("retrieving current user and group");
        self.retrieve_current_user().await?;
        info!(
            "logged in as {} ({})",
            self.container.current_user, self.container.current_group
        );

        info!("retrieving system users");
        self.retrieve_users().await?;

        info!("retrieving system groups");
        self.retrieve_groups().await?;

        info!("retrieving system executables");
        self.retrieve_executables().await?;

        info!("retrieving writable files");
        self.retrieve_writable_files().await?;

        info!("retrieving writable directories");
        self.retrieve_writable_directories().await?;

        info!("retrieving SUID / SGID files");
        self.retrieve_setugid().await?;

        info!("retrieving cron jobs");
        self.retrieve_cronjobs().await?;

        info!("retrieving systemd services");
        self.retrieve_systemd_services().await?;

        info!("retrieving RC files");
        self.retrieve_rcfiles().await?;

        if check_unpatched_cves {
            info!("matching executables against the CVE catalog");
            self.retrieve_cves().await?;
        }

        Ok(())
    }

    async fn retrieve_current_user(&mut self) -> Result<()> {
        let output = self.transport.send("id").await?;

        let line = output
            .stdout
            .first()
            .ok_or_else(|| MicronixErr::parse("id", "no output"))?;

        let user = UID_RE
            .captures(line)
            .ok_or_else(|| MicronixErr::parse("id", format!("no uid in {line:?}")))?;
        let group = GID_RE
            .captures(line)
            .ok_or_else(|| MicronixErr::parse("id", format!("no gid in {line:?}")))?;

        self.container.current_user = user["user"].to_string();
        self.container.current_group = group["group"].to_string();

        Ok(())
    }

    async fn retrieve_users(&mut self) -> Result<()> {
        let cmd = commands::list_users();
        let output = self.transport.send(&cmd).await?;

        if output.stdout.is_empty() {
            return Err(MicronixErr::parse(&cmd, "no users returned"));
        }

        self.container
            .system_users
            .extend(output.stdout.iter().filter(|l| !l.is_empty()).cloned());

        if !self
            .container
            .system_users
            .contains(&self.container.current_user)
        {
            return Err(MicronixErr::parse(
                &cmd,
                format!(
                    "current user {} is not listed in /etc/passwd",
                    self.container.current_user
                ),
            ));
        }

        // Login shell for each user is the last colon-field of the passwd line.
        let output = self.transport.send(&commands::cat_file("/etc/passwd")).await?;
        if output.stdout.is_empty() {
            warn!("could not retrieve users' shells");
            return Ok(());
        }

        for line in &output.stdout {
            let mut fields = line.split(':');
            let Some(user) = fields.next() else {
                continue;
            };
            let shell = fields.next_back().unwrap_or_default();
            self.container
                .users_shell
                .insert(user.to_string(), shell.to_string());
        }

        Ok(())
    }

    async fn retrieve_groups(&mut self) -> Result<()> {
        let cmd = commands::list_groups();
        let output = self.transport.send(&cmd).await?;

        if output.stdout.is_empty() {
            return Err(MicronixErr::parse(&cmd, "no groups returned"));
        }

        for line in &output.stdout {
            let Some(group) = line.split(':').next() else {
                continue;
            };
            let members = line.split(':').next_back().unwrap_or_default();

            let members: Vec<String> = members
                .split(',')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();

            self.container.system_groups.insert(group.to_string(), members);
        }

        Ok(())
    }

    /// Runs `file` over a batch and pairs every path with its reported type,
    /// preserving output order. Paths unsafe to batch are dropped up front.
    async fn files_type(&mut self, files: &[String]) -> Result<Vec<(String, String)>> {
        let escaped: Vec<String> = files
            .iter()
            .filter(|path| commands::batchable(path))
            .filter_map(|path| commands::quote(path).map(|q| q.into_owned()))
            .collect();

        let cmd = commands::file_files(&escaped.join(" "));
        let output = self.transport.send(&cmd).await?;

        if output.stdout_is_blank() {
            return Err(MicronixErr::parse("file", "no usable output"));
        }

        let mut res = Vec::new();
        for line in &output.stdout {
            let Some(caps) = FILE_OUTPUT_RE.captures(line) else {
                warn!("no match for file output line {line:?}");
                continue;
            };
            res.push((caps["path"].to_string(), caps["type"].to_string()));
        }

        Ok(res)
    }

    /// Builds one [`MicronixFile`] per surviving path by zipping batched
    /// `file` and `stat` output together.
    async fn construct_files(&mut self, filenames: &[String]) -> Result<Vec<MicronixFile>> {
        let mut res = Vec::new();

        // Split the load in chunks to avoid failures on very long command lines.
        for batch in filenames.chunks(FILE_STAT_BATCH) {
            let file_types = self.files_type(batch).await?;
            if file_types.is_empty() {
                return Err(MicronixErr::parse("file", "no parseable output for batch"));
            }

            let quoted: Vec<String> = file_types
                .iter()
                .filter_map(|(path, _)| commands::quote(path).map(|q| q.into_owned()))
                .collect();

            let output = self
                .transport
                .send(&commands::stat_files(&quoted.join(" ")))
                .await?;
            if output.stdout.is_empty() {
                return Err(MicronixErr::parse("stat", "no output for batch"));
            }

            for line in &output.stdout {
                let record = parse_stat_line(line)?;

                let Some((_, raw_type)) =
                    file_types.iter().find(|(path, _)| *path == record.path)
                else {
                    warn!("stat returned {} which file did not report on", record.path);
                    continue;
                };

                res.push(MicronixFile::new(
                    &record.path,
                    record.perms,
                    &record.user,
                    &record.group,
                    raw_type,
                ));
            }
        }

        Ok(res)
    }

    async fn retrieve_executables(&mut self) -> Result<()> {
        let mut found: Vec<String> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for dir in commands::POI_BINARIES_DIRS {
            let output = self.transport.send(&commands::find_executables(dir)).await?;

            for line in output.stdout {
                if line.is_empty() {
                    continue;
                }
                // Canonicalized paths may repeat across directories.
                if seen.insert(line.to_lowercase()) {
                    found.push(line);
                }
            }
        }

        if found.is_empty() {
            return Err(MicronixErr::parse(
                "find",
                "no executables under the points-of-interest directories",
            ));
        }

        let executables = self.construct_files(&found).await?;
        let start = self.container.executables.len();
        self.container.executables.extend(executables);
        let range = start..self.container.executables.len();

        self.dump_so_deps(range).await
    }

    /// Lists shared-object dependencies for the executables in `range` and
    /// links them into the container.
    async fn dump_so_deps(&mut self, range: Range<usize>) -> Result<()> {
        let paths: Vec<String> = self.container.executables[range]
            .iter()
            .filter_map(|exe| commands::quote(&exe.path).map(|q| q.into_owned()))
            .collect();

        let mut output: Vec<String> = Vec::new();
        for batch in paths.chunks(LDD_BATCH) {
            let result = self
                .transport
                .send(&commands::dump_so_deps(&batch.join(" ")))
                .await?;
            output.extend(result.stdout);
        }

        if output.is_empty() {
            warn!("could not dump executables' shared object dependencies");
            return Ok(());
        }

        // Break up the ldd output by executable section, then collect every
        // shared object entry within it.
        let mut exe_deps: Vec<(usize, Vec<String>)> = Vec::new();
        let mut all_deps: BTreeSet<String> = BTreeSet::new();

        for line in &output {
            match parse_ldd_line(line) {
                LddLine::Section(path) => match self.container.executable_index(&path) {
                    Some(index) => exe_deps.push((index, Vec::new())),
                    None => {
                        warn!("ldd reported on unknown executable {path}");
                        exe_deps.push((usize::MAX, Vec::new()));
                    }
                },
                LddLine::Dep(dep) => {
                    if let Some((_, deps)) = exe_deps.last_mut() {
                        deps.push(dep.clone());
                        all_deps.insert(dep);
                    }
                }
                LddLine::Skip => {}
            }
        }

        exe_deps.retain(|(index, _)| *index != usize::MAX);

        self.resolve_so_paths(exe_deps, all_deps).await
    }

    /// Some ldd output is relative; resolve every collected dependency path
    /// with one batched `readlink -m`, relying on positional order.
    async fn resolve_so_paths(
        &mut self,
        mut exe_deps: Vec<(usize, Vec<String>)>,
        all_deps: BTreeSet<String>,
    ) -> Result<()> {
        if all_deps.is_empty() {
            return Ok(());
        }

        let deps_list: Vec<String> = all_deps.into_iter().collect();
        let quoted: Vec<String> = deps_list
            .iter()
            .filter_map(|dep| commands::quote(dep).map(|q| q.into_owned()))
            .collect();

        let output = self
            .transport
            .send(&commands::resolve_paths(&quoted.join(" ")))
            .await?;

        if output.stdout.is_empty() {
            warn!("could not resolve executables' shared object dependencies");
            return Ok(());
        }

        let resolved: BTreeMap<String, String> = deps_list
            .iter()
            .cloned()
            .zip(output.stdout.iter().cloned())
            .collect();

        for (_, deps) in &mut exe_deps {
            let rewritten: Vec<String> = deps
                .iter()
                .filter_map(|dep| resolved.get(dep).cloned())
                .collect();
            *deps = rewritten;
        }

        let all_resolved: BTreeSet<String> = resolved.values().cloned().collect();

        self.link_so_files(exe_deps, all_resolved).await
    }

    /// Synthesizes container entries for shared objects that were not already
    /// discovered, then rewrites every dependency list as container indices.
    async fn link_so_files(
        &mut self,
        exe_deps: Vec<(usize, Vec<String>)>,
        all_resolved: BTreeSet<String>,
    ) -> Result<()> {
        let known: BTreeSet<String> = self
            .container
            .executables
            .iter()
            .map(|exe| exe.path.clone())
            .collect();

        let missing: Vec<String> = all_resolved
            .iter()
            .filter(|dep| !known.contains(&dep.to_lowercase()))
            .cloned()
            .collect();

        if !missing.is_empty() {
            match self.construct_files(&missing).await {
                Ok(files) => self.container.executables.extend(files),
                Err(e @ MicronixErr::Parse { .. }) => {
                    warn!("could not synthesize shared object entries: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        for (exe_index, deps) in exe_deps {
            let dep_indices: Vec<usize> = deps
                .iter()
                .filter_map(|dep| self.container.executable_index(&dep.to_lowercase()))
                .collect();
            if let Some(exe) = self.container.executables.get_mut(exe_index) {
                exe.so_deps = dep_indices;
            }
        }

        Ok(())
    }

    async fn retrieve_writable_files(&mut self) -> Result<()> {
        let output = self.transport.send(&commands::writable_files("/")).await?;

        if output.stdout.is_empty() {
            warn!("could not retrieve any writable file");
            return Ok(());
        }

        match self.construct_files(&output.stdout).await {
            Ok(files) => self.container.writable_files.extend(files),
            Err(e @ MicronixErr::Parse { .. }) => warn!("skipping writable files: {e}"),
            Err(e) => return Err(e),
        }

        Ok(())
    }

    async fn retrieve_writable_directories(&mut self) -> Result<()> {
        let output = self
            .transport
            .send(&commands::writable_directories("/"))
            .await?;

        if output.stdout.is_empty() {
            warn!("could not retrieve any writable directory");
            return Ok(());
        }

        match self.construct_files(&output.stdout).await {
            Ok(files) => self.container.writable_directories.extend(files),
            Err(e @ MicronixErr::Parse { .. }) => warn!("skipping writable directories: {e}"),
            Err(e) => return Err(e),
        }

        Ok(())
    }

    async fn retrieve_setugid(&mut self) -> Result<()> {
        let output = self.transport.send(&commands::setugid_files("/")).await?;

        if output.stdout.is_empty() {
            warn!("could not retrieve any SUID / SGID file");
            return Ok(());
        }

        match self.construct_files(&output.stdout).await {
            Ok(files) => self.container.setugid_files.extend(files),
            Err(e @ MicronixErr::Parse { .. }) => warn!("skipping SUID / SGID files: {e}"),
            Err(e) => return Err(e),
        }

        Ok(())
    }

    async fn retrieve_cronjobs(&mut self) -> Result<()> {
        let output = self.transport.send(&commands::read_crontab()).await?;

        if output.stdout.is_empty() {
            warn!("could not retrieve any cron job");
            return Ok(());
        }

        self.container.cronjobs = output
            .stdout
            .iter()
            .filter_map(|line| CronJob::parse(line))
            .collect();

        Ok(())
    }

    async fn retrieve_systemd_services(&mut self) -> Result<()> {
        let output = self.transport.send(&commands::list_systemd_services()).await?;

        if output.stdout.is_empty() {
            warn!("could not retrieve any systemd service");
            return Ok(());
        }

        let unit_files = match self.construct_files(&output.stdout).await {
            Ok(files) => files,
            Err(e @ MicronixErr::Parse { .. }) => {
                warn!("skipping systemd services: {e}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for unit_file in unit_files {
            let Some(quoted) = commands::quote(&unit_file.path) else {
                continue;
            };
            let contents = self.transport.send(&commands::cat_file(&quoted)).await?;

            if contents.stdout.is_empty() {
                warn!(
                    "ignoring systemd service {} as no contents were retrieved",
                    unit_file.path
                );
                continue;
            }

            let joined = contents.stdout.join("\n");
            let cmds: Vec<String> = EXEC_DIRECTIVE_RE
                .captures_iter(&joined)
                .map(|caps| caps["cmd"].to_string())
                .collect();

            self.container
                .systemd_services
                .push(ServiceUnit { unit_file, cmds });
        }

        Ok(())
    }

    async fn retrieve_rcfiles(&mut self) -> Result<()> {
        let expr = RC_FILES
            .iter()
            .map(|(name, _)| format!("-iname '{name}'"))
            .collect::<Vec<_>>()
            .join(" -or ");

        let output = self
            .transport
            .send(&commands::find_file("/home", &expr))
            .await?;

        if output.stdout.is_empty() {
            warn!("could not retrieve any RC file");
            return Ok(());
        }

        let files = match self.construct_files(&output.stdout).await {
            Ok(files) => files,
            Err(e @ MicronixErr::Parse { .. }) => {
                warn!("skipping RC files: {e}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for file in files {
            let Some((_, shells)) = RC_FILES
                .iter()
                .find(|(name, _)| *name == file.basename())
            else {
                warn!("unexpected RC file name {}", file.path);
                continue;
            };

            self.container.rcfiles.push(RcFile {
                file,
                shells: shells.iter().map(|s| s.to_string()).collect(),
            });
        }

        Ok(())
    }

    /// Probes the version of `executable` and returns the first dotted
    /// version number in its output.
    async fn probe_version(
        &mut self,
        executable: &str,
        version_command: &str,
    ) -> Result<Option<String>> {
        let Some(quoted) = commands::quote(executable) else {
            return Ok(None);
        };

        let output = self
            .transport
            .send(&commands::executable_version(&quoted, version_command))
            .await?;

        if output.stdout.is_empty() {
            return Ok(None);
        }

        let joined = output.stdout.join("\n");
        Ok(VERSION_RE
            .captures(&joined)
            .map(|caps| caps["version"].to_string()))
    }

    async fn dependencies_satisfied(&mut self, dependencies: &CveDependencies) -> Result<bool> {
        for file_expr in &dependencies.files {
            let output = self
                .transport
                .send(&commands::find_file("/", file_expr))
                .await?;
            if output.stdout.is_empty() {
                return Ok(false);
            }
        }

        for needle in &dependencies.executables {
            let found = self
                .container
                .executables
                .iter()
                .any(|exe| exe.kind.is_executable() && exe.path.contains(needle.as_str()));
            if !found {
                return Ok(false);
            }
        }

        for condition in &dependencies.conditions {
            match condition.kind {
                ConditionKind::NotEmpty => {
                    let output = self.transport.send(&condition.op1).await?;
                    if output.stdout.is_empty() {
                        return Ok(false);
                    }
                }
                ConditionKind::UserCanCreateFile => {
                    let output = self.transport.send(CREATE_FILE_PROBE).await?;
                    if output.stdout.is_empty() {
                        return Ok(false);
                    }
                }
            }
        }

        Ok(true)
    }

    /// Matches every known executable against the CVE catalog, attaching the
    /// CVE predicate when version and preconditions line up. A failed or
    /// timed-out version probe skips the binary.
    async fn retrieve_cves(&mut self) -> Result<()> {
        self.container.binaries_with_cve = self.cve_catalog.binaries.clone();

        for index in 0..self.container.executables.len() {
            let exe = &self.container.executables[index];
            if !exe.kind.is_executable() {
                continue;
            }

            let path = exe.path.clone();
            let basename = exe.basename().to_string();

            let specs: Vec<CveBinarySpec> = self
                .container
                .binaries_with_cve
                .iter()
                .filter(|spec| spec.name == basename)
                .cloned()
                .collect();

            for spec in specs {
                let version = match self.probe_version(&path, &spec.version_command).await {
                    Ok(Some(version)) => version,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!("version probe failed for {path}: {e}");
                        continue;
                    }
                };

                let vulnerable = spec
                    .version_globs
                    .iter()
                    .any(|glob| WildMatch::new(glob).matches(&version));
                if !vulnerable {
                    continue;
                }

                if !self.dependencies_satisfied(&spec.dependencies).await? {
                    continue;
                }

                debug!("{path} matches {}", spec.cve_predicate);
                self.container.executables[index]
                    .cve_capabilities
                    .push(spec.cve_predicate.clone());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn ldd_section_headers_are_detected() {
        assert_eq!(
            parse_ldd_line("/bin/bash:"),
            LddLine::Section("/bin/bash".to_string())
        );
    }

    #[test]
    fn ldd_arrow_dependencies_resolve_to_the_target_path() {
        assert_eq!(
            parse_ldd_line("\tlibc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f22634aa000)"),
            LddLine::Dep("/lib/x86_64-linux-gnu/libc.so.6".to_string())
        );
    }

    #[test]
    fn ldd_loader_lines_resolve_to_their_own_path() {
        assert_eq!(
            parse_ldd_line("\t/lib64/ld-linux-x86-64.so.2 (0x00007f2263870000)"),
            LddLine::Dep("/lib64/ld-linux-x86-64.so.2".to_string())
        );
    }

    #[test]
    fn ldd_noise_is_skipped() {
        assert_eq!(parse_ldd_line("\tsome-android-thing.so => not found"), LddLine::Skip);
        assert_eq!(parse_ldd_line("\tnot a dynamic executable"), LddLine::Skip);
        assert_eq!(
            parse_ldd_line("\tlinux-vdso.so.1 (0x00007ffeaafb8000)"),
            LddLine::Skip
        );
        assert_eq!(
            parse_ldd_line("\tlinux-gate.so.1 (0xb7fff000)"),
            LddLine::Skip
        );
    }

    #[test]
    fn stat_lines_parse_into_records() {
        let record = parse_stat_line("regular file:/usr/bin/find:755:root:root").unwrap();
        assert_eq!(record.path, "/usr/bin/find");
        assert_eq!(record.perms, 0o755);
        assert_eq!(record.user, "root");
        assert_eq!(record.group, "root");
    }

    #[test]
    fn stat_suid_permissions_parse_as_octal() {
        let record = parse_stat_line("regular file:/usr/bin/passwd:4755:root:root").unwrap();
        assert_eq!(record.perms, 0o4755);
    }

    #[test]
    fn malformed_stat_lines_are_an_error() {
        assert!(parse_stat_line("garbage").is_err());
        assert!(parse_stat_line("regular file:/usr/bin/find:rwxr:root:root").is_err());
        assert!(parse_stat_line("regular file:/usr/bin/find:77777:root:root").is_err());
    }

    #[test]
    fn version_regex_takes_the_first_dotted_number() {
        let caps = VERSION_RE
            .captures("Sudo version 1.8.31\nSudoers policy plugin version 1.8.31")
            .unwrap();
        assert_eq!(&caps["version"], "1.8.31");
    }

    #[test]
    fn exec_directives_yield_the_first_token() {
        let joined = "[Service]\nExecStart=-/usr/sbin/agetty -o '-p -- \\u' --noclear tty1\nExecReload=/bin/kill -HUP $MAINPID";
        let cmds: Vec<String> = EXEC_DIRECTIVE_RE
            .captures_iter(joined)
            .map(|caps| caps["cmd"].to_string())
            .collect();
        assert_eq!(cmds, vec!["/usr/sbin/agetty".to_string(), "/bin/kill".to_string()]);
    }
}
