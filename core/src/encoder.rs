//! Translates a [`FactsContainer`] into typed ground objects and predicates,
//! then assembles one planning problem per candidate goal user plus one
//! disjunctive any-user problem.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::debug;
use tracing::info;

use crate::catalog::CapabilityCatalog;
use crate::model::FactsContainer;
use crate::model::MicronixFile;
use crate::model::MicronixFileKind;
use crate::pddl::Domain;
use crate::pddl::Goal;
use crate::pddl::Object;
use crate::pddl::Predicate;
use crate::pddl::Problem;

/// Characters that are illegal in PDDL symbol names.
const FORBIDDEN_CHARS: &[char] = &[
    '.', '/', '[', ']', '+', '*', '\'', ' ', '(', ')', '{', '}', '@', '~',
];

/// Normalizes a raw symbol into a legal PDDL name: forbidden characters
/// become underscores, a leading underscore is dropped and the result is
/// lowercased. Distinct inputs may collapse to the same symbol; that is
/// intentional.
pub fn normalize(symbol: &str) -> String {
    let mut res: String = symbol
        .chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect();

    if let Some(stripped) = res.strip_prefix('_') {
        res = stripped.to_string();
    }

    res.to_lowercase()
}

static HOME_USER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"^/home/(?P<username>[\w\d]+)").unwrap();
    re
});

static CRON_BINARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"^(/[\w\.]+)+$").unwrap();
    re
});

pub struct Encoder<'a> {
    facts: &'a FactsContainer,
    catalog: &'a CapabilityCatalog,
    objects: BTreeSet<Object>,
    predicates: BTreeSet<Predicate>,
}

impl<'a> Encoder<'a> {
    pub fn new(facts: &'a FactsContainer, catalog: &'a CapabilityCatalog) -> Self {
        let mut encoder = Self {
            facts,
            catalog,
            objects: BTreeSet::new(),
            predicates: BTreeSet::new(),
        };

        // Singleton symbols every problem carries.
        encoder.add_object("process", "process");
        encoder.add_object("data", "data");
        encoder.add_object("local", "local");

        encoder
    }

    pub fn objects(&self) -> &BTreeSet<Object> {
        &self.objects
    }

    pub fn predicates(&self) -> &BTreeSet<Predicate> {
        &self.predicates
    }

    pub fn total_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn total_predicates(&self) -> usize {
        self.predicates.len()
    }

    /// Registers `symbol` as a typed object and returns its normalized name
    /// for use as a predicate argument.
    fn add_object(&mut self, symbol: &str, type_name: &str) -> String {
        let name = normalize(symbol);
        self.objects.insert(Object {
            name: name.clone(),
            type_name: type_name.to_string(),
        });
        name
    }

    fn add_predicate(&mut self, name: &str, args: Vec<String>) {
        self.predicates.insert(Predicate::new(normalize(name), args));
    }

    /// Walks the whole container. Emission is idempotent: both sets are
    /// append-only and duplicates collapse.
    pub fn generate_predicates(&mut self) {
        self.process_users_and_groups();
        self.process_executables();
        self.process_writable_files();
        self.process_setugid_files();
        self.process_cronjobs();
        self.process_systemd_services();
        self.process_rc_files();
        self.process_user_shells();
    }

    fn process_users_and_groups(&mut self) {
        info!("processing users and groups");
        let facts = self.facts;

        // Every user gets a user and a group symbol of their own.
        for user in &facts.system_users {
            let user_obj = self.add_object(&format!("{user}_u"), "user");
            let group_obj = self.add_object(&format!("{user}_g"), "group");

            self.add_predicate("user_group", vec![user_obj.clone(), group_obj.clone()]);

            if user == "root" {
                self.add_predicate("user_is_admin", vec![user_obj]);
                self.add_predicate("group_is_admin", vec![group_obj]);
            }
        }

        let controlled = self.add_object(&format!("{}_u", facts.current_user), "user");
        self.add_predicate("controlled_user", vec![controlled]);

        // Explicit group memberships from /etc/group.
        for (group, members) in &facts.system_groups {
            for member in members {
                let user_obj = self.add_object(&format!("{member}_u"), "user");
                let group_obj = self.add_object(&format!("{group}_g"), "group");
                self.add_predicate("user_group", vec![user_obj, group_obj]);
            }
        }
    }

    fn process_executables(&mut self) {
        info!("processing system executables");
        let facts = self.facts;
        for file in &facts.executables {
            self.process_micronix_file(file);
        }
    }

    fn process_writable_files(&mut self) {
        info!("processing writable files");
        let facts = self.facts;
        for file in &facts.writable_files {
            self.process_micronix_file(file);
        }
    }

    fn process_setugid_files(&mut self) {
        info!("processing SUID / SGID files");
        let facts = self.facts;
        for file in &facts.setugid_files {
            self.process_micronix_file(file);
        }
    }

    fn process_cronjobs(&mut self) {
        info!("processing cron jobs");
        let facts = self.facts;

        for job in &facts.cronjobs {
            // Only commands that are a bare absolute path are understood;
            // anything carrying arguments is dropped.
            if !CRON_BINARY_RE.is_match(&job.cmd) {
                continue;
            }

            let exe_obj = self.add_object(&job.cmd, "executable");
            let user_obj = self.add_object(&format!("{}_u", job.user), "user");

            self.add_predicate(
                "executable_systematically_called_by",
                vec![exe_obj, user_obj],
            );
        }
    }

    fn process_systemd_services(&mut self) {
        info!("processing systemd services");
        let facts = self.facts;

        for service in &facts.systemd_services {
            self.process_micronix_file(&service.unit_file);

            let file_obj = normalize(&service.unit_file.path);
            self.add_predicate("daemon_file", vec![file_obj]);

            for cmd in &service.cmds {
                let exe_obj = self.add_object(cmd, "executable");
                // Services under /etc/systemd are assumed to run as root.
                let root_obj = self.add_object("root_u", "user");

                self.add_predicate(
                    "executable_systematically_called_by",
                    vec![exe_obj, root_obj],
                );
            }
        }
    }

    /// Binds every RC file under a user's home to the shells that source it.
    fn process_rc_files(&mut self) {
        info!("processing RC files");
        let facts = self.facts;

        for rc in &facts.rcfiles {
            self.process_micronix_file(&rc.file);

            let file_obj = self.add_object(&rc.file.path, rc.file.kind.pddl_type());

            let owner_obj = HOME_USER_RE.captures(&rc.file.path).map(|caps| {
                self.add_object(&format!("{}_u", &caps["username"]), "user")
            });

            for exe in &facts.executables {
                if !rc.shells.iter().any(|shell| shell == exe.basename()) {
                    continue;
                }

                let exe_obj = self.add_object(&exe.path, exe.kind.pddl_type());

                if let Some(owner_obj) = &owner_obj {
                    self.add_predicate(
                        "executable_loads_user_specific_file",
                        vec![exe_obj, owner_obj.clone(), file_obj.clone()],
                    );
                }
            }
        }
    }

    fn process_user_shells(&mut self) {
        info!("processing user shells");
        let facts = self.facts;

        for (user, shell) in &facts.users_shell {
            let user_obj = self.add_object(&format!("{user}_u"), "user");
            let shell_obj = self.add_object(shell, "executable");

            self.add_predicate(
                "executable_systematically_called_by",
                vec![shell_obj, user_obj],
            );
        }
    }

    /// A system executable earns its place in the problem only through a
    /// capability mapping or a CVE predicate; everything else is always
    /// emitted.
    fn should_emit(&self, file: &MicronixFile) -> bool {
        if file.kind != MicronixFileKind::SystemExecutable {
            return true;
        }

        !self.catalog.capabilities_for_binary(file.basename()).is_empty()
            || !file.cve_capabilities.is_empty()
    }

    /// Emits every fact inherent to a single file.
    pub fn process_micronix_file(&mut self, file: &MicronixFile) {
        if !self.should_emit(file) {
            return;
        }

        let user_obj = self.add_object(&format!("{}_u", file.user), "user");
        let group_obj = self.add_object(&format!("{}_g", file.group), "group");
        let file_obj = self.add_object(&file.path, file.kind.pddl_type());

        if file.kind == MicronixFileKind::Directory {
            self.add_predicate("directory_owner", vec![file_obj, user_obj, group_obj]);
            return;
        }

        self.add_predicate(
            "file_present_at_location",
            vec![file_obj.clone(), "local".to_string()],
        );
        self.add_predicate(
            "file_owner",
            vec![file_obj.clone(), user_obj, group_obj.clone()],
        );

        if file.kind.is_executable() {
            self.generate_capability_predicates(file, &file_obj);

            match file.kind {
                MicronixFileKind::SystemExecutable => {
                    self.add_predicate("system_executable", vec![file_obj.clone()]);
                }
                MicronixFileKind::UserExecutable => {
                    self.add_predicate("user_executable", vec![file_obj.clone()]);
                }
                _ => {}
            }

            if file.octal_perms & 0o4000 != 0 {
                self.add_predicate("suid_executable", vec![file_obj.clone()]);
            }

            let dep_paths: Vec<String> = file
                .so_deps
                .iter()
                .filter_map(|&index| self.facts.executables.get(index))
                .map(|dep| dep.path.clone())
                .collect();
            for dep_path in dep_paths {
                let dep_obj = self.add_object(&dep_path, "executable");
                self.add_predicate(
                    "executable_always_loads_file",
                    vec![file_obj.clone(), dep_obj],
                );
            }
        }

        // Group permission bits.
        if file.octal_perms & 0o040 != 0 {
            self.add_predicate(
                "group_file_permission",
                vec![group_obj.clone(), file_obj.clone(), "FS_READ".to_string()],
            );
        }
        if file.octal_perms & 0o020 != 0 {
            self.add_predicate(
                "group_file_permission",
                vec![group_obj.clone(), file_obj.clone(), "FS_WRITE".to_string()],
            );
        }
        if file.octal_perms & 0o010 != 0 {
            self.add_predicate(
                "group_file_permission",
                vec![group_obj.clone(), file_obj.clone(), "FS_EXEC".to_string()],
            );
        }

        // Permission bits for the rest of the users.
        if file.octal_perms & 0o004 != 0 {
            self.add_predicate(
                "default_file_permission",
                vec![file_obj.clone(), "FS_READ".to_string()],
            );
        }
        if file.octal_perms & 0o002 != 0 {
            self.add_predicate(
                "default_file_permission",
                vec![file_obj.clone(), "FS_WRITE".to_string()],
            );
        }
        if file.octal_perms & 0o001 != 0 {
            self.add_predicate(
                "default_file_permission",
                vec![file_obj.clone(), "FS_EXEC".to_string()],
            );
        }

        if file.path == "/etc/passwd" {
            self.add_predicate(
                "file_contents",
                vec![file_obj.clone(), "SYSFILE_PASSWD".to_string()],
            );
        }

        for cve_predicate in &file.cve_capabilities {
            self.add_predicate(cve_predicate, vec![file_obj.clone()]);
        }
    }

    /// Emits every catalog predicate granted by capabilities whose binary
    /// list contains this executable's basename. Executables in
    /// user-controlled locations grant nothing.
    fn generate_capability_predicates(&mut self, file: &MicronixFile, file_obj: &str) {
        if file.kind == MicronixFileKind::UserExecutable {
            return;
        }

        let basename = normalize(file.basename());
        let catalog = self.catalog;

        for (capability, entry) in catalog.iter() {
            if !entry.binaries.iter().any(|b| normalize(b) == basename) {
                continue;
            }

            for predicate in &entry.predicates {
                debug!("{file} capability: {capability} ({predicate})");
                self.add_predicate(predicate, vec![file_obj.to_string()]);
            }
        }
    }

    /// Builds one problem per goal user and the trailing any-user problem,
    /// in that order. The goal users are every system user other than the
    /// one the session runs as.
    pub fn generate_problems(&mut self, domain: &Domain) -> Vec<Problem> {
        self.generate_predicates();

        let mut problems = Vec::new();
        let mut goals: Vec<Predicate> = Vec::new();

        let users_to_control = self
            .facts
            .system_users
            .iter()
            .filter(|user| **user != self.facts.current_user);

        for user in users_to_control {
            info!("generating problem to control {user}");

            let goal = Predicate::new(
                "controlled_user",
                vec![format!("{}_u", normalize(user))],
            );
            goals.push(goal.clone());

            problems.push(Problem {
                name: format!("micronix-problem-{}", normalize(user)),
                domain: domain.name.clone(),
                objects: self.objects.clone(),
                init: self.predicates.clone(),
                goal: Goal::Atom(goal),
            });
        }

        // One more problem accepting control of any of the users above.
        let any_goal = match goals.len() {
            0 => None,
            1 => goals.pop().map(Goal::Atom),
            _ => Some(Goal::AnyOf(goals)),
        };

        if let Some(goal) = any_goal {
            problems.push(Problem {
                name: "micronix-problem-any_user".to_string(),
                domain: domain.name.clone(),
                objects: self.objects.clone(),
                init: self.predicates.clone(),
                goal,
            });
        }

        problems
    }
}
