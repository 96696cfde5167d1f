#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end encoder scenarios over hand-built fact containers.

use std::collections::BTreeSet;

use micronix_core::catalog::CapabilityCatalog;
use micronix_core::encoder::Encoder;
use micronix_core::encoder::normalize;
use micronix_core::model::CronJob;
use micronix_core::model::FactsContainer;
use micronix_core::model::MicronixFile;
use micronix_core::model::MicronixFileKind;
use micronix_core::model::RcFile;
use micronix_core::pddl::Domain;
use micronix_core::pddl::Goal;
use micronix_core::pddl::Predicate;
use pretty_assertions::assert_eq;

const TEST_CATALOG: &str = r#"
[capabilities.CAP_exec_arbitrary]
predicates = ["find_exec"]
binaries = [{ name = "find" }]

[capabilities.CAP_shell]
predicates = ["executable_provides_shell"]
binaries = [{ name = "bash" }]

[capabilities.CAP_change_password]
predicates = ["passwd_exec"]
binaries = [{ name = "passwd" }]
"#;

fn catalog() -> CapabilityCatalog {
    CapabilityCatalog::from_toml_str(TEST_CATALOG).unwrap()
}

fn exe(path: &str, perms: u32, user: &str, group: &str) -> MicronixFile {
    MicronixFile::new(path, perms, user, group, "ELF 64-bit LSB executable")
}

fn base_facts(users: &[&str], current: &str) -> FactsContainer {
    FactsContainer {
        current_user: current.to_string(),
        current_group: current.to_string(),
        system_users: users.iter().map(|u| u.to_string()).collect(),
        ..FactsContainer::default()
    }
}

fn has(predicates: &BTreeSet<Predicate>, name: &str, args: &[&str]) -> bool {
    predicates.contains(&Predicate::new(
        name,
        args.iter().map(|a| a.to_string()).collect(),
    ))
}

#[test]
fn minimal_fixture_emits_the_bootstrap_and_capability_predicates() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts
        .executables
        .push(exe("/usr/bin/find", 0o755, "root", "root"));

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();
    let predicates = encoder.predicates();

    assert!(has(predicates, "user_group", &["root_u", "root_g"]));
    assert!(has(predicates, "user_is_admin", &["root_u"]));
    assert!(has(predicates, "group_is_admin", &["root_g"]));
    assert!(has(predicates, "user_group", &["alice_u", "alice_g"]));
    assert!(has(predicates, "controlled_user", &["alice_u"]));
    assert!(has(predicates, "file_present_at_location", &["usr_bin_find", "local"]));
    assert!(has(predicates, "file_owner", &["usr_bin_find", "root_u", "root_g"]));
    assert!(has(predicates, "system_executable", &["usr_bin_find"]));
    assert!(has(predicates, "find_exec", &["usr_bin_find"]));
    assert!(has(predicates, "default_file_permission", &["usr_bin_find", "FS_READ"]));
    assert!(has(predicates, "default_file_permission", &["usr_bin_find", "FS_EXEC"]));

    // 0o755 gives the rest of the users no write permission, and a binary
    // without shared object dependencies loads nothing.
    assert!(!has(predicates, "default_file_permission", &["usr_bin_find", "FS_WRITE"]));
    assert!(!predicates.iter().any(|p| p.name == "executable_always_loads_file"));

    // Every predicate argument other than a domain constant is a declared
    // typed object.
    let object_names: BTreeSet<&str> = encoder
        .objects()
        .iter()
        .map(|o| o.name.as_str())
        .collect();
    for predicate in encoder.predicates() {
        for arg in &predicate.args {
            if arg.chars().any(|c| c.is_ascii_uppercase()) {
                continue;
            }
            assert!(object_names.contains(arg.as_str()), "{arg} is not declared");
        }
    }
}

#[test]
fn suid_binaries_emit_suid_executable() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts
        .setugid_files
        .push(exe("/usr/bin/passwd", 0o4755, "root", "root"));

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();
    let predicates = encoder.predicates();

    assert!(has(predicates, "suid_executable", &["usr_bin_passwd"]));
    assert!(has(predicates, "default_file_permission", &["usr_bin_passwd", "FS_READ"]));
    assert!(has(predicates, "default_file_permission", &["usr_bin_passwd", "FS_EXEC"]));
    assert!(!has(predicates, "default_file_permission", &["usr_bin_passwd", "FS_WRITE"]));
}

#[test]
fn writable_etc_passwd_emits_contents_and_write_permissions() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts.writable_files.push(MicronixFile::new(
        "/etc/passwd",
        0o666,
        "root",
        "root",
        "ASCII text",
    ));

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();
    let predicates = encoder.predicates();

    assert!(has(predicates, "file_contents", &["etc_passwd", "SYSFILE_PASSWD"]));
    assert!(has(predicates, "default_file_permission", &["etc_passwd", "FS_READ"]));
    assert!(has(predicates, "default_file_permission", &["etc_passwd", "FS_WRITE"]));
    assert!(has(predicates, "group_file_permission", &["root_g", "etc_passwd", "FS_WRITE"]));
    // A plain file is not executable.
    assert!(!has(predicates, "system_executable", &["etc_passwd"]));
}

#[test]
fn cron_commands_with_arguments_are_dropped() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts.cronjobs.push(
        CronJob::parse("* * * * * root /bin/bash /opt/x.sh").unwrap(),
    );

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();

    assert!(
        !encoder
            .predicates()
            .iter()
            .any(|p| p.name == "executable_systematically_called_by")
    );
}

#[test]
fn bare_absolute_cron_commands_are_bound_to_their_user() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts.cronjobs.push(
        CronJob::parse("17 * * * * root /usr/local/bin/cleanup.sh").unwrap(),
    );

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();

    assert!(has(
        encoder.predicates(),
        "executable_systematically_called_by",
        &["usr_local_bin_cleanup_sh", "root_u"],
    ));
}

#[test]
fn rc_files_bind_shells_to_their_owner() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts.executables.push(exe("/bin/bash", 0o755, "root", "root"));
    facts.rcfiles.push(RcFile {
        file: MicronixFile::new("/home/alice/.bashrc", 0o644, "alice", "alice", "ASCII text"),
        shells: vec!["bash".to_string()],
    });

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();

    assert!(has(
        encoder.predicates(),
        "executable_loads_user_specific_file",
        &["bin_bash", "alice_u", "home_alice__bashrc"],
    ));
}

#[test]
fn rc_files_outside_home_emit_no_loads_predicate() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts.executables.push(exe("/bin/bash", 0o755, "root", "root"));
    facts.rcfiles.push(RcFile {
        file: MicronixFile::new("/etc/skel/.bashrc", 0o644, "root", "root", "ASCII text"),
        shells: vec!["bash".to_string()],
    });

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();

    assert!(
        !encoder
            .predicates()
            .iter()
            .any(|p| p.name == "executable_loads_user_specific_file")
    );
}

#[test]
fn uncatalogued_system_executables_are_gated_out() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts.executables.push(exe("/usr/bin/true", 0o755, "root", "root"));

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();

    let symbol = normalize("/usr/bin/true");
    assert!(
        !encoder
            .predicates()
            .iter()
            .any(|p| p.args.iter().any(|a| *a == symbol)),
        "gated executable must not be referenced by any predicate"
    );
}

#[test]
fn cve_predicates_rescue_gated_executables() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    let mut sudo = exe("/usr/bin/sudo", 0o4755, "root", "root");
    sudo.cve_capabilities
        .push("vulnerable_to_cve_2021_3156".to_string());
    facts.executables.push(sudo);

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();
    let predicates = encoder.predicates();

    assert!(has(predicates, "vulnerable_to_cve_2021_3156", &["usr_bin_sudo"]));
    assert!(has(predicates, "system_executable", &["usr_bin_sudo"]));
    assert!(has(predicates, "suid_executable", &["usr_bin_sudo"]));
}

#[test]
fn user_executables_grant_no_capabilities() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts
        .executables
        .push(exe("/home/alice/find", 0o755, "alice", "alice"));

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();
    let predicates = encoder.predicates();

    assert_eq!(
        facts.executables[0].kind,
        MicronixFileKind::UserExecutable
    );
    assert!(has(predicates, "user_executable", &["home_alice_find"]));
    assert!(!has(predicates, "find_exec", &["home_alice_find"]));
    assert!(!has(predicates, "system_executable", &["home_alice_find"]));
}

#[test]
fn shared_objects_are_neither_system_nor_user_executables() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts.executables.push(exe("/usr/bin/find", 0o755, "root", "root"));
    facts.executables.push(MicronixFile::new(
        "/lib/x86_64-linux-gnu/libc.so.6",
        0o755,
        "root",
        "root",
        "ELF 64-bit LSB shared object",
    ));
    facts.executables[0].so_deps = vec![1];

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();
    let predicates = encoder.predicates();

    let libc = normalize("/lib/x86_64-linux-gnu/libc.so.6");
    assert!(has(predicates, "executable_always_loads_file", &["usr_bin_find", &libc]));
    assert!(!has(predicates, "system_executable", &[&libc]));
    assert!(!has(predicates, "user_executable", &[&libc]));
    assert!(has(predicates, "file_present_at_location", &[&libc, "local"]));
}

#[test]
fn shells_from_passwd_are_systematically_called() {
    let mut facts = base_facts(&["root", "alice"], "alice");
    facts
        .users_shell
        .insert("alice".to_string(), "/bin/bash".to_string());

    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);
    encoder.generate_predicates();

    assert!(has(
        encoder.predicates(),
        "executable_systematically_called_by",
        &["bin_bash", "alice_u"],
    ));
}

#[test]
fn one_problem_per_goal_user_plus_a_trailing_any_user_problem() {
    let facts = base_facts(&["root", "alice", "bob"], "bob");
    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);

    let domain = Domain::from_str_contents("(define (domain micronix))").unwrap();
    let problems = encoder.generate_problems(&domain);

    let names: Vec<&str> = problems.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "micronix-problem-alice",
            "micronix-problem-root",
            "micronix-problem-any_user",
        ]
    );

    let any_user = problems.last().unwrap();
    match &any_user.goal {
        Goal::AnyOf(goals) => {
            let args: Vec<&str> = goals.iter().map(|g| g.args[0].as_str()).collect();
            assert_eq!(args, vec!["alice_u", "root_u"]);
            assert!(goals.iter().all(|g| g.name == "controlled_user"));
        }
        Goal::Atom(_) => panic!("any-user problem must carry a disjunction"),
    }

    for problem in &problems[..problems.len() - 1] {
        match &problem.goal {
            Goal::Atom(goal) => assert_eq!(goal.name, "controlled_user"),
            Goal::AnyOf(_) => panic!("per-user problems carry a single atom goal"),
        }
    }
}

#[test]
fn a_single_goal_user_degenerates_the_disjunction_to_an_atom() {
    let facts = base_facts(&["root", "alice"], "alice");
    let catalog = catalog();
    let mut encoder = Encoder::new(&facts, &catalog);

    let domain = Domain::from_str_contents("(define (domain micronix))").unwrap();
    let problems = encoder.generate_problems(&domain);

    assert_eq!(problems.len(), 2);
    assert_eq!(problems[1].name, "micronix-problem-any_user");
    assert!(matches!(&problems[1].goal, Goal::Atom(goal) if goal.args == vec!["root_u".to_string()]));
}

#[test]
fn singleton_symbols_are_always_declared() {
    let facts = base_facts(&["root", "alice"], "alice");
    let catalog = catalog();
    let encoder = Encoder::new(&facts, &catalog);

    let names: BTreeSet<(&str, &str)> = encoder
        .objects()
        .iter()
        .map(|o| (o.name.as_str(), o.type_name.as_str()))
        .collect();

    assert!(names.contains(&("process", "process")));
    assert!(names.contains(&("data", "data")));
    assert!(names.contains(&("local", "local")));
}
