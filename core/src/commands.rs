//! Templates for the shell commands the extractor drives over the transport.
//!
//! Every path interpolated into a template must first go through [`quote`];
//! paths that cannot be safely batched (see [`batchable`]) are dropped by the
//! callers before quoting.

use std::borrow::Cow;

/// Directories in which executables are enumerated.
pub(crate) const POI_BINARIES_DIRS: &[&str] = &[
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/usr/local/sbin",
    "/usr/local/bin",
    "/opt",
    "/home",
];

/// Seconds granted to a version probe before the remote `timeout` kills it.
pub(crate) const VERSION_PROBE_TIMEOUT_SECS: u64 = 2;

pub(crate) fn find_executables(dir: &str) -> String {
    format!(r"find {dir} -xdev -type f -executable -exec readlink -f {{}} \; 2>/dev/null")
}

pub(crate) fn dump_so_deps(exes: &str) -> String {
    format!("ldd {exes} 2>/dev/null")
}

pub(crate) fn resolve_paths(paths: &str) -> String {
    format!("readlink -m {paths} 2>&1")
}

pub(crate) fn writable_files(root: &str) -> String {
    format!(
        r"find {root} -xdev -type f -writable -not -user $(whoami) -exec readlink -f {{}} \; 2>/dev/null"
    )
}

pub(crate) fn writable_directories(root: &str) -> String {
    format!(
        r"find {root} -xdev -type d -writable -not -user $(whoami) -exec readlink -f {{}} \; 2>/dev/null"
    )
}

pub(crate) fn setugid_files(root: &str) -> String {
    format!(r"find {root} -xdev \( -perm -4000 -o -perm -2000 \) -exec readlink -f {{}} \; 2>/dev/null")
}

pub(crate) fn list_users() -> String {
    "cat /etc/passwd | cut -d : -f1 2>/dev/null".to_string()
}

pub(crate) fn list_groups() -> String {
    "cat /etc/group 2>/dev/null".to_string()
}

pub(crate) fn read_crontab() -> String {
    "cat /etc/crontab 2>/dev/null".to_string()
}

pub(crate) fn stat_files(files: &str) -> String {
    format!("stat {files} -c '%F:%n:%a:%U:%G' 2>/dev/null")
}

pub(crate) fn file_files(files: &str) -> String {
    format!("file {files} 2>/dev/null")
}

pub(crate) fn find_file(root: &str, expr: &str) -> String {
    format!(r"find {root} -xdev -type f {expr} -exec readlink -f {{}} \; 2>/dev/null")
}

pub(crate) fn cat_file(path: &str) -> String {
    format!("cat {path}")
}

pub(crate) fn list_systemd_services() -> String {
    r#"find /etc/systemd -iname "*.service" -exec readlink -f {} \; 2>/dev/null"#.to_string()
}

pub(crate) fn executable_version(executable: &str, version_command: &str) -> String {
    format!("timeout {VERSION_PROBE_TIMEOUT_SECS}s {executable} {version_command}")
}

/// Quote a path for interpolation into a remote command line. `None` when the
/// path cannot be represented (embedded NUL).
pub(crate) fn quote(path: &str) -> Option<Cow<'_, str>> {
    shlex::try_quote(path).ok()
}

/// Whether a path may take part in a batched `file`/`stat` invocation.
/// Apostrophes and whitespace would break the batch apart, so those paths are
/// silently dropped.
pub(crate) fn batchable(path: &str) -> bool {
    !path.contains('\'') && !path.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_shell_metacharacters() {
        assert_eq!(quote("/usr/bin/find").as_deref(), Some("/usr/bin/find"));
        assert_eq!(
            quote("/srv/a b").as_deref(),
            Some("'/srv/a b'"),
        );
    }

    #[test]
    fn batchable_rejects_apostrophes_and_whitespace() {
        assert!(batchable("/usr/bin/find"));
        assert!(!batchable("/srv/o'brien"));
        assert!(!batchable("/srv/with space"));
        assert!(!batchable("/srv/with\ttab"));
    }

    #[test]
    fn version_probe_is_bounded() {
        assert_eq!(
            executable_version("/usr/bin/sudo", "--version"),
            "timeout 2s /usr/bin/sudo --version"
        );
    }
}
