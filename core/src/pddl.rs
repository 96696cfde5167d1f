//! Minimal PDDL problem model and pretty-printer.
//!
//! Only what the encoder needs: typed ground objects, ground atoms, a goal
//! that is either an atom or a disjunction, and a deterministic rendition of
//! the assembled problem. The reference domain file is parsed for its name
//! alone; its actions and predicate declarations stay with the planner.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::error::MicronixErr;
use crate::error::Result;

/// A typed ground symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Object {
    pub name: String,
    pub type_name: String,
}

/// A ground atom over object names and domain constants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Predicate {
    pub name: String,
    pub args: Vec<String>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "({})", self.name)
        } else {
            write!(f, "({} {})", self.name, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Goal {
    Atom(Predicate),
    AnyOf(Vec<Predicate>),
}

/// A complete planning problem over a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub name: String,
    pub domain: String,
    pub objects: BTreeSet<Object>,
    pub init: BTreeSet<Predicate>,
    pub goal: Goal,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "(define (problem {})", self.name)?;
        writeln!(f, "    (:domain {})", self.domain)?;

        writeln!(f, "    (:objects")?;
        let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for object in &self.objects {
            by_type
                .entry(object.type_name.as_str())
                .or_default()
                .push(object.name.as_str());
        }
        for (type_name, names) in by_type {
            writeln!(f, "        {} - {type_name}", names.join(" "))?;
        }
        writeln!(f, "    )")?;

        writeln!(f, "    (:init")?;
        for predicate in &self.init {
            writeln!(f, "        {predicate}")?;
        }
        writeln!(f, "    )")?;

        match &self.goal {
            Goal::Atom(predicate) => writeln!(f, "    (:goal {predicate})")?,
            Goal::AnyOf(predicates) => {
                writeln!(f, "    (:goal (or")?;
                for predicate in predicates {
                    writeln!(f, "        {predicate}")?;
                }
                writeln!(f, "    ))")?;
            }
        }

        write!(f, ")")
    }
}

static DOMAIN_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"\(\s*domain\s+(?P<name>[A-Za-z][A-Za-z0-9_-]*)\s*\)").unwrap();
    re
});

/// The reference planning domain, reduced to its declared name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
}

impl Domain {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| MicronixErr::Domain(format!("{}: {e}", path.display())))?;
        Self::from_str_contents(&raw)
    }

    pub fn from_str_contents(raw: &str) -> Result<Self> {
        let Some(caps) = DOMAIN_NAME_RE.captures(raw) else {
            return Err(MicronixErr::Domain(
                "no (domain <name>) declaration found".to_string(),
            ));
        };

        Ok(Self {
            name: caps["name"].to_string(),
        })
    }
}
