#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Position of an advice relative to the member it intercepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum AdviceKind {
    Before,
    After,
    Around,
    Read,
    Write,
}

impl AdviceKind {
    /// Read/write advices live in the property partition of the registry.
    pub(crate) fn is_property(self) -> bool {
        matches!(self, AdviceKind::Read | AdviceKind::Write)
    }
}

/// Callable reference an advice dispatches to.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub(crate) struct AdviceTarget {
    pub(crate) class: String,
    pub(crate) method: String,
}

impl AdviceTarget {
    pub(crate) fn new(class: &str, method: &str) -> Self {
        AdviceTarget {
            class: class.to_string(),
            method: method.to_string(),
        }
    }
}

/// One unit of cross-cutting behavior bound to a joinpoint.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct Advice {
    pub(crate) kind: AdviceKind,
    pub(crate) target: AdviceTarget,
    /// Declared parameter names; the call site binds them by name.
    #[serde(default)]
    pub(crate) params: Vec<String>,
}

type MemberMap = BTreeMap<String, BTreeMap<String, Vec<Advice>>>;

/// Append-only joinpoint registry: class or interface name, to member name,
/// to the advices bound there in registration order. Method and property
/// advices are stored in disjoint partitions so a property and a method may
/// share a name without colliding.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct JoinpointRegistry {
    #[serde(default)]
    methods: MemberMap,
    #[serde(default)]
    properties: MemberMap,
}

impl JoinpointRegistry {
    pub(crate) fn new() -> Self {
        JoinpointRegistry::default()
    }

    /// True once any joinpoint has been registered or loaded for this run.
    pub(crate) fn has_joinpoints(&self) -> bool {
        !self.methods.is_empty() || !self.properties.is_empty()
    }

    /// Idempotent insertion: registering the exact same (kind, member,
    /// target) triple twice keeps a single entry.
    pub(crate) fn register(
        &mut self,
        kind: AdviceKind,
        class: &str,
        member: &str,
        target: AdviceTarget,
        params: Vec<String>,
    ) {
        let advice = Advice {
            kind,
            target,
            params,
        };
        let partition = if kind.is_property() {
            &mut self.properties
        } else {
            &mut self.methods
        };
        let advices = partition
            .entry(class.to_string())
            .or_default()
            .entry(member.to_string())
            .or_default();
        if !advices.contains(&advice) {
            advices.push(advice);
        }
    }

    /// All method advices registered directly for a class or interface name.
    pub(crate) fn method_joinpoints(&self, class: &str) -> BTreeMap<String, Vec<Advice>> {
        self.methods.get(class).cloned().unwrap_or_default()
    }

    /// All property advices registered directly for a class name.
    pub(crate) fn property_joinpoints(&self, class: &str) -> BTreeMap<String, Vec<Advice>> {
        self.properties.get(class).cloned().unwrap_or_default()
    }

    /// Advices for one specific member, method partition first.
    pub(crate) fn joinpoint(&self, class: &str, member: &str) -> Vec<Advice> {
        let mut advices = self.method_joinpoint(class, member);
        advices.extend(self.property_joinpoint(class, member));
        advices
    }

    pub(crate) fn method_joinpoint(&self, class: &str, member: &str) -> Vec<Advice> {
        self.methods
            .get(class)
            .and_then(|members| members.get(member))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn property_joinpoint(&self, class: &str, member: &str) -> Vec<Advice> {
        self.properties
            .get(class)
            .and_then(|members| members.get(member))
            .cloned()
            .unwrap_or_default()
    }

    /// Load a registry cache artifact. A missing or corrupt cache is not
    /// fatal: the registry is left as-is and the compiler simply has nothing
    /// to weave. Loading the same artifact twice must not duplicate entries.
    pub(crate) fn load_joinpoints(&mut self, path: &Path) -> Result<bool> {
        if !path.exists() {
            debug!(path = %path.display(), "joinpoint cache not present, starting empty");
            return Ok(false);
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read joinpoint cache {}", path.display()))?;
        let loaded: JoinpointRegistry = match serde_json::from_str(&text) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(path = %path.display(), "joinpoint cache unreadable, starting empty: {err}");
                return Ok(false);
            }
        };
        self.merge_from(loaded);
        Ok(true)
    }

    /// Persist the registry. Failure is surfaced to the caller; already
    /// registered in-memory joinpoints are not rolled back.
    pub(crate) fn save_joinpoints(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create cache directory {}", parent.display())
                })?;
            }
        }
        let mut writer = fs::File::create(path)
            .with_context(|| format!("failed to open joinpoint cache {}", path.display()))?;
        serde_json::to_writer_pretty(&mut writer, self)
            .context("failed to serialize joinpoint cache")?;
        writer
            .write_all(b"\n")
            .context("failed to write joinpoint cache")?;
        Ok(())
    }

    /// Recursive merge keyed by class name, deduplicating identical advices.
    fn merge_from(&mut self, other: JoinpointRegistry) {
        merge_partition(&mut self.methods, other.methods);
        merge_partition(&mut self.properties, other.properties);
    }
}

fn merge_partition(into: &mut MemberMap, from: MemberMap) {
    for (class, members) in from {
        let class_entry = into.entry(class).or_default();
        for (member, advices) in members {
            let member_entry = class_entry.entry(member).or_default();
            for advice in advices {
                if !member_entry.contains(&advice) {
                    member_entry.push(advice);
                }
            }
        }
    }
}
