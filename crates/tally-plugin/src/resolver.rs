// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dependency graph resolution.
//!
//! Resolution runs in two phases. Selection picks, for every plugin reachable
//! from the root, the highest version satisfying all constraints placed on it
//! and repeats until the selection is stable. Ordering then builds an arena
//! graph over the selected manifests and runs a colored depth-first search that
//! reports the full path of any cycle and emits a leaves-first install plan.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use semver::Version;
use serde::Serialize;
use tally_core::TallyError;
use thiserror::Error;
use tracing::debug;

use crate::manifest::PluginManifest;
use crate::version::{VersionConstraint, resolve_version};

/// Upper bound on selection rounds before giving up.
const MAX_SELECTION_ROUNDS: usize = 64;

/// Source of candidate manifests for dependency resolution.
pub trait ManifestCatalog {
    /// Every known manifest for `name`, any order.
    fn versions(&self, name: &str) -> Vec<&PluginManifest>;
}

impl ManifestCatalog for BTreeMap<String, Vec<PluginManifest>> {
    fn versions(&self, name: &str) -> Vec<&PluginManifest> {
        self.get(name).map(|v| v.iter().collect()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("conflicting constraints on `{dependency}`: {}", describe(requirements))]
    Conflict {
        dependency: String,
        requirements: Vec<(String, String)>,
    },

    #[error("`{dependency}` is required by `{required_by}` but no manifest is available")]
    Missing {
        dependency: String,
        required_by: String,
    },

    #[error("no version of `{name}` satisfies {constraint} (available: {})", available.join(", "))]
    Unsatisfiable {
        name: String,
        constraint: String,
        available: Vec<String>,
    },

    #[error(
        "installed `{dependency}` {installed} does not satisfy {constraint} \
         required by `{required_by}`"
    )]
    InstalledConflict {
        dependency: String,
        installed: String,
        constraint: String,
        required_by: String,
    },

    #[error("`{plugin}` declares an invalid constraint on `{dependency}`: {reason}")]
    InvalidConstraint {
        plugin: String,
        dependency: String,
        reason: String,
    },

    #[error("dependency selection did not settle after {rounds} rounds")]
    NoConvergence { rounds: usize },
}

impl From<ResolveError> for TallyError {
    fn from(err: ResolveError) -> Self {
        TallyError::Resolution {
            message: err.to_string(),
        }
    }
}

fn describe(requirements: &[(String, String)]) -> String {
    requirements
        .iter()
        .map(|(by, c)| format!("{by} requires {c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pick the highest version of `name` satisfying `constraint`.
pub fn resolve(
    name: &str,
    constraint: &VersionConstraint,
    available: &[Version],
) -> Result<Version, ResolveError> {
    resolve_version(constraint, available)
        .cloned()
        .ok_or_else(|| ResolveError::Unsatisfiable {
            name: name.to_string(),
            constraint: constraint.to_string(),
            available: available.iter().map(ToString::to_string).collect(),
        })
}

/// A leaves-first install plan. The root is the last step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallPlan {
    pub steps: Vec<PluginManifest>,
    /// Dependencies already installed at a satisfying version.
    pub satisfied: Vec<(String, String)>,
    /// Dropped optional dependencies and similar notes.
    pub warnings: Vec<String>,
}

impl InstallPlan {
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|m| m.name.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
struct Requirement {
    by: String,
    raw: String,
    constraint: VersionConstraint,
    optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Selection<'a> {
    Manifest(&'a PluginManifest),
    Installed(Version),
}

/// Resolve the dependency graph of `root` into an install plan.
///
/// `installed` maps plugin names to versions already present; those satisfy
/// requirements without being reinstalled.
pub fn resolve_graph(
    root: &PluginManifest,
    catalog: &dyn ManifestCatalog,
    installed: &BTreeMap<String, Version>,
) -> Result<InstallPlan, ResolveError> {
    let mut warnings = Vec::new();
    let selected = select(root, catalog, installed, &mut warnings)?;
    order(root, &selected, warnings)
}

fn select<'a>(
    root: &'a PluginManifest,
    catalog: &'a dyn ManifestCatalog,
    installed: &BTreeMap<String, Version>,
    warnings: &mut Vec<String>,
) -> Result<BTreeMap<String, Selection<'a>>, ResolveError> {
    let mut selected: BTreeMap<String, Selection<'a>> = BTreeMap::new();
    selected.insert(root.name.clone(), Selection::Manifest(root));

    for round in 0..MAX_SELECTION_ROUNDS {
        let requirements = collect_requirements(root, &selected)?;
        let mut next: BTreeMap<String, Selection<'a>> = BTreeMap::new();
        next.insert(root.name.clone(), Selection::Manifest(root));
        let mut round_warnings = Vec::new();

        for (name, reqs) in &requirements {
            if *name == root.name {
                continue;
            }
            if let Some(choice) = choose(name, reqs, catalog, installed, &mut round_warnings)? {
                next.insert(name.clone(), choice);
            }
        }

        if next == selected {
            debug!(root = %root.name, rounds = round + 1, "dependency selection settled");
            warnings.extend(round_warnings);
            return Ok(selected);
        }
        selected = next;
    }

    Err(ResolveError::NoConvergence {
        rounds: MAX_SELECTION_ROUNDS,
    })
}

/// Requirements placed by manifests reachable from the root through the
/// current selection. Unreachable selections contribute nothing.
fn collect_requirements(
    root: &PluginManifest,
    selected: &BTreeMap<String, Selection<'_>>,
) -> Result<BTreeMap<String, Vec<Requirement>>, ResolveError> {
    let mut requirements: BTreeMap<String, Vec<Requirement>> = BTreeMap::new();
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::from([root.name.clone()]);

    while let Some(name) = queue.pop_front() {
        if !visited.insert(name.clone()) {
            continue;
        }
        let Some(Selection::Manifest(manifest)) = selected.get(&name) else {
            continue;
        };
        for dep in &manifest.requirements.dependencies {
            let constraint =
                VersionConstraint::parse(&dep.version).map_err(|e| ResolveError::InvalidConstraint {
                    plugin: manifest.name.clone(),
                    dependency: dep.name.clone(),
                    reason: e.reason,
                })?;
            requirements.entry(dep.name.clone()).or_default().push(Requirement {
                by: manifest.name.clone(),
                raw: dep.version.clone(),
                constraint,
                optional: dep.optional,
            });
            queue.push_back(dep.name.clone());
        }
    }

    Ok(requirements)
}

fn choose<'a>(
    name: &str,
    reqs: &[Requirement],
    catalog: &'a dyn ManifestCatalog,
    installed: &BTreeMap<String, Version>,
    warnings: &mut Vec<String>,
) -> Result<Option<Selection<'a>>, ResolveError> {
    let required: Vec<&Requirement> = reqs.iter().filter(|r| !r.optional).collect();
    let optional: Vec<&Requirement> = reqs.iter().filter(|r| r.optional).collect();
    let binding: &[&Requirement] = if required.is_empty() { &optional } else { &required };

    if let Some(version) = installed.get(name) {
        if binding.iter().all(|r| r.constraint.matches(version)) {
            return Ok(Some(Selection::Installed(version.clone())));
        }
        return match required.iter().find(|r| !r.constraint.matches(version)) {
            Some(r) => Err(ResolveError::InstalledConflict {
                dependency: name.to_string(),
                installed: version.to_string(),
                constraint: r.raw.clone(),
                required_by: r.by.clone(),
            }),
            None => {
                warnings.push(drop_warning(name, &optional, "installed version does not match"));
                Ok(None)
            }
        };
    }

    let candidates: Vec<(Version, &'a PluginManifest)> = catalog
        .versions(name)
        .into_iter()
        .filter_map(|m| m.semver().ok().map(|v| (v, m)))
        .collect();

    if candidates.is_empty() {
        return match required.first() {
            Some(r) => Err(ResolveError::Missing {
                dependency: name.to_string(),
                required_by: r.by.clone(),
            }),
            None => {
                warnings.push(drop_warning(name, &optional, "no manifest available"));
                Ok(None)
            }
        };
    }

    let best = candidates
        .iter()
        .filter(|(v, _)| binding.iter().all(|r| r.constraint.matches(v)))
        .max_by(|a, b| a.0.cmp(&b.0));

    if let Some((version, manifest)) = best {
        for r in &optional {
            if !required.is_empty() && !r.constraint.matches(version) {
                warnings.push(format!(
                    "optional requirement {} on `{name}` from `{}` \
                     is not met by selected {version}",
                    r.raw, r.by
                ));
            }
        }
        return Ok(Some(Selection::Manifest(*manifest)));
    }

    if required.is_empty() {
        warnings.push(drop_warning(name, &optional, "no version satisfies the constraints"));
        return Ok(None);
    }

    let versions: Vec<Version> = candidates.iter().map(|(v, _)| v.clone()).collect();
    if let Some(r) = required
        .iter()
        .find(|r| resolve_version(&r.constraint, &versions).is_none())
    {
        let mut available: Vec<&Version> = versions.iter().collect();
        available.sort();
        return Err(ResolveError::Unsatisfiable {
            name: name.to_string(),
            constraint: r.raw.clone(),
            available: available.into_iter().map(ToString::to_string).collect(),
        });
    }

    Err(ResolveError::Conflict {
        dependency: name.to_string(),
        requirements: required
            .iter()
            .map(|r| (r.by.clone(), r.raw.clone()))
            .collect(),
    })
}

fn drop_warning(name: &str, optional: &[&Requirement], reason: &str) -> String {
    let by: Vec<&str> = optional.iter().map(|r| r.by.as_str()).collect();
    format!(
        "dropped optional dependency `{name}` (wanted by {}): {reason}",
        by.join(", ")
    )
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

struct Node<'a> {
    manifest: &'a PluginManifest,
    edges: Vec<usize>,
}

fn order(
    root: &PluginManifest,
    selected: &BTreeMap<String, Selection<'_>>,
    warnings: Vec<String>,
) -> Result<InstallPlan, ResolveError> {
    let mut arena: Vec<Node<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut satisfied = Vec::new();

    for (name, selection) in selected {
        match selection {
            Selection::Manifest(m) => {
                index.insert(name.as_str(), arena.len());
                arena.push(Node {
                    manifest: m,
                    edges: Vec::new(),
                });
            }
            Selection::Installed(v) => satisfied.push((name.clone(), v.to_string())),
        }
    }

    for i in 0..arena.len() {
        let mut edges: Vec<usize> = arena[i]
            .manifest
            .requirements
            .dependencies
            .iter()
            .filter_map(|d| index.get(d.name.as_str()).copied())
            .collect();
        edges.sort_unstable();
        edges.dedup();
        arena[i].edges = edges;
    }

    let Some(&root_idx) = index.get(root.name.as_str()) else {
        return Ok(InstallPlan::default());
    };

    let mut color = vec![Color::White; arena.len()];
    let mut stack = Vec::new();
    let mut postorder = Vec::new();
    visit(root_idx, &arena, &mut color, &mut stack, &mut postorder)?;

    Ok(InstallPlan {
        steps: postorder.into_iter().map(|i| arena[i].manifest.clone()).collect(),
        satisfied,
        warnings,
    })
}

fn visit(
    node: usize,
    arena: &[Node<'_>],
    color: &mut [Color],
    stack: &mut Vec<usize>,
    postorder: &mut Vec<usize>,
) -> Result<(), ResolveError> {
    color[node] = Color::Gray;
    stack.push(node);

    for &next in &arena[node].edges {
        match color[next] {
            Color::White => visit(next, arena, color, stack, postorder)?,
            Color::Gray => {
                let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut path: Vec<String> = stack[start..]
                    .iter()
                    .map(|&n| arena[n].manifest.name.clone())
                    .collect();
                path.push(arena[next].manifest.name.clone());
                return Err(ResolveError::Cycle { path });
            }
            Color::Black => {}
        }
    }

    stack.pop();
    color[node] = Color::Black;
    postorder.push(node);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DependencyDecl;

    fn manifest(name: &str, version: &str, deps: &[(&str, &str, bool)]) -> PluginManifest {
        let mut m = crate::manifest::parse_manifest(crate::manifest::fixtures::VALID_TOML).unwrap();
        m.name = name.to_string();
        m.version = version.to_string();
        m.requirements.dependencies = deps
            .iter()
            .map(|(n, c, optional)| DependencyDecl {
                name: n.to_string(),
                version: c.to_string(),
                optional: *optional,
            })
            .collect();
        m
    }

    fn catalog(manifests: Vec<PluginManifest>) -> BTreeMap<String, Vec<PluginManifest>> {
        let mut map: BTreeMap<String, Vec<PluginManifest>> = BTreeMap::new();
        for m in manifests {
            map.entry(m.name.clone()).or_default().push(m);
        }
        map
    }

    #[test]
    fn leaves_install_first() {
        let root = manifest("app", "1.0.0", &[("b", "^1", false), ("c", "^1", false)]);
        let cat = catalog(vec![
            manifest("b", "1.0.0", &[("d", "^1", false)]),
            manifest("c", "1.0.0", &[("d", "^1", false)]),
            manifest("d", "1.0.0", &[]),
        ]);
        let plan = resolve_graph(&root, &cat, &BTreeMap::new()).unwrap();
        assert_eq!(plan.names(), vec!["d", "b", "c", "app"]);
    }

    #[test]
    fn picks_latest_compatible() {
        let root = manifest("app", "1.0.0", &[("b", "^1.2", false)]);
        let cat = catalog(vec![
            manifest("b", "1.2.0", &[]),
            manifest("b", "1.3.0", &[]),
            manifest("b", "1.2.5", &[]),
            manifest("b", "2.0.0", &[]),
        ]);
        let plan = resolve_graph(&root, &cat, &BTreeMap::new()).unwrap();
        assert_eq!(plan.steps[0].version, "1.3.0");
    }

    #[test]
    fn cycle_reports_full_path() {
        let root = manifest("a", "1.0.0", &[("b", "*", false)]);
        let cat = catalog(vec![
            manifest("b", "1.0.0", &[("c", "*", false)]),
            manifest("c", "1.0.0", &[("a", "*", false)]),
        ]);
        let err = resolve_graph(&root, &cat, &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::Cycle {
                path: vec!["a".into(), "b".into(), "c".into(), "a".into()]
            }
        );
    }

    #[test]
    fn conflicting_constraints_name_both_requirers() {
        let root = manifest("app", "1.0.0", &[("b", "*", false), ("c", "*", false)]);
        let cat = catalog(vec![
            manifest("b", "1.0.0", &[("shared", "^1", false)]),
            manifest("c", "1.0.0", &[("shared", "^2", false)]),
            manifest("shared", "1.4.0", &[]),
            manifest("shared", "2.1.0", &[]),
        ]);
        let err = resolve_graph(&root, &cat, &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::Conflict {
                dependency: "shared".into(),
                requirements: vec![("b".into(), "^1".into()), ("c".into(), "^2".into())],
            }
        );
    }

    #[test]
    fn missing_required_dependency() {
        let root = manifest("app", "1.0.0", &[("ghost", "^1", false)]);
        let err = resolve_graph(&root, &catalog(vec![]), &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::Missing {
                dependency: "ghost".into(),
                required_by: "app".into(),
            }
        );
    }

    #[test]
    fn unsatisfiable_single_constraint() {
        let root = manifest("app", "1.0.0", &[("b", "^3", false)]);
        let cat = catalog(vec![manifest("b", "1.0.0", &[]), manifest("b", "2.0.0", &[])]);
        let err = resolve_graph(&root, &cat, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ResolveError::Unsatisfiable { ref name, .. } if name == "b"));
        assert!(err.to_string().contains("1.0.0, 2.0.0"));
    }

    #[test]
    fn optional_dependency_dropped_with_warning() {
        let root = manifest("app", "1.0.0", &[("extra", "^1", true), ("b", "^1", false)]);
        let cat = catalog(vec![manifest("b", "1.0.0", &[])]);
        let plan = resolve_graph(&root, &cat, &BTreeMap::new()).unwrap();
        assert_eq!(plan.names(), vec!["b", "app"]);
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("extra"));
    }

    #[test]
    fn installed_dependency_is_skipped() {
        let root = manifest("app", "1.0.0", &[("b", "^1", false)]);
        let cat = catalog(vec![manifest("b", "1.5.0", &[])]);
        let installed = BTreeMap::from([("b".to_string(), Version::new(1, 2, 0))]);
        let plan = resolve_graph(&root, &cat, &installed).unwrap();
        assert_eq!(plan.names(), vec!["app"]);
        assert_eq!(plan.satisfied, vec![("b".to_string(), "1.2.0".to_string())]);
    }

    #[test]
    fn installed_dependency_too_old() {
        let root = manifest("app", "1.0.0", &[("b", "^2", false)]);
        let installed = BTreeMap::from([("b".to_string(), Version::new(1, 2, 0))]);
        let err = resolve_graph(&root, &catalog(vec![]), &installed).unwrap_err();
        assert!(matches!(err, ResolveError::InstalledConflict { .. }));
    }

    #[test]
    fn stale_selection_dependencies_are_pruned() {
        // b@2 depends on gone; b@1 does not. A second requirer narrows b to ^1,
        // so gone must not appear in the plan.
        let root = manifest("app", "1.0.0", &[("b", "*", false), ("c", "*", false)]);
        let cat = catalog(vec![
            manifest("b", "1.0.0", &[]),
            manifest("b", "2.0.0", &[("gone", "*", false)]),
            manifest("c", "1.0.0", &[("b", "^1", false)]),
            manifest("gone", "1.0.0", &[]),
        ]);
        let plan = resolve_graph(&root, &cat, &BTreeMap::new()).unwrap();
        assert_eq!(plan.names(), vec!["b", "c", "app"]);
    }

    #[test]
    fn resolve_single_name() {
        let available = [Version::new(1, 2, 0), Version::new(1, 3, 0), Version::new(1, 2, 5)];
        let c = VersionConstraint::parse("^1.2").unwrap();
        assert_eq!(resolve("b", &c, &available).unwrap(), Version::new(1, 3, 0));
        let c = VersionConstraint::parse("^4").unwrap();
        assert!(resolve("b", &c, &available).is_err());
    }
}
