//! Known variants and starter selection
//!
//! A variant name is either a start-page preset (several presets can be
//! combined with `_`), an archetype/initializer name, or a demo repository.
//! Demos accept `name:branch` and `org/repo/sub/path`; any variant may carry a
//! `_jdkNN` suffix requesting a specific JDK.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

const PRESETS: &[&str] = &[
    "latest-java",
    "latest-java-top",
    "latest-java_partial-auth",
    "flow-crm-tutorial",
    "react",
    "react-crm-tutorial",
    "react-tutorial",
    "test-hybrid-react",
    "default",
    "latest-java_partial-auth_partial-prerelease",
    "archetype-hotswap",
    "archetype-jetty",
    "archetype-spring",
    "vaadin-quarkus",
    "hilla-react-cli",
    "initializer-vaadin-maven-react",
    "initializer-vaadin-maven-flow",
    "initializer-vaadin-gradle-react",
    "initializer-vaadin-gradle-flow",
    "collaboration",
];

const DEMOS: &[&str] = &[
    "control-center",
    "skeleton-starter-flow",
    "skeleton-starter-flow-spring",
    "skeleton-starter-hilla-react",
    "skeleton-starter-hilla-react-gradle",
    "skeleton-starter-flow-cdi",
    "skeleton-starter-hilla-lit",
    "skeleton-starter-hilla-lit-gradle",
    "skeleton-starter-kotlin-spring",
    "business-app-starter-flow",
    "base-starter-spring-gradle",
    "base-starter-flow-quarkus",
    "base-starter-gradle",
    "flow-crm-tutorial",
    "hilla-crm-tutorial",
    "hilla-quickstart-tutorial",
    "hilla-basics-tutorial",
    "flow-quickstart-tutorial",
    "addon-template",
    "npm-addon-template",
    "client-server-addon-template",
    "spreadsheet-demo",
    "vaadin-form-example",
    "vaadin-rest-example",
    "releases-graph",
    "form-filler-demo",
    "mpr-demo",
];

const DEFAULT_ORG: &str = "vaadin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    /// Generated from a preset, archetype or initializer
    Preset,
    /// Checked out from a git repository
    Demo,
}

/// A resolved project to validate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variant {
    /// Name as selected, including any branch or JDK suffix
    pub name: String,
    /// Name with the JDK suffix and branch removed
    pub base: String,
    pub kind: VariantKind,
    /// Presets combined into this variant (presets only)
    pub presets: Vec<String>,
    /// `org/repo` (demos only)
    pub repository: Option<String>,
    pub branch: Option<String>,
    /// Sub-directory of the repository holding the project
    pub sub_path: Option<String>,
    /// Requested JDK major version
    pub jdk: Option<u32>,
}

impl Variant {
    /// Resolve a selected name against the catalog
    pub fn parse(name: &str, catalog: &Catalog) -> Self {
        let (stripped, jdk) = split_jdk(name);
        let (without_branch, branch) = match stripped.split_once(':') {
            Some((n, b)) if !b.is_empty() => (n.to_string(), Some(b.to_string())),
            Some((n, _)) => (n.to_string(), None),
            None => (stripped.clone(), None),
        };

        if catalog.is_demo(&without_branch) {
            let parts: Vec<&str> = without_branch.split('/').collect();
            let (repository, sub_path) = match parts.as_slice() {
                [repo] => (format!("{}/{}", DEFAULT_ORG, repo), None),
                [org, repo] => (format!("{}/{}", org, repo), None),
                [org, repo, rest @ ..] => (format!("{}/{}", org, repo), Some(rest.join("/"))),
                [] => (format!("{}/{}", DEFAULT_ORG, without_branch), None),
            };
            Variant {
                name: name.to_string(),
                base: without_branch,
                kind: VariantKind::Demo,
                presets: Vec::new(),
                repository: Some(repository),
                branch,
                sub_path,
                jdk,
            }
        } else {
            Variant {
                name: name.to_string(),
                presets: without_branch.split('_').map(str::to_string).collect(),
                base: without_branch,
                kind: VariantKind::Preset,
                repository: None,
                branch,
                sub_path: None,
                jdk,
            }
        }
    }

    /// Directory name under the work dir
    pub fn folder(&self) -> String {
        match self.kind {
            VariantKind::Preset => self.base.replace('_', "-"),
            VariantKind::Demo => self
                .repository
                .as_deref()
                .and_then(|r| r.rsplit('/').next())
                .unwrap_or(&self.base)
                .to_string(),
        }
    }

    /// Where the buildable project lives once prepared
    pub fn project_dir(&self, work_dir: &Path) -> PathBuf {
        let dir = work_dir.join(self.folder());
        match &self.sub_path {
            Some(sub) => dir.join(sub),
            None => dir,
        }
    }

    pub fn is_demo(&self) -> bool {
        self.kind == VariantKind::Demo
    }

    pub fn is_archetype(&self) -> bool {
        self.base.starts_with("archetype")
    }

    pub fn is_initializer(&self) -> bool {
        self.base.starts_with("initializer")
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn split_jdk(name: &str) -> (String, Option<u32>) {
    if let Some(idx) = name.rfind("_jdk") {
        let digits = &name[idx + 4..];
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return (name[..idx].to_string(), digits.parse().ok());
        }
    }
    (name.to_string(), None)
}

/// The set of variants the harness knows how to prepare
#[derive(Debug, Clone)]
pub struct Catalog {
    presets: Vec<String>,
    demos: Vec<String>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(
            PRESETS.iter().map(|s| s.to_string()).collect(),
            DEMOS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl Catalog {
    pub fn new(presets: Vec<String>, demos: Vec<String>) -> Self {
        Self { presets, demos }
    }

    pub fn presets(&self) -> &[String] {
        &self.presets
    }

    pub fn demos(&self) -> &[String] {
        &self.demos
    }

    /// Same catalog restricted to demos
    pub fn only_demos(&self) -> Self {
        Self::new(Vec::new(), self.demos.clone())
    }

    /// Same catalog restricted to generated presets
    pub fn only_presets(&self) -> Self {
        Self::new(self.presets.clone(), Vec::new())
    }

    /// Every variant, presets first
    pub fn all(&self) -> Vec<String> {
        self.presets.iter().chain(self.demos.iter()).cloned().collect()
    }

    /// Whether a name (possibly with branch or JDK suffix) can be prepared
    pub fn is_known(&self, name: &str) -> bool {
        let base = base_name(name);
        self.presets.contains(&base) || self.is_demo(&base)
    }

    fn is_demo(&self, base: &str) -> bool {
        // arbitrary org/repo paths are always treated as demos
        base.contains('/') || (self.demos.iter().any(|d| d == base) && !self.presets.iter().any(|p| p == base))
    }

    /// Expand a comma-separated selection against the catalog.
    ///
    /// Entries starting with `!` exclude every selected name containing the
    /// rest of the entry. With no inclusions the whole catalog is selected.
    pub fn compute_variants(&self, selection: &str) -> Vec<String> {
        let entries: Vec<&str> = selection.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();

        let excluded: Vec<&str> = entries
            .iter()
            .filter_map(|e| e.strip_prefix('!'))
            .filter(|e| !e.is_empty())
            .collect();
        let included: Vec<String> = entries
            .iter()
            .filter(|e| !e.starts_with('!'))
            .map(|e| e.to_string())
            .collect();

        let base = if included.is_empty() { self.all() } else { included };

        let mut selected: Vec<String> = Vec::with_capacity(base.len());
        for name in base {
            if excluded.iter().any(|x| name.contains(x)) || selected.contains(&name) {
                continue;
            }
            selected.push(name);
        }
        selected
    }

    /// Resolve a selection into variants
    pub fn resolve(&self, selection: &str) -> Vec<Variant> {
        self.compute_variants(selection)
            .iter()
            .map(|n| Variant::parse(n, self))
            .collect()
    }
}

fn base_name(name: &str) -> String {
    let (stripped, _) = split_jdk(name);
    match stripped.split_once(':') {
        Some((n, _)) => n.to_string(),
        None => stripped,
    }
}
