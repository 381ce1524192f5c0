use std::path::{Component, Path};

pub const DEFAULT_EXCLUSIONS: [&str; 8] = [
    "/var/cache/",
    "/cache/",
    "/var/logs/",
    "/log/",
    "/vendor/",
    "/.git/",
    "/.svn/",
    "/.hg/",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRuleSet {
    fragments: Vec<String>,
}

impl Default for ExclusionRuleSet {
    fn default() -> Self {
        Self {
            fragments: DEFAULT_EXCLUSIONS
                .iter()
                .map(|fragment| fragment.to_string())
                .collect(),
        }
    }
}

impl ExclusionRuleSet {
    pub fn for_self_module(self_module: Option<&str>) -> Self {
        let mut rules = Self::default();
        if let Some(name) = self_module.map(str::trim).filter(|name| !name.is_empty()) {
            rules.fragments.push(format!("/modules/{name}/"));
        }
        rules
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        let Some(normalized) = normalize(relative, is_dir) else {
            return false;
        };
        self.fragments
            .iter()
            .any(|fragment| normalized.contains(fragment.as_str()))
    }
}

fn normalize(relative: &Path, is_dir: bool) -> Option<String> {
    let segments = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>();
    if segments.is_empty() {
        return None;
    }
    let mut normalized = format!("/{}", segments.join("/"));
    if is_dir {
        normalized.push('/');
    }
    Some(normalized)
}
