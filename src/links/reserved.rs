use std::collections::BTreeSet;

/// Paths owned by the service itself, never usable as shortcodes
pub const BUILTIN_RESERVED_PATHS: &[&str] = &[
    "api",
    "health",
    "admin",
    "login",
    "logout",
    "auth",
    "static",
    "assets",
    "favicon.ico",
    "robots.txt",
    "sitemap.xml",
    "meta",
    "dashboard",
    "settings",
    "password",
    "_next",
];

/// Case-insensitive reserved shortcode set, built once at startup
#[derive(Debug, Clone)]
pub struct ReservedPaths {
    paths: BTreeSet<String>,
}

impl ReservedPaths {
    pub fn new(extra: &[String]) -> Self {
        let paths = BUILTIN_RESERVED_PATHS
            .iter()
            .map(|p| p.to_string())
            .chain(extra.iter().map(|p| p.trim().trim_matches('/').to_string()))
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect();
        Self { paths }
    }

    pub fn contains(&self, shortcode: &str) -> bool {
        self.paths.contains(&shortcode.to_lowercase())
    }

    /// Sorted list for clients doing their own validation
    pub fn list(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }
}

impl Default for ReservedPaths {
    fn default() -> Self {
        Self::new(&[])
    }
}
