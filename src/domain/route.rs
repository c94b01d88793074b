//! Routes and the file layout they map to under the export root.
//!
//! A route is always stored in normalised form: a leading `/`, no trailing
//! slash (except for the root itself) and no empty, `.` or `..` segments.
//! Normalisation is what makes the output-path convention collision-free:
//! two distinct normalised routes never share an `index.html`.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
};

use super::error::DomainError;

const INDEX_FILE: &str = "index.html";
const NOT_FOUND_FILE: &str = "404.html";

/// A normalised, `/`-prefixed page path such as `/` or `/about`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route(String);

impl Route {
    /// The site root, `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Validate and normalise a configured route string.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if !trimmed.starts_with('/') {
            return Err(DomainError::validation(format!(
                "route `{raw}` must start with `/`"
            )));
        }

        if let Some(ch) = trimmed
            .chars()
            .find(|ch| matches!(ch, '?' | '#' | '\\') || ch.is_whitespace() || ch.is_control())
        {
            return Err(DomainError::validation(format!(
                "route `{raw}` contains unsupported character `{}`",
                ch.escape_default()
            )));
        }

        let body = trimmed
            .strip_suffix('/')
            .filter(|rest| !rest.is_empty())
            .unwrap_or(trimmed);
        if body == "/" {
            return Ok(Self::root());
        }

        for segment in body.split('/').skip(1) {
            if segment.is_empty() {
                return Err(DomainError::validation(format!(
                    "route `{raw}` contains an empty path segment"
                )));
            }
            if segment == "." || segment == ".." {
                return Err(DomainError::validation(format!(
                    "route `{raw}` must not contain relative segments"
                )));
            }
        }

        Ok(Self(body.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments below the root; empty for `/`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// `index.html` for the root, `x/index.html` for `/x`, relative to the export root.
    pub fn index_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        for segment in self.segments() {
            path.push(segment);
        }
        path.push(INDEX_FILE);
        path
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, duplicate-free list of routes to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteList {
    routes: Vec<Route>,
}

impl RouteList {
    pub fn new<I, S>(raw: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut routes = Vec::new();

        for value in raw {
            let route = Route::parse(value.as_ref())?;
            if !seen.insert(route.clone()) {
                return Err(DomainError::validation(format!(
                    "route `{}` is listed more than once (normalised to `{route}`)",
                    value.as_ref().trim()
                )));
            }
            routes.push(route);
        }

        if routes.is_empty() {
            return Err(DomainError::validation("route list must not be empty"));
        }

        Ok(Self { routes })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<'a> IntoIterator for &'a RouteList {
    type Item = &'a Route;
    type IntoIter = std::slice::Iter<'a, Route>;

    fn into_iter(self) -> Self::IntoIter {
        self.routes.iter()
    }
}

/// Where an exported document lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The route's own `index.html`.
    RouteIndex,
    /// The site-wide `404.html` at the export root.
    NotFound,
}

/// A route paired with the file it is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    route: Route,
    placement: Placement,
}

impl ExportTarget {
    pub fn page(route: Route) -> Self {
        Self {
            route,
            placement: Placement::RouteIndex,
        }
    }

    pub fn not_found(route: Route) -> Self {
        Self {
            route,
            placement: Placement::NotFound,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn relative_path(&self) -> PathBuf {
        match self.placement {
            Placement::RouteIndex => self.route.index_path(),
            Placement::NotFound => PathBuf::from(NOT_FOUND_FILE),
        }
    }

    pub fn output_path(&self, export_root: &Path) -> PathBuf {
        export_root.join(self.relative_path())
    }
}

/// Targets in export order: every listed route, then the optional not-found page.
pub fn export_targets(routes: &RouteList, not_found: Option<&Route>) -> Vec<ExportTarget> {
    routes
        .iter()
        .cloned()
        .map(ExportTarget::page)
        .chain(not_found.cloned().map(ExportTarget::not_found))
        .collect()
}
