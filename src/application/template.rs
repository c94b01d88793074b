//! The HTML shell produced by the client build, and composition of rendered
//! fragments into it.

use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{}` could not be read", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("template `{}` does not contain the mount placeholder `{placeholder}`", path.display())]
    MissingPlaceholder { path: PathBuf, placeholder: String },
}

/// The empty mount element that rendered markup replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    placeholder: String,
    open_tag: String,
}

impl MountPoint {
    /// Mount point for `<div id="{element_id}"></div>`.
    pub fn new(element_id: &str) -> Self {
        let open_tag = format!("<div id=\"{element_id}\">");
        Self {
            placeholder: format!("{open_tag}</div>"),
            open_tag,
        }
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// The mount element with `fragment` as its content.
    pub fn wrap(&self, fragment: &str) -> String {
        let mut html = String::with_capacity(self.open_tag.len() + fragment.len() + 6);
        html.push_str(&self.open_tag);
        html.push_str(fragment);
        html.push_str("</div>");
        html
    }
}

/// Replace the first mount placeholder in `template` with the wrapped fragment.
///
/// A template without a placeholder comes back unchanged.
pub fn compose(template: &str, mount: &MountPoint, fragment: &str) -> String {
    template.replacen(mount.placeholder(), &mount.wrap(fragment), 1)
}

/// Shell template, read once per run and shared by every route.
#[derive(Debug, Clone)]
pub struct Template {
    html: String,
    mount: MountPoint,
}

impl Template {
    /// Read the shell from disk. With `require_placeholder`, a shell that has
    /// nowhere to mount rendered markup is rejected instead of producing
    /// empty pages.
    pub async fn load(
        path: &Path,
        mount: MountPoint,
        require_placeholder: bool,
    ) -> Result<Self, TemplateError> {
        let html = fs::read_to_string(path)
            .await
            .map_err(|source| TemplateError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let occurrences = html.matches(mount.placeholder()).count();
        if occurrences == 0 {
            if require_placeholder {
                return Err(TemplateError::MissingPlaceholder {
                    path: path.to_path_buf(),
                    placeholder: mount.placeholder().to_string(),
                });
            }
            warn!(
                target = "prerender::template",
                path = %path.display(),
                placeholder = mount.placeholder(),
                "Template has no mount placeholder; pages will be exported without rendered content"
            );
        } else if occurrences > 1 {
            warn!(
                target = "prerender::template",
                path = %path.display(),
                occurrences,
                "Template has several mount placeholders; only the first receives content"
            );
        }

        Ok(Self { html, mount })
    }

    pub fn compose(&self, fragment: &str) -> String {
        compose(&self.html, &self.mount, fragment)
    }
}
