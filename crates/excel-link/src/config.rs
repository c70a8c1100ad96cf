//! Manager configuration.

use std::path::PathBuf;

/// File name of the bundled template.
pub const TEMPLATE_FILE_NAME: &str = "S2BTemplate.xlsx";

/// Directory, next to the executable, that holds bundled resources.
pub const RESOURCES_DIR: &str = "Resources";

/// Configuration for [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Template used by `launch_from_template` when no path is given.
    /// If None, looks for `Resources/S2BTemplate.xlsx` next to the current executable.
    pub template_path: Option<PathBuf>,

    /// Whether an instance started by the manager is shown to the user.
    pub launch_visible: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            template_path: None,
            launch_visible: true,
        }
    }
}

impl LinkConfig {
    /// The template path to use, falling back to the bundled location.
    pub fn resolved_template_path(&self) -> PathBuf {
        self.template_path
            .clone()
            .unwrap_or_else(default_template_path)
    }
}

/// `Resources/S2BTemplate.xlsx` next to the current executable, or relative to
/// the working directory if the executable path is unknown.
pub fn default_template_path() -> PathBuf {
    let base = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_default();
    base.join(RESOURCES_DIR).join(TEMPLATE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_location() {
        let path = default_template_path();
        assert!(path.ends_with("Resources/S2BTemplate.xlsx"));
    }

    #[test]
    fn test_explicit_template_wins() {
        let config = LinkConfig {
            template_path: Some(PathBuf::from("/tmp/custom.xlsx")),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_template_path(),
            PathBuf::from("/tmp/custom.xlsx")
        );
    }
}
