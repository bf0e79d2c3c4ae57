//! Canonical in-container paths for the lifecycle volumes

use phasebox_config::TargetOs;

/// OS-aware path builder for the layers and app volumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPaths {
    volume: &'static str,
    separator: &'static str,
    workspace: String,
}

impl MountPaths {
    /// `workspace` is the app directory name; empty means `"workspace"`
    pub fn for_os(os: TargetOs, workspace: &str) -> Self {
        let workspace = if workspace.is_empty() {
            "workspace".to_string()
        } else {
            workspace.to_string()
        };

        match os {
            TargetOs::Windows => Self {
                volume: "c:",
                separator: "\\",
                workspace,
            },
            TargetOs::Linux => Self {
                volume: "",
                separator: "/",
                workspace,
            },
        }
    }

    fn join(&self, parts: &[&str]) -> String {
        parts.join(self.separator)
    }

    pub fn layers_dir(&self) -> String {
        self.join(&[self.volume, "layers"])
    }

    pub fn stack_path(&self) -> String {
        self.join(&[&self.layers_dir(), "stack.toml"])
    }

    pub fn project_path(&self) -> String {
        self.join(&[&self.layers_dir(), "project-metadata.toml"])
    }

    pub fn report_path(&self) -> String {
        self.join(&[&self.layers_dir(), "report.toml"])
    }

    pub fn app_dir_name(&self) -> &str {
        &self.workspace
    }

    pub fn app_dir(&self) -> String {
        self.join(&[self.volume, self.app_dir_name()])
    }

    pub fn cache_dir(&self) -> String {
        self.join(&[self.volume, "cache"])
    }

    pub fn launch_cache_dir(&self) -> String {
        self.join(&[self.volume, "launch-cache"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_paths() {
        let paths = MountPaths::for_os(TargetOs::Linux, "");
        assert_eq!(paths.layers_dir(), "/layers");
        assert_eq!(paths.app_dir_name(), "workspace");
        assert_eq!(paths.app_dir(), "/workspace");
        assert_eq!(paths.cache_dir(), "/cache");
        assert_eq!(paths.launch_cache_dir(), "/launch-cache");
        assert_eq!(paths.stack_path(), "/layers/stack.toml");
        assert_eq!(paths.project_path(), "/layers/project-metadata.toml");
        assert_eq!(paths.report_path(), "/layers/report.toml");
    }

    #[test]
    fn test_windows_paths() {
        let paths = MountPaths::for_os(TargetOs::Windows, "app");
        assert_eq!(paths.layers_dir(), r"c:\layers");
        assert_eq!(paths.app_dir_name(), "app");
        assert_eq!(paths.app_dir(), r"c:\app");
        assert_eq!(paths.cache_dir(), r"c:\cache");
        assert_eq!(paths.stack_path(), r"c:\layers\stack.toml");
    }
}
