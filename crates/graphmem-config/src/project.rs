use std::path::{Path, PathBuf};

/// Directory entries that mark a project root, checked in every ancestor.
pub const PROJECT_MARKERS: [&str; 2] = [".graphmem", ".git"];

/// Compose definition location relative to the project root.
pub const DEFAULT_COMPOSE_FILE: &str = "docker/docker-compose.neo4j.yml";

/// Schema script directory relative to the project root.
pub const DEFAULT_SCHEMA_DIR: &str = ".graphmem/schema";

/// Walk upward from `start` to the first directory containing a project
/// marker. Falls back to `start` itself.
pub fn find_project_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| PROJECT_MARKERS.iter().any(|m| dir.join(m).exists()))
        .unwrap_or(start)
        .to_path_buf()
}

/// `{root}/.graphmem/config.toml`.
pub fn config_file_path(root: &Path) -> PathBuf {
    root.join(".graphmem").join("config.toml")
}
