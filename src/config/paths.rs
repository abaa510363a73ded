//! Canonical paths for meetvault state and vault layout.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meetvault::config::paths;
//!
//! let db = paths::registry_db(&settings.home);
//! let note = format!("{}/kickoff.md", paths::MEETINGS);
//! ```
//!
//! ## Path Ownership
//!
//! | Location | Owner | Purpose |
//! |----------|-------|---------|
//! | `<home>/*` (functions) | orchestrator | registry, lock, worker scratch |
//! | vault constants | task manager, note generator | vault-relative folders |

use std::path::{Path, PathBuf};

// ============================================================================
// State directory (functions - resolved against <home>)
// ============================================================================

/// Registry database (`<home>/registry.sqlite`)
pub fn registry_db(home: &Path) -> PathBuf {
    home.join("registry.sqlite")
}

/// Single-instance lock (`<home>/orchestrator.lock`)
pub fn lock_file(home: &Path) -> PathBuf {
    home.join("orchestrator.lock")
}

/// Parent of per-item scratch directories (`<home>/work/`)
pub fn work_dir(home: &Path) -> PathBuf {
    home.join("work")
}

/// Local mirror of a remote vault's task area (`<home>/vault-mirror/`)
pub fn vault_mirror(home: &Path) -> PathBuf {
    home.join("vault-mirror")
}

// ============================================================================
// Vault layout (constants - relative to the vault root)
// ============================================================================

pub const MEETINGS: &str = "Meetings";

pub const TASKS: &str = "Tasks";

/// Where `done` tasks are moved
pub const TASK_ARCHIVE: &str = "Tasks/Archive";

pub const DASHBOARDS: &str = "Meta/dashboards";

pub const TASK_DASHBOARD: &str = "Meta/dashboards/Task-Dashboard.md";

/// Folders created when a local vault is initialized
pub const VAULT_FOLDERS: [&str; 8] = [
    MEETINGS,
    TASKS,
    TASK_ARCHIVE,
    "People",
    "Companies",
    "Technologies",
    "Meta",
    DASHBOARDS,
];

// ============================================================================
// Tests
// ============================================================================
