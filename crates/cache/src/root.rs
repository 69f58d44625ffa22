//! Cache root resolution

use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use std::path::PathBuf;

/// Environment variable that overrides the cache root
pub const CACHE_DIR_ENV: &str = "DECKFLOW_CACHE_DIR";

/// Inputs for determining cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    deckflow_cache_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) DECKFLOW_CACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/deckflow/stages
    // 3) OS cache dir/deckflow/stages
    // 4) ~/.deckflow/cache/stages
    // 5) TMPDIR/deckflow/cache/stages (fallback)
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs
        .deckflow_cache_dir
        .filter(|p| !p.as_os_str().is_empty())
    {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("deckflow/stages"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("deckflow/stages"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".deckflow/cache/stages"));
    }
    candidates.push(inputs.temp_dir.join("deckflow/cache/stages"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        // Existing directories may be read-only (CI images often mount $HOME that way)
        if path.exists() {
            let probe = path.join(".write_probe");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// Resolve the default cache root from the environment
///
/// # Errors
///
/// Returns a configuration error if no candidate directory is writable
pub fn default_cache_root() -> Result<PathBuf> {
    let inputs = CacheInputs {
        deckflow_cache_dir: std::env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        xdg_cache_home: std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        os_cache_dir: cache_dir(),
        home_dir: home_dir(),
        temp_dir: std::env::temp_dir(),
    };
    cache_root_from_inputs(inputs)
}
