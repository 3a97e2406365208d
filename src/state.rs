use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::audit::FileAudit;
use crate::db::HealthDb;
use crate::error::HealthError;
use crate::types::{Config, OrgContext};

/// Environment variable that overrides `dbKey` from the config file.
pub const DB_KEY_ENV: &str = "CRMHEALTH_DB_KEY";

/// Shared handle for the CLI and the MCP server.
///
/// `rusqlite::Connection` is not `Sync`, so the database sits behind a mutex
/// and every operation takes the lock for its whole duration.
pub struct AppState {
    pub config: Config,
    pub db: Mutex<HealthDb>,
}

impl AppState {
    /// Open the configured database and build the state.
    pub fn open(config: Config) -> Result<Self, HealthError> {
        config
            .health
            .validate()
            .map_err(HealthError::InvalidConfig)?;
        let path = resolve_db_path(&config).map_err(HealthError::DatabaseUnavailable)?;
        let key = resolve_db_key(&config);
        let db = HealthDb::open_at(path.clone(), key.as_deref()).map_err(|e| {
            HealthError::DatabaseUnavailable(format!("{}: {}", path.display(), e))
        })?;
        log::info!("Opened health database at {}", path.display());
        Ok(Self::with_db(config, db))
    }

    pub fn with_db(config: Config, db: HealthDb) -> Self {
        Self {
            config,
            db: Mutex::new(db),
        }
    }

    /// Audit sink rooted at the configured audit directory.
    pub fn audit(&self) -> Result<FileAudit, HealthError> {
        resolve_audit_dir(&self.config)
            .map(FileAudit::new)
            .map_err(HealthError::InvalidConfig)
    }

    /// Tenant context for callers that did not name one.
    pub fn default_context(&self) -> Option<OrgContext> {
        self.config.default_org_id.as_deref().map(OrgContext::new)
    }
}

fn home_dir() -> Result<PathBuf, String> {
    dirs::home_dir().ok_or_else(|| "Could not find home directory".to_string())
}

pub fn config_path() -> Result<PathBuf, String> {
    Ok(home_dir()?.join(".crmhealth").join("config.json"))
}

/// Load `~/.crmhealth/config.json`. A missing file yields the defaults.
pub fn load_config() -> Result<Config, String> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    config
        .health
        .validate()
        .map_err(|e| format!("Invalid health config: {}", e))?;

    Ok(config)
}

/// `dbPath` if set, else `~/.crmhealth/crmhealth.db`.
pub fn resolve_db_path(config: &Config) -> Result<PathBuf, String> {
    match config.db_path.as_deref() {
        Some(p) if !p.trim().is_empty() => Ok(crate::util::expand_home(p)),
        _ => HealthDb::default_path().map_err(|e| e.to_string()),
    }
}

/// `CRMHEALTH_DB_KEY` if set and non-empty, else `dbKey` from config.
pub fn resolve_db_key(config: &Config) -> Option<String> {
    std::env::var(DB_KEY_ENV)
        .ok()
        .filter(|k| !k.is_empty())
        .or_else(|| config.db_key.clone().filter(|k| !k.is_empty()))
}

/// `auditDir` if set, else `~/.crmhealth/_audit`.
pub fn resolve_audit_dir(config: &Config) -> Result<PathBuf, String> {
    match config.audit_dir.as_deref() {
        Some(p) if !p.trim().is_empty() => Ok(crate::util::expand_home(p)),
        _ => Ok(home_dir()?.join(".crmhealth").join("_audit")),
    }
}
