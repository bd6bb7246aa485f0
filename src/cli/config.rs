use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CrawlerConfig {
    pub worker: WorkerSettings,
    pub rate_limit: RateLimitSettings,
    pub browser: BrowserSettings,
    pub egress: EgressSettings,
}

/// Worker loop settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerSettings {
    /// Number of concurrent worker tasks
    pub worker_count: usize,

    /// Fetch attempts per job before the last failure becomes terminal
    pub max_attempts: u32,

    /// Per-navigation timeout in seconds
    pub navigation_timeout_secs: u64,
}

/// Global dispatch rate limit shared by all crawls
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitSettings {
    /// Maximum job dispatches per window
    pub max_dispatches: usize,

    /// Window length in milliseconds
    pub window_ms: u64,
}

/// Browser automation settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserSettings {
    /// WebDriver endpoint, e.g. a chromedriver or selenium URL
    pub webdriver_url: String,

    pub headless: bool,

    /// Directory for per-page screenshot artifacts; disabled when None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_dir: Option<PathBuf>,

    /// Fingerprints rotated across fetch attempts
    pub fingerprints: Vec<BrowserFingerprint>,
}

/// Browser fingerprint presented to target sites
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserFingerprint {
    pub name: String,
    pub user_agent: String,
    pub accept_language: String,
    pub viewport: Viewport,
}

/// Browser viewport dimensions
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Egress rotation settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EgressSettings {
    pub enabled: bool,

    /// Endpoints available for rotation
    pub endpoints: Vec<EgressEndpoint>,

    /// URL fetched when probing endpoint health
    pub probe_url: String,
}

/// A single network egress endpoint
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EgressEndpoint {
    pub name: String,
    pub proxy_type: String, // "direct", "http", "socks5"
    pub address: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub country: Option<String>,
}

impl EgressEndpoint {
    /// Proxy URL handed to the browser and the probe client; `None` for
    /// direct egress
    pub fn proxy_url(&self) -> Option<String> {
        let (scheme, default_port) = match self.proxy_type.as_str() {
            "http" => ("http", 8080),
            "socks5" => ("socks5", 1080),
            _ => return None,
        };

        let port = self.port.unwrap_or(default_port);
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(format!(
                "{}://{}:{}@{}:{}",
                scheme, username, password, self.address, port
            )),
            _ => Some(format!("{}://{}:{}", scheme, self.address, port)),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerSettings {
                worker_count: 4,
                max_attempts: 3,
                navigation_timeout_secs: 30,
            },
            rate_limit: RateLimitSettings {
                max_dispatches: 10,
                window_ms: 1000,
            },
            browser: BrowserSettings {
                webdriver_url: "http://localhost:4444".to_string(),
                headless: true,
                screenshot_dir: None,
                fingerprints: vec![
                    BrowserFingerprint {
                        name: "windows_chrome".to_string(),
                        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                        accept_language: "en-US,en;q=0.9".to_string(),
                        viewport: Viewport { width: 1920, height: 1080 },
                    },
                    BrowserFingerprint {
                        name: "mac_chrome".to_string(),
                        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                        accept_language: "en-US,en;q=0.9".to_string(),
                        viewport: Viewport { width: 1680, height: 1050 },
                    },
                ],
            },
            egress: EgressSettings {
                enabled: false,
                endpoints: vec![],
                probe_url: "https://www.google.com".to_string(),
            },
        }
    }
}

impl CrawlerConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "selector-crawler", "selector-crawler")
        {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path.pop();
        path
    }

    /// Load the default configuration, creating it on first run
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a per-site configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let config_dir = Self::config_dir();
        let profile_path = config_dir.join("sites").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_path = Self::config_dir().join("default.yaml");
        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let sites_dir = Self::config_dir().join("sites");

        if !sites_dir.exists() {
            fs::create_dir_all(&sites_dir)
                .context(format!("Failed to create sites directory: {}", sites_dir.display()))?;
        }

        let profile_path = sites_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents =
            serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let sites_dir = Self::config_dir().join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(sites_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_yaml() {
        let config = CrawlerConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: CrawlerConfig = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.worker.max_attempts, 3);
        assert_eq!(parsed.rate_limit.max_dispatches, 10);
        assert_eq!(parsed.browser.fingerprints.len(), 2);
        assert!(!parsed.egress.enabled);
    }
}
