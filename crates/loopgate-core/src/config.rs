use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PackageManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Pnpm,
    Yarn,
    Bun,
    Npm,
}

impl PackageManager {
    const LOCKFILES: [(PackageManager, &'static str); 4] = [
        (PackageManager::Pnpm, "pnpm-lock.yaml"),
        (PackageManager::Yarn, "yarn.lock"),
        (PackageManager::Bun, "bun.lockb"),
        (PackageManager::Npm, "package-lock.json"),
    ];

    /// Detect from lockfiles in priority order; npm when none is present.
    pub fn detect(root: &Path) -> Self {
        Self::LOCKFILES
            .iter()
            .find(|(_, file)| root.join(file).exists())
            .map(|(pm, _)| *pm)
            .unwrap_or(PackageManager::Npm)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
            PackageManager::Bun => "bun",
            PackageManager::Npm => "npm",
        }
    }

    /// Command line that runs a package.json script.
    pub fn script(&self, name: &str) -> String {
        match self {
            PackageManager::Npm | PackageManager::Bun => format!("{} run {name}", self.as_str()),
            _ => format!("{} {name}", self.as_str()),
        }
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when `package.json` at `root` declares `scripts.<name>`.
pub fn has_script(root: &Path, name: &str) -> bool {
    let Ok(data) = std::fs::read_to_string(root.join("package.json")) else {
        return false;
    };
    serde_json::from_str::<serde_json::Value>(&data)
        .ok()
        .and_then(|v| v.get("scripts")?.get(name).cloned())
        .is_some()
}

// ---------------------------------------------------------------------------
// ChecksConfig
// ---------------------------------------------------------------------------

/// Free (local) check commands. `None` means "derive from the package manager".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typecheck: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default = "default_tier1_timeout")]
    pub tier1_timeout_secs: u64,
    #[serde(default = "default_tier2_timeout")]
    pub tier2_timeout_secs: u64,
    #[serde(default = "default_stage_cap")]
    pub stage_cap_secs: u64,
}

fn default_tier1_timeout() -> u64 {
    30
}

fn default_tier2_timeout() -> u64 {
    120
}

fn default_stage_cap() -> u64 {
    60
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            lint: None,
            typecheck: None,
            format: None,
            build: None,
            test: None,
            tier1_timeout_secs: default_tier1_timeout(),
            tier2_timeout_secs: default_tier2_timeout(),
            stage_cap_secs: default_stage_cap(),
        }
    }
}

/// Concrete commands after package-manager resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedChecks {
    pub lint: String,
    pub typecheck: String,
    pub format: Option<String>,
    pub build: String,
    pub test: String,
}

impl ChecksConfig {
    /// Fill unset commands from the detected package manager. The format check
    /// only runs when configured or when package.json has `format:check`.
    pub fn resolve(&self, root: &Path) -> ResolvedChecks {
        let pm = PackageManager::detect(root);
        let pick = |cmd: &Option<String>, script: &str| {
            cmd.clone().unwrap_or_else(|| pm.script(script))
        };
        let format = self.format.clone().or_else(|| {
            has_script(root, "format:check").then(|| pm.script("format:check"))
        });
        ResolvedChecks {
            lint: pick(&self.lint, "lint"),
            typecheck: pick(&self.typecheck, "typecheck"),
            format,
            build: pick(&self.build, "build"),
            test: pick(&self.test, "test"),
        }
    }
}

// ---------------------------------------------------------------------------
// ReviewerConfig (Loop 2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "opus".to_string()
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_model(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExternalConfig (Loop 3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_external_command")]
    pub command: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_hour: u32,
    #[serde(default = "default_external_timeout")]
    pub timeout_secs: u64,
}

fn default_external_command() -> String {
    "coderabbit review --stdin".to_string()
}

fn default_rate_limit() -> u32 {
    crate::rate_limit::DEFAULT_LIMIT_PER_HOUR
}

fn default_external_timeout() -> u64 {
    60
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_external_command(),
            rate_limit_per_hour: default_rate_limit(),
            timeout_secs: default_external_timeout(),
        }
    }
}

impl ExternalConfig {
    /// First word of the command, used to check the tool is installed.
    pub fn program(&self) -> Option<&str> {
        self.command.split_whitespace().next()
    }
}

// ---------------------------------------------------------------------------
// BlockingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingConfig {
    #[serde(default = "default_true")]
    pub critical_blocks_ship: bool,
    #[serde(default)]
    pub major_blocks_ship: bool,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            critical_blocks_ship: true,
            major_blocks_ship: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub checks: ChecksConfig,
    #[serde(default)]
    pub loop2: ReviewerConfig,
    #[serde(default)]
    pub loop3: ExternalConfig,
    #[serde(default)]
    pub blocking: BlockingConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            checks: ChecksConfig::default(),
            loop2: ReviewerConfig::default(),
            loop3: ExternalConfig::default(),
            blocking: BlockingConfig::default(),
        }
    }
}

impl Config {
    /// Load `.claude/loop-config.yaml`; a missing file yields defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.checks.tier1_timeout_secs == 0 || self.checks.tier2_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "checks timeouts must be greater than zero".to_string(),
            });
        }

        if self.checks.stage_cap_secs > self.checks.tier2_timeout_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "checks.stage_cap_secs={} exceeds tier2_timeout_secs={}; \
                     stages are capped by the overall budget",
                    self.checks.stage_cap_secs, self.checks.tier2_timeout_secs
                ),
            });
        }

        let commands = [
            ("lint", &self.checks.lint),
            ("typecheck", &self.checks.typecheck),
            ("format", &self.checks.format),
            ("build", &self.checks.build),
            ("test", &self.checks.test),
        ];
        for (name, cmd) in commands {
            if matches!(cmd, Some(c) if c.trim().is_empty()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("checks.{name} is an empty command"),
                });
            }
        }

        if self.loop3.enabled {
            if self.loop3.command.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "loop3.command is empty but loop3 is enabled".to_string(),
                });
            }
            if self.loop3.rate_limit_per_hour == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "loop3.rate_limit_per_hour=0 means loop 3 always skips".to_string(),
                });
            }
        }

        if self.blocking.major_blocks_ship && !self.blocking.critical_blocks_ship {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "blocking.major_blocks_ship is set but critical_blocks_ship is not"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// ConfigCache
// ---------------------------------------------------------------------------

/// Loaded-once config for a single root. Owned by the caller and passed by
/// reference; `reload` re-reads from disk.
#[derive(Debug)]
pub struct ConfigCache {
    root: PathBuf,
    cached: Option<Config>,
}

impl ConfigCache {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            cached: None,
        }
    }

    pub fn get(&mut self) -> Result<&Config> {
        if self.cached.is_none() {
            self.cached = Some(Config::load(&self.root)?);
        }
        Ok(&*self.cached.get_or_insert_with(Config::default))
    }

    pub fn reload(&mut self) -> Result<&Config> {
        self.cached = None;
        self.get()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
