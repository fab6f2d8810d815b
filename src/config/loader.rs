use super::schema::Config;
use crate::error::ConfigError;
use directories::UserDirs;
use std::fs;
use std::path::Path;

const CONFIG_DIR: &str = ".iris-planner";
const CONFIG_FILE: &str = "config.toml";

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        config.config_path = path.to_path_buf();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `~/.iris-planner/config.toml` when present, defaults otherwise.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let Some(home) = UserDirs::new().map(|dirs| dirs.home_dir().to_path_buf()) else {
            tracing::warn!("Could not find home directory; using default planner config");
            let mut config = Self::default();
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        };

        let config_path = home.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Self::load_from_path(&config_path);
        }

        let mut config = Self {
            config_path,
            ..Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("IRIS_PLANNER_CANDIDATES")
            && let Ok(count) = raw.parse::<usize>()
        {
            self.planning.candidate_plan_count = count;
        }

        if let Ok(raw) = std::env::var("IRIS_PLANNER_MAX_REPLANS")
            && let Ok(replans) = raw.parse::<u32>()
        {
            self.planning.max_local_replans = replans;
        }

        if let Ok(raw) = std::env::var("IRIS_PLANNER_MAX_CONCURRENCY")
            && let Ok(concurrency) = raw.parse::<usize>()
        {
            self.execution.max_concurrency = concurrency;
        }

        if let Ok(raw) = std::env::var("IRIS_PLANNER_JUDGE_ENABLED")
            && let Ok(enabled) = raw.trim().to_ascii_lowercase().parse::<bool>()
        {
            self.judge.enabled = enabled;
        }

        if let Ok(level) = std::env::var("IRIS_PLANNER_LOG_LEVEL")
            && !level.is_empty()
        {
            self.observability.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let planning = &self.planning;
        if !planning.complexity_penalty_lambda.is_finite()
            || planning.complexity_penalty_lambda < 0.0
        {
            return Err(ConfigError::Validation(
                "planning.complexity_penalty_lambda must be a finite value >= 0".into(),
            ));
        }
        if !planning.structural_score_weight.is_finite()
            || !planning.llm_judge_score_weight.is_finite()
        {
            return Err(ConfigError::Validation(
                "planning score weights must be finite".into(),
            ));
        }
        if self.limits.max_tasks == 0 {
            return Err(ConfigError::Validation(
                "limits.max_tasks must be greater than 0".into(),
            ));
        }
        if self.execution.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "execution.max_concurrency must be greater than 0".into(),
            ));
        }
        if self.judge.enabled
            && self
                .judge
                .routes
                .iter()
                .any(|route| route.endpoint.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "judge.routes entries need a non-empty endpoint".into(),
            ));
        }
        Ok(())
    }
}
