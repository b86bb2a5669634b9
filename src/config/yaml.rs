//! YAML configuration loading.

use std::path::Path;

use super::error::ConfigError;
use super::types::{Config, StorageConfig};

/// Loads and validates [`Config`] files.
pub struct YamlLoader;

impl YamlLoader {
    /// Load configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    fn validate_config(config: &Config) -> Result<(), ConfigError> {
        if config.application.name.trim().is_empty() {
            return Err(ConfigError::MissingField("application.name".into()));
        }

        let scheduler = &config.job_scheduler;
        if scheduler.enabled {
            match scheduler.max_parallel_jobs {
                None => {
                    return Err(ConfigError::MissingField(
                        "jobScheduler.maxParallelJobs".into(),
                    ));
                }
                Some(0) => {
                    return Err(ConfigError::InvalidConfig(
                        "jobScheduler.maxParallelJobs must be at least 1".into(),
                    ));
                }
                Some(_) => {}
            }
        }

        if scheduler.poll_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "jobScheduler.pollInterval must be positive".into(),
            ));
        }

        if let StorageConfig::Sqlite { path } = &config.storage
            && path.is_empty()
        {
            return Err(ConfigError::MissingField("storage.path".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
application:
  name: billing
jobScheduler:
  enabled: true
  pollInterval: PT30S
  maxParallelJobs: 4
  exitWhenIdle: true
  jobsEnabled:
    jobService-scanForJobs: true
    reportService-nightly: false
storage:
  type: sqlite
  path: jobs.db
"#;

        let config = YamlLoader::parse_config(yaml).unwrap();
        assert_eq!(config.application.name, "billing");
        assert!(config.job_scheduler.enabled);
        assert_eq!(config.job_scheduler.poll_interval, Duration::from_secs(30));
        assert_eq!(config.job_scheduler.max_parallel_jobs, Some(4));
        assert!(config.job_scheduler.exit_when_idle);
        assert_eq!(
            config.job_scheduler.jobs_enabled.get("reportService-nightly"),
            Some(&false)
        );
        assert!(config.job_scheduler.reconciler_enabled());
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: "jobs.db".into()
            }
        );
    }

    #[test]
    fn test_defaults() {
        let config = YamlLoader::parse_config("application:\n  name: app\n").unwrap();
        assert!(!config.job_scheduler.enabled);
        assert_eq!(config.job_scheduler.poll_interval, Duration::from_secs(60));
        assert!(!config.job_scheduler.exit_when_idle);
        assert!(!config.job_scheduler.reconciler_enabled());
        assert_eq!(config.storage, StorageConfig::Memory);
    }

    #[test]
    fn test_validation_error_missing_max_parallel_jobs() {
        let yaml = r#"
application:
  name: app
jobScheduler:
  enabled: true
"#;
        let err = YamlLoader::parse_config(yaml).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingField(ref f) if f == "jobScheduler.maxParallelJobs")
        );
    }

    #[test]
    fn test_validation_error_zero_max_parallel_jobs() {
        let yaml = r#"
application:
  name: app
jobScheduler:
  enabled: true
  maxParallelJobs: 0
"#;
        let err = YamlLoader::parse_config(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn test_max_parallel_jobs_optional_when_disabled() {
        let yaml = r#"
application:
  name: app
jobScheduler:
  enabled: false
"#;
        assert!(YamlLoader::parse_config(yaml).is_ok());
    }

    #[test]
    fn test_validation_error_missing_application_name() {
        let err = YamlLoader::parse_config("jobScheduler:\n  enabled: false\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "application.name"));
    }

    #[test]
    fn test_invalid_poll_interval_is_yaml_error() {
        let yaml = r#"
application:
  name: app
jobScheduler:
  pollInterval: every minute
"#;
        let err = YamlLoader::parse_config(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
    }

    #[test]
    fn test_oversized_poll_interval_is_yaml_error() {
        let yaml = r#"
application:
  name: app
jobScheduler:
  pollInterval: P999999999999999999DT1H
"#;
        let err = YamlLoader::parse_config(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobsched.yaml");
        std::fs::write(&path, "application:\n  name: from-file\n").unwrap();

        let config = YamlLoader::load_config(&path).unwrap();
        assert_eq!(config.application.name, "from-file");
    }

    #[test]
    fn test_load_missing_file() {
        let err = YamlLoader::load_config("/nonexistent/jobsched.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
