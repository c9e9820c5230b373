use dispatch_common::config::SystemConfig;

use super::loader::ConfigError;

/// Validate the complete server configuration.
///
/// Checks sane ranges on numeric parameters. The server refuses to start
/// on validation failure.
pub fn validate(config: &SystemConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_server(config, &mut errors);
    validate_lease(config, &mut errors);
    validate_paths(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_server(config: &SystemConfig, errors: &mut Vec<String>) {
    let s = &config.server;

    if s.bind_addr.is_empty() {
        errors.push("server.bind_addr must not be empty".into());
    }
    if s.command_port == 0 {
        errors.push("server.command_port must be > 0".into());
    }
    if s.file_port == 0 {
        errors.push("server.file_port must be > 0".into());
    }
    if s.metrics_port == 0 {
        errors.push("server.metrics_port must be > 0".into());
    }
    if s.command_port == s.file_port
        || s.command_port == s.metrics_port
        || s.file_port == s.metrics_port
    {
        errors.push("server.command_port, server.file_port, and server.metrics_port must all differ".into());
    }
    if s.cert_dir.is_empty() {
        errors.push("server.cert_dir must not be empty".into());
    }
    if s.idle_read_timeout_secs == 0 {
        errors.push("server.idle_read_timeout_secs must be > 0".into());
    }
}

fn validate_lease(config: &SystemConfig, errors: &mut Vec<String>) {
    let l = &config.lease;

    if l.lease_timeout_secs == 0 {
        errors.push("lease.lease_timeout_secs must be > 0".into());
    }
    // max_retries = 0 is a valid, if aggressive, boundary configuration: the
    // reclaimer sends a timed-out item straight to `failed` on its first
    // sweep, with no retry.
    if l.reclaim_interval_secs == 0 {
        errors.push("lease.reclaim_interval_secs must be > 0".into());
    }
}

fn validate_paths(config: &SystemConfig, errors: &mut Vec<String>) {
    let p = &config.paths;

    if p.tasks_dir.is_empty() {
        errors.push("paths.tasks_dir must not be empty".into());
    }
    if p.results_dir.is_empty() {
        errors.push("paths.results_dir must not be empty".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_common::config::{LeaseConfig, PathsConfig, ServerConfig, StoreConfig};

    fn valid_config() -> SystemConfig {
        SystemConfig {
            server: ServerConfig {
                bind_addr: "0.0.0.0".into(),
                command_port: 10020,
                file_port: 9000,
                metrics_port: 8999,
                cert_dir: "certs".into(),
                idle_read_timeout_secs: 120,
            },
            store: StoreConfig {
                database_path: "dispatch.sqlite".into(),
            },
            lease: LeaseConfig {
                lease_timeout_secs: 60,
                max_retries: 3,
                reclaim_interval_secs: 60,
            },
            paths: PathsConfig {
                tasks_dir: "tasks".into(),
                results_dir: "results".into(),
            },
        }
    }

    #[test]
    fn accepts_sane_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn rejects_identical_ports() {
        let mut cfg = valid_config();
        cfg.server.file_port = cfg.server.command_port;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_zero_lease_timeout() {
        let mut cfg = valid_config();
        cfg.lease.lease_timeout_secs = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn accepts_zero_max_retries() {
        let mut cfg = valid_config();
        cfg.lease.max_retries = 0;
        assert!(validate(&cfg).is_ok());
    }
}
