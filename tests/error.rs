use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use n8n_deploy::error::DeployError;

#[test]
fn display_invalid_configuration_lists_keys() {
    let err = DeployError::InvalidConfiguration(vec!["DOMAIN".into(), "SSL_EMAIL".into()]);
    assert_eq!(err.to_string(), "invalid configuration: DOMAIN, SSL_EMAIL");
}

#[test]
fn display_configuration_missing() {
    let err = DeployError::ConfigurationMissing(PathBuf::from("/opt/n8n/.env"));
    assert_eq!(
        err.to_string(),
        "configuration missing: /opt/n8n/.env not found"
    );
}

#[test]
fn display_command_not_found() {
    let err = DeployError::CommandNotFound("docker".into());
    assert_eq!(err.to_string(), "command not found: docker");
}

#[test]
fn display_prerequisite_missing() {
    let err = DeployError::PrerequisiteMissing("certbot".into());
    assert_eq!(err.to_string(), "prerequisite missing: certbot");
}

#[test]
fn display_command_timed_out() {
    let err = DeployError::CommandTimedOut {
        command: "docker compose pull".into(),
        after: Duration::from_secs(900),
    };
    assert_eq!(
        err.to_string(),
        "command timed out after 900s: docker compose pull"
    );
}

#[test]
fn display_retention_prune_failed() {
    let err = DeployError::RetentionPruneFailed {
        path: PathBuf::from("/opt/n8n/backups/postgres-20260101-0200.sql.gz"),
        reason: "Permission denied".into(),
    };
    assert_eq!(
        err.to_string(),
        "failed to prune /opt/n8n/backups/postgres-20260101-0200.sql.gz: Permission denied"
    );
}

#[test]
fn display_service_not_running() {
    let err = DeployError::ServiceNotRunning("n8n".into());
    assert_eq!(
        err.to_string(),
        "service 'n8n' is not running after docker compose up"
    );
}

#[test]
fn step_failed_names_step_and_keeps_source() {
    let err = DeployError::StepFailed {
        step: "stack",
        source: Box::new(DeployError::ServiceNotRunning("postgres".into())),
    };

    assert!(err.to_string().starts_with("step 'stack' failed: "));
    assert!(err.source().is_some());
}

#[test]
fn degraded_errors_are_not_fatal() {
    assert!(!DeployError::CertificateError("rate limited".into()).is_fatal());
    assert!(!DeployError::SyncFailed("AccessDenied".into()).is_fatal());
    assert!(
        !DeployError::RetentionPruneFailed {
            path: PathBuf::from("/x"),
            reason: "busy".into(),
        }
        .is_fatal()
    );
}

#[test]
fn setup_errors_are_fatal() {
    assert!(DeployError::InvalidConfiguration(vec!["DOMAIN".into()]).is_fatal());
    assert!(DeployError::InvalidProxyConfig("bad".into()).is_fatal());
    assert!(DeployError::DumpFailed("eof".into()).is_fatal());
    assert!(DeployError::EntropySourceUnavailable("getrandom".into()).is_fatal());
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: DeployError = io.into();
    assert!(matches!(err, DeployError::Io(_)));
}
