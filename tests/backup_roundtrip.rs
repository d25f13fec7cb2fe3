//! Integration tests for backup, cleanup and recovery of the configuration root

mod common;

use common::Stack;
use tokio_util::sync::CancellationToken;

use stackctl::backup::{BackupError, BackupKind, BackupManager, LifecycleState};
use stackctl::orchestrator::Orchestrator;
use stackctl::{ExitStatus, StackError};

const MANIFEST: &str = r#"
runtime_paths = ["gateway/logs", "api/cache"]

[[services]]
id = "gateway"
file = "gateway/.env"

[[services]]
id = "api"
file = "api/.env"

[[secrets]]
name = "GATEWAY_KEY"
targets = ["gateway", "api"]

[backup]
extra_files = ["gateway/config.yaml"]
"#;

const GATEWAY_ENV: &str = "# gateway\nGATEWAY_KEY=Zm9vYmFyYmF6cXV4cXV1eHF1dXhxdXV4cXV1eHF1dXg\n";
const API_ENV: &str = "GATEWAY_KEY=Zm9vYmFyYmF6cXV4cXV1eHF1dXhxdXV4cXV1eHF1dXg\nLOG_LEVEL=info\n";
const GATEWAY_YAML: &str = "deployment:\n  role: traditional\n";

fn populated() -> Stack {
    let stack = Stack::new(&["gateway", "api"]);
    stack.write("gateway/.env", GATEWAY_ENV);
    stack.write("api/.env", API_ENV);
    stack.write("gateway/config.yaml", GATEWAY_YAML);
    stack.write("gateway/logs/error.log", "boom\n");
    stack.write("api/cache/index.bin", "cache");
    stack
}

fn orchestrator(stack: &Stack) -> Orchestrator {
    Orchestrator::new(stack.config(MANIFEST), CancellationToken::new())
}

#[test]
fn test_deep_cleanup_then_recover_is_byte_identical() {
    let stack = populated();
    let orchestrator = orchestrator(&stack);

    let backup = orchestrator.backup(Some("before-upgrade")).unwrap().backup.unwrap();
    assert_eq!(backup.name, "before-upgrade");
    assert_eq!(backup.kind, BackupKind::Permanent);
    assert_eq!(backup.files, 3);

    let cleaned = orchestrator.deep_cleanup().unwrap();
    assert!(cleaned.warnings.is_empty());
    assert!(!stack.exists("gateway/.env"));
    assert!(!stack.exists("api/.env"));
    assert!(!stack.exists("gateway/logs"));
    assert!(stack.exists("gateway/config.yaml"));

    let restored = orchestrator.recover(Some("before-upgrade")).unwrap().restore.unwrap();
    assert_eq!(restored.backup, backup.id);
    assert_eq!(restored.restored, 3);
    assert!(!restored.noop);

    assert_eq!(stack.read("gateway/.env"), GATEWAY_ENV);
    assert_eq!(stack.read("api/.env"), API_ENV);
    assert_eq!(stack.read("gateway/config.yaml"), GATEWAY_YAML);
    assert!(!stack.exists("gateway/logs"));
}

#[test]
fn test_cleanup_keeps_service_files_and_snapshots_first() {
    let stack = populated();
    let orchestrator = orchestrator(&stack);

    let summary = orchestrator.cleanup().unwrap();

    assert_eq!(summary.removed.len(), 2);
    assert!(stack.exists("gateway/.env"));
    assert!(!stack.exists("api/cache"));
    assert_eq!(summary.warnings.len(), 1);

    let snapshot = summary.backup.unwrap();
    assert_eq!(snapshot.kind, BackupKind::Temporary);
    assert!(snapshot.name.starts_with("pre-cleanup"));
    assert_eq!(orchestrator.backups().state().unwrap(), LifecycleState::Cleaned);
}

#[test]
fn test_unknown_selector_changes_nothing() {
    let stack = populated();
    let orchestrator = orchestrator(&stack);
    orchestrator.backup(None).unwrap();
    orchestrator.deep_cleanup().unwrap();

    let err = orchestrator.recover(Some("does-not-exist")).unwrap_err();
    assert_eq!(err.exit_status(), ExitStatus::BackupNotFound);
    assert!(!stack.exists("gateway/.env"));
    assert_eq!(orchestrator.backups().state().unwrap(), LifecycleState::Cleaned);
}

#[test]
fn test_recover_on_clean_root_is_noop() {
    let stack = populated();
    let orchestrator = orchestrator(&stack);
    orchestrator.backup(None).unwrap();
    orchestrator.deep_cleanup().unwrap();
    orchestrator.recover(None).unwrap();

    stack.write("api/.env", "LOG_LEVEL=debug\n");
    let summary = orchestrator.recover(None).unwrap();

    assert!(summary.restore.unwrap().noop);
    assert_eq!(summary.warnings.len(), 1);
    assert_eq!(stack.read("api/.env"), "LOG_LEVEL=debug\n");
}

#[test]
fn test_tampered_backup_is_rejected_before_writing() {
    let stack = populated();
    let manager = BackupManager::new(&stack.config(MANIFEST));
    let manifest = manager.snapshot(BackupKind::Permanent, Some("base")).unwrap();
    manager.mark_cleaned().unwrap();

    let backup_dir = stack.root().join(".stackctl/backups").join(&manifest.id);
    let captured = backup_dir.join("files").join(&manifest.entries[0].file);
    std::fs::write(captured, "GATEWAY_KEY=tampered\n").unwrap();
    stack.write("api/.env", "LOG_LEVEL=debug\n");

    let err = manager.restore(Some("base")).unwrap_err();
    assert!(matches!(err, BackupError::Corrupt { .. }));
    assert_eq!(stack.read("api/.env"), "LOG_LEVEL=debug\n");
}

#[test]
fn test_repeated_permanent_names_stay_distinct_and_listed_newest_first() {
    let stack = populated();
    let orchestrator = orchestrator(&stack);

    let first = orchestrator.backup(Some("nightly")).unwrap().backup.unwrap();
    let second = orchestrator.backup(Some("nightly")).unwrap().backup.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.name, "nightly");
    assert!(second.name.starts_with("nightly-"));

    let listed = orchestrator.list_backups().unwrap().backups;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);

    let deleted = orchestrator.delete_backup(&first.id).unwrap().backup.unwrap();
    assert_eq!(deleted.id, first.id);
    assert_eq!(orchestrator.list_backups().unwrap().backups.len(), 1);
}

#[test]
fn test_delete_unknown_backup_maps_to_not_found() {
    let stack = populated();
    let err = orchestrator(&stack).delete_backup("missing").unwrap_err();
    assert!(matches!(err, StackError::BackupNotFound { .. }));
}
