use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use vigil::secrets;
use vigil::DbSecrets;

fn write_secret(dir: &Path, name: &str, contents: &str, mode: u32) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    path
}

#[test]
fn private_secrets_file_parses() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_secret(
        dir.path(),
        "db.secret.yaml",
        "path: /var/lib/vigil/state.db\nbusy_timeout_ms: 1500\n",
        0o600,
    );

    let parsed: DbSecrets = secrets::load(&path).expect("valid secrets file");
    assert_eq!(parsed.path, PathBuf::from("/var/lib/vigil/state.db"));
    assert_eq!(parsed.busy_timeout_ms, 1500);
}

#[test]
fn busy_timeout_has_a_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_secret(dir.path(), "db.secret.yaml", "path: /tmp/x.db\n", 0o600);

    let parsed: DbSecrets = secrets::load(&path).unwrap();
    assert_eq!(parsed.busy_timeout_ms, 5000);
}

#[test]
fn group_readable_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_secret(dir.path(), "db.secret.yaml", "path: /tmp/x.db\n", 0o640);

    let err = secrets::load::<DbSecrets>(&path).expect_err("0640 must be rejected");
    let msg = err.to_string();
    assert!(
        msg.contains("permission bits"),
        "message must mention permission bits, got: {msg}"
    );
    assert!(msg.contains("640"), "message should show the mode, got: {msg}");
}

#[test]
fn wrong_suffix_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_secret(dir.path(), "db.yaml", "path: /tmp/x.db\n", 0o600);

    let err = secrets::load::<DbSecrets>(&path).expect_err("name must be rejected");
    assert!(err.to_string().contains(".secret.yaml"));
}

#[test]
fn directories_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dir.secret.yaml");
    fs::create_dir(&path).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).unwrap();

    let err = secrets::load::<DbSecrets>(&path).expect_err("directory must be rejected");
    assert!(err.to_string().contains("not a regular file"));
}

#[test]
fn unparseable_contents_are_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_secret(dir.path(), "db.secret.yaml", ": not yaml : [", 0o600);

    assert!(secrets::load::<DbSecrets>(&path).is_err());
}
