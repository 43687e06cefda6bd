//! End-to-end handshake against a real companion process.
//!
//! The companion is a shell script that checks the auth token, records its
//! working directory, writes the ready marker, and then keeps running.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use floodtwin_core::launch::SystemSpawner;
use floodtwin_core::state::LaunchState;
use floodtwin_core::watcher::HandshakeOutcome;
use floodtwin_test_utils::CompanionSandbox;

fn install_script_companion(sandbox: &CompanionSandbox) {
    let coord = sandbox.coordination_dir();
    let cwd_record = sandbox.root().join("companion-cwd.txt");
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$(cat '{coord}/session_auth.txt')\" = \"AUTHORIZED\" ]; then\n\
         \x20 pwd > '{cwd}'\n\
         \x20 : > '{coord}/ready.txt'\n\
         fi\n\
         exec sleep 30\n",
        coord = coord.display(),
        cwd = cwd_record.display(),
    );

    let exe = sandbox.executable();
    fs::write(&exe, script).unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn script_companion_completes_handshake() {
    let sandbox = CompanionSandbox::fast();
    install_script_companion(&sandbox);

    let coordinator = sandbox.coordinator(Arc::new(SystemSpawner));
    let mut events = coordinator.subscribe();

    let handle = coordinator.launch(sandbox.executable()).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("handshake should finish")
        .unwrap();
    assert_eq!(event.outcome, HandshakeOutcome::Ready);
    assert_eq!(event.pid, handle.pid);
    assert!(sandbox.handshake_files_absent());

    let recorded = fs::read_to_string(sandbox.root().join("companion-cwd.txt")).unwrap();
    let expected = sandbox.executable().parent().unwrap().canonicalize().unwrap();
    assert_eq!(Path::new(recorded.trim()).canonicalize().unwrap(), expected);

    assert_eq!(coordinator.state(), LaunchState::Running);
    assert!(coordinator.guard().is_live());

    coordinator.shutdown().await;
    assert!(!coordinator.guard().is_live());
}
