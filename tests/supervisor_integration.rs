//! Integration tests for the supervisor loop
//!
//! The host is a shell script run by /bin/sh, so `$0` is the host entry
//! point, `$1` the update path and `$2` the supervisor version.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use std::time::{Duration, Instant};

use hostvisor::layout::Layout;
use hostvisor::supervisor::{LaunchError, CONFIGURE_ONLY_ARG};
use hostvisor::{PlatformTraits, Supervisor, SupervisorConfig, SupervisorError};
use tokio_util::sync::CancellationToken;

const HOST_ENTRY: &str = "host.sh";

static RECORDS: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        RECORDS
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

fn capture_logs() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);
    });
}

fn logged(level: log::Level, needle: &str) -> bool {
    RECORDS
        .lock()
        .unwrap()
        .iter()
        .any(|(l, msg)| *l == level && msg.contains(needle))
}

struct TestHost {
    dir: tempfile::TempDir,
    layout: Layout,
}

impl TestHost {
    fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut layout = Layout::new(dir.path(), HOST_ENTRY);
        layout.prepare().unwrap();
        fs::create_dir_all(layout.payload_dir()).unwrap();
        fs::write(layout.host_entry_path(), script).unwrap();
        Self { dir, layout }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> SupervisorConfig {
        let mut config = SupervisorConfig::new("/bin/sh", self.layout.clone());
        config.version = "9.9.9".to_string();
        config.platform = PlatformTraits {
            user_signals: false,
            post_exit_settle: None,
        };
        config
    }

    fn storage_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.layout.storage_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn read(&self, name: &str) -> String {
        fs::read_to_string(self.root().join(name)).unwrap()
    }
}

/// Wait until the host writes a non-empty file into the root
async fn wait_for_file(path: PathBuf) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(content) = fs::read_to_string(&path) {
            if content.ends_with('\n') {
                return content.trim_end().to_string();
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}", path.display());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn run(config: SupervisorConfig) -> Result<(), SupervisorError> {
    Supervisor::new(config).run(&CancellationToken::new()).await
}

#[tokio::test]
async fn test_restart_applies_staged_update() {
    let host = TestHost::new(
        r#"
if [ -f ran ]; then exit 0; fi
touch ran
mkdir "$1"
cp "$0" "$1/"
echo updated > "$1/marker.txt"
exit 1
"#,
    );

    run(host.config()).await.unwrap();

    let payload = host.layout.payload_dir();
    assert_eq!(fs::read_to_string(payload.join("marker.txt")).unwrap(), "updated\n");
    assert!(payload.join(HOST_ENTRY).is_file());
    // Staged update moved into place, old payload deleted
    assert_eq!(host.storage_entries(), vec!["Default".to_string()]);
}

#[tokio::test]
async fn test_restart_without_update_relaunches() {
    let script = r#"
echo "$1" >> paths.txt
if [ -f second ]; then exit 0; fi
touch second
exit 1
"#;
    let host = TestHost::new(script);

    run(host.config()).await.unwrap();

    let paths = host.read("paths.txt");
    let paths: Vec<&str> = paths.lines().collect();
    assert_eq!(paths.len(), 2);
    assert_ne!(paths[0], paths[1]);
    assert_eq!(
        fs::read_to_string(host.layout.host_entry_path()).unwrap(),
        script
    );
    assert_eq!(host.storage_entries(), vec!["Default".to_string()]);
}

#[tokio::test]
async fn test_complete_execution_stops() {
    let host = TestHost::new(
        r#"
printf '%s\n' "$@" > args.txt
echo run >> runs.txt
exit 0
"#,
    );
    let mut config = host.config();
    config.host_args = vec!["--flag".into(), "value".into()];

    run(config).await.unwrap();

    assert_eq!(host.read("runs.txt").lines().count(), 1);
    let args = host.read("args.txt");
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(args.len(), 4);
    assert!(args[0].starts_with(host.layout.storage_dir().to_str().unwrap()));
    assert_eq!(&args[1..], ["9.9.9", "--flag", "value"]);
}

#[tokio::test]
async fn test_error_propagates_diagnostics() {
    let host = TestHost::new(
        r#"
printf 'database unreachable' > "$1"
echo "$1" > update_path.txt
exit 2
"#,
    );

    let result = run(host.config()).await;

    match result {
        Err(SupervisorError::HostError(diagnostics)) => {
            assert_eq!(diagnostics, "database unreachable")
        }
        other => panic!("expected host error, got {:?}", other),
    }
    let update_path = host.read("update_path.txt");
    assert!(!Path::new(update_path.trim_end()).exists());
}

#[tokio::test]
async fn test_unknown_exit_code_is_crash() {
    let host = TestHost::new("exit 42\n");
    let result = run(host.config()).await;
    assert!(matches!(result, Err(SupervisorError::Crashed { code: 42 })));
}

#[tokio::test]
async fn test_configure_only_runs_once() {
    let host = TestHost::new(
        r#"
printf '%s\n' "$@" > args.txt
echo run >> runs.txt
mkdir "$1"
cp "$0" "$1/"
echo updated > "$1/marker.txt"
exit 1
"#,
    );
    let mut config = host.config();
    config.configure_only = true;

    run(config).await.unwrap();

    assert_eq!(host.read("runs.txt").lines().count(), 1);
    assert!(host.read("args.txt").lines().any(|a| a == CONFIGURE_ONLY_ARG));
    // Staged update was never applied
    assert!(!host.layout.payload_dir().join("marker.txt").exists());
}

#[tokio::test]
async fn test_missing_host_entry_is_fatal() {
    let host = TestHost::new("exit 0\n");
    fs::remove_file(host.layout.host_entry_path()).unwrap();
    let result = run(host.config()).await;
    assert!(matches!(result, Err(SupervisorError::Layout(_))));
}

#[tokio::test]
async fn test_launch_failure_is_fatal() {
    let host = TestHost::new("exit 0\n");
    let mut config = host.config();
    config.runtime = PathBuf::from("/nonexistent/runtime-12345");
    let result = run(config).await;
    assert!(matches!(
        result,
        Err(SupervisorError::Launch(LaunchError::Spawn { .. }))
    ));
}

#[tokio::test]
async fn test_cancel_signals_host_through_sentinel() {
    let host = TestHost::new(
        r#"
echo "$1" > update_path.txt
while [ ! -f "$1" ]; do sleep 0.05; done
exit 0
"#,
    );
    let supervisor = Supervisor::new(host.config());
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { supervisor.run(&cancel).await }
    });

    let update_path = wait_for_file(host.root().join("update_path.txt")).await;
    let started = Instant::now();
    cancel.cancel();

    task.await.unwrap().unwrap();
    // Host saw the sentinel and left well before the grace period
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!Path::new(&update_path).exists());
}

#[tokio::test]
async fn test_cancel_kills_host_after_grace_period() {
    let host = TestHost::new(
        r#"
trap '' TERM
echo "$1" > update_path.txt
while true; do sleep 0.05; done
"#,
    );
    let mut config = host.config();
    config.grace_period = Duration::from_millis(500);
    let supervisor = Supervisor::new(config);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { supervisor.run(&cancel).await }
    });

    let update_path = PathBuf::from(wait_for_file(host.root().join("update_path.txt")).await);
    cancel.cancel();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(update_path.is_file(), "shutdown sentinel not written");
    assert!(!task.is_finished());

    // Killed during shutdown is a quiet stop
    task.await.unwrap().unwrap();
    assert!(!update_path.exists());
}

#[tokio::test]
async fn test_cancel_does_not_clobber_staged_update() {
    capture_logs();
    let host = TestHost::new(
        r#"
mkdir "$1"
echo "$1" > update_path.txt
while true; do sleep 0.05; done
"#,
    );
    let mut config = host.config();
    config.grace_period = Duration::from_millis(500);
    let supervisor = Supervisor::new(config);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { supervisor.run(&cancel).await }
    });

    let update_path = PathBuf::from(wait_for_file(host.root().join("update_path.txt")).await);
    cancel.cancel();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(update_path.is_dir(), "staged update replaced by sentinel");
    assert!(logged(
        log::Level::Warn,
        &format!(
            "Cancellation requested while update directory {} exists",
            update_path.display()
        )
    ));

    task.await.unwrap().unwrap();
    // Half-staged update discarded with the rest of the invocation
    assert!(!update_path.exists());
    assert_eq!(host.storage_entries(), vec!["Default".to_string()]);
}

#[tokio::test]
async fn test_cancelled_before_start_launches_nothing() {
    let host = TestHost::new("echo run >> runs.txt\nexit 0\n");
    let cancel = CancellationToken::new();
    cancel.cancel();

    Supervisor::new(host.config()).run(&cancel).await.unwrap();
    assert!(!host.root().join("runs.txt").exists());
}
