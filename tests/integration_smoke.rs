/// Integration smoke tests for mini-docker.
///
/// These require:
/// 1. Running on Linux.
/// 2. Running as root (or with sufficient privileges for namespaces + cgroups).
/// 3. An Alpine minirootfs extracted at `tests/rootfs/` (or the path set in
///    `MINI_DOCKER_TEST_ROOTFS`).
///
/// In CI, the workflow downloads and extracts the rootfs before running
/// these tests. Locally:
///
/// ```bash
/// mkdir -p tests/rootfs
/// curl -L https://dl-cdn.alpinelinux.org/alpine/v3.20/releases/x86_64/alpine-minirootfs-3.20.3-x86_64.tar.gz \
///     | tar -xz -C tests/rootfs
/// ```
///
/// Tests are skipped (not failed) if not running as root or if the rootfs
/// is missing.
use std::path::Path;
use std::process::{Command, Stdio};

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mini-docker"))
}

fn rootfs_path() -> String {
    std::env::var("MINI_DOCKER_TEST_ROOTFS").unwrap_or_else(|_| "tests/rootfs".to_string())
}

fn can_run() -> bool {
    if cfg!(not(target_os = "linux")) {
        eprintln!("SKIP: not on Linux");
        return false;
    }
    if !nix::unistd::geteuid().is_root() {
        eprintln!("SKIP: not running as root (euid != 0)");
        return false;
    }
    let rfs = rootfs_path();
    if !Path::new(&rfs).join("bin").exists() {
        eprintln!("SKIP: rootfs not found at {rfs}/bin");
        return false;
    }
    true
}

#[test]
fn smoke_run_and_logs() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = bin()
        .args(["run", "--rootfs", &rootfs, "--", "/bin/sh", "-c", "echo hi"])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.success(),
        "run should succeed, exit code: {:?}, stderr: {stderr}",
        output.status.code()
    );

    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    assert_eq!(id.len(), 12, "printed id should be a 12-char hex id: {id}");

    let logs = bin()
        .args(["logs", &id])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker logs");
    let log_stdout = String::from_utf8_lossy(&logs.stdout);
    assert!(log_stdout.contains("hi"), "logs should contain 'hi', got: '{log_stdout}'");
}

#[test]
fn smoke_exit_code_propagation() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = bin()
        .args(["run", "--rootfs", &rootfs, "--", "/bin/sh", "-c", "exit 42"])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker run");

    assert!(output.status.success(), "run itself should exit 0 once the container is launched");

    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();

    // Give the container a moment to finish, then inspect its recorded exit code.
    std::thread::sleep(std::time::Duration::from_millis(500));
    let inspect = bin()
        .args(["inspect", &id])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker inspect");
    let json: serde_json::Value = serde_json::from_slice(&inspect.stdout).unwrap();
    assert_eq!(json["exit_code"], 42);
}

#[test]
fn smoke_ps_shows_stopped_after_command_exits() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let run_output = bin()
        .args(["run", "--rootfs", &rootfs, "--", "/bin/true"])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker run");
    assert!(run_output.status.success());
    std::thread::sleep(std::time::Duration::from_millis(500));

    let ps_output = bin()
        .arg("ps")
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker ps");
    let ps_stdout = String::from_utf8_lossy(&ps_output.stdout);
    assert!(
        ps_stdout.contains("stopped"),
        "ps should show stopped container, got:\n{ps_stdout}"
    );
}

#[test]
fn smoke_rm_removes_container() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let run_output = bin()
        .args(["run", "--rootfs", &rootfs, "--", "/bin/true"])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker run");
    let id = String::from_utf8_lossy(&run_output.stdout).trim().to_string();
    std::thread::sleep(std::time::Duration::from_millis(500));

    let rm_output = bin()
        .args(["rm", &id])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker rm");
    assert!(rm_output.status.success(), "rm should succeed");

    let ps_output = bin()
        .arg("ps")
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker ps");
    let ps_stdout = String::from_utf8_lossy(&ps_output.stdout);
    let line_count = ps_stdout.lines().count();
    assert_eq!(line_count, 1, "ps should only show the header after rm, got:\n{ps_stdout}");
}

#[test]
fn smoke_memory_limit_does_not_crash_launch() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = bin()
        .args([
            "run",
            "--rootfs",
            &rootfs,
            "--memory",
            "64M",
            "--",
            "/bin/sh",
            "-c",
            "echo mem_ok",
        ])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker run with a memory limit");

    assert!(
        output.status.success(),
        "should succeed with a memory limit, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn smoke_refuses_root_as_rootfs() {
    if !can_run() {
        return;
    }
    let tmp_root = tempfile::tempdir().unwrap();

    let output = bin()
        .args(["run", "--rootfs", "/", "--", "/bin/true"])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker run");

    assert!(!output.status.success(), "should refuse '/' as rootfs");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("refusing"),
        "error message should warn about using '/' as rootfs, got: {stderr}"
    );
}

#[test]
fn smoke_pod_shares_network_namespace() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let pod_create = bin()
        .args(["pod", "create", "--name", "smoke-pod"])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker pod create");
    assert!(pod_create.status.success(), "pod create should succeed");
    let pod_id = String::from_utf8_lossy(&pod_create.stdout).trim().to_string();

    let pod_start = bin()
        .args(["pod", "start", &pod_id])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker pod start");
    assert!(pod_start.status.success(), "pod start should succeed");

    let run_output = bin()
        .args([
            "run",
            "--rootfs",
            &rootfs,
            "--pod",
            &pod_id,
            "--",
            "/bin/sh",
            "-c",
            "hostname",
        ])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker run with --pod");
    assert!(
        run_output.status.success(),
        "run attached to a pod should succeed, stderr: {}",
        String::from_utf8_lossy(&run_output.stderr)
    );

    let pod_stop = bin()
        .args(["pod", "stop", &pod_id])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker pod stop");
    assert!(pod_stop.status.success(), "pod stop should succeed");
}

#[test]
fn smoke_logs_follow_streams_output_written_after_it_starts() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let run_output = bin()
        .args([
            "run",
            "--rootfs",
            &rootfs,
            "--",
            "/bin/sh",
            "-c",
            "echo first; sleep 1; echo second",
        ])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .output()
        .expect("failed to run mini-docker run");
    assert!(run_output.status.success());
    let id = String::from_utf8_lossy(&run_output.stdout).trim().to_string();

    let mut follow = bin()
        .args(["logs", "--follow", &id])
        .env("MINI_DOCKER_ROOT", tmp_root.path())
        .stdout(Stdio::piped())
        .spawn()
        .expect("failed to spawn mini-docker logs --follow");

    // Give the container time to print "second" before we stop following.
    std::thread::sleep(std::time::Duration::from_millis(2000));
    follow.kill().expect("failed to kill logs --follow");
    let output = follow.wait_with_output().expect("failed to collect logs --follow output");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("first"), "follow should include pre-existing output, got:\n{stdout}");
    assert!(stdout.contains("second"), "follow should include output written after it started, got:\n{stdout}");
}
