// Integration tests for the `loopinit` binary.
//
// - Each --emit target runs the minimal pass set and writes to stdout or -o
// - Diagnostics go to stderr with exit code 1; I/O failures exit with 2
// - --work-amount overrides reach the emitted parameters

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn loopinit_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_loopinit"))
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn kernel(name: &str) -> PathBuf {
    project_root().join("kernels").join(name)
}

fn run(args: &[&str], source: &Path) -> Output {
    Command::new(loopinit_binary())
        .args(args)
        .arg(source)
        .output()
        .expect("failed to run loopinit")
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "loopinit failed.\nstderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn emit_params_is_default() {
    let text = stdout(&run(&[], &kernel("broadcast.kern")));
    insta::assert_snapshot!(text, @r"
    loop 0: work_amount = 4
        entry %a.in[0]: dim 0, incremented, data_size 4, ptr_increment 0, finalization_offset 0
        entry %b.in[0]: dim 2, incremented, data_size 4, ptr_increment 32, finalization_offset -128
        exit %st.out[0]: dim 2, incremented, data_size 4, ptr_increment 32, finalization_offset -128
    ");
}

#[test]
fn emit_json() {
    let text = stdout(&run(&["--emit", "json"], &kernel("dynamic_tail.kern")));
    let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    let loops = value["loops"].as_array().unwrap();
    assert_eq!(loops.len(), 2);
    assert_eq!(loops[0]["id"], 0);
    assert!(loops[0]["work_amount"].is_null());
    assert_eq!(loops[1]["work_amount"], 3);
    assert_eq!(loops[1]["entry_points"][0]["shape"], "[2, 3, ?]");
    assert_eq!(loops[1]["entry_points"][0]["data_size"], 2);
}

/// `--emit ir` stops after lowering, so loop records are still unresolved,
/// and the listing parses back into the same kernel.
#[test]
fn emit_ir_round_trips() {
    let listing = stdout(&run(&["--emit", "ir"], &kernel("buffer_nest.kern")));
    assert!(listing.contains("work_amount = ?"));
    assert!(listing.contains("Buffer("));

    let tmp = std::env::temp_dir().join(format!("loopinit_ir_{}.kern", std::process::id()));
    std::fs::write(&tmp, &listing).unwrap();
    let again = stdout(&run(&["--emit", "ir"], &tmp));
    let _ = std::fs::remove_file(&tmp);
    assert_eq!(listing, again);
}

#[test]
fn emit_build_info() {
    let text = stdout(&run(&["--emit", "build-info"], &kernel("broadcast.kern")));
    let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    let hash = value["source_hash"].as_str().unwrap();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(value["compiler_version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn work_amount_override() {
    let text = stdout(&run(
        &["--work-amount", "0=9", "--work-amount", "1=3"],
        &kernel("dynamic_tail.kern"),
    ));
    assert!(text.contains("loop 0: work_amount = 9"), "{text}");
    assert!(text.contains("loop 1: work_amount = 3"), "{text}");
}

#[test]
fn malformed_override_is_a_usage_error() {
    let output = run(&["--work-amount", "zero"], &kernel("broadcast.kern"));
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("expected LOOP=N"), "{stderr}");
}

#[test]
fn output_file() {
    let out = std::env::temp_dir().join(format!("loopinit_out_{}.txt", std::process::id()));
    let output = run(
        &["-o", out.to_str().unwrap()],
        &kernel("broadcast.kern"),
    );
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    let written = std::fs::read_to_string(&out).unwrap();
    let _ = std::fs::remove_file(&out);
    assert!(written.starts_with("loop 0: work_amount = 4"));
}

#[test]
fn diagnostics_exit_one() {
    let tmp = std::env::temp_dir().join(format!("loopinit_bad_{}.kern", std::process::id()));
    std::fs::write(&tmp, "%p = Parameter() : f32[4]\n%x = Frobnicate(%p) : f32[4]\n").unwrap();
    let output = run(&[], &tmp);
    let _ = std::fs::remove_file(&tmp);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[E0100]"), "{stderr}");
    assert!(stderr.contains("2:"), "{stderr}");
}

#[test]
fn missing_source_exits_two() {
    let output = run(&[], Path::new("/nonexistent/kernel.kern"));
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn verbose_reports_passes() {
    let output = run(&["--verbose"], &kernel("broadcast.kern"));
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    for pass in ["lower", "init_loops", "verify"] {
        assert!(
            stderr.contains(&format!("loopinit: {pass} complete")),
            "missing `{pass}` in:\n{stderr}"
        );
    }
}
