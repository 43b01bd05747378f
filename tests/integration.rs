use assert_cmd::Command;
use std::fs::{self, File};
use std::io::prelude::*;
use std::path::Path;

fn read_expected(path: &Path) -> String {
    let mut file = File::open(path).expect("Failed to open expected output file");
    let mut expected = String::new();
    file.read_to_string(&mut expected)
        .expect("Failed to read expected output file");
    expected
}

macro_rules! cminus_test {
    ($name:tt, $code:expr, [$($flag:expr),*]) => {
        #[test]
        fn $name() {
            let path = Path::new("test_data").join(stringify!($name));
            let expected_stdout = read_expected(&path.join("stdout"));
            let expected_stderr = read_expected(&path.join("stderr"));
            let stdin = fs::read_to_string(path.join("stdin")).unwrap_or_default();

            Command::cargo_bin(env!("CARGO_PKG_NAME"))
                .unwrap()
                $(.arg($flag))*
                .arg(path.join("input.cm").to_str().unwrap())
                .write_stdin(stdin)
                .assert()
                .code($code)
                .stdout(expected_stdout)
                .stderr(expected_stderr);
        }
    };

    ($name:tt, $code:expr) => {
        cminus_test!($name, $code, []);
    };
}

cminus_test!(run_fib, 0, ["-r"]);
cminus_test!(run_array_input, 0, ["-r"]);
cminus_test!(bounds_fault, 1, ["-r"]);
cminus_test!(type_errors, 1);
cminus_test!(syntax_error, 1);
cminus_test!(symbol_dump, 0, ["-s"]);
cminus_test!(tree_dump, 0, ["-a"]);

#[test]
fn writes_assembly_to_named_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("fib.tm");
    Command::cargo_bin(env!("CARGO_PKG_NAME"))
        .unwrap()
        .arg("-c")
        .arg("-o")
        .arg(out.to_str().unwrap())
        .arg("test_data/run_fib/input.cm")
        .assert()
        .success()
        .stdout("");

    let listing = fs::read_to_string(&out).unwrap();
    assert!(listing.starts_with("* C-Minus Compilation to TM Code\n"));
    assert!(listing.lines().any(|line| line.ends_with("jump to main loc")));
}

#[test]
fn writes_assembly_to_stdout() {
    let output = Command::cargo_bin(env!("CARGO_PKG_NAME"))
        .unwrap()
        .args(&["-c", "-o", "-", "test_data/tree_dump/input.cm"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let listing = String::from_utf8(output.stdout).unwrap();
    assert!(listing.starts_with("* C-Minus Compilation to TM Code\n"));
    assert!(listing.contains("  0:    LD 6, 0(0)  load gp with maxaddress\n"));
}

#[test]
fn reruns_produce_identical_assembly() {
    let run = || {
        Command::cargo_bin(env!("CARGO_PKG_NAME"))
            .unwrap()
            .args(&["-c", "-o", "-", "test_data/run_array_input/input.cm"])
            .output()
            .unwrap()
            .stdout
    };
    assert_eq!(run(), run());
}

#[test]
fn missing_source_argument_is_a_usage_error() {
    Command::cargo_bin(env!("CARGO_PKG_NAME"))
        .unwrap()
        .assert()
        .failure();
}

#[test]
fn unreadable_source_fails() {
    Command::cargo_bin(env!("CARGO_PKG_NAME"))
        .unwrap()
        .arg("test_data/does_not_exist.cm")
        .assert()
        .code(1);
}
