use std::path::Path;

use assert_cmd::Command;
use etherparse::PacketBuilder;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

/// `AC ED 00 05` + TC_STRING "hi".
const JAVA_STRING_HI: [u8; 9] = [0xAC, 0xED, 0x00, 0x05, 0x74, 0x00, 0x02, b'h', b'i'];

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("serialsniff"))
}

fn udp_frame(payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
        .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
        .udp(40000, 9000);
    let mut frame = Vec::<u8>::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).expect("frame");
    frame
}

/// Two length-prefixed objects around one noise payload.
fn write_sample_capture(path: &Path) {
    let mut framed = vec![0xCA, 0xFE, JAVA_STRING_HI.len() as u8];
    framed.extend_from_slice(&JAVA_STRING_HI);
    let frames = [
        udp_frame(&framed),
        udp_frame(&[0x13, 0x37, 0xC0, 0xDE]),
        udp_frame(&framed),
    ];

    let mut output = Vec::new();
    output.extend_from_slice(&0xA1B2C3D4u32.to_le_bytes());
    output.extend_from_slice(&2u16.to_le_bytes());
    output.extend_from_slice(&4u16.to_le_bytes());
    output.extend_from_slice(&0i32.to_le_bytes());
    output.extend_from_slice(&0u32.to_le_bytes());
    output.extend_from_slice(&65535u32.to_le_bytes());
    output.extend_from_slice(&1u32.to_le_bytes());
    for (idx, data) in frames.iter().enumerate() {
        output.extend_from_slice(&(idx as u32).to_le_bytes());
        output.extend_from_slice(&0u32.to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(data);
    }
    std::fs::write(path, output).expect("write capture");
}

fn sample_capture(temp: &TempDir) -> std::path::PathBuf {
    let path = temp.path().join("sample.pcap");
    write_sample_capture(&path);
    path
}

#[test]
fn help_lists_replay() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("replay"));
    cmd().arg("replay").arg("--help").assert().success();
}

#[test]
fn long_version_carries_build_metadata() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("commit:").and(contains("date:")));
}

#[test]
fn missing_input_shows_error_and_hint() {
    let temp = TempDir::new().expect("tempdir");
    let missing = temp.path().join("missing.pcapng");

    cmd()
        .arg("replay")
        .arg(missing)
        .arg("--analysis-out")
        .arg(temp.path().join("analysis.txt"))
        .assert()
        .failure()
        .code(2)
        .stderr(contains("error:").and(contains("hint:")));
}

#[test]
fn unsupported_extension_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    let input = temp.path().join("capture.txt");
    std::fs::write(&input, b"not a capture").expect("write input");

    cmd()
        .arg("replay")
        .arg(input)
        .arg("--raw-out")
        .arg(temp.path().join("raw.txt"))
        .assert()
        .failure()
        .stderr(contains("unsupported input format").and(contains("hint:")));
}

#[test]
fn replay_requires_an_output() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(&temp);

    cmd()
        .arg("replay")
        .arg(input)
        .assert()
        .failure()
        .code(2)
        .stderr(contains("no output selected").and(contains("--analysis-out")));
}

#[test]
fn json_requires_analysis_output() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(&temp);

    cmd()
        .arg("replay")
        .arg(input)
        .arg("--raw-out")
        .arg(temp.path().join("raw.txt"))
        .arg("--json")
        .assert()
        .failure();
}

#[test]
fn replay_writes_raw_and_analysis_outputs() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(&temp);
    let raw = temp.path().join("out").join("raw.txt");
    let analysis = temp.path().join("out").join("analysis.txt");

    cmd()
        .arg("replay")
        .arg(&input)
        .arg("--raw-out")
        .arg(&raw)
        .arg("--analysis-out")
        .arg(&analysis)
        .assert()
        .success()
        .stderr(contains("OK: 3 packets captured"));

    let raw = std::fs::read_to_string(raw).expect("raw output");
    assert_eq!(raw.matches("--- END OF PACKET ---").count(), 3);
    assert!(raw.contains("[UDP] 40000 -> 9000"));

    let analysis = std::fs::read_to_string(analysis).expect("analysis output");
    assert_eq!(
        analysis
            .matches("---------------- END ----------------")
            .count(),
        3
    );
    assert!(analysis.contains("{type: java.lang.String, length found: true, length: 9"));
    assert!(analysis.contains("{type: null, length found: false}: 1"));
    assert!(analysis.contains("{type: java.lang.String, length found: true}: 2"));
}

#[test]
fn replay_writes_json_lines() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(&temp);
    let analysis = temp.path().join("analysis.jsonl");

    cmd()
        .arg("replay")
        .arg(&input)
        .arg("--analysis-out")
        .arg(&analysis)
        .arg("--json")
        .arg("--quiet")
        .assert()
        .success()
        .stderr(contains("OK:").not());

    let text = std::fs::read_to_string(analysis).expect("analysis output");
    let lines: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json"))
        .collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0]["result"]["type"], "java.lang.String");
    assert_eq!(lines[0]["result"]["prefix"], "cafe09");
    assert_eq!(lines[4]["aggregate"]["count"], 2);
}

#[test]
fn glob_with_single_match_is_replayed() {
    let temp = TempDir::new().expect("tempdir");
    sample_capture(&temp);
    let pattern = temp.path().join("sam*.pcap");
    let raw = temp.path().join("raw.txt");

    cmd()
        .arg("replay")
        .arg(pattern)
        .arg("--raw-out")
        .arg(&raw)
        .assert()
        .success();
    assert!(std::fs::read_to_string(raw).expect("raw").contains("END OF PACKET"));
}

#[test]
fn glob_with_multiple_matches_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    write_sample_capture(&temp.path().join("a.pcap"));
    write_sample_capture(&temp.path().join("b.pcap"));

    cmd()
        .arg("replay")
        .arg(temp.path().join("*.pcap"))
        .arg("--raw-out")
        .arg(temp.path().join("raw.txt"))
        .assert()
        .failure()
        .stderr(contains("multiple files match").and(contains("hint:")));
}

#[test]
fn output_must_differ_from_input() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(&temp);

    cmd()
        .arg("replay")
        .arg(&input)
        .arg("--raw-out")
        .arg(&input)
        .assert()
        .failure()
        .stderr(contains("must differ from input"));
}

#[test]
fn invalid_config_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(&temp);
    let config = temp.path().join("config.json");
    std::fs::write(&config, r#"{"pool": {"max_threads": 1}}"#).expect("write config");

    cmd()
        .arg("replay")
        .arg(&input)
        .arg("--raw-out")
        .arg(temp.path().join("raw.txt"))
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(2)
        .stderr(contains("invalid configuration").and(contains("hint:")));
}

#[test]
fn config_file_is_applied() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(&temp);
    let config = temp.path().join("config.json");
    std::fs::write(&config, r#"{"capture": {"snaplen": 14}}"#).expect("write config");
    let raw = temp.path().join("raw.txt");

    cmd()
        .arg("replay")
        .arg(&input)
        .arg("--raw-out")
        .arg(&raw)
        .arg("--config")
        .arg(&config)
        .assert()
        .success();
    let raw = std::fs::read_to_string(raw).expect("raw");
    let headers: Vec<&str> = raw
        .lines()
        .filter(|line| line.starts_with("packet at "))
        .collect();
    assert_eq!(headers.len(), 3);
    assert!(headers.iter().all(|line| line.ends_with("(14 bytes)")));
}

#[cfg(feature = "live")]
#[test]
fn replay_filter_excludes_frames() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(&temp);
    let analysis = temp.path().join("analysis.txt");

    cmd()
        .arg("replay")
        .arg(&input)
        .arg("--filter")
        .arg("tcp")
        .arg("--analysis-out")
        .arg(&analysis)
        .assert()
        .success()
        .stderr(contains("OK: 0 packets captured"));
    assert!(std::fs::read_to_string(analysis).expect("analysis").is_empty());
}

#[test]
fn quiet_silences_info_logs() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(&temp);

    cmd()
        .env_remove("RUST_LOG")
        .arg("replay")
        .arg(&input)
        .arg("--raw-out")
        .arg(temp.path().join("raw.txt"))
        .assert()
        .success()
        .stderr(contains("sniffer started"));

    cmd()
        .env_remove("RUST_LOG")
        .arg("replay")
        .arg(&input)
        .arg("--raw-out")
        .arg(temp.path().join("raw-quiet.txt"))
        .arg("--quiet")
        .assert()
        .success()
        .stderr(predicates::str::is_empty());
}
