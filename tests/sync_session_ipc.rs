use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollbookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn expect_ok(resp: &serde_json::Value, what: &str) -> serde_json::Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        what,
        resp
    );
    resp.get("result").cloned().unwrap_or(json!(null))
}

fn error_code(resp: &serde_json::Value) -> &str {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn login_sync_and_photo_flow_over_memory_backend() {
    let workspace = temp_dir("rollbook-sync-flow");
    let png = workspace.join("face.png");
    std::fs::write(&png, [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a]).expect("write png fixture");
    let txt = workspace.join("notes.txt");
    std::fs::write(&txt, b"not a picture").expect("write txt fixture");
    let jpeg = workspace.join("face2.jpeg");
    std::fs::write(&jpeg, [0xff, 0xd8, 0xff]).expect("write jpeg fixture");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let mut seq = 0u32;
    let mut call = |stdin: &mut ChildStdin,
                    reader: &mut BufReader<ChildStdout>,
                    method: &str,
                    params: serde_json::Value| {
        seq += 1;
        request(stdin, reader, &seq.to_string(), method, params)
    };

    let resp = call(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    expect_ok(&resp, "workspace.select");

    // Login is meaningless before a backend exists.
    let resp = call(
        &mut stdin,
        &mut reader,
        "session.login",
        json!({ "loginId": "grp", "password": "pw" }),
    );
    assert_eq!(error_code(&resp), "not_configured");

    let resp = call(
        &mut stdin,
        &mut reader,
        "sync.configure",
        json!({
            "backend": "memory",
            "accounts": { "grp": { "password": "pw", "name": "우리교회" } },
        }),
    );
    expect_ok(&resp, "sync.configure");

    // Credential validation before any remote lookup.
    let resp = call(
        &mut stdin,
        &mut reader,
        "session.login",
        json!({ "loginId": "a.b", "password": "pw" }),
    );
    assert_eq!(error_code(&resp), "validation_failed");
    let resp = call(
        &mut stdin,
        &mut reader,
        "session.login",
        json!({ "loginId": "nobody", "password": "pw" }),
    );
    assert_eq!(error_code(&resp), "unknown_account");
    let resp = call(
        &mut stdin,
        &mut reader,
        "session.login",
        json!({ "loginId": "grp", "password": "wrong" }),
    );
    assert_eq!(error_code(&resp), "wrong_password");

    let resp = call(
        &mut stdin,
        &mut reader,
        "session.login",
        json!({ "loginId": "grp", "password": "pw" }),
    );
    let session = expect_ok(&resp, "session.login");
    assert_eq!(session.pointer("/session/loginId"), Some(&json!("grp")));
    assert_eq!(session.pointer("/session/displayName"), Some(&json!("우리교회")));
    let group_uid = session
        .pointer("/session/groupUid")
        .and_then(|v| v.as_str())
        .expect("groupUid was auto-provisioned")
        .to_string();
    assert!(!group_uid.is_empty());

    let resp = call(&mut stdin, &mut reader, "state.open", json!({ "grade": "1" }));
    let opened = expect_ok(&resp, "state.open");
    assert_eq!(opened.pointer("/remote/configured"), Some(&json!(true)));
    assert_eq!(opened.pointer("/remote/subscribed"), Some(&json!(true)));
    assert_eq!(
        opened.pointer("/scope/groupId").and_then(|v| v.as_str()),
        Some(group_uid.as_str())
    );

    let resp = call(
        &mut stdin,
        &mut reader,
        "members.add",
        json!({ "name": "김민", "role": "student" }),
    );
    let member_id = expect_ok(&resp, "members.add")
        .get("memberId")
        .and_then(|v| v.as_str())
        .expect("memberId")
        .to_string();

    // The write queue drains synchronously against the memory backend.
    let resp = call(&mut stdin, &mut reader, "sync.status", json!({}));
    let status = expect_ok(&resp, "sync.status");
    assert_eq!(status.get("configured"), Some(&json!(true)));
    assert_eq!(status.get("subscribed"), Some(&json!(true)));
    assert_eq!(status.get("pendingWrites"), Some(&json!(0)));
    assert_eq!(status.get("lastError"), Some(&json!(null)));

    // Our own write comes back through the subscription.
    let resp = call(&mut stdin, &mut reader, "sync.poll", json!({}));
    let polled = expect_ok(&resp, "sync.poll");
    assert!(
        polled.get("events").and_then(|v| v.as_u64()).unwrap_or(0) >= 1,
        "expected at least one delivery: {}",
        polled
    );
    let people = polled
        .pointer("/state/people")
        .and_then(|v| v.as_array())
        .expect("people in delivered state");
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].get("id"), Some(&json!(member_id)));

    // Non-image uploads are rejected before touching storage.
    let resp = call(
        &mut stdin,
        &mut reader,
        "photo.upload",
        json!({ "memberId": member_id, "path": txt.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "validation_failed");

    let resp = call(
        &mut stdin,
        &mut reader,
        "photo.upload",
        json!({ "memberId": member_id, "path": png.to_string_lossy() }),
    );
    let uploaded = expect_ok(&resp, "photo.upload png");
    let png_path = uploaded.get("path").and_then(|v| v.as_str()).expect("path");
    assert_eq!(
        png_path,
        format!("groups/{}/students/{}.png", group_uid, member_id)
    );
    assert!(uploaded
        .get("url")
        .and_then(|v| v.as_str())
        .expect("url")
        .starts_with("memory://"));

    // Re-uploading replaces the object; the key follows the new extension.
    let resp = call(
        &mut stdin,
        &mut reader,
        "photo.upload",
        json!({ "memberId": member_id, "path": jpeg.to_string_lossy() }),
    );
    let replaced = expect_ok(&resp, "photo.upload jpeg");
    assert_eq!(
        replaced.get("path").and_then(|v| v.as_str()),
        Some(format!("groups/{}/students/{}.jpeg", group_uid, member_id).as_str())
    );

    let resp = call(
        &mut stdin,
        &mut reader,
        "photo.delete",
        json!({ "memberId": member_id }),
    );
    expect_ok(&resp, "photo.delete");

    // Logout tears the subscription down with the session.
    let resp = call(&mut stdin, &mut reader, "session.logout", json!({}));
    expect_ok(&resp, "session.logout");
    let resp = call(&mut stdin, &mut reader, "sync.status", json!({}));
    let status = expect_ok(&resp, "sync.status after logout");
    assert_eq!(status.get("subscribed"), Some(&json!(false)));
    let resp = call(&mut stdin, &mut reader, "session.restore", json!({}));
    let restored = expect_ok(&resp, "session.restore after logout");
    assert_eq!(restored.get("session"), Some(&json!(null)));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn session_survives_daemon_restart() {
    let workspace = temp_dir("rollbook-session-restart");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    expect_ok(&resp, "workspace.select");
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "sync.configure",
        json!({
            "backend": "memory",
            "accounts": { "grp": { "password": "pw", "name": "1반" } },
        }),
    );
    expect_ok(&resp, "sync.configure");
    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "session.login",
        json!({ "loginId": "grp", "password": "pw" }),
    );
    let session = expect_ok(&resp, "session.login");
    let group_uid = session
        .pointer("/session/groupUid")
        .and_then(|v| v.as_str())
        .expect("groupUid")
        .to_string();

    // Exit without logging out.
    drop(stdin);
    let _ = child.wait();

    // The cached session is enough to restore identity; the remote backend
    // is gone with the old process and does not need to be back for this.
    let (mut child2, mut stdin2, mut reader2) = spawn_sidecar();
    let resp = request(
        &mut stdin2,
        &mut reader2,
        "r1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    expect_ok(&resp, "workspace.select (restart)");
    let resp = request(&mut stdin2, &mut reader2, "r2", "session.restore", json!({}));
    let restored = expect_ok(&resp, "session.restore (restart)");
    assert_eq!(restored.pointer("/session/loginId"), Some(&json!("grp")));
    assert_eq!(
        restored.pointer("/session/groupUid").and_then(|v| v.as_str()),
        Some(group_uid.as_str())
    );

    drop(stdin2);
    let _ = child2.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
