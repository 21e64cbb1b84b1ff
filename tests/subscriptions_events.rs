use serde_json::{json, Value};
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
    let exe = env!("CARGO_BIN_EXE_kalamsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn kalamsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

/// Sends one request and returns its response with every event line that
/// arrived ahead of it.
fn request_with_events(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> (Value, Vec<Value>) {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut events = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read line");
        assert!(!line.trim().is_empty(), "stream ended waiting for {}", method);
        let value: Value = serde_json::from_str(line.trim()).expect("parse line");
        if value.get("event").is_some() {
            events.push(value);
            continue;
        }
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
        return (value, events);
    }
}

#[test]
fn snapshots_are_written_before_the_response_that_caused_them() {
    let data_dir = temp_dir("kalams-subscriptions");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let (resp, events) = request_with_events(
        &mut stdin,
        &mut reader,
        "c",
        "store.connect",
        json!({ "projectId": "kalams-subs", "apiKey": "k", "dataDir": data_dir.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], json!(true), "{}", resp);
    assert!(events.is_empty());

    let (opened, events) = request_with_events(
        &mut stdin,
        &mut reader,
        "o",
        "subscriptions.open",
        json!({ "collection": "families" }),
    );
    assert_eq!(opened["ok"], json!(true), "{}", opened);
    let sub_id = opened["result"]["subscriptionId"].as_str().expect("id").to_string();
    assert_eq!(events.len(), 1, "initial snapshot");
    assert_eq!(events[0]["event"], json!("collection.snapshot"));
    assert_eq!(events[0]["subscriptionId"], json!(sub_id));
    assert_eq!(events[0]["collection"], json!("families"));
    assert_eq!(events[0]["docs"], json!([]));

    let (created, events) = request_with_events(
        &mut stdin,
        &mut reader,
        "f1",
        "families.create",
        json!({ "record": { "familyName": "Ansari", "members": 4 } }),
    );
    assert_eq!(created["ok"], json!(true));
    assert_eq!(events.len(), 1);
    let docs = events[0]["docs"].as_array().expect("docs");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["familyName"], json!("Ansari"));
    assert_eq!(docs[0]["id"], created["result"]["id"]);

    // Writes to other collections do not reach this subscription.
    let (_, events) = request_with_events(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "record": { "name": "Zara", "center": "Kurla" } }),
    );
    assert!(events.is_empty());

    let (closed, _) = request_with_events(
        &mut stdin,
        &mut reader,
        "x",
        "subscriptions.close",
        json!({ "subscriptionId": sub_id }),
    );
    assert_eq!(closed["ok"], json!(true));

    let (_, events) = request_with_events(
        &mut stdin,
        &mut reader,
        "f2",
        "families.create",
        json!({ "record": { "familyName": "Shaikh" } }),
    );
    assert!(events.is_empty(), "no events after close: {:?}", events);

    let (again, _) = request_with_events(
        &mut stdin,
        &mut reader,
        "x2",
        "subscriptions.close",
        json!({ "subscriptionId": sub_id }),
    );
    assert_eq!(again["error"]["code"], json!("not_found"));

    let (unknown, _) = request_with_events(
        &mut stdin,
        &mut reader,
        "u",
        "subscriptions.open",
        json!({ "collection": "donations" }),
    );
    assert_eq!(unknown["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn disconnect_drops_open_subscriptions() {
    let data_dir = temp_dir("kalams-subscriptions-disconnect");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let params = json!({ "projectId": "kalams-subs", "apiKey": "k", "dataDir": data_dir.to_string_lossy() });

    let _ = request_with_events(&mut stdin, &mut reader, "c", "store.connect", params.clone());
    let (opened, _) = request_with_events(
        &mut stdin,
        &mut reader,
        "o",
        "subscriptions.open",
        json!({ "collection": "women" }),
    );
    let sub_id = opened["result"]["subscriptionId"].clone();

    let _ = request_with_events(&mut stdin, &mut reader, "d", "store.disconnect", json!({}));
    let _ = request_with_events(&mut stdin, &mut reader, "c2", "store.connect", params);

    let (_, events) = request_with_events(
        &mut stdin,
        &mut reader,
        "w",
        "women.create",
        json!({ "record": { "name": "Farah", "skill": "Tailoring", "center": "Kurla" } }),
    );
    assert!(events.is_empty());
    let (closed, _) = request_with_events(
        &mut stdin,
        &mut reader,
        "x",
        "subscriptions.close",
        json!({ "subscriptionId": sub_id }),
    );
    assert_eq!(closed["error"]["code"], json!("not_found"));

    drop(stdin);
    let _ = child.wait();
}
