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

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
        if value.get("event").is_some() {
            continue;
        }
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
        return value;
    }
}

fn connect(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, data_dir: &PathBuf) {
    let resp = request(
        stdin,
        reader,
        "connect",
        "store.connect",
        json!({ "projectId": "kalams-volunteers", "apiKey": "k", "dataDir": data_dir.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], json!(true), "{}", resp);
}

fn names(resp: &Value) -> Vec<String> {
    resp["result"]["items"]
        .as_array()
        .expect("items")
        .iter()
        .filter_map(|v| v["name"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn approving_a_volunteer_moves_it_between_filtered_views() {
    let data_dir = temp_dir("kalams-volunteer-approve");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    connect(&mut stdin, &mut reader, &data_dir);

    let meera = request(
        &mut stdin,
        &mut reader,
        "c1",
        "volunteers.create",
        json!({ "record": { "name": "Meera", "email": "meera@example.org", "skills": "Teaching" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "c2",
        "volunteers.create",
        json!({ "record": { "name": "Kabir", "email": "kabir@example.org" } }),
    );
    let meera_id = meera["result"]["id"].as_str().expect("id").to_string();

    let pending = request(&mut stdin, &mut reader, "p0", "volunteers.list", json!({ "status": "pending" }));
    assert_eq!(names(&pending), vec!["Meera", "Kabir"]);
    assert_eq!(pending["result"]["counts"]["pending"], json!(2));

    let approved = request(
        &mut stdin,
        &mut reader,
        "ok",
        "volunteers.setStatus",
        json!({ "id": meera_id, "status": "approved" }),
    );
    assert_eq!(approved["ok"], json!(true), "{}", approved);
    assert_eq!(approved["result"]["status"], json!("approved"));
    assert_eq!(approved["result"]["revision"], json!(2));

    let pending = request(&mut stdin, &mut reader, "p1", "volunteers.list", json!({ "status": "pending" }));
    assert_eq!(names(&pending), vec!["Kabir"]);
    let approved_view = request(&mut stdin, &mut reader, "a1", "volunteers.list", json!({ "status": "approved" }));
    assert_eq!(names(&approved_view), vec!["Meera"]);
    let all = request(&mut stdin, &mut reader, "all", "volunteers.list", json!({ "status": "all" }));
    assert_eq!(all["result"]["count"], json!(2));
    assert_eq!(
        all["result"]["counts"],
        json!({ "total": 2, "pending": 1, "approved": 1, "rejected": 0 })
    );

    // A stale revision is refused and leaves the record alone.
    let stale = request(
        &mut stdin,
        &mut reader,
        "stale",
        "volunteers.update",
        json!({ "id": meera_id, "patch": { "phone": "555" }, "expectedRevision": 1 }),
    );
    assert_eq!(stale["error"]["code"], json!("conflict"));
    assert_eq!(stale["error"]["details"]["actualRevision"], json!(2));

    let bad = request(
        &mut stdin,
        &mut reader,
        "bad",
        "volunteers.setStatus",
        json!({ "id": meera_id, "status": "maybe" }),
    );
    assert_eq!(bad["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn csv_export_keeps_column_order_and_imports_back() {
    let data_dir = temp_dir("kalams-volunteer-csv");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    connect(&mut stdin, &mut reader, &data_dir);

    let _ = request(
        &mut stdin,
        &mut reader,
        "c1",
        "volunteers.create",
        json!({ "record": {
            "name": "Meera, Jr.",
            "email": "meera@example.org",
            "phone": "98200 00000",
            "skills": "Teaching, Art",
            "availability": "Weekends",
            "experience": "2 years",
            "status": "approved",
            "registrationDate": "2025-01-15"
        } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "c2",
        "volunteers.create",
        json!({ "record": { "name": "Kabir", "email": "kabir@example.org", "registrationDate": "2025-02-01" } }),
    );

    let exported = request(&mut stdin, &mut reader, "x", "volunteers.exportCsv", json!({}));
    assert_eq!(exported["ok"], json!(true), "{}", exported);
    assert_eq!(exported["result"]["rowsExported"], json!(2));
    let path = PathBuf::from(exported["result"]["path"].as_str().expect("path"));
    assert_eq!(path, data_dir.join("kalams_volunteers.csv"));

    let text = std::fs::read_to_string(&path).expect("read csv");
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("Name,Email,Phone,Skills,Availability,Experience,Status,Registration Date")
    );
    assert_eq!(
        lines.next(),
        Some("\"Meera, Jr.\",meera@example.org,98200 00000,\"Teaching, Art\",Weekends,2 years,approved,2025-01-15")
    );

    let filtered_path = data_dir.join("approved.csv");
    let filtered = request(
        &mut stdin,
        &mut reader,
        "x2",
        "volunteers.exportCsv",
        json!({ "path": filtered_path.to_string_lossy(), "status": "approved" }),
    );
    assert_eq!(filtered["result"]["rowsExported"], json!(1));

    // Import into a separate store.
    let other_dir = temp_dir("kalams-volunteer-csv-import");
    connect(&mut stdin, &mut reader, &other_dir);
    let imported = request(
        &mut stdin,
        &mut reader,
        "imp",
        "volunteers.importCsv",
        json!({ "path": path.to_string_lossy() }),
    );
    assert_eq!(imported["ok"], json!(true), "{}", imported);
    assert_eq!(imported["result"]["imported"], json!(2));

    let list = request(&mut stdin, &mut reader, "l", "volunteers.list", json!({}));
    let first = &list["result"]["items"][0];
    assert_eq!(first["name"], json!("Meera, Jr."));
    assert_eq!(first["skills"], json!("Teaching, Art"));
    assert_eq!(first["status"], json!("approved"));
    assert_eq!(first["registrationDate"], json!("2025-01-15"));
    assert_eq!(list["result"]["items"][1]["status"], json!("pending"));

    let bogus = other_dir.join("bogus.csv");
    std::fs::write(&bogus, "Email,Name\nx@y.z,X\n").expect("write bogus");
    let refused = request(
        &mut stdin,
        &mut reader,
        "bogus",
        "volunteers.importCsv",
        json!({ "path": bogus.to_string_lossy() }),
    );
    assert_eq!(refused["error"]["code"], json!("bad_csv"));

    drop(stdin);
    let _ = child.wait();
}
