mod calc;
mod chart;
mod config;
mod db;
mod exchange;
mod ipc;
mod legacy;
mod live;
mod models;
mod report;
mod stats;
mod store;
mod workflow;

use std::io::{self, BufRead, Write};

fn write_line(out: &mut impl Write, value: &serde_json::Value) -> io::Result<()> {
    writeln!(out, "{}", value)?;
    out.flush()
}

fn main() {
    // stdout carries the protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("invalid configuration: {:#}", e);
            std::process::exit(2);
        }
    };
    log::info!(
        "kalamsd {} ready ({} centers)",
        env!("CARGO_PKG_VERSION"),
        config.centers.len()
    );
    let mut state = ipc::AppState::new(config);

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin closed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("unparseable request: {}", e);
                let resp = ipc::err("", "bad_json", e.to_string(), None);
                if write_line(&mut stdout, &resp).is_err() {
                    break;
                }
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let mut lines = state.take_events();
        lines.push(resp);
        if lines.iter().any(|l| write_line(&mut stdout, l).is_err()) {
            log::error!("stdout closed; exiting");
            break;
        }
    }
    state.disconnect();
}
