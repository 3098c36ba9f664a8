mod access;
mod backup;
mod calc;
mod db;
mod ipc;

use std::io::{self, BufRead, Write};

use tracing_subscriber::EnvFilter;

fn main() {
    // Logs go to stderr; stdout is reserved for the IPC channel.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply with an id we never parsed.
                tracing::warn!(error = %e, "dropping malformed request line");
                let _ = writeln!(
                    stdout,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
