use anyhow::Result;
use router_core::logging::LogMode;
use serde_json::Value;
use std::io::{self, BufRead};

pub fn run_logs(mode: LogMode) -> Result<()> {
    let stdin = io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        let line = line?;

        if matches!(mode, LogMode::Raw) {
            println!("{line}");
            continue;
        }

        let Ok(json) = serde_json::from_str::<Value>(&line) else {
            println!("{line}");
            continue;
        };

        render_event(&json);
    }

    Ok(())
}

fn is_dispatch_event(event: &Value) -> bool {
    event.get("event").is_some() || event.get("service").is_some()
}

fn render_event(event: &Value) {
    let level = event.get("level").and_then(Value::as_str).unwrap_or("INFO");
    if is_dispatch_event(event) {
        render_dispatch_event(event, level);
    } else {
        render_generic_event(event, level);
    }
}

fn render_generic_event(event: &Value, level: &str) {
    let message = event
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("<no message>");
    let target = event.get("target").and_then(Value::as_str).unwrap_or("");

    if target.is_empty() {
        println!("[{level}] {message}");
    } else {
        println!("[{level}] {message} ({target})");
    }
}

fn render_dispatch_event(event: &Value, level: &str) {
    let name = event.get("event").and_then(Value::as_str).unwrap_or("request");
    let rule = event.get("rule").and_then(Value::as_str);
    let service = event.get("service").and_then(Value::as_str);
    let status = event.get("status").and_then(Value::as_i64);

    print!("[{level}] {name}");
    if let Some(r) = rule {
        print!(" rule={r}");
    }
    if let Some(s) = service {
        print!(" service={s}");
    }
    if let Some(st) = status {
        print!(" status={st}");
    }
    println!();
}
