//! Connects to a running hub as one client and prints the delivery rate it
//! observes, once per report interval.

use chrono::{Duration, Utc};
use clap::Parser;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Hub base URL
    #[clap(short, long, default_value = "ws://localhost:3010")]
    url: String,

    /// Connection id to register under
    #[clap(short, long, default_value = "throughput-probe")]
    conn: String,

    /// Report interval in minutes
    #[clap(short, long, default_value_t = 1)]
    report_interval_minutes: u64,
}

#[derive(Default)]
struct Stats {
    global_timestamps: VecDeque<chrono::DateTime<Utc>>,
    /// Keyed by the payload's `type` field, when present.
    kind_timestamps: HashMap<String, VecDeque<chrono::DateTime<Utc>>>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let stats = Arc::new(Mutex::new(Stats::default()));

    let stats_reporter = Arc::clone(&stats);
    let report_interval_seconds = args.report_interval_minutes.max(1) * 60;
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(report_interval_seconds)).await;
            let one_minute_ago = Utc::now() - Duration::minutes(1);

            let mut data = stats_reporter.lock().unwrap();

            while data.global_timestamps.front().is_some_and(|&t| t < one_minute_ago) {
                data.global_timestamps.pop_front();
            }
            let global_rate = data.global_timestamps.len();

            let mut rates: Vec<(String, usize)> = Vec::new();
            for (kind, dq) in data.kind_timestamps.iter_mut() {
                while dq.front().is_some_and(|&t| t < one_minute_ago) {
                    dq.pop_front();
                }
                if !dq.is_empty() {
                    rates.push((kind.clone(), dq.len()));
                }
            }
            rates.sort_by(|a, b| b.1.cmp(&a.1));

            let report = rates
                .iter()
                .map(|(k, r)| format!("{}: {} msg/min", k, r))
                .collect::<Vec<_>>()
                .join(", ");

            println!("\n----- 1-Minute Summary -----");
            println!("Global rate: {} msg/min", global_rate);
            println!("Types: {}", if report.is_empty() { "No data" } else { &report });
            println!("----------------------------\n");
        }
    });

    let url = format!("{}/{}", args.url.trim_end_matches('/'), args.conn);
    println!("Connecting to {}...", url);
    let (ws_stream, _) = connect_async(url.as_str()).await.expect("Failed to connect");
    let (_write, mut read) = ws_stream.split();

    while let Some(Ok(msg)) = read.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(parsed) = serde_json::from_str::<Value>(&text) else { continue };
        if parsed.get("connected").is_some() {
            println!("Registered as {}. Press Ctrl+C to stop.", parsed["connId"]);
            continue;
        }

        let kind = parsed
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("untyped")
            .to_string();
        let now = Utc::now();
        let mut data = stats.lock().unwrap();
        data.global_timestamps.push_back(now);
        data.kind_timestamps.entry(kind).or_default().push_back(now);
    }
}
