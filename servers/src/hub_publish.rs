//! Pushes one envelope onto the hub queue, the way a backend publisher does.
//!
//! ```text
//! hub_publish --conn abc123 --msg '{"msg":"hello"}'
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{Map, Value};

use lib_hub::configs::config_hub::{redis_url, DEFAULT_QUEUE};
use lib_hub::core::TARGET_FIELD;
use lib_hub::{BackoffPolicy, Envelope, MessageQueue, RedisQueue};

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish a message to a hub connection through Redis")]
struct Args {
    /// Target connection id (e.g. "abc123" or "publisher/pub1").
    #[arg(long)]
    conn: String,

    /// JSON object to deliver.
    #[arg(long)]
    msg: String,

    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    redis_port: u16,

    #[arg(long, env = "redisPwd", default_value = "", hide_env_values = true)]
    redis_password: String,

    #[arg(long, env = "HUB_QUEUE", default_value = DEFAULT_QUEUE)]
    queue: String,
}

/// Parses `msg` as a JSON object and addresses it to `conn`.
fn build_envelope(conn: &str, msg: &str) -> Result<Envelope> {
    if conn.is_empty() {
        bail!("--conn must not be empty");
    }
    let mut payload: Map<String, Value> = match serde_json::from_str(msg)
        .context("--msg is not valid JSON")?
    {
        Value::Object(map) => map,
        other => bail!("--msg must be a JSON object, got {other}"),
    };
    // The target always comes from --conn.
    payload.remove(TARGET_FIELD);
    Ok(Envelope::new(conn, payload))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let envelope = build_envelope(&args.conn, &args.msg)?;
    let url = redis_url(&args.redis_host, args.redis_port, &args.redis_password)?;
    let policy = BackoffPolicy::unbounded(Duration::from_millis(200), Duration::from_secs(2))
        .with_max_retries(3);

    let mut queue = RedisQueue::new(&url, args.queue, Duration::from_secs(1), policy)?;
    queue.push(envelope.encode()?).await?;

    println!("Published to {} on {}", args.conn, queue.queue_name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_inserted_into_the_payload_object() {
        let envelope = build_envelope("abc123", r#"{"msg":"hello","boa-conn":"other"}"#).unwrap();
        let value: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"boa-conn": "abc123", "msg": "hello"}));
    }

    #[test]
    fn non_object_messages_are_rejected() {
        assert!(build_envelope("abc123", "[1,2]").is_err());
        assert!(build_envelope("abc123", "not json").is_err());
        assert!(build_envelope("", "{}").is_err());
    }
}
