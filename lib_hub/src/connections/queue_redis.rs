//! # Redis Queue Implementation
//!
//! The relay queue is a Redis list: publishers `RPUSH`, the relay `BLPOP`s,
//! which gives FIFO order. Redis calls run on the blocking pool with a
//! dedicated connection, so a `BLPOP` parked on an empty list never ties up a
//! runtime worker.
//!
//! Any broker error drops the connection. The next call reconnects after an
//! exponential backoff delay and the state is published as `BrokerHealth`.

use std::time::Duration;

use redis::{Client, Commands, Connection, RedisResult};
use tokio::sync::watch;
use tokio::task;

use crate::connections::backoff::{Backoff, BackoffPolicy};
use crate::connections::broker_health::BrokerHealth;
use crate::core::queue::MessageQueue;
use crate::error::HubError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Extra socket read allowance on top of the BLPOP wait window.
const READ_MARGIN: Duration = Duration::from_secs(5);
const MIN_POP_TIMEOUT: Duration = Duration::from_secs(1);

/// A handler for the relay's Redis list.
pub struct RedisQueue {
    /// The internal Redis client instance.
    client: Client,
    queue_name: String,
    pop_timeout: Duration,
    conn: Option<Connection>,
    backoff: Backoff,
    health: watch::Sender<BrokerHealth>,
}

impl RedisQueue {
    /// Creates a RedisQueue from a connection string. No connection is opened
    /// until the first `pop` or `push`.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1/").
    /// * `queue_name` - The list key, e.g. "Hub-messages".
    /// * `pop_timeout` - How long one BLPOP waits before it is re-issued. Kept
    ///   finite so a shutdown never waits on a parked blocking thread.
    /// * `policy` - Reconnect delays.
    pub fn new(
        url: &str,
        queue_name: impl Into<String>,
        pop_timeout: Duration,
        policy: BackoffPolicy,
    ) -> Result<Self, HubError> {
        // Open the client; this only validates the URL
        let client = Client::open(url)?;
        let pop_timeout = pop_timeout.max(MIN_POP_TIMEOUT);
        let (health, _) = watch::channel(BrokerHealth::Connecting);
        Ok(Self {
            client,
            queue_name: queue_name.into(),
            pop_timeout,
            conn: None,
            backoff: Backoff::new(policy),
            health,
        })
    }

    /// Subscribes to broker health changes.
    pub fn health(&self) -> watch::Receiver<BrokerHealth> {
        self.health.subscribe()
    }

    /// The list key this queue reads and writes.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Takes the open connection, connecting (with backoff) if there is none.
    async fn connection(&mut self) -> Result<Connection, HubError> {
        loop {
            if let Some(conn) = self.conn.take() {
                return Ok(conn);
            }

            let client = self.client.clone();
            let read_timeout = self.pop_timeout + READ_MARGIN;
            let attempt = task::spawn_blocking(move || -> RedisResult<Connection> {
                let conn = client.get_connection_with_timeout(CONNECT_TIMEOUT)?;
                conn.set_read_timeout(Some(read_timeout))?;
                Ok(conn)
            })
            .await?;

            match attempt {
                Ok(conn) => {
                    tracing::info!(queue = %self.queue_name, "Connected to redis server");
                    self.health.send_replace(BrokerHealth::Connected);
                    return Ok(conn);
                }
                Err(e) => self.wait_before_retry(e.to_string()).await?,
            }
        }
    }

    /// Records a failure and sleeps for the next backoff delay.
    async fn wait_before_retry(&mut self, last_error: String) -> Result<(), HubError> {
        match self.backoff.next_delay() {
            Some(delay) => {
                tracing::warn!(
                    attempt = self.backoff.attempt(),
                    retry_in_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Redis error, reconnecting"
                );
                self.health.send_replace(BrokerHealth::Reconnecting {
                    attempt: self.backoff.attempt(),
                    retry_in_ms: delay.as_millis() as u64,
                    last_error,
                });
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => {
                tracing::error!(error = %last_error, "Redis unreachable, giving up");
                self.health.send_replace(BrokerHealth::Unavailable { last_error });
                Err(HubError::RetriesExhausted(self.backoff.attempt()))
            }
        }
    }

    /// Puts a connection back after a successful round trip.
    fn keep(&mut self, conn: Connection) {
        self.backoff.reset();
        self.conn = Some(conn);
    }
}

impl MessageQueue for RedisQueue {
    async fn pop(&mut self) -> Result<Option<String>, HubError> {
        let mut conn = self.connection().await?;
        let key = self.queue_name.clone();
        let wait_secs = self.pop_timeout.as_secs_f64();

        let (conn, result) = task::spawn_blocking(move || {
            let result: RedisResult<Option<(String, String)>> = conn.blpop(&key, wait_secs);
            (conn, result)
        })
        .await?;

        match result {
            Ok(item) => {
                self.keep(conn);
                Ok(item.map(|(_, element)| element))
            }
            Err(e) => {
                // The failed connection is dropped here; the next call reconnects.
                drop(conn);
                let error = HubError::from(e);
                self.wait_before_retry(error.to_string()).await?;
                Err(error)
            }
        }
    }

    async fn push(&mut self, item: String) -> Result<(), HubError> {
        // Command failures go through the same backoff as connect failures.
        loop {
            let mut conn = self.connection().await?;
            let key = self.queue_name.clone();
            let value = item.clone();

            let (conn, result) = task::spawn_blocking(move || {
                let result: RedisResult<i64> = conn.rpush(&key, value);
                (conn, result)
            })
            .await?;

            let last_error = match result {
                Ok(length) => {
                    tracing::debug!(queue = %self.queue_name, length, "Pushed item");
                    self.keep(conn);
                    return Ok(());
                }
                Err(e) => e.to_string(),
            };
            drop(conn);
            self.wait_before_retry(last_error).await?;
        }
    }
}
