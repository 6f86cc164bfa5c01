//! Redis-backed counter store.
//!
//! Each counter lives in its own integer key so that a single `INCRBY`
//! mutates it atomically and a single `MGET` reads every counter without a
//! torn view. Change notifications come from Redis keyspace notifications.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `{namespace}:{name}` | Integer | Current occupancy of counter `name` |
//! | `__keyspace@{db}__:{namespace}:*` | Pub/sub pattern | One message per mutation |
//!
//! The server must publish keyspace events for string commands
//! (`notify-keyspace-events` containing `K` and `$`).

use std::collections::BTreeMap;

use fred::prelude::*;
use fred::types::config::ReconnectPolicy;
use futures::{FutureExt as _, StreamExt as _};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::StoreError;
use crate::store::{ChangeStream, CounterStore, StoreFuture};

/// Background connection task of the subscriber client.
type ConnectionTask = JoinHandle<Result<(), fred::error::Error>>;

/// Reconnect attempts for the command client; zero retries forever.
const RECONNECT_MAX_ATTEMPTS: u32 = 0;
/// First reconnect delay in milliseconds.
const RECONNECT_MIN_DELAY_MS: u32 = 100;
/// Ceiling on the reconnect delay in milliseconds.
const RECONNECT_MAX_DELAY_MS: u32 = 30_000;
/// Backoff multiplier between reconnect attempts.
const RECONNECT_MULTIPLIER: u32 = 2;

/// Counter store backed by a Redis-compatible server.
///
/// Holds two connections: a command client shared by increments and reads,
/// and a dedicated subscriber client that carries the keyspace
/// notifications. The subscription can be consumed only once.
pub struct RedisCounterStore {
    client: Client,
    subscriber: Client,
    connection: Mutex<Option<ConnectionTask>>,
    namespace: String,
    database: u8,
}

impl RedisCounterStore {
    /// Connect to Redis at the given URL.
    ///
    /// The URL follows the Redis URL scheme: `redis://host:port/db`. The
    /// database number selects the keyspace notification channel.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed or the
    /// namespace is empty.
    /// Returns [`StoreError::Redis`] if either connection fails.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, StoreError> {
        if namespace.is_empty() {
            return Err(StoreError::Config(String::from(
                "store namespace must not be empty",
            )));
        }

        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Redis URL: {e}")))?;
        let database = config.database.unwrap_or(0);

        let (command, notifications) = client_builders(config);

        let client = command.build()?;
        let _command_task = client.init().await?;

        let subscriber = notifications.build()?;
        let connection = subscriber.init().await?;

        info!(database, namespace, "Connected to Redis");
        Ok(Self {
            client,
            subscriber,
            connection: Mutex::new(Some(connection)),
            namespace: namespace.to_owned(),
            database,
        })
    }

    /// The Redis key holding counter `name`.
    pub fn key(&self, name: &str) -> String {
        format!("{}:{name}", self.namespace)
    }

    /// The keyspace notification pattern covering every counter key.
    pub fn notification_pattern(&self) -> String {
        format!("{}*", self.channel_prefix())
    }

    fn channel_prefix(&self) -> String {
        format!("__keyspace@{}__:{}:", self.database, self.namespace)
    }

    /// Overwrite a counter without going through [`CounterStore::increment`].
    ///
    /// Used to seed a fresh store; still triggers a keyspace notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if the write fails.
    pub async fn set(&self, name: &str, value: i64) -> Result<(), StoreError> {
        let key = self.key(name);
        let _: () = self
            .client
            .set(key.as_str(), value.to_string().as_str(), None, None, false)
            .await?;
        Ok(())
    }

    /// Delete the keys of the given counters.
    ///
    /// **WARNING:** destructive. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if a delete fails.
    pub async fn clear(&self, names: &[String]) -> Result<(), StoreError> {
        for name in names {
            let _: u32 = self.client.del(self.key(name).as_str()).await?;
        }
        Ok(())
    }

    /// Return a reference to the underlying command [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

impl CounterStore for RedisCounterStore {
    fn increment<'a>(&'a self, name: &'a str, delta: i64) -> StoreFuture<'a, i64> {
        async move {
            let key = self.key(name);
            let value: i64 = self.client.incr_by(key.as_str(), delta).await?;
            Ok(value)
        }
        .boxed()
    }

    fn batch_read<'a>(&'a self, names: &'a [String]) -> StoreFuture<'a, BTreeMap<String, i64>> {
        async move {
            let mut result = BTreeMap::new();
            if names.is_empty() {
                return Ok(result);
            }

            let keys: Vec<String> = names.iter().map(|name| self.key(name)).collect();
            let values: Vec<Option<String>> = self.client.mget(keys.clone()).await?;

            for ((name, key), raw) in names.iter().zip(&keys).zip(values) {
                if let Some(raw) = raw {
                    result.insert(name.clone(), parse_counter(key, &raw)?);
                }
            }
            Ok(result)
        }
        .boxed()
    }

    fn read_one<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<i64>> {
        async move {
            let key = self.key(name);
            let value: Option<String> = self.client.get(key.as_str()).await?;
            value.map(|raw| parse_counter(&key, &raw)).transpose()
        }
        .boxed()
    }

    fn subscribe_changes(&self) -> StoreFuture<'_, ChangeStream> {
        async move {
            let connection = self.connection.lock().await.take().ok_or_else(|| {
                StoreError::Unavailable(String::from(
                    "change subscription already consumed; reconnect to resubscribe",
                ))
            })?;

            // Register the receiver before subscribing so no message slips
            // through between the two.
            let rx = self.subscriber.message_rx();
            let pattern = self.notification_pattern();
            let _: () = self.subscriber.psubscribe(pattern.as_str()).await?;
            info!(pattern, "Subscribed to keyspace notifications");

            let prefix = self.channel_prefix();
            let stream = futures::stream::unfold(
                (rx, connection, prefix),
                |(mut rx, mut connection, prefix)| async move {
                    loop {
                        tokio::select! {
                            received = rx.recv() => match received {
                                Ok(message) => {
                                    let channel: &str = &message.channel;
                                    if let Some(name) = counter_from_channel(&prefix, channel) {
                                        trace!(counter = name, "Keyspace notification");
                                        return Some((name, (rx, connection, prefix)));
                                    }
                                    debug!(channel, "Ignoring unrelated pub/sub message");
                                }
                                Err(RecvError::Lagged(skipped)) => {
                                    warn!(skipped, "Keyspace notification receiver lagged");
                                }
                                Err(RecvError::Closed) => {
                                    error!("Keyspace notification channel closed");
                                    return None;
                                }
                            },
                            finished = &mut connection => {
                                match finished {
                                    Ok(Ok(())) => error!("Subscriber connection closed"),
                                    Ok(Err(e)) => error!(error = %e, "Subscriber connection failed"),
                                    Err(e) => error!(error = %e, "Subscriber connection task aborted"),
                                }
                                return None;
                            }
                        }
                    }
                },
            );
            Ok(stream.boxed())
        }
        .boxed()
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// Extract the counter name from a keyspace notification channel.
///
/// Channel format: `__keyspace@{db}__:{namespace}:{name}`.
fn counter_from_channel(prefix: &str, channel: &str) -> Option<String> {
    channel
        .strip_prefix(prefix)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
}

/// Parse a stored counter value.
fn parse_counter(key: &str, raw: &str) -> Result<i64, StoreError> {
    raw.trim().parse::<i64>().map_err(|e| StoreError::InvalidValue {
        key: key.to_owned(),
        reason: format!("not an integer ({raw:?}): {e}"),
    })
}

/// Builders for the command client and the subscriber client.
///
/// The command client reconnects with exponential backoff, so a dropped
/// connection costs the calls made while it is down and nothing after. The
/// subscriber has no policy: once its connection is lost the change stream
/// ends and stays ended.
fn client_builders(config: Config) -> (Builder, Builder) {
    let mut command = Builder::from_config(config.clone());
    command.set_policy(ReconnectPolicy::new_exponential(
        RECONNECT_MAX_ATTEMPTS,
        RECONNECT_MIN_DELAY_MS,
        RECONNECT_MAX_DELAY_MS,
        RECONNECT_MULTIPLIER,
    ));
    (command, Builder::from_config(config))
}
