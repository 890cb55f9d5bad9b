//! Redis list queue.
//!
//! Producers `LPUSH` onto the list and the flusher `RPOP`s, so the right end
//! of the list always holds the oldest item. Both commands are atomic on the
//! server, so concurrent consumers never receive the same item.

use std::sync::Mutex;
use std::time::Duration;

use ::redis::{Client, Connection};
use tracing::instrument;

use super::{Popped, UsageQueue};
use crate::error::QueueError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedisQueue {
    client: Client,
    /// `None` after the connection dropped; the next command reconnects.
    conn: Mutex<Option<Connection>>,
    key: String,
}

impl RedisQueue {
    /// Connect to `url` and verify the server answers `PING`.
    pub fn connect(url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let unavailable = |e: ::redis::RedisError| QueueError::Unavailable(e.to_string());

        let client = Client::open(url).map_err(unavailable)?;
        let mut conn = client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(unavailable)?;
        ::redis::cmd("PING")
            .query::<String>(&mut conn)
            .map_err(unavailable)?;

        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
            key: key.into(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run a command on the shared connection, reconnecting first if the
    /// previous command lost it.
    fn with_conn<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut Connection) -> ::redis::RedisResult<T>,
    {
        let mut guard = self.conn.lock().expect("lock poisoned");
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.client.get_connection_with_timeout(CONNECT_TIMEOUT)?,
        };

        match f(&mut conn) {
            Ok(value) => {
                *guard = Some(conn);
                Ok(value)
            }
            Err(e) => {
                if !(e.is_connection_dropped() || e.is_io_error()) {
                    *guard = Some(conn);
                }
                Err(e.into())
            }
        }
    }
}

impl UsageQueue for RedisQueue {
    /// Non-blocking `RPOP`; a nil reply means the list is empty.
    #[instrument(skip(self), fields(queue = %self.key))]
    fn pop_oldest(&self) -> Result<Popped, QueueError> {
        let popped = self.with_conn(|conn| {
            ::redis::cmd("RPOP")
                .arg(&self.key)
                .query::<Option<Vec<u8>>>(conn)
        })?;
        Ok(popped.map_or(Popped::Empty, Popped::Item))
    }

    #[instrument(skip(self, payload), fields(queue = %self.key))]
    fn push(&self, payload: &[u8]) -> Result<(), QueueError> {
        self.with_conn(|conn| {
            ::redis::cmd("LPUSH")
                .arg(&self.key)
                .arg(payload)
                .query::<i64>(conn)
        })?;
        Ok(())
    }

    fn len(&self) -> Result<usize, QueueError> {
        self.with_conn(|conn| ::redis::cmd("LLEN").arg(&self.key).query::<usize>(conn))
    }

    fn name(&self) -> &str {
        "redis"
    }
}
