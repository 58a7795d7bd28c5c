//! Redis-backed [`AtomicStore`] shared by every server instance.

use std::{collections::HashMap, time::Duration};

use futures::future::BoxFuture;
use redis::{
    Client, Cmd, FromRedisValue, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use thiserror::Error;
use tracing::info;

use crate::dao::{
    atomic::{AtomicStore, Counter, VoteOutcome},
    storage::{StorageError, StorageResult},
};

const DELETE_IF_EQUALS: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

const REPLACE_IF_EQUALS: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
";

// KEYS: gate, voters, then one key per counter. ARGV: voter, then for KEYS[i] (i >= 3)
// the hash field in ARGV[i - 1]; an empty field targets a plain integer key.
// Returns -1 when the gate is gone, 0 for a duplicate voter, 1 once recorded.
const RECORD_VOTE: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
  return 0
end
for i = 3, #KEYS do
  local value
  if ARGV[i - 1] == '' then
    value = redis.call('GET', KEYS[i])
  else
    value = redis.call('HGET', KEYS[i], ARGV[i - 1])
  end
  if value and not string.match(value, '^-?%d+$') then
    return redis.error_reply('ERR counter ' .. KEYS[i] .. ' is not an integer')
  end
end
redis.call('SADD', KEYS[2], ARGV[1])
for i = 3, #KEYS do
  if ARGV[i - 1] == '' then
    redis.call('INCR', KEYS[i])
  else
    redis.call('HINCRBY', KEYS[i], ARGV[i - 1], 1)
  end
end
return 1
";

pub type RedisResult<T> = std::result::Result<T, RedisStoreError>;

#[derive(Debug, Error)]
pub enum RedisStoreError {
    #[error("failed to parse Redis URL")]
    InvalidUrl {
        #[source]
        source: RedisError,
    },
    #[error("failed to connect to Redis")]
    Connect {
        #[source]
        source: RedisError,
    },
    #[error("Redis command `{command}` failed")]
    Command {
        command: &'static str,
        #[source]
        source: RedisError,
    },
}

impl From<RedisStoreError> for StorageError {
    fn from(err: RedisStoreError) -> Self {
        let message = err.to_string();
        StorageError::unavailable(message, err)
    }
}

/// [`AtomicStore`] talking to Redis through an auto-reconnecting connection manager.
#[derive(Clone)]
pub struct RedisAtomicStore {
    connection: ConnectionManager,
    delete_if_equals: Script,
    replace_if_equals: Script,
    record_vote: Script,
}

impl RedisAtomicStore {
    /// Open a managed connection to `url`.
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(3)
            .set_connection_timeout(Duration::from_secs(2));

        let client = Client::open(url).map_err(|source| RedisStoreError::InvalidUrl { source })?;
        let connection = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(|source| RedisStoreError::Connect { source })?;
        info!("connected to Redis");

        Ok(Self {
            connection,
            delete_if_equals: Script::new(DELETE_IF_EQUALS),
            replace_if_equals: Script::new(REPLACE_IF_EQUALS),
            record_vote: Script::new(RECORD_VOTE),
        })
    }

    fn query<T>(&self, command: &'static str, cmd: Cmd) -> BoxFuture<'static, StorageResult<T>>
    where
        T: FromRedisValue + Send + 'static,
    {
        let mut connection = self.connection.clone();
        Box::pin(async move {
            cmd.query_async::<T>(&mut connection)
                .await
                .map_err(|source| StorageError::from(RedisStoreError::Command { command, source }))
        })
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl AtomicStore for RedisAtomicStore {
    fn get(&self, key: String) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query("GET", cmd)
    }

    fn set(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        self.query("SET", cmd)
    }

    fn set_if_absent(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let reply = self.query::<Option<String>>("SET", cmd);
        Box::pin(async move { reply.await.map(|reply| reply.is_some()) })
    }

    fn delete(&self, keys: Vec<String>) -> BoxFuture<'static, StorageResult<u64>> {
        if keys.is_empty() {
            return Box::pin(async { Ok(0) });
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        self.query("DEL", cmd)
    }

    fn delete_if_equals(
        &self,
        key: String,
        expected: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut connection = self.connection.clone();
        let script = self.delete_if_equals.clone();
        Box::pin(async move {
            script
                .key(key)
                .arg(expected)
                .invoke_async(&mut connection)
                .await
                .map(|removed: i64| removed == 1)
                .map_err(|source| {
                    StorageError::from(RedisStoreError::Command {
                        command: "EVALSHA delete_if_equals",
                        source,
                    })
                })
        })
    }

    fn replace_if_equals(
        &self,
        key: String,
        expected: String,
        value: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut connection = self.connection.clone();
        let script = self.replace_if_equals.clone();
        Box::pin(async move {
            script
                .key(key)
                .arg(expected)
                .arg(value)
                .invoke_async(&mut connection)
                .await
                .map(|replaced: i64| replaced == 1)
                .map_err(|source| {
                    StorageError::from(RedisStoreError::Command {
                        command: "EVALSHA replace_if_equals",
                        source,
                    })
                })
        })
    }

    fn expire(&self, key: String, ttl: Duration) -> BoxFuture<'static, StorageResult<bool>> {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(millis(ttl));
        self.query("PEXPIRE", cmd)
    }

    fn exists(&self, key: String) -> BoxFuture<'static, StorageResult<bool>> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        self.query("EXISTS", cmd)
    }

    fn set_add(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<bool>> {
        let mut cmd = redis::cmd("SADD");
        cmd.arg(key).arg(member);
        self.query("SADD", cmd)
    }

    fn set_remove(
        &self,
        key: String,
        member: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut cmd = redis::cmd("SREM");
        cmd.arg(key).arg(member);
        self.query("SREM", cmd)
    }

    fn set_contains(
        &self,
        key: String,
        member: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut cmd = redis::cmd("SISMEMBER");
        cmd.arg(key).arg(member);
        self.query("SISMEMBER", cmd)
    }

    fn set_members(&self, key: String) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(key);
        self.query("SMEMBERS", cmd)
    }

    fn set_len(&self, key: String) -> BoxFuture<'static, StorageResult<u64>> {
        let mut cmd = redis::cmd("SCARD");
        cmd.arg(key);
        self.query("SCARD", cmd)
    }

    fn hash_set_all(
        &self,
        key: String,
        fields: Vec<(String, String)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        if fields.is_empty() {
            return Box::pin(async { Ok(()) });
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let reply = self.query::<i64>("HSET", cmd);
        Box::pin(async move { reply.await.map(|_| ()) })
    }

    fn hash_get_all(
        &self,
        key: String,
    ) -> BoxFuture<'static, StorageResult<HashMap<String, String>>> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(key);
        self.query("HGETALL", cmd)
    }

    fn record_vote(
        &self,
        gate: String,
        voters: String,
        voter: String,
        counters: Vec<Counter>,
    ) -> BoxFuture<'static, StorageResult<VoteOutcome>> {
        let mut connection = self.connection.clone();
        let script = self.record_vote.clone();
        Box::pin(async move {
            let mut invocation = script.prepare_invoke();
            invocation.key(gate).key(voters).arg(voter);
            for counter in counters {
                match counter {
                    Counter::Key(key) => {
                        invocation.key(key).arg("");
                    }
                    Counter::Field { key, field } => {
                        invocation.key(key).arg(field);
                    }
                }
            }
            let reply: redis::RedisResult<i64> = invocation.invoke_async(&mut connection).await;
            match reply {
                Ok(1) => Ok(VoteOutcome::Recorded),
                Ok(0) => Ok(VoteOutcome::Duplicate),
                Ok(_) => Ok(VoteOutcome::Closed),
                Err(source) => Err(StorageError::from(RedisStoreError::Command {
                    command: "EVALSHA record_vote",
                    source,
                })),
            }
        })
    }

    fn ping(&self) -> BoxFuture<'static, StorageResult<()>> {
        let cmd = redis::cmd("PING");
        let reply = self.query::<String>("PING", cmd);
        Box::pin(async move { reply.await.map(|_| ()) })
    }
}
