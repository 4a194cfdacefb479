use async_trait::async_trait;
use crate::error::ChatResult;
use crate::history::KeyValueStore;
use redis::{ Client, AsyncCommands };

pub struct RedisKeyValueStore {
    client: Client,
}

impl RedisKeyValueStore {
    pub fn new(host: &str) -> ChatResult<Self> {
        Ok(Self {
            client: Client::open(host)?,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> ChatResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> ChatResult<()> {
        let mut conn = self.get_connection().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }
}
