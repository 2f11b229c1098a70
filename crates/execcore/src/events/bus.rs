use super::{StatusMessage, StatusPublisher};
use crate::{ChannelError, NodeType};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

/// Time-boxed grant to read one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionToken {
    pub token: Uuid,
    pub topic: String,
    pub expires_at: DateTime<Utc>,
}

impl SubscriptionToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-process realtime channel: one broadcast channel per topic.
pub struct EventBus {
    capacity: usize,
    token_ttl: Duration,
    topics: RwLock<HashMap<String, broadcast::Sender<StatusMessage>>>,
    tokens: Mutex<HashMap<Uuid, SubscriptionToken>>,
}

impl EventBus {
    pub fn new(capacity: usize, token_ttl: Duration) -> Self {
        Self {
            capacity,
            token_ttl,
            topics: RwLock::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe directly to a topic, bypassing token checks.
    pub async fn subscribe_topic(&self, topic: &str) -> broadcast::Receiver<StatusMessage> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Issue a token granting access to the topic of `node_type`.
    pub async fn issue_token(&self, node_type: NodeType) -> SubscriptionToken {
        let token = SubscriptionToken {
            token: Uuid::new_v4(),
            topic: node_type.topic().to_string(),
            expires_at: Utc::now() + self.token_ttl,
        };
        self.tokens.lock().await.insert(token.token, token.clone());
        tracing::debug!("Issued subscription token for topic {}", token.topic);
        token
    }

    /// Redeem a token for a receiver on its topic.
    pub async fn subscribe(
        &self,
        token: &Uuid,
    ) -> Result<(String, broadcast::Receiver<StatusMessage>), ChannelError> {
        let topic = {
            let mut tokens = self.tokens.lock().await;
            let grant = tokens.get(token).ok_or(ChannelError::UnknownToken)?;
            if grant.is_expired(Utc::now()) {
                tokens.remove(token);
                return Err(ChannelError::TokenExpired);
            }
            grant.topic.clone()
        };
        let receiver = self.subscribe_topic(&topic).await;
        Ok((topic, receiver))
    }

    /// Drop tokens whose expiry has passed.
    pub async fn purge_expired_tokens(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.tokens.lock().await;
        let before = tokens.len();
        tokens.retain(|_, grant| !grant.is_expired(now));
        before - tokens.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000, Duration::minutes(5))
    }
}

#[async_trait]
impl StatusPublisher for EventBus {
    async fn publish(&self, topic: &str, message: StatusMessage) {
        let topics = self.topics.read().await;
        match topics.get(topic) {
            Some(sender) => {
                // no live receivers is not an error
                let _ = sender.send(message);
            }
            None => {
                tracing::trace!("No subscribers on {}, dropping status for {}", topic, message.node_id);
            }
        }
    }
}
