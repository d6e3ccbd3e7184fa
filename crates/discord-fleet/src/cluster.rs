//! Cross-cluster fan-out.
//!
//! A requester publishes on a shared subject with a private inbox as the reply
//! subject; every cluster, the requester included, answers once. Replies are
//! gathered until the expected number of distinct clusters answered or the
//! timeout fires, so a caller never waits longer than the timeout.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::NatsConfig;
use crate::error::{Error, Result};
use crate::subjects;

/// Fleet-wide questions a cluster can be asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRequest {
    GuildCount,
}

impl ClusterRequest {
    pub fn subject(&self, prefix: &str) -> String {
        match self {
            Self::GuildCount => subjects::cluster::guild_count(prefix),
        }
    }
}

/// Body of a fan-out request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: String,
    pub origin: u32,
}

/// One cluster's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterReply {
    pub cluster_id: u32,
    pub value: u64,
}

pub trait ClusterBroadcast: Send + Sync + 'static {
    /// Ask every cluster. May return fewer than `expected` replies; never
    /// blocks past the implementation's timeout.
    fn broadcast(
        &self,
        request: ClusterRequest,
        expected: usize,
    ) -> impl Future<Output = Result<Vec<ClusterReply>>> + Send;
}

/// Scatter-gather over NATS core request/reply.
#[derive(Clone)]
pub struct NatsClusterBroadcast {
    client: Client,
    prefix: String,
    cluster_id: u32,
    timeout: Duration,
}

/// How a cluster authenticates to the fleet bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatsAuth {
    Anonymous,
    CredentialsFile(String),
    UserPassword { username: String, password: String },
}

impl NatsAuth {
    /// A credentials file wins over a username and password; a username
    /// without a password is ignored.
    pub fn from_config(config: &NatsConfig) -> Self {
        if let Some(ref path) = config.credentials_file {
            return Self::CredentialsFile(path.clone());
        }
        match (&config.username, &config.password) {
            (Some(username), Some(password)) => Self::UserPassword {
                username: username.clone(),
                password: password.clone(),
            },
            _ => Self::Anonymous,
        }
    }
}

/// Connection name a cluster registers under, visible in NATS monitoring.
pub fn connection_name(prefix: &str, cluster_id: u32) -> String {
    format!("discord-fleet-{prefix}-{cluster_id}")
}

impl NatsClusterBroadcast {
    pub fn new(client: Client, prefix: impl Into<String>, cluster_id: u32, timeout: Duration) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            cluster_id,
            timeout,
        }
    }

    /// Join the fleet bus. The client reconnects forever: while it is down,
    /// broadcasts come back short and rounds are reported incomplete.
    pub async fn connect(config: &NatsConfig, cluster_id: u32, timeout: Duration) -> Result<Self> {
        info!(cluster_id, servers = ?config.servers, prefix = %config.prefix, "Joining fleet bus");

        let mut opts = ConnectOptions::new().name(connection_name(&config.prefix, cluster_id));
        opts = match NatsAuth::from_config(config) {
            NatsAuth::CredentialsFile(path) => opts
                .credentials_file(&path)
                .await
                .map_err(|e| Error::Nats(format!("Failed to load credentials {path}: {e}")))?,
            NatsAuth::UserPassword { username, password } => opts.user_and_password(username, password),
            NatsAuth::Anonymous => opts,
        };

        let servers: Vec<&str> = config.servers.iter().map(String::as_str).collect();
        let client = opts
            .event_callback(move |event| async move {
                match event {
                    async_nats::Event::Connected => info!(cluster_id, "Fleet bus connected"),
                    async_nats::Event::Disconnected => {
                        warn!(cluster_id, "Fleet bus disconnected, broadcasts will come back short")
                    }
                    async_nats::Event::ClientError(e) => warn!(cluster_id, error = %e, "Fleet bus client error"),
                    _ => {}
                }
            })
            .retry_on_initial_connect()
            .max_reconnects(None)
            .connect(servers)
            .await
            .map_err(|e| Error::Nats(format!("Failed to connect to NATS: {e}")))?;

        Ok(Self::new(client, config.prefix.clone(), cluster_id, timeout))
    }

    /// Underlying client, shared with this cluster's responder.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ClusterBroadcast for NatsClusterBroadcast {
    async fn broadcast(&self, request: ClusterRequest, expected: usize) -> Result<Vec<ClusterReply>> {
        let inbox = self.client.new_inbox();
        let mut subscriber = self
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|e| Error::Nats(format!("Failed to subscribe to reply inbox: {}", e)))?;

        let envelope = RequestEnvelope {
            request_id: Uuid::new_v4().to_string(),
            origin: self.cluster_id,
        };
        let payload = serde_json::to_vec(&envelope)?;
        let subject = request.subject(&self.prefix);
        self.client
            .publish_with_reply(subject.clone(), inbox, payload.into())
            .await
            .map_err(|e| Error::Nats(format!("Failed to publish {}: {}", subject, e)))?;

        debug!(request_id = %envelope.request_id, subject, expected, "Broadcast sent");

        let replies = collect_replies(
            (&mut subscriber).map(|message| message.payload),
            expected,
            self.timeout,
        )
        .await;

        if let Err(e) = subscriber.unsubscribe().await {
            debug!(error = %e, "Failed to unsubscribe reply inbox");
        }
        Ok(replies)
    }
}

/// Drain reply payloads until `expected` distinct clusters answered, the
/// stream ends, or `timeout` elapses. A second reply from the same cluster is
/// ignored; malformed payloads are skipped.
pub async fn collect_replies<S>(mut payloads: S, expected: usize, timeout: Duration) -> Vec<ClusterReply>
where
    S: Stream<Item = Bytes> + Unpin,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen = HashSet::new();
    let mut replies = Vec::with_capacity(expected);

    while replies.len() < expected {
        let payload = match tokio::time::timeout_at(deadline, payloads.next()).await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(_) => {
                debug!(received = replies.len(), expected, "Broadcast timed out");
                break;
            }
        };

        match serde_json::from_slice::<ClusterReply>(&payload) {
            Ok(reply) if seen.insert(reply.cluster_id) => replies.push(reply),
            Ok(reply) => debug!(cluster_id = reply.cluster_id, "Duplicate cluster reply ignored"),
            Err(e) => warn!(error = %e, "Malformed cluster reply"),
        }
    }
    replies
}

/// This cluster's contribution to the guild total.
pub trait GuildCountSource: Send + Sync + 'static {
    fn local_guild_count(&self) -> u64;
}

impl GuildCountSource for serenity::cache::Cache {
    fn local_guild_count(&self) -> u64 {
        self.guild_count() as u64
    }
}

impl GuildCountSource for AtomicU64 {
    fn local_guild_count(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }
}

impl<G: GuildCountSource + ?Sized> GuildCountSource for Arc<G> {
    fn local_guild_count(&self) -> u64 {
        (**self).local_guild_count()
    }
}

/// Answer guild-count requests from other clusters until shutdown.
pub async fn serve_guild_count<G: GuildCountSource>(
    client: Client,
    prefix: String,
    cluster_id: u32,
    source: G,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let subject = ClusterRequest::GuildCount.subject(&prefix);
    let mut requests = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| Error::Nats(format!("Failed to subscribe to {}: {}", subject, e)))?;

    info!(subject, cluster_id, "Answering cluster guild-count requests");

    loop {
        tokio::select! {
            message = requests.next() => {
                let Some(message) = message else {
                    warn!(subject, "Guild-count subscription closed");
                    break;
                };
                let Some(reply_to) = message.reply else {
                    debug!("Guild-count request without reply subject");
                    continue;
                };
                let reply = ClusterReply {
                    cluster_id,
                    value: source.local_guild_count(),
                };
                let payload = serde_json::to_vec(&reply)?;
                if let Err(e) = client.publish(reply_to, payload.into()).await {
                    warn!(error = %e, "Failed to answer guild-count request");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    info!(cluster_id, "Guild-count responder stopped");
    Ok(())
}

/// Result of a guild-count round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Complete(u64),
    /// Too few clusters answered. `partial` is the sum of what did arrive; it
    /// must never reach a report sink.
    Incomplete {
        received: usize,
        expected: usize,
        partial: u64,
    },
}

impl Aggregate {
    pub fn from_replies(replies: &[ClusterReply], expected: usize) -> Self {
        let mut seen = HashSet::new();
        let mut total = 0u64;
        for reply in replies {
            if seen.insert(reply.cluster_id) {
                total = total.saturating_add(reply.value);
            }
        }

        if seen.len() < expected {
            Self::Incomplete {
                received: seen.len(),
                expected,
                partial: total,
            }
        } else {
            Self::Complete(total)
        }
    }

    /// Best known total, complete or not.
    pub fn total(&self) -> u64 {
        match *self {
            Self::Complete(total) => total,
            Self::Incomplete { partial, .. } => partial,
        }
    }
}

/// Sum every cluster's guild count, or report that the fleet is incomplete.
pub async fn aggregate_guild_count<B: ClusterBroadcast>(broadcast: &B, expected: usize) -> Result<Aggregate> {
    let replies = broadcast.broadcast(ClusterRequest::GuildCount, expected).await?;
    Ok(Aggregate::from_replies(&replies, expected))
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
