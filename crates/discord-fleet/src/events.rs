//! Gateway lifecycle classification.
//!
//! Every lifecycle signal becomes one counter increment. Lifecycle signals
//! other than dispatches also produce a best-effort operator notice, sent
//! after the counter so a notice failure can never cost a metric.

use std::sync::Arc;

use tracing::{debug, info};

use crate::metrics::{self, MetricsSink};
use crate::notify::{GREEN, NoticeChannel, Notifier, OperatorNotice, RED, best_effort_notify};

/// Gateway opcode for dispatch frames.
pub const DISPATCH_OP: u8 = 0;

/// Dispatch type left out of the `dispatch` counter.
pub const IGNORED_DISPATCH: &str = "PRESENCE_UPDATE";

/// Transport signal as seen by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Every shard of this cluster is up.
    Ready,
    ShardReady(u32),
    ShardConnect(u32),
    ShardDisconnect(u32),
    ShardResume(u32),
    /// A raw gateway frame.
    Dispatch { op: u8, kind: Option<String> },
}

/// What a signal turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub counter: &'static str,
    pub kind: String,
    pub notice: Option<OperatorNotice>,
}

pub struct EventClassifier<M, N> {
    metrics: Arc<M>,
    notifier: N,
    cluster_id: u32,
    primary_colour: u32,
}

impl<M: MetricsSink, N: Notifier> EventClassifier<M, N> {
    pub fn new(metrics: Arc<M>, notifier: N, cluster_id: u32, primary_colour: u32) -> Self {
        Self {
            metrics,
            notifier,
            cluster_id,
            primary_colour,
        }
    }

    fn lifecycle(kind: &str, title: String, colour: u32) -> Emission {
        Emission {
            counter: metrics::EVENTS,
            kind: kind.to_string(),
            notice: Some(OperatorNotice::new(NoticeChannel::Events, title, colour)),
        }
    }

    /// Map a signal to its counter and notice. `None` means the signal is
    /// not counted.
    pub fn classify(&self, event: &LifecycleEvent) -> Option<Emission> {
        let cluster = self.cluster_id;
        let emission = match event {
            LifecycleEvent::Ready => Self::lifecycle("READY", format!("[Cluster {cluster}] Bot Ready"), GREEN),
            LifecycleEvent::ShardReady(shard) => Self::lifecycle(
                "SHARD_READY",
                format!("[Cluster {cluster}] Shard {shard} Ready"),
                GREEN,
            ),
            LifecycleEvent::ShardConnect(shard) => Self::lifecycle(
                "CONNECT",
                format!("[Cluster {cluster}] Shard {shard} Connected"),
                GREEN,
            ),
            LifecycleEvent::ShardDisconnect(shard) => Self::lifecycle(
                "DISCONNECT",
                format!("[Cluster {cluster}] Shard {shard} Disconnected"),
                RED,
            ),
            LifecycleEvent::ShardResume(shard) => Self::lifecycle(
                "RESUME",
                format!("[Cluster {cluster}] Shard {shard} Resumed"),
                self.primary_colour,
            ),
            LifecycleEvent::Dispatch { op, kind } => {
                if *op != DISPATCH_OP {
                    return None;
                }
                match kind.as_deref() {
                    None | Some(IGNORED_DISPATCH) => return None,
                    Some(kind) => Emission {
                        counter: metrics::DISPATCH,
                        kind: kind.to_string(),
                        notice: None,
                    },
                }
            }
        };
        Some(emission)
    }

    pub async fn handle(&self, event: LifecycleEvent) {
        let Some(emission) = self.classify(&event) else {
            return;
        };

        self.metrics
            .increment(emission.counter, &[("type", emission.kind.clone())]);

        if let Some(notice) = emission.notice {
            info!(cluster_id = self.cluster_id, event = %emission.kind, "{}", notice.title);
            best_effort_notify(&self.notifier, notice).await;
        } else {
            debug!(kind = %emission.kind, "Dispatch counted");
        }
    }
}
