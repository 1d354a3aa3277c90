//! Live-progress aggregation
//!
//! The master answers `progress` by combining its own state with whatever
//! each slave returns to the same query. Slaves are queried concurrently;
//! a peer that fails to answer is dropped from that cycle and aggregation
//! continues with the rest.

use futures::future::join_all;
use tracing::warn;

use gs_core::progress::{InstanceProgress, Progress, ProgressOptions};
use gs_core::Result;

use crate::session::ScanSession;

impl ScanSession {
    pub async fn progress(&self, options: ProgressOptions) -> Result<Progress> {
        let mut progress = self.local_progress(&options).await;

        let slaves = if options.slaves {
            self.slaves().await
        } else {
            Vec::new()
        };
        let mut instances = Vec::with_capacity(slaves.len());
        if !slaves.is_empty() {
            let peer_options = ProgressOptions {
                // Peers report themselves only; nested fan-out would double
                // count on deeper queries.
                slaves: false,
                ..options
            };
            let queries = slaves.iter().map(|slave| {
                let client = self.collaborators.connector.connect(&slave.url);
                let url = slave.url.clone();
                async move { (url, client.progress(peer_options).await) }
            });

            for (url, outcome) in join_all(queries).await {
                match outcome {
                    Ok(remote) => {
                        if options.messages {
                            if let (Some(mine), Some(theirs)) =
                                (progress.messages.as_mut(), remote.messages)
                            {
                                mine.extend(theirs);
                            }
                        }
                        if options.issues {
                            if let Some(theirs) = remote.issues {
                                let mut summaries = self.summaries.write().await;
                                summaries.merge(theirs);
                            }
                        }
                        if options.stats {
                            if let (Some(mine), Some(theirs)) =
                                (progress.stats.as_mut(), remote.stats.as_ref())
                            {
                                mine.merge(theirs);
                            }
                        }
                        progress.busy = progress.busy || remote.busy;
                        instances.push(InstanceProgress {
                            url,
                            status: remote.status,
                            busy: remote.busy,
                            stats: remote.stats.unwrap_or_default(),
                        });
                    }
                    Err(e) => {
                        // Dropped for this cycle; the peer may answer the next.
                        warn!("Progress from {} lost: {}", url, e);
                    }
                }
            }
        }

        if options.issues {
            let merged = {
                let mut set = self.summaries.read().await.clone();
                set.merge(self.sink.summaries().await);
                set.list()
            };
            if options.as_hash {
                progress.issues_as_hash = Some(
                    merged
                        .iter()
                        .filter_map(|s| serde_json::to_value(s).ok())
                        .collect(),
                );
                progress.issues = None;
            } else {
                progress.issues = Some(merged);
            }
        }

        if options.slaves {
            instances.sort_by(|a, b| a.url.cmp(&b.url));
            progress.instances = Some(instances);
        }
        Ok(progress)
    }

    async fn local_progress(&self, options: &ProgressOptions) -> Progress {
        let status = self.status().await;
        let busy = self.busy();

        let stats = if options.stats {
            Some(self.stats.read().await.clone())
        } else {
            None
        };
        let messages = if options.messages {
            Some(self.messages.read().await.clone())
        } else {
            None
        };

        // Issues are filled in by the caller once remote summaries have
        // been folded into the local set.
        Progress {
            status,
            busy,
            stats,
            messages,
            issues: None,
            issues_as_hash: None,
            instances: None,
        }
    }
}
