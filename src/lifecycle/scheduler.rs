// src/lifecycle/scheduler.rs

//! Level-by-level parallel execution
//!
//! Nodes of one execution level are independent and run on a bounded rayon
//! pool; a level starts only after the previous one has finished, so every
//! dependency of a node is sealed before the node is driven.

use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::lifecycle::cancel::CancelToken;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

/// Bounded pool walking execution levels
pub struct Scheduler {
    pool: ThreadPool,
    max_concurrency: usize,
}

impl Scheduler {
    /// A scheduler running at most `max_concurrency` nodes at once
    pub fn new(max_concurrency: usize) -> Result<Self> {
        let max_concurrency = max_concurrency.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_concurrency)
            .thread_name(|i| format!("pantry-node-{}", i))
            .build()
            .map_err(|e| Error::Internal(format!("cannot start worker pool: {}", e)))?;
        Ok(Self { pool, max_concurrency })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `drive` for every node, level by level
    ///
    /// Results come back in level order, nodes of a level in their listed
    /// order. Once `cancel` is set no further node starts; nodes that never
    /// ran are reported as `None`.
    pub fn run<F, R>(&self, levels: &[Vec<NodeId>], cancel: &CancelToken, drive: F) -> Vec<(NodeId, Option<R>)>
    where
        F: Fn(NodeId) -> R + Sync,
        R: Send,
    {
        let mut results = Vec::new();
        for (index, level) in levels.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Cancelled, {} level(s) not started", levels.len() - index);
                results.extend(level.iter().map(|id| (*id, None)));
                continue;
            }
            debug!("Level {} with {} node(s)", index, level.len());
            let outcomes: Vec<(NodeId, Option<R>)> = self.pool.install(|| {
                level
                    .par_iter()
                    .map(|id| {
                        if cancel.is_cancelled() {
                            return (*id, None);
                        }
                        (*id, Some(drive(*id)))
                    })
                    .collect()
            });
            results.extend(outcomes);
        }
        results
    }
}
