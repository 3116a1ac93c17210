//! Overload gate backed by a periodic resource sampler.
//!
//! [`ResourceMonitor::is_overloaded`] takes a fresh sample on every call, so
//! the answer reflects the host at the moment of the call rather than the
//! last background tick. The background loop started by
//! [`ResourceMonitor::start`] only records and logs samples; its lifecycle
//! is independent of the dispatcher.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sampler::{ResourceSample, ResourceSampler};
use crate::config::MonitorConfig;

/// Samples host CPU and memory and answers "is the host overloaded?".
pub struct ResourceMonitor {
    sampler: Arc<dyn ResourceSampler>,
    config: MonitorConfig,
    latest: Arc<Mutex<Option<ResourceSample>>>,
    cancel: CancellationToken,
}

impl ResourceMonitor {
    /// Create a monitor; the background loop is not started yet.
    #[must_use]
    pub fn new(sampler: Arc<dyn ResourceSampler>, config: MonitorConfig) -> Self {
        Self {
            sampler,
            config,
            latest: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    /// Whether CPU% or memory% is above its threshold right now.
    ///
    /// The sample is taken on the blocking pool so `/proc` reads never stall
    /// the runtime driving I/O. A failed sample is logged and treated as not
    /// overloaded.
    pub async fn is_overloaded(&self) -> bool {
        let sampler = Arc::clone(&self.sampler);
        match tokio::task::spawn_blocking(move || sampler.sample()).await {
            Ok(Ok(sample)) => {
                self.store(sample);
                sample.exceeds(self.config.cpu_threshold, self.config.memory_threshold)
            }
            Ok(Err(err)) => {
                warn!(%err, "resource sample failed; overload gate open");
                false
            }
            Err(err) => {
                warn!(%err, "resource sample task failed; overload gate open");
                false
            }
        }
    }

    /// Most recent sample taken by either the gate or the background loop.
    #[must_use]
    pub fn latest(&self) -> Option<ResourceSample> {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the background sampling loop.
    ///
    /// The loop runs until [`stop`](Self::stop) is called.
    #[must_use]
    pub fn start(&self) -> JoinHandle<()> {
        let sampler = Arc::clone(&self.sampler);
        let latest = Arc::clone(&self.latest);
        let cancel = self.cancel.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval());
            info!(
                interval_seconds = config.interval_seconds,
                cpu_threshold = config.cpu_threshold,
                memory_threshold = config.memory_threshold,
                "resource monitor started"
            );
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("resource monitor shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let sampler = Arc::clone(&sampler);
                        match tokio::task::spawn_blocking(move || sampler.sample()).await {
                            Ok(Ok(sample)) => {
                                *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(sample);
                                debug!(
                                    cpu_percent = sample.cpu_percent,
                                    memory_percent = sample.memory_percent,
                                    "resource sample"
                                );
                                if sample.exceeds(config.cpu_threshold, config.memory_threshold) {
                                    warn!(
                                        cpu_percent = sample.cpu_percent,
                                        memory_percent = sample.memory_percent,
                                        "high resource usage detected"
                                    );
                                }
                            }
                            Ok(Err(err)) => warn!(%err, "resource sample failed"),
                            Err(err) => warn!(%err, "resource sample task failed"),
                        }
                    }
                }
            }
        })
    }

    /// Stop the background loop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn store(&self, sample: ResourceSample) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(sample);
    }
}
