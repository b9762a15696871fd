//! Service-account bearer credential for backend API calls.
//!
//! One credential per process. [`ServiceAccountRefresher::get_credential`]
//! serves the cached value without waiting on mints. Minting is serialised by
//! a separate lock and the cache is re-checked after taking it, so concurrent
//! first callers share a single in-flight mint.
//! [`ServiceAccountRefresher::spawn_refresh_loop`] refreshes proactively on
//! `interval + jitter` and falls back to a shorter retry interval on failure.

pub mod assertion;

pub use assertion::IamTokenMinter;

use crate::config::ServiceAccountConfig;
use crate::error::{OAuthError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAccountCredential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Produces a fresh credential from the token-issuance service.
#[async_trait]
pub trait CredentialMinter: Send + Sync {
    async fn mint(&self) -> Result<ServiceAccountCredential>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub interval: Duration,
    /// Upper bound of the random delay added to each interval.
    pub jitter: Duration,
    /// Delay before the next attempt after a failed refresh.
    pub retry_interval: Duration,
}

impl RefreshSchedule {
    fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

pub struct ServiceAccountRefresher {
    minter: Arc<dyn CredentialMinter>,
    current: RwLock<Option<Arc<ServiceAccountCredential>>>,
    mint_lock: Mutex<()>,
    schedule: RefreshSchedule,
    mint_timeout: Duration,
}

impl ServiceAccountRefresher {
    pub fn new(
        minter: Arc<dyn CredentialMinter>,
        schedule: RefreshSchedule,
        mint_timeout: Duration,
    ) -> Self {
        Self {
            minter,
            current: RwLock::new(None),
            mint_lock: Mutex::new(()),
            schedule,
            mint_timeout,
        }
    }

    pub fn from_config(config: &ServiceAccountConfig) -> Result<Self> {
        let minter = IamTokenMinter::from_config(config)?;
        let schedule = RefreshSchedule {
            interval: Duration::from_secs(config.refresh_interval_seconds),
            jitter: Duration::from_secs(config.refresh_jitter_seconds),
            retry_interval: Duration::from_secs(config.retry_interval_seconds),
        };
        Ok(Self::new(
            Arc::new(minter),
            schedule,
            Duration::from_secs(config.timeout_seconds),
        ))
    }

    /// Returns the cached credential, minting one when absent or forced.
    pub async fn get_credential(&self, force_refresh: bool) -> Result<Arc<ServiceAccountCredential>> {
        if !force_refresh {
            if let Some(credential) = self.cached() {
                return Ok(credential);
            }
        }

        let _mint = self.mint_lock.lock().await;

        // Another caller may have minted while we waited
        if !force_refresh {
            if let Some(credential) = self.cached() {
                return Ok(credential);
            }
        }

        let credential = match tokio::time::timeout(self.mint_timeout, self.minter.mint()).await {
            Ok(result) => Arc::new(result?),
            Err(_) => return Err(OAuthError::Timeout("service account token mint")),
        };

        debug!(expires_at = ?credential.expires_at, "Service account credential minted");
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Some(credential.clone());
        Ok(credential)
    }

    fn cached(&self) -> Option<Arc<ServiceAccountCredential>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Bearer token value for the next backend call.
    pub async fn token(&self) -> Result<String> {
        Ok(self.get_credential(false).await?.token.clone())
    }

    /// Starts the background refresh task. It exits when `shutdown` is
    /// cancelled; a mint interrupted by cancellation leaves the cache as it was.
    pub fn spawn_refresh_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let refresher = Arc::clone(self);
        tokio::spawn(async move { refresher.refresh_loop(shutdown).await })
    }

    async fn refresh_loop(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.schedule.interval.as_secs(),
            "Service account refresh loop started"
        );
        let mut delay = self.schedule.next_delay();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.get_credential(true) => result,
            };

            delay = match result {
                Ok(_) => {
                    debug!("Service account credential refreshed");
                    self.schedule.next_delay()
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_secs = self.schedule.retry_interval.as_secs_f64(),
                        "Service account credential refresh failed"
                    );
                    self.schedule.retry_interval
                }
            };
        }

        info!("Service account refresh loop stopped");
    }
}
