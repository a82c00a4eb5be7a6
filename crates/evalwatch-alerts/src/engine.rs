// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use evalwatch_model::{AlertEvent, AlertKey, AlertState, AlertStatus, EvaluationResult};
use evalwatch_policies::ThresholdDocument;
use evalwatch_store::{ResultStore, StoreError};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::notify::{deliver_with_retry, Delivery, Notifier, RetryPolicy};
use crate::transition::transition;

type KeySlot = Arc<Mutex<Option<AlertState>>>;

/// What one result did to its key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertOutcome {
    pub key: AlertKey,
    pub status: AlertStatus,
    pub consecutive_failures: u32,
    pub alert: Option<AlertEvent>,
    pub delivery: Delivery,
}

/// Owns alert state for every (metric, model). Updates for one key are
/// serialized by that key's lock; different keys proceed in parallel.
pub struct AlertEngine {
    store: Arc<dyn ResultStore>,
    document: Arc<ThresholdDocument>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    slots: StdMutex<HashMap<AlertKey, KeySlot>>,
}

impl AlertEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn ResultStore>,
        document: Arc<ThresholdDocument>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let retry = RetryPolicy::from(&document.notify);
        Self {
            store,
            document,
            notifier,
            retry,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn slot(&self, key: &AlertKey) -> KeySlot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.clone()).or_default().clone()
    }

    /// Feeds stored results in (event timestamp, event id) order. Results that
    /// cannot alert are skipped and produce no outcome.
    pub async fn process(&self, results: &[EvaluationResult]) -> Result<Vec<AlertOutcome>, StoreError> {
        let mut ordered: Vec<&EvaluationResult> = results
            .iter()
            .filter(|r| r.outcome.is_alertable())
            .collect();
        ordered.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        let mut outcomes = Vec::with_capacity(ordered.len());
        for result in ordered {
            outcomes.push(self.observe(result).await?);
        }
        Ok(outcomes)
    }

    /// Runs one read-modify-persist step under the key's lock, then notifies
    /// outside it.
    pub async fn observe(&self, result: &EvaluationResult) -> Result<AlertOutcome, StoreError> {
        let key = AlertKey::new(result.metric_name.clone(), result.model_id.clone());
        let policy = self.document.alert_policy_for(&result.metric_name);
        let slot = self.slot(&key);
        let step = {
            let mut cached = slot.lock().await;
            let current = match cached.as_ref() {
                Some(state) => state.clone(),
                None => self
                    .store
                    .load_alert_state(&key)
                    .await?
                    .unwrap_or_else(|| AlertState::healthy(&key)),
            };
            let step = transition(&current, result, &policy);
            self.store
                .commit_alert_state(&step.state, step.alert.as_ref())
                .await?;
            *cached = Some(step.state.clone());
            step
        };
        debug!(
            metric = %key.metric_name,
            model_id = %key.model_id,
            status = step.state.status.as_str(),
            consecutive_failures = step.state.consecutive_failures,
            "alert state updated"
        );

        let delivery = match &step.alert {
            Some(alert) => {
                info!(
                    metric = %key.metric_name,
                    model_id = %key.model_id,
                    kind = alert.kind.as_str(),
                    "alert {}",
                    alert.id
                );
                deliver_with_retry(self.notifier.as_ref(), alert, self.retry).await
            }
            None => Delivery::NotAttempted,
        };
        Ok(AlertOutcome {
            status: step.state.status,
            consecutive_failures: step.state.consecutive_failures,
            key,
            alert: step.alert,
            delivery,
        })
    }

    /// Current state for `key`, from the cache or the store.
    pub async fn state(&self, key: &AlertKey) -> Result<AlertState, StoreError> {
        let slot = self.slot(key);
        let cached = slot.lock().await;
        if let Some(state) = cached.as_ref() {
            return Ok(state.clone());
        }
        Ok(self
            .store
            .load_alert_state(key)
            .await?
            .unwrap_or_else(|| AlertState::healthy(key)))
    }
}
