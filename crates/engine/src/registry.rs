//! Indicator registry.
//!
//! The registry is the only owner of indicator instances. Registration and
//! deregistration may happen while the scheduler is running: every mutation
//! bumps a generation counter and invalidates the cached snapshot, and the
//! scheduler iterates the snapshot it took at tick start. Changes made during
//! a tick are therefore seen on the next one.
//!
//! Deregistered instances are flagged as retired so a tick already holding
//! them skips the update and drops any output.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tickwise_core::{ConfigError, IndicatorSpec, InstanceId, Sample};
use tickwise_indicators::{build_indicator, Indicator, IndicatorError};
use tracing::{debug, info};

use crate::writer::is_storable;
use crate::EngineError;

/// Failure of a single instance's update.
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error(transparent)]
    Input(#[from] IndicatorError),
    #[error("indicator state poisoned by an earlier panic")]
    Poisoned,
    #[error("output {0} cannot be stored")]
    Unstorable(f64),
}

/// A live indicator instance and its bookkeeping.
#[derive(Debug)]
pub struct RegisteredIndicator {
    id: InstanceId,
    spec: IndicatorSpec,
    state: Mutex<Box<dyn Indicator>>,
    retired: AtomicBool,
    updates: AtomicU64,
    errors: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl RegisteredIndicator {
    fn new(id: InstanceId, spec: IndicatorSpec, indicator: Box<dyn Indicator>) -> Self {
        Self {
            id,
            spec,
            state: Mutex::new(indicator),
            retired: AtomicBool::new(false),
            updates: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn spec(&self) -> &IndicatorSpec {
        &self.spec
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Apply one sample. Failures are recorded on the instance and returned.
    pub fn update(&self, sample: &Sample) -> Result<Option<f64>, InstanceError> {
        let result = match self.state.lock() {
            Ok(mut indicator) => match indicator.update(sample) {
                Ok(Some(value)) if !is_storable(value) => Err(InstanceError::Unstorable(value)),
                other => other.map_err(InstanceError::from),
            },
            Err(_) => Err(InstanceError::Poisoned),
        };

        match &result {
            Ok(_) => {
                self.updates.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut last) = self.last_error.lock() {
                    *last = Some(e.to_string());
                }
            }
        }
        result
    }

    /// Peek at the current output without advancing state.
    pub fn current_value(&self) -> Option<f64> {
        self.state.lock().ok().and_then(|ind| ind.current_value())
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        if let Ok(mut indicator) = self.state.lock() {
            indicator.reset();
        }
    }

    pub fn describe(&self) -> InstanceDescriptor {
        let (value, warmup_period) = match self.state.lock() {
            Ok(ind) => (ind.current_value(), ind.warmup_period()),
            Err(_) => (None, 0),
        };
        InstanceDescriptor {
            id: self.id,
            spec: self.spec.clone(),
            value,
            ready: value.is_some(),
            warmup_period,
            updates: self.updates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }
}

/// Public view of a registered instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceDescriptor {
    pub id: InstanceId,
    #[serde(flatten)]
    pub spec: IndicatorSpec,
    pub value: Option<f64>,
    pub ready: bool,
    pub warmup_period: usize,
    pub updates: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

/// Stable view of the registry taken at tick start.
#[derive(Debug)]
pub struct RegistrySnapshot {
    pub generation: u64,
    pub instances: Vec<Arc<RegisteredIndicator>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    generation: u64,
    by_id: BTreeMap<InstanceId, Arc<RegisteredIndicator>>,
    by_spec: HashMap<IndicatorSpec, InstanceId>,
    snapshot: Option<Arc<RegistrySnapshot>>,
}

/// Holds the set of active indicator instances.
#[derive(Debug, Default)]
pub struct IndicatorRegistry {
    inner: RwLock<RegistryInner>,
    next_id: AtomicU64,
}

impl IndicatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `spec`, building its indicator. Registering an identical
    /// spec again returns the existing instance id.
    pub fn register(&self, spec: IndicatorSpec) -> Result<InstanceId, EngineError> {
        spec.validate()?;
        if let Some(id) = self.find(&spec)? {
            debug!(instance = %id, spec = %spec, "Indicator already registered");
            return Ok(id);
        }

        let indicator = build_indicator(&spec.params).map_err(|e| ConfigError::InvalidParameter {
            indicator: e.indicator(),
            message: e.to_string(),
        })?;
        self.insert_instance(spec, indicator)
    }

    pub(crate) fn insert_instance(
        &self,
        spec: IndicatorSpec,
        indicator: Box<dyn Indicator>,
    ) -> Result<InstanceId, EngineError> {
        let mut inner = self.inner.write().map_err(|_| EngineError::RegistryPoisoned)?;
        // Lost a race with an identical registration.
        if let Some(id) = inner.by_spec.get(&spec) {
            return Ok(*id);
        }

        let id = InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        inner.by_spec.insert(spec.clone(), id);
        inner
            .by_id
            .insert(id, Arc::new(RegisteredIndicator::new(id, spec.clone(), indicator)));
        inner.generation += 1;
        inner.snapshot = None;

        info!(instance = %id, spec = %spec, "Indicator registered");
        Ok(id)
    }

    /// Remove an instance and discard its state. Returns `false` if unknown.
    pub fn deregister(&self, id: InstanceId) -> Result<bool, EngineError> {
        let mut inner = self.inner.write().map_err(|_| EngineError::RegistryPoisoned)?;
        let Some(entry) = inner.by_id.remove(&id) else {
            return Ok(false);
        };
        entry.retired.store(true, Ordering::Release);
        inner.by_spec.remove(&entry.spec);
        inner.generation += 1;
        inner.snapshot = None;

        info!(instance = %id, spec = %entry.spec, "Indicator deregistered");
        Ok(true)
    }

    pub fn find(&self, spec: &IndicatorSpec) -> Result<Option<InstanceId>, EngineError> {
        let inner = self.inner.read().map_err(|_| EngineError::RegistryPoisoned)?;
        Ok(inner.by_spec.get(spec).copied())
    }

    pub fn get(&self, id: InstanceId) -> Result<Option<InstanceDescriptor>, EngineError> {
        let inner = self.inner.read().map_err(|_| EngineError::RegistryPoisoned)?;
        Ok(inner.by_id.get(&id).map(|entry| entry.describe()))
    }

    /// Restart an instance's warm-up (e.g. a VWAP session boundary).
    pub fn reset(&self, id: InstanceId) -> Result<bool, EngineError> {
        let inner = self.inner.read().map_err(|_| EngineError::RegistryPoisoned)?;
        match inner.by_id.get(&id) {
            Some(entry) => {
                entry.reset();
                info!(instance = %id, "Indicator reset");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Descriptors of all active instances, ordered by id.
    pub fn list_active(&self) -> Result<Vec<InstanceDescriptor>, EngineError> {
        let inner = self.inner.read().map_err(|_| EngineError::RegistryPoisoned)?;
        Ok(inner.by_id.values().map(|entry| entry.describe()).collect())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> Result<u64, EngineError> {
        let inner = self.inner.read().map_err(|_| EngineError::RegistryPoisoned)?;
        Ok(inner.generation)
    }

    /// Poison the registry lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison_lock(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.inner.write();
            panic!("registry writer panicked");
        }));
    }

    #[cfg(test)]
    pub(crate) fn clear_poison(&self) {
        self.inner.clear_poison();
    }

    /// Snapshot of the active instances, rebuilt only after a mutation.
    pub fn snapshot(&self) -> Result<Arc<RegistrySnapshot>, EngineError> {
        {
            let inner = self.inner.read().map_err(|_| EngineError::RegistryPoisoned)?;
            if let Some(snapshot) = &inner.snapshot {
                return Ok(Arc::clone(snapshot));
            }
        }

        let mut inner = self.inner.write().map_err(|_| EngineError::RegistryPoisoned)?;
        if let Some(snapshot) = &inner.snapshot {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(RegistrySnapshot {
            generation: inner.generation,
            instances: inner.by_id.values().cloned().collect(),
        });
        inner.snapshot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tickwise_core::IndicatorParams;

    fn ema(symbol: &str, period: usize) -> IndicatorSpec {
        IndicatorSpec::new(symbol, IndicatorParams::Ema { period })
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = IndicatorRegistry::new();
        let a = registry.register(ema("BTC_USDT", 20)).unwrap();
        let b = registry.register(ema("BTC_USDT", 20)).unwrap();
        let c = registry.register(ema("BTC_USDT", 50)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_config_error_does_not_register() {
        let registry = IndicatorRegistry::new();
        let err = registry
            .register(IndicatorSpec::new("BTC_USDT", IndicatorParams::Sma { period: 0 }))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::InvalidParameter { .. })));
        assert!(registry.is_empty());
        assert_eq!(registry.generation().unwrap(), 0);
    }

    #[test]
    fn test_deregister_discards_state() {
        let registry = IndicatorRegistry::new();
        let id = registry.register(ema("BTC_USDT", 3)).unwrap();
        let snapshot = registry.snapshot().unwrap();
        let held = Arc::clone(&snapshot.instances[0]);

        assert!(registry.deregister(id).unwrap());
        assert!(!registry.deregister(id).unwrap());
        assert!(held.is_retired());
        assert!(registry.get(id).unwrap().is_none());
        assert!(registry.list_active().unwrap().is_empty());

        // Re-registering the same spec starts from scratch under a new id
        let again = registry.register(ema("BTC_USDT", 3)).unwrap();
        assert_ne!(again, id);
        assert_eq!(registry.get(again).unwrap().unwrap().value, None);
    }

    #[test]
    fn test_snapshot_cached_per_generation() {
        let registry = IndicatorRegistry::new();
        registry.register(ema("BTC_USDT", 3)).unwrap();
        let s1 = registry.snapshot().unwrap();
        let s2 = registry.snapshot().unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));

        registry.register(ema("ETH_USDT", 3)).unwrap();
        let s3 = registry.snapshot().unwrap();
        assert!(!Arc::ptr_eq(&s1, &s3));
        assert_eq!(s1.instances.len(), 1);
        assert_eq!(s3.instances.len(), 2);
        assert!(s3.generation > s1.generation);
    }

    #[test]
    fn test_update_records_errors_per_instance() {
        let registry = IndicatorRegistry::new();
        let id = registry.register(ema("BTC_USDT", 3)).unwrap();
        let snapshot = registry.snapshot().unwrap();
        let instance = &snapshot.instances[0];

        instance
            .update(&Sample::new("BTC_USDT", 10.0, 1.0, Utc::now()))
            .unwrap();
        assert!(instance
            .update(&Sample::new("BTC_USDT", f64::NAN, 1.0, Utc::now()))
            .is_err());

        let desc = registry.get(id).unwrap().unwrap();
        assert_eq!(desc.updates, 1);
        assert_eq!(desc.errors, 1);
        assert_eq!(desc.value, Some(10.0));
        assert!(desc.last_error.unwrap().contains("non-finite price"));
    }

    #[test]
    fn test_reset_restarts_warmup() {
        let registry = IndicatorRegistry::new();
        let id = registry
            .register(IndicatorSpec::new("BTC_USDT", IndicatorParams::Sma { period: 1 }))
            .unwrap();
        registry.snapshot().unwrap().instances[0]
            .update(&Sample::new("BTC_USDT", 5.0, 1.0, Utc::now()))
            .unwrap();
        assert_eq!(registry.get(id).unwrap().unwrap().value, Some(5.0));
        assert!(registry.reset(id).unwrap());
        assert_eq!(registry.get(id).unwrap().unwrap().value, None);
    }
}
