//! Observable values with change notifications.
//!
//! [`Observable<T>`] wraps a `tokio::sync::watch` channel so any number of
//! subscribers can wait for a value to change without polling. Drivers keep
//! their mutable, user-visible state (points per step, integration time, ...)
//! in observables and register them in a [`ParameterSet`] for generic access.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{AppResult, DaqError};

type Validator<T> = Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Metadata for an observable parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservableMetadata {
    /// Parameter name (unique within a device).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Physical units, e.g. "s" or "V".
    #[serde(default)]
    pub units: Option<String>,
    /// Whether external writes are rejected.
    #[serde(default)]
    pub read_only: bool,
}

struct ObservableSharedState<T> {
    metadata: ObservableMetadata,
    validator: Option<Validator<T>>,
}

// =============================================================================
// ParameterBase Trait - Generic Parameter Access
// =============================================================================

/// Type-erased access to a parameter, used by registries and remote APIs.
pub trait ParameterBase: Send + Sync {
    /// Get the parameter name
    fn name(&self) -> String;

    /// Get the current value as JSON
    fn get_json(&self) -> AppResult<serde_json::Value>;

    /// Set the value from JSON
    fn set_json(&self, value: serde_json::Value) -> AppResult<()>;

    /// Get the parameter metadata
    fn metadata(&self) -> ObservableMetadata;
}

// =============================================================================
// Observable<T>
// =============================================================================

/// A thread-safe, observable value.
///
/// All clones share the same watch channel and metadata.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    shared: Arc<RwLock<ObservableSharedState<T>>>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Observable")
            .field("metadata", &shared.metadata)
            .field("has_validator", &shared.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            shared: Arc::new(RwLock::new(ObservableSharedState {
                metadata: ObservableMetadata {
                    name: name.into(),
                    ..Default::default()
                },
                validator: None,
            })),
        }
    }

    /// Add a description to this observable.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.shared.write().metadata.description = Some(description.into());
        self
    }

    /// Add units to this observable.
    pub fn with_units(self, units: impl Into<String>) -> Self {
        self.shared.write().metadata.units = Some(units.into());
        self
    }

    /// Mark this observable as read-only.
    pub fn read_only(self) -> Self {
        self.shared.write().metadata.read_only = true;
        self
    }

    /// Add a custom validator function.
    pub fn with_validator<F>(self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        self.shared.write().validator = Some(Arc::new(validator));
        self
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Get the parameter name.
    pub fn name(&self) -> String {
        self.shared.read().metadata.name.clone()
    }

    /// Get the metadata (returns a clone).
    pub fn metadata(&self) -> ObservableMetadata {
        self.shared.read().metadata.clone()
    }

    /// Validate a value without setting it.
    pub fn validate(&self, value: &T) -> AppResult<()> {
        let guard = self.shared.read();
        if guard.metadata.read_only {
            return Err(DaqError::ParameterReadOnly(guard.metadata.name.clone()));
        }
        if let Some(validator) = &guard.validator {
            validator(value).map_err(|reason| DaqError::ParameterInvalid {
                name: guard.metadata.name.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Set a new value, notifying all subscribers.
    pub fn set(&self, value: T) -> AppResult<()> {
        self.validate(&value)?;
        self.sender.send_replace(value);
        Ok(())
    }

    /// Publish a value the driver itself measured or derived.
    ///
    /// Skips the read-only check and validation.
    pub fn publish(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T> ParameterBase for Observable<T>
where
    T: Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
{
    fn name(&self) -> String {
        Observable::name(self)
    }

    fn get_json(&self) -> AppResult<serde_json::Value> {
        serde_json::to_value(self.get()).map_err(|e| DaqError::ParameterInvalid {
            name: self.name(),
            reason: e.to_string(),
        })
    }

    fn set_json(&self, value: serde_json::Value) -> AppResult<()> {
        let typed: T = serde_json::from_value(value).map_err(|e| DaqError::ParameterInvalid {
            name: self.name(),
            reason: e.to_string(),
        })?;
        self.set(typed)
    }

    fn metadata(&self) -> ObservableMetadata {
        Observable::metadata(self)
    }
}

// =============================================================================
// ParameterSet
// =============================================================================

/// A collection of observable parameters for one device.
#[derive(Default)]
pub struct ParameterSet {
    parameters: HashMap<String, Box<dyn ParameterBase>>,
}

impl std::fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterSet")
            .field("names", &self.names())
            .finish()
    }
}

impl ParameterSet {
    /// Create a new empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter under its own name.
    pub fn register<P>(&mut self, parameter: P)
    where
        P: ParameterBase + 'static,
    {
        let name = parameter.name();
        self.parameters.insert(name, Box::new(parameter));
    }

    /// Get a parameter by name.
    pub fn get(&self, name: &str) -> Option<&dyn ParameterBase> {
        self.parameters.get(name).map(|p| p.as_ref())
    }

    /// List all parameter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parameters.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Snapshot every parameter value as JSON.
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.parameters
            .iter()
            .filter_map(|(name, p)| p.get_json().ok().map(|v| (name.clone(), v)))
            .collect()
    }
}
