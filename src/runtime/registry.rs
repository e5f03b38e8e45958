//! Filter registry for creating graph nodes by protocol name

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::filter::Filter;

/// Builds a filter instance with the given node name
type FilterCreatorFn = Box<dyn Fn(&str) -> Box<dyn Filter> + Send + Sync>;

pub(crate) struct FilterRegistry {
    creators: BTreeMap<String, FilterCreatorFn>,
}

impl FilterRegistry {
    fn new() -> Self {
        Self {
            creators: BTreeMap::new(),
        }
    }

    fn register<F>(&mut self, protocol: impl Into<String>, creator: F)
    where
        F: Fn(&str) -> Box<dyn Filter> + Send + Sync + 'static,
    {
        let protocol = protocol.into();
        if self.creators.insert(protocol.clone(), Box::new(creator)).is_some() {
            debug!("Replacing registered filter type '{}'", protocol);
        }
    }

    fn create(&self, protocol: &str, name: &str) -> Option<Box<dyn Filter>> {
        self.creators.get(protocol).map(|create| create(name))
    }

    fn protocols(&self) -> Vec<String> {
        self.creators.keys().cloned().collect()
    }
}

// Global filter registry
lazy_static::lazy_static! {
    pub(crate) static ref FILTER_REGISTRY: Arc<Mutex<FilterRegistry>> = {
        let mut registry = FilterRegistry::new();

        // Filters that need no external collaborator
        use crate::nodes::decoders::{HyperRamDecoder, SpiDecoder};
        use crate::nodes::math::{DecimateFilter, MovingAverageFilter, SquelchFilter};
        registry.register("HyperRAM", |name| Box::new(HyperRamDecoder::new().with_name(name)));
        registry.register("SPI", |name| Box::new(SpiDecoder::new().with_name(name)));
        registry.register("Downsample", |name| Box::new(DecimateFilter::new().with_name(name)));
        registry.register("Moving average", |name| {
            Box::new(MovingAverageFilter::new().with_name(name))
        });
        registry.register("Squelch", |name| Box::new(SquelchFilter::new().with_name(name)));

        Arc::new(Mutex::new(registry))
    };
}

/// Register a filter type under `protocol`, replacing any earlier entry.
///
/// Filters that depend on a collaborator (a model loader, an instrument
/// handle) are registered by the application with a closure that captures it.
pub fn register_filter<F>(protocol: impl Into<String>, creator: F)
where
    F: Fn(&str) -> Box<dyn Filter> + Send + Sync + 'static,
{
    FILTER_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register(protocol, creator);
}

/// Create a filter of type `protocol` named `name`
pub fn create_filter(protocol: &str, name: &str) -> Option<Box<dyn Filter>> {
    FILTER_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .create(protocol, name)
}

/// Every registered protocol name, sorted
pub fn registered_protocols() -> Vec<String> {
    FILTER_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .protocols()
}
