//! Shared collaborators of the scheduler and the measurements

use crate::clock::{NetworkClock, SystemClock};
use crate::config::AgentConfig;
use crate::measurement::{MeasurementEnv, MeasurementRegistry};
use crate::socket::{default_transport, ProbeTransport};
use chrono::NaiveDateTime;
use std::sync::Arc;

/// Network clock, measurement registry and probe transport
///
/// Built once by the application and handed to the components that need it.
#[derive(Clone)]
pub struct Context {
    /// Source of "now" for all scheduling decisions
    pub clock: Arc<dyn NetworkClock>,
    /// Definition factory and measurement constructors
    pub registry: MeasurementRegistry,
    /// Socket factory for probes
    pub transport: Arc<dyn ProbeTransport>,
}

impl Context {
    /// Context with the built-in measurement methods
    pub fn new(clock: Arc<dyn NetworkClock>, transport: Arc<dyn ProbeTransport>) -> Self {
        Self {
            clock,
            registry: MeasurementRegistry::new(),
            transport,
        }
    }

    /// Context for real measurements: system clock and OS sockets
    pub fn system(config: &AgentConfig) -> Self {
        Self::new(
            Arc::new(SystemClock::with_offset_ms(config.clock.offset_ms)),
            default_transport(),
        )
    }

    /// Replace the measurement registry
    pub fn with_registry(mut self, registry: MeasurementRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Current network-synchronized time
    pub fn now(&self) -> NaiveDateTime {
        self.clock.current_date_time()
    }

    /// Environment for a new measurement run
    pub fn measurement_env(&self) -> MeasurementEnv {
        MeasurementEnv::new(self.transport.clone())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("registry", &self.registry)
            .field("transport", &self.transport.name())
            .finish()
    }
}
