//! Method name to definition parser and measurement constructor

use super::{
    DefinitionError, Measurement, MeasurementDefinition, MeasurementEnv, Snmp, SnmpDefinition,
    Traceroute, TracerouteDefinition, UdpPing, UdpPingDefinition, SNMP, TRACEROUTE, UDP_PING,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Parses the JSON options of a method
pub type DefinitionParser = fn(&Value) -> Result<MeasurementDefinition, serde_json::Error>;
/// Creates a fresh measurement of a method
pub type MeasurementConstructor = fn(MeasurementEnv) -> Box<dyn Measurement>;

#[derive(Clone, Copy)]
struct Entry {
    parse: DefinitionParser,
    create: MeasurementConstructor,
}

/// Registry of known measurement methods
///
/// Method names are matched case-insensitively.
#[derive(Clone)]
pub struct MeasurementRegistry {
    methods: BTreeMap<String, Entry>,
}

impl MeasurementRegistry {
    /// Registry without any method
    pub fn empty() -> Self {
        Self {
            methods: BTreeMap::new(),
        }
    }

    /// Registry with the built-in methods
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(
            UDP_PING,
            |v| UdpPingDefinition::deserialize(v).map(MeasurementDefinition::UdpPing),
            |env| Box::new(UdpPing::new(env)),
        );
        registry.register(
            TRACEROUTE,
            |v| TracerouteDefinition::deserialize(v).map(MeasurementDefinition::Traceroute),
            |env| Box::new(Traceroute::new(env)),
        );
        registry.register(
            SNMP,
            |v| SnmpDefinition::deserialize(v).map(MeasurementDefinition::Snmp),
            |env| Box::new(Snmp::new(env)),
        );
        registry
    }

    /// Add or replace a method
    pub fn register(
        &mut self,
        name: &str,
        parse: DefinitionParser,
        create: MeasurementConstructor,
    ) {
        self.methods
            .insert(name.to_ascii_lowercase(), Entry { parse, create });
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered method names in sorted order
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    fn entry(&self, name: &str) -> Result<&Entry, DefinitionError> {
        self.methods
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| DefinitionError::UnknownMethod(name.to_string()))
    }

    /// Build the definition of `name` from its JSON options
    pub fn create_measurement_definition(
        &self,
        name: &str,
        options: &Value,
    ) -> Result<MeasurementDefinition, DefinitionError> {
        let entry = self.entry(name)?;
        (entry.parse)(options).map_err(|source| DefinitionError::InvalidOptions {
            method: name.to_ascii_lowercase(),
            source,
        })
    }

    /// Create an unprepared measurement of `name`
    pub fn create_measurement(
        &self,
        name: &str,
        env: MeasurementEnv,
    ) -> Result<Box<dyn Measurement>, DefinitionError> {
        Ok((self.entry(name)?.create)(env))
    }
}

impl Default for MeasurementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MeasurementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.methods.keys()).finish()
    }
}
