//! Instrument and variable registry for Chorda
//!
//! This module provides the catalog of instruments and their variables,
//! used by ingestion and queries to validate incoming shortnames.

use crate::error::{ChordaError, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated variable shortname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shortname(String);

impl Shortname {
    /// Separator reserved for composed series keys (AOF records, log lines).
    pub const RESERVED_SEPARATOR: char = ':';

    /// Parses and validates a string as a variable shortname.
    ///
    /// # Returns
    ///
    /// `Ok(Shortname)` if the name is valid, `Err(ChordaError)` otherwise.
    pub fn parse<S: Into<String>>(name: S) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(ChordaError::Other(
                "Variable shortname cannot be empty".into(),
            ));
        }

        if name.contains(Self::RESERVED_SEPARATOR) {
            return Err(ChordaError::Other(format!(
                "Variable shortname '{}' cannot contain reserved separator '{}'",
                name,
                Self::RESERVED_SEPARATOR
            )));
        }

        if name.contains('\0') {
            return Err(ChordaError::Other(
                "Variable shortname cannot contain null bytes".into(),
            ));
        }

        if name.len() > 255 {
            return Err(ChordaError::Other(
                "Variable shortname cannot exceed 255 characters".into(),
            ));
        }

        Ok(Self(name))
    }

    /// Returns a reference to the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Shortname> for String {
    fn from(name: Shortname) -> Self {
        name.0
    }
}

impl fmt::Display for Shortname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named measured quantity belonging to an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub shortname: Shortname,
    /// Display name, e.g. "Air Temperature".
    #[serde(default)]
    pub name: Option<String>,
    /// Measurement units, e.g. "degC".
    #[serde(default)]
    pub units: Option<String>,
    /// Cap on points returned by live queries for this variable.
    /// Falls back to `Config::default_display_points` when absent.
    #[serde(default)]
    pub maximum_plot_points: Option<usize>,
}

impl Variable {
    pub fn new(shortname: impl Into<String>) -> Result<Self> {
        Ok(Self {
            shortname: Shortname::parse(shortname)?,
            name: None,
            units: None,
            maximum_plot_points: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_maximum_plot_points(mut self, cap: usize) -> Self {
        assert!(cap > 0, "Plot point cap must be greater than zero");
        self.maximum_plot_points = Some(cap);
        self
    }
}

/// A logical sensor device producing one or more variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: u32,
    pub name: String,
    variables: FxHashMap<String, Variable>,
}

impl Instrument {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            variables: FxHashMap::default(),
        }
    }

    /// Add a variable, replacing any previous definition with the same shortname.
    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables
            .insert(variable.shortname.as_str().to_string(), variable);
        self
    }

    pub fn variable(&self, shortname: &str) -> Option<&Variable> {
        self.variables.get(shortname)
    }

    pub fn has_variable(&self, shortname: &str) -> bool {
        self.variables.contains_key(shortname)
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// Variable shortnames in lexical order, for deterministic fan-out.
    pub fn variable_shortnames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }
}

/// The registry of instruments known to the engine.
#[derive(Debug, Default)]
pub struct Catalog {
    instruments: FxHashMap<u32, Instrument>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instrument. Re-registering an id replaces the prior
    /// definition (the portal owns instrument metadata; the engine mirrors it).
    pub fn register(&mut self, instrument: Instrument) -> Option<Instrument> {
        self.instruments.insert(instrument.id, instrument)
    }

    pub fn get(&self, id: u32) -> Result<&Instrument> {
        self.instruments
            .get(&id)
            .ok_or(ChordaError::NoSuchInstrument(id))
    }

    /// Resolve a variable, distinguishing a missing instrument from a
    /// missing variable.
    pub fn get_variable(&self, instrument_id: u32, shortname: &str) -> Result<&Variable> {
        let instrument = self.get(instrument_id)?;
        instrument
            .variable(shortname)
            .ok_or_else(|| ChordaError::NoSuchVariable {
                instrument_id,
                variable: shortname.to_string(),
            })
    }

    pub fn contains(&self, id: u32) -> bool {
        self.instruments.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.values()
    }
}
