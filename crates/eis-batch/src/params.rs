//! Job parameters and run identity
//!
//! A job instance is identified by its job name plus the set of
//! *identifying* parameters. Two launches with identical identifying
//! parameters refer to the same instance; a caller that wants a fresh run
//! must vary at least one identifying parameter (the trigger endpoint uses
//! the current time in milliseconds).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A typed job parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ParamValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "{}", s),
            ParamValue::Long(v) => write!(f, "{}", v),
            ParamValue::Double(v) => write!(f, "{}", v),
            ParamValue::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

/// A single parameter with its identifying flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParamValue,
    pub identifying: bool,
}

/// Ordered mapping of parameter name to typed value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    params: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name).map(|p| &p.value)
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParamValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParamValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.params.iter()
    }

    /// Stable identity key over the identifying parameters
    ///
    /// The key is a sha256 over `name=value` pairs in name order, so it is
    /// insensitive to insertion order and suitable as a unique-constraint
    /// column in the ledger.
    pub fn identity_key(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, param) in &self.params {
            if param.identifying {
                hasher.update(name.as_bytes());
                hasher.update(b"=");
                hasher.update(param.value.to_string().as_bytes());
                hasher.update(b";");
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Builder for [`JobParameters`]
#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    params: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn add_string(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(name, ParamValue::String(value.into()), true)
    }

    pub fn add_long(self, name: impl Into<String>, value: i64) -> Self {
        self.add(name, ParamValue::Long(value), true)
    }

    pub fn add_double(self, name: impl Into<String>, value: f64) -> Self {
        self.add(name, ParamValue::Double(value), true)
    }

    pub fn add_date(self, name: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.add(name, ParamValue::Date(value), true)
    }

    /// Add a parameter that does not contribute to run identity
    pub fn add_non_identifying(self, name: impl Into<String>, value: ParamValue) -> Self {
        self.add(name, value, false)
    }

    fn add(mut self, name: impl Into<String>, value: ParamValue, identifying: bool) -> Self {
        self.params
            .insert(name.into(), JobParameter { value, identifying });
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            params: self.params,
        }
    }
}
