//! Parsing of configured identifier strings into resolved handles.
//!
//! Resolution is a stable filter: valid entries come back in input order,
//! malformed ones are logged and reported alongside, never propagated.

use std::str::FromStr;

use tracing::{debug, error};

use mdbridge_model::{BarType, InstrumentId, ParseError};

use crate::error::BridgeError;

/// Outcome of resolving a batch of identifier strings.
#[derive(Debug)]
pub struct Resolved<T> {
    pub handles: Vec<T>,
    /// One `MalformedIdentifier` per skipped entry, in input order
    pub rejected: Vec<BridgeError>,
}

impl<T> Resolved<T> {
    pub fn skipped(&self) -> usize {
        self.rejected.len()
    }
}

pub struct IdentifierResolver;

impl IdentifierResolver {
    /// Resolve every raw string with `T::from_str`, skipping failures.
    pub fn resolve<T, S>(kind: &'static str, raw: &[S]) -> Resolved<T>
    where
        T: FromStr<Err = ParseError>,
        S: AsRef<str>,
    {
        let mut handles = Vec::with_capacity(raw.len());
        let mut rejected = Vec::new();

        for input in raw {
            let input = input.as_ref();
            match input.parse::<T>() {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    let err = BridgeError::MalformedIdentifier {
                        kind,
                        input: input.to_string(),
                        source,
                    };
                    error!(error = %err, "Skipping identifier");
                    rejected.push(err);
                }
            }
        }

        debug!(kind, resolved = handles.len(), skipped = rejected.len(), "Resolved identifiers");
        Resolved { handles, rejected }
    }

    pub fn instruments<S: AsRef<str>>(raw: &[S]) -> Resolved<InstrumentId> {
        Self::resolve("instrument", raw)
    }

    pub fn bar_types<S: AsRef<str>>(raw: &[S]) -> Resolved<BarType> {
        Self::resolve("bar type", raw)
    }

    /// One bar type per instrument from a `{STEP}-{AGGREGATION}-{PRICE_TYPE}-{SOURCE}` descriptor.
    pub fn derive_bar_types(instruments: &[InstrumentId], bar_spec: &str) -> Resolved<BarType> {
        let raw: Vec<String> = instruments
            .iter()
            .map(|id| format!("{}-{}", id, bar_spec.trim()))
            .collect();
        Self::bar_types(&raw)
    }
}
