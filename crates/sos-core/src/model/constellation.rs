//! Observation constellations and observation types.

use serde::{Deserialize, Serialize};
use sos_common::{ConstellationId, Error};
use std::str::FromStr;

const OM_TYPE_PREFIX: &str = "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_";

/// Stored name of the "not yet typed" sentinel.
pub const UNDEFINED_TYPE_NAME: &str = "NOT_DEFINED";

/// Structural kind of an observation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ObservationType {
    /// Sentinel of a constellation that has not been typed yet.
    Undefined,
    Measurement,
    CountObservation,
    CategoryObservation,
    TruthObservation,
    TextObservation,
    ComplexObservation,
    SweArrayObservation,
}

impl ObservationType {
    pub const CONCRETE: [ObservationType; 7] = [
        ObservationType::Measurement,
        ObservationType::CountObservation,
        ObservationType::CategoryObservation,
        ObservationType::TruthObservation,
        ObservationType::TextObservation,
        ObservationType::ComplexObservation,
        ObservationType::SweArrayObservation,
    ];

    pub fn is_concrete(self) -> bool {
        self != ObservationType::Undefined
    }

    pub fn name(self) -> &'static str {
        match self {
            ObservationType::Undefined => UNDEFINED_TYPE_NAME,
            ObservationType::Measurement => "Measurement",
            ObservationType::CountObservation => "CountObservation",
            ObservationType::CategoryObservation => "CategoryObservation",
            ObservationType::TruthObservation => "TruthObservation",
            ObservationType::TextObservation => "TextObservation",
            ObservationType::ComplexObservation => "ComplexObservation",
            ObservationType::SweArrayObservation => "SWEArrayObservation",
        }
    }

    /// OGC-OM 2.0 URI, `None` for the sentinel.
    pub fn uri(self) -> Option<String> {
        self.is_concrete()
            .then(|| format!("{}{}", OM_TYPE_PREFIX, self.name()))
    }

    /// Parse a requested type. Unlike [`FromStr`] this refuses the sentinel.
    pub fn parse_requested(s: &str) -> Result<Self, Error> {
        match s.parse::<ObservationType>()? {
            ObservationType::Undefined => Err(Error::invalid(
                "observationType",
                "a concrete observation type is required",
            )),
            concrete => Ok(concrete),
        }
    }
}

impl FromStr for ObservationType {
    type Err = Error;

    /// Accepts short names (`Measurement`, `OM_Measurement`) and OGC-OM 2.0 URIs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == UNDEFINED_TYPE_NAME {
            return Ok(ObservationType::Undefined);
        }
        let short = trimmed
            .strip_prefix(OM_TYPE_PREFIX)
            .or_else(|| trimmed.strip_prefix("OM_"))
            .unwrap_or(trimmed);
        Self::CONCRETE
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(short))
            .ok_or_else(|| {
                Error::invalid(
                    "observationType",
                    format!("unknown observation type '{}'", s),
                )
            })
    }
}

impl TryFrom<String> for ObservationType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObservationType> for String {
    fn from(value: ObservationType) -> Self {
        value.name().to_string()
    }
}

impl std::fmt::Display for ObservationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The (procedure, observedProperty, offering) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstellationKey {
    pub procedure: String,
    pub observed_property: String,
    pub offering: String,
}

impl ConstellationKey {
    pub fn new(
        procedure: impl Into<String>,
        observed_property: impl Into<String>,
        offering: impl Into<String>,
    ) -> Self {
        ConstellationKey {
            procedure: procedure.into(),
            observed_property: observed_property.into(),
            offering: offering.into(),
        }
    }
}

impl std::fmt::Display for ConstellationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "procedure={}, observedProperty={}, offering={}",
            self.procedure, self.observed_property, self.offering
        )
    }
}

/// A stored constellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationConstellation {
    pub id: ConstellationId,
    #[serde(flatten)]
    pub key: ConstellationKey,
    pub observation_type: ObservationType,
}
