//! Enumeration types for territory and delivery cycle status.
//!
//! Both enums persist under the Spanish names used by the existing data
//! store (`disponible`, `en_uso`, ...). Parsing also accepts the English
//! names so the API can be driven with either vocabulary. Serialization
//! always writes the persisted name, which keeps rows round-tripping
//! losslessly.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Error returned when a status string matches no known value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownStatus {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

// ---------------------------------------------------------------------------
// Territory status
// ---------------------------------------------------------------------------

/// Persisted lifecycle status of a territory.
///
/// The special-campaign exemption is not a status of its own: it is the
/// `is_special_campaign` flag layered on `Assigned` and `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum TerritoryStatus {
    /// Free to be assigned (subject to `rest_until`).
    #[serde(rename = "disponible", alias = "available")]
    Available,
    /// On loan to a user.
    #[serde(rename = "en_uso", alias = "assigned")]
    Assigned,
    /// On loan past its due date; still held by the user.
    #[serde(rename = "caducado", alias = "expired")]
    Expired,
    /// Returned and cooling down until `rest_until`.
    #[serde(rename = "inhabilitado", alias = "disabled")]
    Disabled,
}

impl TerritoryStatus {
    /// All statuses in display order.
    pub const ALL: [Self; 4] = [Self::Available, Self::Assigned, Self::Expired, Self::Disabled];

    /// The name stored in the database column.
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Available => "disponible",
            Self::Assigned => "en_uso",
            Self::Expired => "caducado",
            Self::Disabled => "inhabilitado",
        }
    }

    /// The English name used in logs and error messages.
    pub const fn as_english(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Assigned => "assigned",
            Self::Expired => "expired",
            Self::Disabled => "disabled",
        }
    }

    /// Whether a territory in this status is held by a user.
    pub const fn is_on_loan(self) -> bool {
        matches!(self, Self::Assigned | Self::Expired)
    }
}

impl core::fmt::Display for TerritoryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl core::str::FromStr for TerritoryStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "disponible" | "available" => Ok(Self::Available),
            "en_uso" | "assigned" => Ok(Self::Assigned),
            "caducado" | "expired" => Ok(Self::Expired),
            "inhabilitado" | "disabled" => Ok(Self::Disabled),
            other => Err(UnknownStatus {
                kind: "territory status",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery cycle status
// ---------------------------------------------------------------------------

/// Status of one delivery record (one assignment-to-return cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum CycleStatus {
    /// Open cycle from a regular assignment.
    #[serde(rename = "entregado", alias = "delivered")]
    Delivered,
    /// Closed cycle.
    #[serde(rename = "devuelto", alias = "returned")]
    Returned,
    /// Open cycle whose due date was pushed back at least once.
    #[serde(rename = "extendido", alias = "extended")]
    Extended,
    /// Open cycle from a special-campaign assignment.
    #[serde(rename = "especial", alias = "special")]
    Special,
}

impl CycleStatus {
    /// The name stored in the database column.
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Delivered => "entregado",
            Self::Returned => "devuelto",
            Self::Extended => "extendido",
            Self::Special => "especial",
        }
    }

    /// Status that opens a cycle for a regular or special assignment.
    pub const fn opening(special: bool) -> Self {
        if special { Self::Special } else { Self::Delivered }
    }
}

impl core::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl core::str::FromStr for CycleStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "entregado" | "delivered" => Ok(Self::Delivered),
            "devuelto" | "returned" => Ok(Self::Returned),
            "extendido" | "extended" => Ok(Self::Extended),
            "especial" | "special" => Ok(Self::Special),
            other => Err(UnknownStatus {
                kind: "cycle status",
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn territory_status_round_trips_persisted_names() {
        for status in TerritoryStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_db_str()));
            let back: TerritoryStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
            assert_eq!(status.as_db_str().parse::<TerritoryStatus>().unwrap(), status);
        }
    }

    #[test]
    fn english_aliases_are_accepted() {
        let status: TerritoryStatus = serde_json::from_str("\"assigned\"").unwrap();
        assert_eq!(status, TerritoryStatus::Assigned);
        assert_eq!("disabled".parse::<TerritoryStatus>().unwrap(), TerritoryStatus::Disabled);
        let cycle: CycleStatus = serde_json::from_str("\"special\"").unwrap();
        assert_eq!(cycle, CycleStatus::Special);
    }

    #[test]
    fn cycle_status_serializes_spanish() {
        assert_eq!(serde_json::to_string(&CycleStatus::Extended).unwrap(), "\"extendido\"");
        assert_eq!("especial".parse::<CycleStatus>().unwrap(), CycleStatus::Special);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "uso".parse::<TerritoryStatus>().unwrap_err();
        assert_eq!(err.value, "uso");
    }

    #[test]
    fn on_loan_statuses() {
        assert!(TerritoryStatus::Assigned.is_on_loan());
        assert!(TerritoryStatus::Expired.is_on_loan());
        assert!(!TerritoryStatus::Disabled.is_on_loan());
        assert_eq!(CycleStatus::opening(true), CycleStatus::Special);
        assert_eq!(CycleStatus::opening(false), CycleStatus::Delivered);
    }
}
