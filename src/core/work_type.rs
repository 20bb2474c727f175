//! Typed payloads describing which simulation step a work item runs.
//!
//! Every identifier and quantity is a validated value object. Constructors
//! reject nil, empty, zero and non-finite inputs, and the same checks run again
//! when a payload is decoded from storage, so an invalid payload can never be
//! built, enqueued, or handed to a handler.

use super::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a persona action type, in characters.
pub const MAX_ACTION_TYPE_LEN: usize = 64;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "Uuid", into = "Uuid")]
        pub struct $name(Uuid);

        impl $name {
            /// Wraps a UUID, rejecting the nil UUID.
            pub fn new(id: Uuid) -> Result<Self> {
                if id.is_nil() {
                    return Err(CoreError::invalid_payload($field, "must not be the nil UUID"));
                }
                Ok(Self(id))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl TryFrom<Uuid> for $name {
            type Error = CoreError;

            fn try_from(id: Uuid) -> Result<Self> {
                Self::new(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

macro_rules! post_epoch_timestamp {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "DateTime<Utc>", into = "DateTime<Utc>")]
        pub struct $name(DateTime<Utc>);

        impl $name {
            /// Wraps a timestamp, rejecting anything at or before the Unix epoch.
            pub fn new(at: DateTime<Utc>) -> Result<Self> {
                if at <= DateTime::<Utc>::UNIX_EPOCH {
                    return Err(CoreError::invalid_payload(
                        $field,
                        format!("{} is not after the Unix epoch", at),
                    ));
                }
                Ok(Self(at))
            }

            pub fn as_datetime(&self) -> DateTime<Utc> {
                self.0
            }
        }

        impl TryFrom<DateTime<Utc>> for $name {
            type Error = CoreError;

            fn try_from(at: DateTime<Utc>) -> Result<Self> {
                Self::new(at)
            }
        }

        impl From<$name> for DateTime<Utc> {
            fn from(value: $name) -> DateTime<Utc> {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.to_rfc3339().fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Government whose dominion turn is resolved.
    GovernmentId,
    "government_id"
);
uuid_id!(
    /// Settlement whose civic stats are aggregated.
    SettlementId,
    "settlement_id"
);
uuid_id!(
    /// Persona performing an action.
    PersonaId,
    "persona_id"
);
uuid_id!(
    /// Market being re-priced.
    MarketId,
    "market_id"
);
uuid_id!(
    /// Traded item being re-priced.
    ItemId,
    "item_id"
);

post_epoch_timestamp!(
    /// The in-world date a dominion turn resolves.
    TurnDate,
    "turn_date"
);
post_epoch_timestamp!(
    /// Lower bound of the window a civic-stats aggregation covers.
    SinceTimestamp,
    "since"
);

/// Kind of action a persona performs, e.g. `"bribe_official"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionType(String);

impl ActionType {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid_payload("action_type", "must not be empty"));
        }
        if trimmed.chars().count() > MAX_ACTION_TYPE_LEN {
            return Err(CoreError::invalid_payload(
                "action_type",
                format!("longer than {} characters", MAX_ACTION_TYPE_LEN),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ActionType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ActionType> for String {
    fn from(value: ActionType) -> String {
        value.0
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Influence a persona spends on an action. Always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct InfluenceCost(u32);

impl InfluenceCost {
    pub fn new(value: u32) -> Result<Self> {
        if value == 0 {
            return Err(CoreError::invalid_payload("influence_cost", "must be positive"));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for InfluenceCost {
    type Error = CoreError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<InfluenceCost> for u32 {
    fn from(value: InfluenceCost) -> u32 {
        value.0
    }
}

/// Relative demand pressure fed into market re-pricing.
///
/// Finite and strictly positive; `1.0` means demand matches supply.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct DemandSignal(f64);

impl DemandSignal {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(CoreError::invalid_payload("demand_signal", "must be finite"));
        }
        if value <= 0.0 {
            return Err(CoreError::invalid_payload("demand_signal", "must be positive"));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for DemandSignal {
    type Error = CoreError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DemandSignal> for f64 {
    fn from(value: DemandSignal) -> f64 {
        value.0
    }
}

/// Resolve one dominion turn for a government.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DominionTurn {
    pub government_id: GovernmentId,
    pub turn_date: TurnDate,
}

/// Recompute a settlement's civic stats from a point in time onwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CivicStatsAggregation {
    pub settlement_id: SettlementId,
    pub since: SinceTimestamp,
}

/// Resolve an action taken by a persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaAction {
    pub persona_id: PersonaId,
    pub action_type: ActionType,
    pub influence_cost: InfluenceCost,
}

/// Re-price one item in one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPricing {
    pub market_id: MarketId,
    pub item_id: ItemId,
    pub demand_signal: DemandSignal,
}

/// The closed set of simulation steps the queue knows how to run.
///
/// Dispatch matches exhaustively on this enum, so adding a variant is a
/// compile error until every dispatcher and event mapping handles it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkType {
    DominionTurn(DominionTurn),
    CivicStatsAggregation(CivicStatsAggregation),
    PersonaAction(PersonaAction),
    MarketPricing(MarketPricing),
}

impl WorkType {
    pub fn dominion_turn(government_id: Uuid, turn_date: DateTime<Utc>) -> Result<Self> {
        Ok(WorkType::DominionTurn(DominionTurn {
            government_id: GovernmentId::new(government_id)?,
            turn_date: TurnDate::new(turn_date)?,
        }))
    }

    pub fn civic_stats_aggregation(settlement_id: Uuid, since: DateTime<Utc>) -> Result<Self> {
        Ok(WorkType::CivicStatsAggregation(CivicStatsAggregation {
            settlement_id: SettlementId::new(settlement_id)?,
            since: SinceTimestamp::new(since)?,
        }))
    }

    pub fn persona_action(
        persona_id: Uuid,
        action_type: impl Into<String>,
        influence_cost: u32,
    ) -> Result<Self> {
        Ok(WorkType::PersonaAction(PersonaAction {
            persona_id: PersonaId::new(persona_id)?,
            action_type: ActionType::new(action_type)?,
            influence_cost: InfluenceCost::new(influence_cost)?,
        }))
    }

    pub fn market_pricing(market_id: Uuid, item_id: Uuid, demand_signal: f64) -> Result<Self> {
        Ok(WorkType::MarketPricing(MarketPricing {
            market_id: MarketId::new(market_id)?,
            item_id: ItemId::new(item_id)?,
            demand_signal: DemandSignal::new(demand_signal)?,
        }))
    }

    /// Stable variant name used in events, logs, and storage.
    pub fn name(&self) -> &'static str {
        match self {
            WorkType::DominionTurn(_) => "DominionTurn",
            WorkType::CivicStatsAggregation(_) => "CivicStatsAggregation",
            WorkType::PersonaAction(_) => "PersonaAction",
            WorkType::MarketPricing(_) => "MarketPricing",
        }
    }
}

impl From<DominionTurn> for WorkType {
    fn from(value: DominionTurn) -> Self {
        WorkType::DominionTurn(value)
    }
}

impl From<CivicStatsAggregation> for WorkType {
    fn from(value: CivicStatsAggregation) -> Self {
        WorkType::CivicStatsAggregation(value)
    }
}

impl From<PersonaAction> for WorkType {
    fn from(value: PersonaAction) -> Self {
        WorkType::PersonaAction(value)
    }
}

impl From<MarketPricing> for WorkType {
    fn from(value: MarketPricing) -> Self {
        WorkType::MarketPricing(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn turn_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2031, 4, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_constructors() {
        assert!(WorkType::dominion_turn(Uuid::new_v4(), turn_date()).is_ok());
        assert!(WorkType::civic_stats_aggregation(Uuid::new_v4(), turn_date()).is_ok());
        assert!(WorkType::persona_action(Uuid::new_v4(), "bribe_official", 5).is_ok());
        assert!(WorkType::market_pricing(Uuid::new_v4(), Uuid::new_v4(), 1.25).is_ok());
    }

    #[test]
    fn test_nil_ids_rejected() {
        let err = WorkType::dominion_turn(Uuid::nil(), turn_date()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidPayload {
                field: "government_id",
                ..
            }
        ));

        let err = WorkType::market_pricing(Uuid::new_v4(), Uuid::nil(), 1.0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload { field: "item_id", .. }));
    }

    #[test]
    fn test_epoch_timestamps_rejected() {
        let err = WorkType::dominion_turn(Uuid::new_v4(), DateTime::<Utc>::UNIX_EPOCH).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload { field: "turn_date", .. }));

        let before_epoch = Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap();
        let err = WorkType::civic_stats_aggregation(Uuid::new_v4(), before_epoch).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload { field: "since", .. }));
    }

    #[test]
    fn test_persona_action_validation() {
        assert!(WorkType::persona_action(Uuid::new_v4(), "   ", 5).is_err());
        assert!(WorkType::persona_action(Uuid::new_v4(), "x".repeat(65), 5).is_err());
        assert!(WorkType::persona_action(Uuid::new_v4(), "rally", 0).is_err());

        let action = ActionType::new("  rally  ").unwrap();
        assert_eq!(action.as_str(), "rally");
    }

    #[test]
    fn test_demand_signal_validation() {
        assert!(DemandSignal::new(0.0).is_err());
        assert!(DemandSignal::new(-1.0).is_err());
        assert!(DemandSignal::new(f64::NAN).is_err());
        assert!(DemandSignal::new(f64::INFINITY).is_err());
        assert_eq!(DemandSignal::new(0.5).unwrap().get(), 0.5);
    }

    #[test]
    fn test_variant_names() {
        let work = WorkType::persona_action(Uuid::new_v4(), "rally", 1).unwrap();
        assert_eq!(work.name(), "PersonaAction");

        let json = serde_json::to_value(&work).unwrap();
        assert_eq!(json["type"], "PersonaAction");
        assert_eq!(json["action_type"], "rally");
    }
}
