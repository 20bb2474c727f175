//! Core types for the simwork queue.
//!
//! # Domain Model
//! - [`WorkType`]: The closed set of simulation steps, built from validated value objects
//! - [`WorkItem`]: A durable queue entry with a version-guarded lifecycle
//! - [`WorkStatus`]: The lifecycle state (Pending, Processing, Completed, Failed)
//!
//! # Retry Behavior
//! - [`RetryPolicy`]: How many failures are tolerated and how soon a failed item is re-claimed
//! - [`MAX_RETRIES`]: The default failure budget
//!
//! # Serialization
//! - [`serialize_value`] / [`deserialize_value`]: JSON encoding used for stored payloads
//!
//! # Error Handling
//! - [`CoreError`]: Construction and transition errors
//!
//! # Example
//!
//! ```
//! use simwork::core::{WorkItem, WorkStatus, WorkType};
//! use chrono::{TimeZone, Utc};
//! use uuid::Uuid;
//!
//! let turn_date = Utc.with_ymd_and_hms(2031, 4, 2, 0, 0, 0).unwrap();
//! let work = WorkType::dominion_turn(Uuid::new_v4(), turn_date).unwrap();
//!
//! let mut item = WorkItem::create(work);
//! item.start().unwrap();
//! item.complete().unwrap();
//! assert_eq!(item.status(), WorkStatus::Completed);
//! assert_eq!(item.version(), 2);
//! ```

mod error;
pub mod retry;
mod serialization;
mod work_item;
mod work_type;

pub use error::{BoxError, CoreError, Error, Result};
pub use retry::RetryPolicy;
pub use serialization::{deserialize_value, serialize_value};
pub use work_item::{WorkItem, WorkStatus, MAX_RETRIES};
pub use work_type::{
    ActionType, CivicStatsAggregation, DemandSignal, DominionTurn, GovernmentId, InfluenceCost,
    ItemId, MarketId, MarketPricing, PersonaAction, PersonaId, SettlementId, SinceTimestamp,
    TurnDate, WorkType, MAX_ACTION_TYPE_LEN,
};
