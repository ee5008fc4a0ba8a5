//! Subscription notification engine.
//!
//! A long-running scheduler keeps an in-memory cache of active
//! subscriptions, matches every resource event against their parsed
//! criteria, and fans matching events out to webhook endpoints with
//! exponential backoff retry, expiry handling, and retention cleanup.

pub mod criteria;
pub mod delivery;
pub mod engine;
pub mod repository;
pub mod types;

mod error;

pub use criteria::ParsedCriteria;
pub use delivery::DeliveryClient;
pub use engine::{EngineConfig, NotificationEngine, apply_failure, backoff_delay};
pub use error::SubscriptionError;
pub use repository::{
    InMemoryNotificationRepository, InMemorySubscriptionRepository, NotificationRepository,
    SubscriptionRepository,
};
pub use types::{ChannelInfo, NotificationRecord, NotificationStatus, SubscriptionInfo, SubscriptionStatus};
