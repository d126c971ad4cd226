pub mod endpoint;

pub mod manager;

pub mod notification;

pub mod leaderboard;

pub mod spectator;

pub mod synthetic;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use endpoint::{
    Address,
    Delivery,
    ReadCall,
    Selector,
    StreamEndpoint,
    StreamError,
    StreamHandlers,
    Subscription,
    SubscriptionRequest,
    Topic,
    UnavailableEndpoint,
};
pub use manager::{
    FeedCallbacks,
    FeedMode,
    Liveness,
    SubscriptionHandle,
    SubscriptionManager,
};

/// Wall-clock instant in milliseconds since the unix epoch.
pub type UnixMillis = i64;
