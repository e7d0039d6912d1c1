//! # Harbor Page
//!
//! The foreground half of the resilience layer:
//!
//! - **Registration**: install the background process, surface updates, reload once on adoption
//! - **Connectivity**: online flag, transitions and "back online" tracking
//! - **Push**: permission, worker-bound token acquisition, token persistence
//! - **Foreground messages**: delegate rendering to the background process

pub mod collaborators;
pub mod connectivity;
pub mod foreground;
pub mod push;
pub mod registration;

pub use collaborators::{
    DeliveryEndpoint, DeviceInfo, FixedIdentity, HttpTokenStore, IdentityProvider, RemoteDelivery,
    TestNotification, TokenRecord, TokenStore,
};
pub use connectivity::{CallbackId, ConnectivityEvent, ConnectivityMonitor};
pub use foreground::ForegroundMessages;
pub use push::{
    PermissionPrompt, PermissionState, PushConfig, PushError, PushService,
    PushSubscriptionManager, SubscriptionState,
};
pub use registration::{PageHost, UpdateController, UpdateState};
