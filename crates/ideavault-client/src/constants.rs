//! Defaults and limits for the IdeaVault client.
//!
//! The `DEFAULT_*` values and the request timeout are overridable through
//! [`ClientConfig`](crate::ClientConfig). The rest are PocketBase wire details
//! and fixed capacities.

use std::time::Duration;

/// Default backend URL for local development.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8090";

/// Auth collection holding user records.
pub const DEFAULT_USERS_COLLECTION: &str = "users";

/// Collection holding idea records.
pub const DEFAULT_IDEAS_COLLECTION: &str = "ideas";

/// Relation field on an idea that points at its owner.
pub const OWNER_FIELD: &str = "user";

/// Sort expression for the initial load: newest first.
pub const LIST_SORT: &str = "-created";

/// Page size used when assembling a full list.
pub const LIST_PAGE_SIZE: u32 = 500;

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered change events per subscription before the sender waits.
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// Capacity of the out-of-band auth event channel.
pub const AUTH_EVENT_CAPACITY: usize = 16;

/// Maximum change events held for replay while a fetch is in flight.
/// Older entries are dropped first.
pub const MAX_PENDING_EVENTS: usize = 200;

/// First wait before reopening a dropped live subscription.
pub const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Longest wait between resubscribe attempts; doubling stops here.
pub const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(30);

/// Environment variable overriding the configured backend URL.
pub const BASE_URL_ENV: &str = "IDEAVAULT_URL";

/// Config file name under the user config directory.
pub const CONFIG_FILE: &str = "client.ron";
