//! Client half of the live sync core: snapshot reads, the reconnecting push
//! subscription and the merge rules that keep local collections converged.

pub mod api;
pub mod identity;
pub mod live;
pub mod merge;
pub mod session;
pub mod sync;
pub mod views;

pub use api::{ApiClient, ApiError};
pub use identity::IdentityMapper;
pub use live::{Applied, ApplyError, LiveState, Retention, Snapshot};
pub use session::LiveSession;
pub use sync::{ConnectionState, Connector, SyncConfig, SyncManager, WsConnector};
