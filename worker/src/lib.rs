pub mod dispatch;
pub mod engine;
pub mod error;
pub mod http;
pub mod pager;
mod subscription;

#[cfg(test)]
mod mock;

pub use dispatch::{ActionDispatcher, SourceSelection};
pub use engine::{ConnectReport, ConnectionState, SyncEngine, SyncOptions};
pub use error::{ActionError, ClientError, ConnectError, IncompatibleServerError};
pub use http::{HttpClient, ReqwestClient, TransportError};
pub use pager::{ContentPager, PagerOptions, Window};
pub use subscription::{Subscription, SyncEvent};
