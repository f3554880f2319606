//! # tsplug core
//!
//! Shared vocabulary for the tsplug model plugin host: identifiers, the
//! model lifecycle state machine, the plugin request envelope and the
//! time helpers every plugin relies on.

pub mod error;
pub mod fingerprint;
pub mod request;
pub mod state;
pub mod time;
pub mod types;

pub use error::{CoreError, Result};
pub use fingerprint::Fingerprint;
pub use request::{InstanceSpec, PluginRequest, SeriesSet};
pub use state::ModelState;
pub use time::{GranSpec, Granularity};
pub use types::{ModelId, TenantId, TimeKey};
