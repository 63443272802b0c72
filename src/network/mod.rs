// Wire protocol: framing, mixed JSON+binary codec, authentication, relay.

pub mod auth;
pub mod frame;
pub mod jsonnpy;
pub mod protocol;
pub mod relay;

pub use auth::Secret;
pub use protocol::{ControlFrame, MasterFrame, WorkerFrame, WorkerRequest};
