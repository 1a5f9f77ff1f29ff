pub mod error;
pub mod events;
pub mod forwarding;
pub mod session;

pub use error::{SshCoreError, SshResult};
