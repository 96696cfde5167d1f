//! Concrete transports for driving a shell on a target host: raw TCP tubes
//! (bind listener and connect-back) and an SSH session built on the system
//! `ssh` client.

mod ssh;
mod tube;

pub use ssh::SshTransport;
pub use tube::TubeTransport;
