//! Remote command execution.
//!
//! A [`Channel`] keeps one connection to the remote host alive and runs
//! command lines over it, reconnecting when the transport drops. The
//! production transport is OpenSSH connection multiplexing ([`ssh`]); tests
//! drive the same channel logic through in-memory connectors.

pub mod channel;
pub mod fake;
pub mod ssh;

pub use channel::{parse_utc_offset, Channel, OFFSET_COMMAND};
pub use fake::ScriptedRunner;
pub use ssh::{SshConnection, SshConnector};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};

/// Anything that can run a shell command line on the remote host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` and return its captured standard output.
    async fn execute(&self, command: &str) -> Result<String>;

    /// UTC offset of the remote host's clock, UTC when unknown.
    fn clock_offset(&self) -> FixedOffset {
        Utc.fix()
    }
}

/// Establishes connections to one remote endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    /// Dial the endpoint. Fails with a connect error.
    async fn connect(&self) -> Result<Self::Connection>;
}

/// A live connection able to open one session per command.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Run `command` in a fresh session.
    ///
    /// Returns an exec error only when the session itself could not be
    /// created; a non-zero exit status of the remote command is not an
    /// error and its standard output is returned as usual.
    async fn run(&self, command: &str) -> Result<String>;

    /// Tear the connection down.
    async fn close(&self);
}
