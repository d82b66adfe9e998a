//! Logical kernel channel names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the five logical kernel channels.
///
/// Wire names match the Jupyter connection-file keys: `control`, `shell`,
/// `iopub`, `stdin`, `hb`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelName {
    /// Out-of-band command channel (interrupt, shutdown).
    Control,
    /// Primary request/reply channel (execute, inspect, kernel-info).
    Shell,
    /// Kernel-to-all-clients broadcast channel (status, output, errors).
    Iopub,
    /// Kernel-to-client input prompt channel.
    Stdin,
    /// Liveness-only echo channel, never carries protocol messages.
    #[serde(rename = "hb")]
    Heartbeat,
}

impl ChannelName {
    /// All five channels, in the order the registry opens them.
    pub const ALL: [ChannelName; 5] = [
        ChannelName::Iopub,
        ChannelName::Shell,
        ChannelName::Control,
        ChannelName::Stdin,
        ChannelName::Heartbeat,
    ];

    /// The wire name used in connection files and client envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelName::Control => "control",
            ChannelName::Shell => "shell",
            ChannelName::Iopub => "iopub",
            ChannelName::Stdin => "stdin",
            ChannelName::Heartbeat => "hb",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
