use log::debug;
use std::fmt;

/// Why a connection was abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectReason {
    /// The device reported an internal error
    InternalError,
    /// The device closed an idle session
    IdleTimeout,
    /// A poll reply failed validation
    MalformedPollReply,
    /// A request stayed unanswered across too many scheduler ticks
    StuckRequest,
    /// No frame arrived for too long
    Silence,
    Transport,
    AuthRejected,
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconnectReason::InternalError => "internal error",
            ReconnectReason::IdleTimeout => "idle timeout",
            ReconnectReason::MalformedPollReply => "malformed poll reply",
            ReconnectReason::StuckRequest => "stuck request",
            ReconnectReason::Silence => "silence",
            ReconnectReason::Transport => "transport failure",
            ReconnectReason::AuthRejected => "authentication rejected",
        })
    }
}

/// Fire-and-forget sink for protocol diagnostics. Nothing reported here
/// influences the session.
pub trait Reporter {
    fn error(&mut self, category: &str, detail: &str);
    fn version_detected(&mut self, version: u8);
    fn reconnect(&mut self, _reason: ReconnectReason) {}
}

/// Reporter that only writes to the debug log.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn error(&mut self, category: &str, detail: &str) {
        debug!("reported {category}: {detail}");
    }

    fn version_detected(&mut self, version: u8) {
        debug!("reported winet version {version}");
    }

    fn reconnect(&mut self, reason: ReconnectReason) {
        debug!("reported reconnect: {reason}");
    }
}
