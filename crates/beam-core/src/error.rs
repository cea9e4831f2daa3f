use thiserror::Error;

/// Unified error type for the Beam workspace.
///
/// Nothing in here is fatal to the process: every variant is scoped to one
/// peer's negotiation or a single telemetry tick.
#[derive(Error, Debug)]
pub enum BeamError {
    // ── Mesh transport errors ──────────────────────────────────
    #[error("mesh connection failed: {peer}: {reason}")]
    MeshConnect { peer: String, reason: String },

    #[error("mesh peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("malformed negotiation message: {0}")]
    MalformedMessage(String),

    // ── Radio (second transport) errors ────────────────────────
    #[error("radio window of {window_secs}s expired without a link")]
    RadioTimeout { window_secs: u64 },

    #[error("radio link closed")]
    LinkClosed,

    #[error("failed to close socket: {0}")]
    SocketClose(String),

    #[error("transport error: {0}")]
    Transport(String),

    // ── Telemetry errors ───────────────────────────────────────
    #[error("malformed telemetry payload: {0}")]
    MalformedTelemetry(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BeamError>;
