//! Envelope and payload message types.
//!
//! The envelope is the outer protocol message: a fixed header
//! (`protocol_version`, `session_id`, `seq`, `ack`, monotonic and wall
//! clocks) and exactly one payload variant. `seq` is monotonic per sender;
//! `ack` echoes the last peer sequence the sender observed.
//!
//! Message structs carry explicit prost field tags so the wire format is
//! pinned independently of field order. Tags are append-only: new fields
//! and payload variants take fresh tags, existing tags are never reused.

/// Peer role advertised in `Hello`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PeerRole {
    /// Role not provided; handshake is rejected.
    Unspecified = 0,
    /// The game client: produces telemetry, executes actions.
    GameClient = 1,
    /// The orchestrator: consumes telemetry, issues actions.
    Orchestrator = 2,
    /// The bridge itself, used in legacy handshake replies.
    BridgeServer = 3,
}

impl PeerRole {
    /// Canonical wire name, used for logs and metric labels.
    #[must_use]
    pub const fn as_str_name(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::GameClient => "GAME_CLIENT",
            Self::Orchestrator => "ORCHESTRATOR",
            Self::BridgeServer => "BRIDGE_SERVER",
        }
    }
}

/// Protocol feature advertised in `Hello` and confirmed as the
/// intersection in `HelloAck`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Capability {
    /// Unknown capability; dropped during negotiation.
    Unspecified = 0,
    /// Telemetry frames, latest-only relay.
    TelemetryV1 = 1,
    /// Timesync request/response.
    TimesyncV1 = 2,
    /// `HelloAck` handshake replies (absent: legacy `Hello` reply).
    HelloAckV1 = 3,
    /// Action request/ack/result correlation.
    ActionV1 = 4,
}

impl Capability {
    /// Canonical wire name.
    #[must_use]
    pub const fn as_str_name(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::TelemetryV1 => "TELEMETRY_V1",
            Self::TimesyncV1 => "TIMESYNC_V1",
            Self::HelloAckV1 => "HELLO_ACK_V1",
            Self::ActionV1 => "ACTION_V1",
        }
    }

    /// Parses a canonical wire name.
    #[must_use]
    pub fn from_str_name(value: &str) -> Option<Self> {
        match value {
            "UNSPECIFIED" => Some(Self::Unspecified),
            "TELEMETRY_V1" => Some(Self::TelemetryV1),
            "TIMESYNC_V1" => Some(Self::TimesyncV1),
            "HELLO_ACK_V1" => Some(Self::HelloAckV1),
            "ACTION_V1" => Some(Self::ActionV1),
            _ => None,
        }
    }
}

/// Action kind carried by `ActionRequest`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ActionType {
    /// Unknown action; rejected by the executor.
    Unspecified = 0,
    /// Emergency release of all actuators. Idempotent and always
    /// allowlisted at the client.
    StopAll = 1,
    /// Path-planned navigation to a target block.
    BaritoneGoto = 2,
}

impl ActionType {
    /// Canonical wire name.
    #[must_use]
    pub const fn as_str_name(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::StopAll => "STOP_ALL",
            Self::BaritoneGoto => "BARITONE_GOTO",
        }
    }
}

/// Terminal status of an `ActionResult`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ActionStatus {
    /// Status not provided.
    Unspecified = 0,
    /// Action completed successfully.
    Ok = 1,
    /// Action was rejected before execution.
    Rejected = 2,
    /// Action started but failed.
    Failed = 3,
    /// Action deadline elapsed without a terminal result.
    Timeout = 4,
}

impl ActionStatus {
    /// Canonical wire name.
    #[must_use]
    pub const fn as_str_name(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Ok => "OK",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

/// Game dimension reported in telemetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Dimension {
    /// Dimension not reported.
    Unspecified = 0,
    /// The overworld.
    Overworld = 1,
    /// The nether.
    Nether = 2,
    /// The end.
    End = 3,
    /// A modded or otherwise unrecognized dimension.
    Other = 4,
}

/// Error kind carried by `ErrorFrame`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ErrorCode {
    /// Unknown error.
    Unspecified = 0,
    /// Frame or payload failed to decode. Session preserved.
    CodecError = 1,
    /// Envelope protocol version is unsupported. Fatal.
    VersionMismatch = 2,
    /// A non-`Hello` payload arrived before the handshake. Fatal.
    HandshakeRequired = 3,
    /// No `Hello` arrived within the handshake timeout. Fatal.
    HelloTimeout = 4,
    /// Payload is not valid for the sender's role. Session preserved.
    RoleViolation = 5,
    /// `Hello`/`HelloAck` observed after the handshake. Session preserved.
    UnexpectedPayload = 6,
    /// Envelope carried no recognizable payload variant. Session preserved.
    UnsupportedPayload = 7,
    /// `request_id` already has a live or recently terminal entry.
    DuplicateRequest = 8,
    /// No unique target session for the action.
    TargetUnroutable = 9,
    /// The ordered channel to the target stayed full past its timeout.
    RelayCongested = 10,
    /// Action deadline elapsed without a terminal result.
    ActionTtlExpired = 11,
    /// Transport refused writes past the stall budget. Fatal.
    TransportStalled = 12,
    /// Inbound sequence number rewound. Fatal.
    BadSequence = 13,
}

impl ErrorCode {
    /// Canonical wire name.
    #[must_use]
    pub const fn as_str_name(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::CodecError => "CODEC_ERROR",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::HandshakeRequired => "HANDSHAKE_REQUIRED",
            Self::HelloTimeout => "HELLO_TIMEOUT",
            Self::RoleViolation => "ROLE_VIOLATION",
            Self::UnexpectedPayload => "UNEXPECTED_PAYLOAD",
            Self::UnsupportedPayload => "UNSUPPORTED_PAYLOAD",
            Self::DuplicateRequest => "DUPLICATE_REQUEST",
            Self::TargetUnroutable => "TARGET_UNROUTABLE",
            Self::RelayCongested => "RELAY_CONGESTED",
            Self::ActionTtlExpired => "ACTION_TTL_EXPIRED",
            Self::TransportStalled => "TRANSPORT_STALLED",
            Self::BadSequence => "BAD_SEQUENCE",
        }
    }
}

/// The outer protocol message: fixed header plus exactly one payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    /// Protocol version; must equal [`crate::PROTOCOL_VERSION`].
    #[prost(uint32, tag = "1")]
    pub protocol_version: u32,
    /// Server-assigned session identifier (UUID).
    #[prost(string, tag = "2")]
    pub session_id: ::prost::alloc::string::String,
    /// Sender sequence number, monotonic per sender.
    #[prost(uint64, tag = "3")]
    pub seq: u64,
    /// Last peer sequence the sender observed.
    #[prost(uint64, tag = "4")]
    pub ack: u64,
    /// Sender monotonic clock, milliseconds.
    #[prost(uint64, tag = "5")]
    pub mono_ms: u64,
    /// Sender wall clock, Unix milliseconds.
    #[prost(uint64, tag = "6")]
    pub wall_unix_ms: u64,
    /// The payload variant.
    #[prost(oneof = "envelope::Payload", tags = "10, 11, 12, 13, 14, 15, 16, 17, 18")]
    pub payload: ::core::option::Option<envelope::Payload>,
}

/// Nested types for [`Envelope`].
pub mod envelope {
    /// Exactly one payload per envelope.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        /// Handshake request.
        #[prost(message, tag = "10")]
        Hello(super::Hello),
        /// Handshake reply.
        #[prost(message, tag = "11")]
        HelloAck(super::HelloAck),
        /// Game state sample, latest-only relay.
        #[prost(message, tag = "12")]
        Telemetry(super::TelemetryFrame),
        /// Control action, ordered relay.
        #[prost(message, tag = "13")]
        ActionReq(super::ActionRequest),
        /// Acceptance decision from the executor.
        #[prost(message, tag = "14")]
        ActionAck(super::ActionAck),
        /// Terminal outcome from the executor.
        #[prost(message, tag = "15")]
        ActionRes(super::ActionResult),
        /// Clock probe.
        #[prost(message, tag = "16")]
        TimeSyncReq(super::TimeSyncRequest),
        /// Clock probe reply.
        #[prost(message, tag = "17")]
        TimeSyncRes(super::TimeSyncResponse),
        /// Protocol error report.
        #[prost(message, tag = "18")]
        Error(super::ErrorFrame),
    }

    impl Payload {
        /// Stable payload name for logs and metric labels.
        #[must_use]
        pub const fn kind(&self) -> &'static str {
            match self {
                Self::Hello(_) => "hello",
                Self::HelloAck(_) => "hello_ack",
                Self::Telemetry(_) => "telemetry",
                Self::ActionReq(_) => "action_req",
                Self::ActionAck(_) => "action_ack",
                Self::ActionRes(_) => "action_res",
                Self::TimeSyncReq(_) => "timesync_req",
                Self::TimeSyncRes(_) => "timesync_res",
                Self::Error(_) => "error",
            }
        }
    }
}

impl Envelope {
    /// Stable payload name for logs and metric labels; `"none"` when the
    /// payload variant was absent or unrecognized.
    #[must_use]
    pub fn payload_kind(&self) -> &'static str {
        self.payload.as_ref().map_or("none", envelope::Payload::kind)
    }
}

/// Handshake request. First (and only pre-`Established`) payload a peer
/// may send.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hello {
    /// Stable peer identity, e.g. `"gamepc"`.
    #[prost(string, tag = "1")]
    pub agent_id: ::prost::alloc::string::String,
    /// Declared peer role.
    #[prost(enumeration = "PeerRole", tag = "2")]
    pub role: i32,
    /// Advertised capabilities.
    #[prost(enumeration = "Capability", repeated, tag = "3")]
    pub capabilities: ::prost::alloc::vec::Vec<i32>,
    /// Peer software version string.
    #[prost(string, tag = "4")]
    pub client_version: ::prost::alloc::string::String,
    /// Client-proposed handshake nonce. Recorded for diagnostics only;
    /// the bridge always assigns its own.
    #[prost(string, tag = "5")]
    pub handshake_id: ::prost::alloc::string::String,
}

/// Handshake reply sent to peers advertising `HELLO_ACK_V1`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloAck {
    /// Whether the session was accepted.
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    /// Human-readable acceptance or rejection reason.
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
    /// Server-assigned handshake nonce; never the client's proposal.
    #[prost(string, tag = "3")]
    pub handshake_id: ::prost::alloc::string::String,
    /// Intersection of client and server capability sets.
    #[prost(enumeration = "Capability", repeated, tag = "4")]
    pub capabilities: ::prost::alloc::vec::Vec<i32>,
    /// Bridge software version string.
    #[prost(string, tag = "5")]
    pub server_version: ::prost::alloc::string::String,
}

/// Game state sample. `state_version` strictly increases per session;
/// stale samples are dropped at the relay boundary.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TelemetryFrame {
    /// Sample version, monotonic per session.
    #[prost(uint64, tag = "1")]
    pub state_version: u64,
    /// Player X position.
    #[prost(double, tag = "2")]
    pub x: f64,
    /// Player Y position.
    #[prost(double, tag = "3")]
    pub y: f64,
    /// Player Z position.
    #[prost(double, tag = "4")]
    pub z: f64,
    /// View yaw, degrees.
    #[prost(float, tag = "5")]
    pub yaw: f32,
    /// View pitch, degrees.
    #[prost(float, tag = "6")]
    pub pitch: f32,
    /// Health, 0..=20.
    #[prost(uint32, tag = "7")]
    pub hp: u32,
    /// Hunger, 0..=20.
    #[prost(uint32, tag = "8")]
    pub hunger: u32,
    /// Air supply, 0..=300.
    #[prost(uint32, tag = "9")]
    pub air: u32,
    /// Whether the player is sprinting.
    #[prost(bool, tag = "10")]
    pub sprinting: bool,
    /// Whether the player is sneaking.
    #[prost(bool, tag = "11")]
    pub sneaking: bool,
    /// Whether the player is on the ground.
    #[prost(bool, tag = "12")]
    pub on_ground: bool,
    /// Current dimension.
    #[prost(enumeration = "Dimension", tag = "13")]
    pub dimension: i32,
    /// World tick counter.
    #[prost(uint64, tag = "14")]
    pub world_tick: u64,
}

/// Control action issued by an orchestrator and relayed to a game client.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionRequest {
    /// Non-empty request identifier (UUID), unique per originator.
    #[prost(string, tag = "1")]
    pub request_id: ::prost::alloc::string::String,
    /// Action kind.
    #[prost(enumeration = "ActionType", tag = "2")]
    pub action_type: i32,
    /// Target game-client agent id; empty routes to the unique game client.
    #[prost(string, tag = "3")]
    pub target_agent_id: ::prost::alloc::string::String,
    /// Wall-clock expiry in Unix milliseconds; 0 means no caller TTL.
    #[prost(uint64, tag = "4")]
    pub expires_at_unix_ms: u64,
    /// Typed parameters for the action kind.
    #[prost(oneof = "action_request::Params", tags = "10")]
    pub params: ::core::option::Option<action_request::Params>,
}

/// Nested types for [`ActionRequest`].
pub mod action_request {
    /// Typed action parameters.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Params {
        /// Parameters for `BARITONE_GOTO`.
        #[prost(message, tag = "10")]
        BaritoneGoto(super::BaritoneGoto),
    }
}

/// Parameters for the `BARITONE_GOTO` action.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BaritoneGoto {
    /// Target block X.
    #[prost(int32, tag = "1")]
    pub x: i32,
    /// Target block Y.
    #[prost(int32, tag = "2")]
    pub y: i32,
    /// Target block Z.
    #[prost(int32, tag = "3")]
    pub z: i32,
    /// Abort when the path exceeds this distance, blocks.
    #[prost(uint32, tag = "4")]
    pub max_distance: u32,
    /// Overall navigation budget, milliseconds.
    #[prost(uint64, tag = "5")]
    pub timeout_ms: u64,
    /// Abort when no progress is made for this long, milliseconds.
    #[prost(uint64, tag = "6")]
    pub stuck_timeout_ms: u64,
}

/// Acceptance decision for an `ActionRequest`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionAck {
    /// The request this decision refers to.
    #[prost(string, tag = "1")]
    pub request_id: ::prost::alloc::string::String,
    /// Whether the request was accepted for execution.
    #[prost(bool, tag = "2")]
    pub accepted: bool,
    /// Human-readable reason.
    #[prost(string, tag = "3")]
    pub reason: ::prost::alloc::string::String,
}

/// Terminal outcome for an `ActionRequest`. Exactly one terminal result
/// reaches the originator for every admitted request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionResult {
    /// The request this outcome refers to.
    #[prost(string, tag = "1")]
    pub request_id: ::prost::alloc::string::String,
    /// Terminal status.
    #[prost(enumeration = "ActionStatus", tag = "2")]
    pub status: i32,
    /// Human-readable detail.
    #[prost(string, tag = "3")]
    pub detail: ::prost::alloc::string::String,
    /// Telemetry `state_version` at completion; 0 when unknown or
    /// synthesized by the bridge.
    #[prost(uint64, tag = "4")]
    pub final_state_version: u64,
}

/// Clock probe. The bridge replies in-session with [`TimeSyncResponse`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSyncRequest {
    /// Client monotonic clock at send, milliseconds.
    #[prost(uint64, tag = "1")]
    pub t_client_mono_ms: u64,
}

/// Clock probe reply, echoing the request it answers.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSyncResponse {
    /// Bridge monotonic clock at reply, milliseconds.
    #[prost(uint64, tag = "1")]
    pub t_server_mono_ms: u64,
    /// Bridge wall clock at reply, Unix milliseconds.
    #[prost(uint64, tag = "2")]
    pub t_server_wall_unix_ms: u64,
    /// The request being answered.
    #[prost(message, optional, tag = "3")]
    pub echo: ::core::option::Option<TimeSyncRequest>,
}

/// Protocol error report. Non-fatal codes preserve the session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorFrame {
    /// Error kind.
    #[prost(enumeration = "ErrorCode", tag = "1")]
    pub code: i32,
    /// Human-readable message.
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    /// Correlates the error with a request or handshake when non-empty.
    #[prost(string, tag = "3")]
    pub correlation_id: ::prost::alloc::string::String,
}
