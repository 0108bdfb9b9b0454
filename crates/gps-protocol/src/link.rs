//! Link and command protocol tables
//!
//! Devices speak one of two link generations (`L001`, `L002`) which assign
//! different packet ids to the same logical packets, and one of two command
//! generations (`A010`, `A011`) which number the transfer commands
//! differently. Everything above this module works with [`PacketKind`] and
//! [`Command`] and lets the negotiated generation pick the numbers.

/// Logical packet kinds above the basic link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PacketKind {
    CommandData,
    XferComplete,
    DateTimeData,
    PositionData,
    Records,
    RouteHeader,
    RouteWaypoint,
    RouteLink,
    TrackData,
    TrackHeader,
    WaypointData,
    PvtData,
    UnitId,
    DisplayData,
    FileRequest,
    FileData,
    FileHeader,
    FileNotFound,
    CapacityData,
    UnlockResponse,
}

/// Link protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkProtocol {
    L001,
    L002,
}

const L001_IDS: &[(PacketKind, u8)] = &[
    (PacketKind::CommandData, 10),
    (PacketKind::XferComplete, 12),
    (PacketKind::DateTimeData, 14),
    (PacketKind::PositionData, 17),
    (PacketKind::Records, 27),
    (PacketKind::RouteHeader, 29),
    (PacketKind::RouteWaypoint, 30),
    (PacketKind::TrackData, 34),
    (PacketKind::WaypointData, 35),
    (PacketKind::UnitId, 38),
    (PacketKind::PvtData, 51),
    (PacketKind::DisplayData, 69),
    (PacketKind::FileRequest, 89),
    (PacketKind::FileData, 90),
    (PacketKind::FileHeader, 91),
    (PacketKind::FileNotFound, 92),
    (PacketKind::CapacityData, 95),
    (PacketKind::RouteLink, 98),
    (PacketKind::TrackHeader, 99),
    (PacketKind::UnlockResponse, 108),
];

const L002_IDS: &[(PacketKind, u8)] = &[
    (PacketKind::CommandData, 11),
    (PacketKind::XferComplete, 12),
    (PacketKind::DateTimeData, 20),
    (PacketKind::PositionData, 24),
    (PacketKind::Records, 35),
    (PacketKind::RouteHeader, 37),
    (PacketKind::RouteWaypoint, 39),
    (PacketKind::WaypointData, 43),
];

impl LinkProtocol {
    /// Capability token naming this generation
    pub fn token(&self) -> &'static str {
        match self {
            LinkProtocol::L001 => "L1",
            LinkProtocol::L002 => "L2",
        }
    }

    fn table(&self) -> &'static [(PacketKind, u8)] {
        match self {
            LinkProtocol::L001 => L001_IDS,
            LinkProtocol::L002 => L002_IDS,
        }
    }

    /// Packet id for a logical packet, if this generation has one
    pub fn pid(&self, kind: PacketKind) -> Option<u8> {
        self.table()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
    }

    /// Logical packet for a packet id
    pub fn classify(&self, pid: u8) -> Option<PacketKind> {
        self.table()
            .iter()
            .find(|(_, id)| *id == pid)
            .map(|(k, _)| *k)
    }
}

/// Device commands carried in a command packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    AbortTransfer,
    TransferPosition,
    TransferRoutes,
    TransferTime,
    TransferTracks,
    TransferWaypoints,
    TurnOffPower,
    TransferUnitId,
    TransferScreenBitmap,
    StartPvtData,
    StopPvtData,
    TransferMemory,
}

/// Command protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommandProtocol {
    A010,
    A011,
}

const A010_COMMANDS: &[(Command, u16)] = &[
    (Command::AbortTransfer, 0),
    (Command::TransferPosition, 2),
    (Command::TransferRoutes, 4),
    (Command::TransferTime, 5),
    (Command::TransferTracks, 6),
    (Command::TransferWaypoints, 7),
    (Command::TurnOffPower, 8),
    (Command::TransferUnitId, 14),
    (Command::TransferScreenBitmap, 32),
    (Command::StartPvtData, 49),
    (Command::StopPvtData, 50),
    (Command::TransferMemory, 63),
];

const A011_COMMANDS: &[(Command, u16)] = &[
    (Command::AbortTransfer, 0),
    (Command::TransferRoutes, 8),
    (Command::TransferTime, 20),
    (Command::TransferWaypoints, 21),
    (Command::TurnOffPower, 26),
];

impl CommandProtocol {
    /// Capability token naming this generation
    pub fn token(&self) -> &'static str {
        match self {
            CommandProtocol::A010 => "A10",
            CommandProtocol::A011 => "A11",
        }
    }

    fn table(&self) -> &'static [(Command, u16)] {
        match self {
            CommandProtocol::A010 => A010_COMMANDS,
            CommandProtocol::A011 => A011_COMMANDS,
        }
    }

    /// Command number, if this generation has the command
    pub fn code(&self, command: Command) -> Option<u16> {
        self.table()
            .iter()
            .find(|(c, _)| *c == command)
            .map(|(_, code)| *code)
    }

    /// Command for a command number
    pub fn command(&self, code: u16) -> Option<Command> {
        self.table()
            .iter()
            .find(|(_, n)| *n == code)
            .map(|(c, _)| *c)
    }
}
