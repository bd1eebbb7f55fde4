use core::fmt::Display;

/// Number of parameter bytes carried by every command.
pub const PARAM_LEN: usize = 10;
/// Command type byte plus parameters.
pub const COMMAND_FRAME_LEN: usize = 1 + PARAM_LEN;

#[cfg_attr(feature = "no_std", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    StartRecording,
    StopRecording,
    ReceiveRecordings,
    ClearRecordings,
}

impl Display for CommandType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl CommandType {
    /// Highest command code the device understands.
    pub const MAX_CODE: u8 = 0x04;

    /// Codes outside `0x01..=MAX_CODE` are not commands.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(CommandType::StartRecording),
            0x02 => Some(CommandType::StopRecording),
            0x03 => Some(CommandType::ReceiveRecordings),
            0x04 => Some(CommandType::ClearRecordings),
            _ => None,
        }
    }
    pub fn to_byte(&self) -> u8 {
        match self {
            CommandType::StartRecording => 0x01,
            CommandType::StopRecording => 0x02,
            CommandType::ReceiveRecordings => 0x03,
            CommandType::ClearRecordings => 0x04,
        }
    }
    pub fn from_str(cmdstr: &str) -> Option<Self> {
        match cmdstr {
            "start" => Some(CommandType::StartRecording),
            "stop" => Some(CommandType::StopRecording),
            "receive" => Some(CommandType::ReceiveRecordings),
            "clear" => Some(CommandType::ClearRecordings),
            _ => None,
        }
    }
    pub fn to_str(&self) -> &'static str {
        match self {
            CommandType::StartRecording => "start",
            CommandType::StopRecording => "stop",
            CommandType::ReceiveRecordings => "receive",
            CommandType::ClearRecordings => "clear",
        }
    }
}

/// A validated inbound command. Parameters are opaque to the device core.
#[cfg_attr(feature = "no_std", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub command_type: CommandType,
    pub params: [u8; PARAM_LEN],
}

impl Command {
    pub fn new(command_type: CommandType) -> Self {
        Self {
            command_type,
            params: [0u8; PARAM_LEN],
        }
    }

    /// Parse an inbound link frame. Byte 0 is the command code; up to
    /// `PARAM_LEN` following bytes are kept as parameters, the rest is ignored.
    pub fn from_frame(frame: &[u8]) -> Result<Self, CommandStatus> {
        let (code, rest) = frame
            .split_first()
            .ok_or(CommandStatus::InvalidCommand)?;
        let command_type = CommandType::from_byte(*code).ok_or(CommandStatus::InvalidCommand)?;

        let mut params = [0u8; PARAM_LEN];
        let n = rest.len().min(PARAM_LEN);
        params[..n].copy_from_slice(&rest[..n]);

        Ok(Self {
            command_type,
            params,
        })
    }

    pub fn to_frame(&self) -> [u8; COMMAND_FRAME_LEN] {
        let mut frame = [0u8; COMMAND_FRAME_LEN];
        frame[0] = self.command_type.to_byte();
        frame[1..].copy_from_slice(&self.params);
        frame
    }
}

/// Status code sent back over the link. Never stored.
#[cfg_attr(feature = "no_std", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    InvalidCommand,
    QueueFull,
    Error,
}

impl Display for CommandStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            CommandStatus::Ok => "ok",
            CommandStatus::InvalidCommand => "invalid command",
            CommandStatus::QueueFull => "command queue full",
            CommandStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl CommandStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CommandStatus::Ok),
            1 => Some(CommandStatus::InvalidCommand),
            2 => Some(CommandStatus::QueueFull),
            3 => Some(CommandStatus::Error),
            _ => None,
        }
    }
    pub fn to_byte(&self) -> u8 {
        match self {
            CommandStatus::Ok => 0,
            CommandStatus::InvalidCommand => 1,
            CommandStatus::QueueFull => 2,
            CommandStatus::Error => 3,
        }
    }
}
