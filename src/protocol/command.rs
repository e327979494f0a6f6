//! Control packet commands.

use std::fmt;

/// Command code carried in every control packet header.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Nop = 0,
    Request = 1,
    Method = 2,
    Uri = 3,
    ScriptName = 4,
    PathInfo = 5,
    QueryString = 6,
    Header = 7,
    Parameter = 8,
    Status = 9,
    NoData = 10,
    Data = 11,
    Length = 12,
    Stop = 13,
    Premature = 14,
}

impl Command {
    /// Protocol name, as used in error messages and logs.
    pub fn name(self) -> &'static str {
        match self {
            Command::Nop => "NOP",
            Command::Request => "REQUEST",
            Command::Method => "METHOD",
            Command::Uri => "URI",
            Command::ScriptName => "SCRIPT_NAME",
            Command::PathInfo => "PATH_INFO",
            Command::QueryString => "QUERY_STRING",
            Command::Header => "HEADER",
            Command::Parameter => "PARAMETER",
            Command::Status => "STATUS",
            Command::NoData => "NO_DATA",
            Command::Data => "DATA",
            Command::Length => "LENGTH",
            Command::Stop => "STOP",
            Command::Premature => "PREMATURE",
        }
    }

    pub fn code(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Command {
    /// The unknown code.
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        let command = match code {
            0 => Command::Nop,
            1 => Command::Request,
            2 => Command::Method,
            3 => Command::Uri,
            4 => Command::ScriptName,
            5 => Command::PathInfo,
            6 => Command::QueryString,
            7 => Command::Header,
            8 => Command::Parameter,
            9 => Command::Status,
            10 => Command::NoData,
            11 => Command::Data,
            12 => Command::Length,
            13 => Command::Stop,
            14 => Command::Premature,
            other => return Err(other),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_values() {
        for code in 0..=14u16 {
            let command = Command::try_from(code).unwrap();
            assert_eq!(command.code(), code);
        }
        assert_eq!(Command::try_from(15), Err(15));
    }

    #[test]
    fn names() {
        assert_eq!(Command::NoData.to_string(), "NO_DATA");
        assert_eq!(Command::ScriptName.name(), "SCRIPT_NAME");
    }
}
