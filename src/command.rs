//! The line based command language of the control link.
//!
//! Commands are case insensitive. Lists of channels or frame types may be separated by commas,
//! whitespace or both, so `SET CH 1,6,11` and `SET CH 1 6 11` are equivalent.

use core::fmt;

use heapless::String;

use crate::{
    config::{
        is_valid_channel, ChannelSet, FrameTypes, LogMode, MAX_CHANNELS, MAX_CHANNEL_NUMBER,
    },
    frame::FrameClass,
};

/// The longest command line accepted.
pub const COMMAND_MAX: usize = 128;

/// The lines printed by `HELP`.
pub const HELP_LINES: &[&str] = &[
    "HOP ON|OFF - Enable or disable channel hopping.",
    "SET CH <n>[,<n>...]|ALL - Replace the hop set.",
    "CLEAR CH <n>|ALL - Remove a channel from the hop set.",
    "SHOW CH - List the hop set.",
    "SET HOP <ms> - Set the hop interval.",
    "SET TYPE <type>[,<type>...] - Capture additional frame types.",
    "CLEAR TYPE <type>[,<type>...] - Stop capturing frame types.",
    "ONLY TYPE <type>[,<type>...] - Capture exactly these frame types.",
    "SHOW TYPES - List the captured frame types.",
    "  Types are MGMT, CTRL, DATA, MISC and ALL.",
    "LOG ON|OFF - Stream frames as JSON. Turning this on stops file logging.",
    "FILE ON|OFF - Write frames to the capture log. Turning this on stops streaming.",
    "FILE MODE RING|STOP - Wrap around or stop, when the log is full.",
    "FILE MAX <bytes> - Set the log size limit.",
    "FILE STATUS - Show the log size.",
    "FILE CLEAR - Delete the log.",
    "FILE EXPORT - Print the log as JSON.",
    "FILE DUMP - Print the log as base64.",
    "FS FORMAT - Reformat the log volume.",
    "SHOW|STATUS - Show the full status.",
    "PING - Check the link.",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Hop(bool),
    SetChannels(ChannelSet),
    RemoveChannel(u8),
    ClearChannels,
    ShowChannels,
    SetHopInterval(u32),
    AddTypes(FrameTypes),
    RemoveTypes(FrameTypes),
    OnlyTypes(FrameTypes),
    ShowTypes,
    TextOutput(bool),
    FileLogging(bool),
    FileMode(LogMode),
    FileMax(u32),
    FileStatus,
    FileClear,
    FileExport,
    FileDump,
    FsFormat,
    Status,
    Ping,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// The verb wasn't recognized.
    Unknown,
    /// A required argument is missing.
    Missing(&'static str),
    InvalidChannel,
    TooManyChannels,
    InvalidNumber,
    InvalidType,
    /// The command was complete, but more arguments followed.
    UnexpectedArgument,
}
impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown command"),
            Self::Missing(what) => write!(f, "missing {what}"),
            Self::InvalidChannel => {
                write!(f, "channels must be between 1 and {MAX_CHANNEL_NUMBER}")
            }
            Self::TooManyChannels => write!(f, "at most {MAX_CHANNELS} channels can be set"),
            Self::InvalidNumber => f.write_str("expected a number"),
            Self::InvalidType => f.write_str("types are MGMT, CTRL, DATA, MISC and ALL"),
            Self::UnexpectedArgument => f.write_str("unexpected argument"),
        }
    }
}
pub type CommandResult<T> = Result<T, CommandError>;

type Args<'a> = core::str::SplitWhitespace<'a>;

/// Split the remaining arguments into list items.
fn list_items<'a>(args: Args<'a>) -> impl Iterator<Item = &'a str> {
    args.flat_map(|arg| arg.split(','))
        .filter(|item| !item.is_empty())
}

fn finish<T>(mut args: Args<'_>, command: T) -> CommandResult<T> {
    if args.next().is_some() {
        Err(CommandError::UnexpectedArgument)
    } else {
        Ok(command)
    }
}

fn parse_switch(mut args: Args<'_>) -> CommandResult<bool> {
    let enabled = match args.next() {
        Some("ON") => true,
        Some("OFF") => false,
        Some(_) => return Err(CommandError::UnexpectedArgument),
        None => return Err(CommandError::Missing("ON or OFF")),
    };
    finish(args, enabled)
}

fn parse_number(mut args: Args<'_>, what: &'static str) -> CommandResult<u32> {
    let Some(number) = args.next() else {
        return Err(CommandError::Missing(what));
    };
    let Ok(number) = number.parse() else {
        return Err(CommandError::InvalidNumber);
    };
    finish(args, number)
}

fn parse_channel(item: &str) -> CommandResult<u8> {
    match item.parse() {
        Ok(channel) if is_valid_channel(channel) => Ok(channel),
        _ => Err(CommandError::InvalidChannel),
    }
}

fn parse_channel_list(mut args: Args<'_>) -> CommandResult<ChannelSet> {
    if args.clone().next() == Some("ALL") {
        args.next();
        return finish(args, ChannelSet::all());
    }
    let mut channels = ChannelSet::EMPTY;
    for item in list_items(args) {
        let channel = parse_channel(item)?;
        if !channels.push(channel) {
            return Err(CommandError::TooManyChannels);
        }
    }
    if channels.is_empty() {
        return Err(CommandError::Missing("channel list"));
    }
    Ok(channels)
}

fn parse_type_list(args: Args<'_>) -> CommandResult<FrameTypes> {
    let mut types = FrameTypes::NONE;
    let mut any = false;
    for item in list_items(args) {
        any = true;
        if item == "ALL" {
            types = FrameTypes::ALL;
            continue;
        }
        let Some(class) = FrameClass::from_keyword(item) else {
            return Err(CommandError::InvalidType);
        };
        types.insert(class);
    }
    if any {
        Ok(types)
    } else {
        Err(CommandError::Missing("type list"))
    }
}

fn parse_set(mut args: Args<'_>) -> CommandResult<Command> {
    match args.next() {
        Some("CH") => parse_channel_list(args).map(Command::SetChannels),
        Some("HOP") => parse_number(args, "interval").map(Command::SetHopInterval),
        Some("TYPE") | Some("TYPES") => parse_type_list(args).map(Command::AddTypes),
        None => Err(CommandError::Missing("CH, HOP or TYPE")),
        Some(_) => Err(CommandError::Unknown),
    }
}

fn parse_clear(mut args: Args<'_>) -> CommandResult<Command> {
    match args.next() {
        Some("CH") => match args.next() {
            Some("ALL") => finish(args, Command::ClearChannels),
            Some(channel) => finish(args, Command::RemoveChannel(parse_channel(channel)?)),
            None => Err(CommandError::Missing("channel")),
        },
        Some("TYPE") | Some("TYPES") => parse_type_list(args).map(Command::RemoveTypes),
        None => Err(CommandError::Missing("CH or TYPE")),
        Some(_) => Err(CommandError::Unknown),
    }
}

fn parse_file(mut args: Args<'_>) -> CommandResult<Command> {
    match args.next() {
        Some("ON") => finish(args, Command::FileLogging(true)),
        Some("OFF") => finish(args, Command::FileLogging(false)),
        Some("MODE") => {
            let mode = match args.next() {
                Some("RING") => LogMode::Ring,
                Some("STOP") => LogMode::Stop,
                Some(_) => return Err(CommandError::UnexpectedArgument),
                None => return Err(CommandError::Missing("RING or STOP")),
            };
            finish(args, Command::FileMode(mode))
        }
        Some("MAX") => parse_number(args, "size").map(Command::FileMax),
        Some("STATUS") => finish(args, Command::FileStatus),
        Some("CLEAR") => finish(args, Command::FileClear),
        Some("EXPORT") => finish(args, Command::FileExport),
        Some("DUMP") => finish(args, Command::FileDump),
        None => Err(CommandError::Missing("operand")),
        Some(_) => Err(CommandError::Unknown),
    }
}

impl Command {
    /// Parse a command line.
    ///
    /// Leading and trailing whitespace is ignored.
    pub fn parse(line: &str) -> CommandResult<Self> {
        let mut normalized = String::<COMMAND_MAX>::new();
        for c in line.trim().chars() {
            if normalized.push(c.to_ascii_uppercase()).is_err() {
                return Err(CommandError::Unknown);
            }
        }
        let mut args = normalized.split_whitespace();
        let Some(verb) = args.next() else {
            return Err(CommandError::Unknown);
        };
        match verb {
            "HOP" => parse_switch(args).map(Command::Hop),
            "SET" => parse_set(args),
            "CLEAR" => parse_clear(args),
            "ONLY" => match args.next() {
                Some("TYPE") | Some("TYPES") => parse_type_list(args).map(Command::OnlyTypes),
                None => Err(CommandError::Missing("TYPE")),
                Some(_) => Err(CommandError::Unknown),
            },
            "SHOW" => match args.next() {
                None => Ok(Command::Status),
                Some("CH") => finish(args, Command::ShowChannels),
                Some("TYPE") | Some("TYPES") => finish(args, Command::ShowTypes),
                Some(_) => Err(CommandError::Unknown),
            },
            "STATUS" => finish(args, Command::Status),
            "LOG" => parse_switch(args).map(Command::TextOutput),
            "FILE" => parse_file(args),
            "FS" => match args.next() {
                Some("FORMAT") => finish(args, Command::FsFormat),
                None => Err(CommandError::Missing("FORMAT")),
                Some(_) => Err(CommandError::Unknown),
            },
            "PING" => finish(args, Command::Ping),
            "HELP" => finish(args, Command::Help),
            _ => Err(CommandError::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(list: &[u8]) -> ChannelSet {
        ChannelSet::from_slice(list).unwrap()
    }

    #[test]
    fn case_and_whitespace_insensitive() {
        assert_eq!(Command::parse("  hop on \r"), Ok(Command::Hop(true)));
        assert_eq!(Command::parse("Hop Off"), Ok(Command::Hop(false)));
        assert_eq!(Command::parse("ping"), Ok(Command::Ping));
        assert_eq!(Command::parse("show"), Ok(Command::Status));
        assert_eq!(Command::parse("STATUS"), Ok(Command::Status));
    }

    #[test]
    fn channel_lists() {
        let expected = Ok(Command::SetChannels(channels(&[1, 6, 11])));
        assert_eq!(Command::parse("SET CH 1,6,11"), expected);
        assert_eq!(Command::parse("set ch 1 6 11"), expected);
        assert_eq!(Command::parse("SET CH 1, 6 ,11,"), expected);
        assert_eq!(
            Command::parse("SET CH ALL"),
            Ok(Command::SetChannels(ChannelSet::all()))
        );
        assert_eq!(
            Command::parse("SET CH 1,15"),
            Err(CommandError::InvalidChannel)
        );
        assert_eq!(
            Command::parse("SET CH 1,x"),
            Err(CommandError::InvalidChannel)
        );
        assert_eq!(
            Command::parse("SET CH 1,1,1,1,1,1,1,1,1,1,1,1,1,1,1"),
            Err(CommandError::TooManyChannels)
        );
        assert_eq!(
            Command::parse("SET CH"),
            Err(CommandError::Missing("channel list"))
        );
        assert_eq!(
            Command::parse("SET CH ALL 3"),
            Err(CommandError::UnexpectedArgument)
        );
    }

    #[test]
    fn clear_channel() {
        assert_eq!(Command::parse("CLEAR CH 6"), Ok(Command::RemoveChannel(6)));
        assert_eq!(Command::parse("clear ch all"), Ok(Command::ClearChannels));
        assert_eq!(
            Command::parse("CLEAR CH 0"),
            Err(CommandError::InvalidChannel)
        );
        assert_eq!(
            Command::parse("CLEAR CH 6 7"),
            Err(CommandError::UnexpectedArgument)
        );
        assert_eq!(Command::parse("SHOW CH"), Ok(Command::ShowChannels));
    }

    #[test]
    fn type_lists() {
        assert_eq!(
            Command::parse("SET TYPE data"),
            Ok(Command::AddTypes(FrameTypes::only(FrameClass::Data)))
        );
        let mut mgmt_ctrl = FrameTypes::NONE;
        mgmt_ctrl.insert(FrameClass::Management);
        mgmt_ctrl.insert(FrameClass::Control);
        assert_eq!(
            Command::parse("ONLY TYPE MGMT,CTRL"),
            Ok(Command::OnlyTypes(mgmt_ctrl))
        );
        assert_eq!(
            Command::parse("CLEAR TYPE ALL"),
            Ok(Command::RemoveTypes(FrameTypes::ALL))
        );
        assert_eq!(
            Command::parse("SET TYPE BEACON"),
            Err(CommandError::InvalidType)
        );
        assert_eq!(Command::parse("SHOW TYPES"), Ok(Command::ShowTypes));
    }

    #[test]
    fn numbers() {
        assert_eq!(
            Command::parse("SET HOP 100"),
            Ok(Command::SetHopInterval(100))
        );
        assert_eq!(
            Command::parse("SET HOP fast"),
            Err(CommandError::InvalidNumber)
        );
        assert_eq!(
            Command::parse("SET HOP -5"),
            Err(CommandError::InvalidNumber)
        );
        assert_eq!(
            Command::parse("FILE MAX 65536"),
            Ok(Command::FileMax(65536))
        );
    }

    #[test]
    fn file_commands() {
        assert_eq!(Command::parse("FILE ON"), Ok(Command::FileLogging(true)));
        assert_eq!(Command::parse("log off"), Ok(Command::TextOutput(false)));
        assert_eq!(
            Command::parse("FILE MODE STOP"),
            Ok(Command::FileMode(LogMode::Stop))
        );
        assert_eq!(Command::parse("FILE EXPORT"), Ok(Command::FileExport));
        assert_eq!(Command::parse("FILE DUMP"), Ok(Command::FileDump));
        assert_eq!(Command::parse("FS FORMAT"), Ok(Command::FsFormat));
        assert_eq!(Command::parse("FILE"), Err(CommandError::Missing("operand")));
    }

    #[test]
    fn unknown() {
        assert_eq!(Command::parse("REBOOT"), Err(CommandError::Unknown));
        assert_eq!(Command::parse(""), Err(CommandError::Unknown));
        assert_eq!(Command::parse("SET FOO 1"), Err(CommandError::Unknown));
        let long = "A".repeat(COMMAND_MAX + 1);
        assert_eq!(Command::parse(&long), Err(CommandError::Unknown));
    }
}
