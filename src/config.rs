//! Run time configuration of the pipeline.
//!
//! The whole [PipelineConfig] lives behind a single blocking mutex in [SharedConfig]. Readers
//! take a copy of it, so they never observe a half updated channel list or filter mask, and the
//! lock is held for a handful of instructions only, which makes it usable from the receive
//! interrupt.

use core::{cell::RefCell, fmt};

use embassy_sync::blocking_mutex;
use macro_bits::{bit, check_bit};

use crate::{
    caplog::MIN_LOG_BYTES,
    frame::{FrameClass, MAX_COPY},
    DefaultRawMutex,
};

/// The maximum amount of entries in the hop set.
pub const MAX_CHANNELS: usize = 14;
/// The highest channel number the radio accepts.
pub const MAX_CHANNEL_NUMBER: u8 = 14;
/// The channels used by `SET CH ALL` and the default configuration.
pub const DEFAULT_CHANNELS: [u8; 13] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];
/// The hop interval is clamped to at least this many milliseconds.
pub const MIN_HOP_INTERVAL_MS: u32 = 50;
pub const DEFAULT_HOP_INTERVAL_MS: u32 = 250;
pub const DEFAULT_LOG_MAX_BYTES: u32 = 512 * 1024;

/// A set of [FrameClass]es.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameTypes(u8);
impl FrameTypes {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b1111);

    const fn mask(class: FrameClass) -> u8 {
        match class {
            FrameClass::Management => bit!(0),
            FrameClass::Control => bit!(1),
            FrameClass::Data => bit!(2),
            FrameClass::Misc => bit!(3),
        }
    }
    pub const fn only(class: FrameClass) -> Self {
        Self(Self::mask(class))
    }
    pub const fn contains(&self, class: FrameClass) -> bool {
        check_bit!(self.0, Self::mask(class))
    }
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
    pub fn insert(&mut self, class: FrameClass) {
        self.0 |= Self::mask(class);
    }
    /// Iterate over the contained classes in a fixed order.
    pub fn iter(self) -> impl Iterator<Item = FrameClass> {
        FrameClass::ALL
            .into_iter()
            .filter(move |class| self.contains(*class))
    }
}
impl fmt::Display for FrameTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        for (i, class) in self.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            f.write_str(class.keyword())?;
        }
        Ok(())
    }
}

/// What happens, when the capture log reaches its size limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogMode {
    /// Start overwriting the log from the beginning.
    #[default]
    Ring,
    /// Close the log and stop file logging.
    Stop,
}
impl LogMode {
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Ring => "RING",
            Self::Stop => "STOP",
        }
    }
}

/// The ordered list of channels to hop across.
///
/// Duplicates are allowed. An empty set behaves like `{1}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelSet {
    channels: [u8; MAX_CHANNELS],
    len: u8,
}
impl ChannelSet {
    pub const EMPTY: Self = Self {
        channels: [0; MAX_CHANNELS],
        len: 0,
    };
    /// Channels 1-13.
    pub const fn all() -> Self {
        let mut set = Self::EMPTY;
        let mut i = 0;
        while i < DEFAULT_CHANNELS.len() {
            set.channels[i] = DEFAULT_CHANNELS[i];
            i += 1;
        }
        set.len = DEFAULT_CHANNELS.len() as u8;
        set
    }
    /// Create a set from a list of channels.
    ///
    /// Returns [None], if there are more than [MAX_CHANNELS] channels or one of them isn't a
    /// valid channel number.
    pub fn from_slice(channels: &[u8]) -> Option<Self> {
        let mut set = Self::EMPTY;
        for channel in channels {
            if !set.push(*channel) {
                return None;
            }
        }
        Some(set)
    }
    /// Append a channel. Returns false if the set is full or the channel is invalid.
    pub fn push(&mut self, channel: u8) -> bool {
        if self.len() == MAX_CHANNELS || !is_valid_channel(channel) {
            return false;
        }
        self.channels[self.len()] = channel;
        self.len += 1;
        true
    }
    /// Remove every occurence of `channel`, preserving the order of the others.
    ///
    /// Returns whether anything was removed.
    pub fn remove(&mut self, channel: u8) -> bool {
        let mut kept = 0;
        for i in 0..self.len() {
            if self.channels[i] != channel {
                self.channels[kept] = self.channels[i];
                kept += 1;
            }
        }
        let removed = kept != self.len();
        self.len = kept as u8;
        removed
    }
    pub fn as_slice(&self) -> &[u8] {
        &self.channels[..self.len()]
    }
    pub const fn len(&self) -> usize {
        self.len as usize
    }
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
    pub fn contains(&self, channel: u8) -> bool {
        self.as_slice().contains(&channel)
    }
    /// The amount of positions the hop cursor cycles through.
    pub const fn cycle_len(&self) -> usize {
        if self.is_empty() {
            1
        } else {
            self.len()
        }
    }
    /// The channel at a cursor position, wrapping around the set.
    pub fn channel_at(&self, cursor: usize) -> u8 {
        if self.is_empty() {
            1
        } else {
            self.channels[cursor % self.len()]
        }
    }
}
impl Default for ChannelSet {
    fn default() -> Self {
        Self::all()
    }
}
impl fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (i, channel) in self.as_slice().iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            write!(f, "{channel}")?;
        }
        Ok(())
    }
}

/// Check if the radio can tune to this channel.
pub const fn is_valid_channel(channel: u8) -> bool {
    channel >= 1 && channel <= MAX_CHANNEL_NUMBER
}

/// Everything, that can be changed from the control link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipelineConfig {
    /// Frame classes accepted by the capture callback.
    pub filter: FrameTypes,
    pub channels: ChannelSet,
    pub hop_interval_ms: u32,
    pub hop_enabled: bool,
    /// Stream parsed frames as JSON over the control link.
    pub text_output: bool,
    /// Append raw frames to the capture log.
    pub file_logging: bool,
    pub log_mode: LogMode,
    pub log_max_bytes: u32,
}
impl PipelineConfig {
    /// Hopping and file logging are disabled, everything is captured and streamed.
    pub const DEFAULT: Self = Self {
        filter: FrameTypes::ALL,
        channels: ChannelSet::all(),
        hop_interval_ms: DEFAULT_HOP_INTERVAL_MS,
        hop_enabled: false,
        text_output: true,
        file_logging: false,
        log_mode: LogMode::Ring,
        log_max_bytes: DEFAULT_LOG_MAX_BYTES,
    };
}
impl Default for PipelineConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The [PipelineConfig] shared between the tasks.
///
/// Only the command interpreter should use the setters.
pub struct SharedConfig {
    inner: blocking_mutex::Mutex<DefaultRawMutex, RefCell<PipelineConfig>>,
}
impl SharedConfig {
    pub const fn new(config: PipelineConfig) -> Self {
        Self {
            inner: blocking_mutex::Mutex::new(RefCell::new(config)),
        }
    }
    fn update<R>(&self, f: impl FnOnce(&mut PipelineConfig) -> R) -> R {
        self.inner.lock(|config| f(&mut config.borrow_mut()))
    }
    /// Take a consistent copy of the configuration.
    pub fn snapshot(&self) -> PipelineConfig {
        self.inner.lock(|config| *config.borrow())
    }
    /// The frame classes currently accepted.
    pub fn filter(&self) -> FrameTypes {
        self.inner.lock(|config| config.borrow().filter)
    }
    /// Returns the previous state.
    pub fn set_hop_enabled(&self, enabled: bool) -> bool {
        self.update(|config| core::mem::replace(&mut config.hop_enabled, enabled))
    }
    pub fn set_channels(&self, channels: ChannelSet) {
        self.update(|config| config.channels = channels)
    }
    /// Remove a channel from the hop set. Returns the new set, if the channel was present.
    pub fn remove_channel(&self, channel: u8) -> Option<ChannelSet> {
        self.update(|config| {
            if config.channels.remove(channel) {
                Some(config.channels)
            } else {
                None
            }
        })
    }
    pub fn clear_channels(&self) {
        self.set_channels(ChannelSet::EMPTY)
    }
    /// Set the hop interval, clamped to [MIN_HOP_INTERVAL_MS]. Returns the effective interval.
    pub fn set_hop_interval(&self, interval_ms: u32) -> u32 {
        let interval_ms = interval_ms.max(MIN_HOP_INTERVAL_MS);
        self.update(|config| config.hop_interval_ms = interval_ms);
        interval_ms
    }
    /// Accept additional frame classes. Returns the classes, that weren't accepted before.
    pub fn add_types(&self, types: FrameTypes) -> FrameTypes {
        self.update(|config| {
            let added = types.difference(config.filter);
            config.filter = config.filter.union(types);
            added
        })
    }
    /// Stop accepting frame classes. Returns the classes, that were actually removed.
    pub fn remove_types(&self, types: FrameTypes) -> FrameTypes {
        self.update(|config| {
            let removed = types.intersection(config.filter);
            config.filter = config.filter.difference(types);
            removed
        })
    }
    pub fn set_types(&self, types: FrameTypes) {
        self.update(|config| config.filter = types)
    }
    /// Returns the previous state.
    pub fn set_text_output(&self, enabled: bool) -> bool {
        self.update(|config| core::mem::replace(&mut config.text_output, enabled))
    }
    /// Returns the previous state.
    ///
    /// Use [Self::select_text_output] to switch from file logging to text output.
    pub fn set_file_logging(&self, enabled: bool) -> bool {
        self.update(|config| core::mem::replace(&mut config.file_logging, enabled))
    }
    /// Enable text output and disable file logging in one step.
    ///
    /// Returns whether file logging was enabled before.
    pub fn select_text_output(&self) -> bool {
        self.update(|config| {
            config.text_output = true;
            core::mem::replace(&mut config.file_logging, false)
        })
    }
    pub fn set_log_mode(&self, log_mode: LogMode) {
        self.update(|config| config.log_mode = log_mode)
    }
    /// Set the log size limit, which is clamped to fit at least one record of maximum size.
    ///
    /// Returns the effective limit.
    pub fn set_log_max_bytes(&self, max_bytes: u32) -> u32 {
        let max_bytes = max_bytes.max(MIN_LOG_BYTES);
        self.update(|config| config.log_max_bytes = max_bytes);
        max_bytes
    }
}
impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(PipelineConfig::DEFAULT)
    }
}

const _: () = assert!(MIN_LOG_BYTES as usize > MAX_COPY);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_set_edits_preserve_order() {
        let mut set = ChannelSet::from_slice(&[1, 6, 11, 6]).unwrap();
        assert!(set.remove(6));
        assert_eq!(set.as_slice(), &[1, 11]);
        assert!(!set.remove(6));
        assert!(set.push(3));
        assert_eq!(set.as_slice(), &[1, 11, 3]);
        assert!(!set.push(15));
        assert!(!set.push(0));
    }

    #[test]
    fn channel_set_limits() {
        assert!(ChannelSet::from_slice(&[1; MAX_CHANNELS]).is_some());
        assert!(ChannelSet::from_slice(&[1; MAX_CHANNELS + 1]).is_none());
        assert_eq!(ChannelSet::all().as_slice(), &DEFAULT_CHANNELS);
        assert_eq!(ChannelSet::EMPTY.cycle_len(), 1);
        assert_eq!(ChannelSet::EMPTY.channel_at(5), 1);
    }

    #[test]
    fn frame_types() {
        let mut types = FrameTypes::NONE;
        types.insert(FrameClass::Data);
        types.insert(FrameClass::Management);
        assert!(types.contains(FrameClass::Data));
        assert!(!types.contains(FrameClass::Control));
        let mut text = heapless::String::<32>::new();
        core::fmt::Write::write_fmt(&mut text, format_args!("{types}")).unwrap();
        assert_eq!(text.as_str(), "MGMT,DATA");
        assert_eq!(FrameTypes::ALL.iter().count(), 4);
    }

    #[test]
    fn setters() {
        let config = SharedConfig::default();
        assert_eq!(config.set_hop_interval(10), MIN_HOP_INTERVAL_MS);
        assert_eq!(config.set_hop_interval(1000), 1000);

        config.set_types(FrameTypes::only(FrameClass::Management));
        let added = config.add_types(FrameTypes::ALL);
        assert!(!added.contains(FrameClass::Management));
        assert!(added.contains(FrameClass::Data));
        assert_eq!(config.filter(), FrameTypes::ALL);
        assert!(config
            .remove_types(FrameTypes::only(FrameClass::Misc))
            .contains(FrameClass::Misc));
        assert!(config
            .remove_types(FrameTypes::only(FrameClass::Misc))
            .is_empty());

        assert!(config.remove_channel(6).is_some());
        assert!(config.remove_channel(6).is_none());

        assert_eq!(config.set_log_max_bytes(1), MIN_LOG_BYTES);
    }

    #[test]
    fn sinks_are_exclusive() {
        let config = SharedConfig::default();
        assert!(config.set_text_output(false));
        config.set_file_logging(true);
        assert!(config.select_text_output());
        let snapshot = config.snapshot();
        assert!(snapshot.text_output);
        assert!(!snapshot.file_logging);
    }
}
