use core::fmt;

use bitfield_struct::bitfield;

/// The maximum amount of bytes copied out of a received frame.
///
/// Longer frames are truncated. Everything we parse lives in the MAC header and the first few
/// information elements, so this is plenty.
pub const MAX_COPY: usize = 256;

/// The class of an 802.11 frame, as encoded in the two type bits of the frame control field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameClass {
    Management,
    Control,
    Data,
    /// Type 3 (extension) and anything the radio can't classify.
    Misc,
}
impl FrameClass {
    pub const ALL: [FrameClass; 4] = [
        FrameClass::Management,
        FrameClass::Control,
        FrameClass::Data,
        FrameClass::Misc,
    ];
    /// Map the two type bits to a class.
    pub const fn from_type_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Management,
            1 => Self::Control,
            2 => Self::Data,
            _ => Self::Misc,
        }
    }
    /// The label used in live records.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Management => "Management",
            Self::Control => "Control",
            Self::Data => "Data",
            Self::Misc => "Other",
        }
    }
    /// The keyword used on the control link.
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Management => "MGMT",
            Self::Control => "CTRL",
            Self::Data => "DATA",
            Self::Misc => "MISC",
        }
    }
    /// Look up a class by its control link keyword. Expects upper case.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|class| class.keyword() == keyword)
    }
}

#[bitfield(u16)]
#[derive(PartialEq, Eq)]
/// The frame control field, which makes up the first two bytes of every MPDU.
pub struct FrameControl {
    #[bits(2)]
    pub protocol_version: u8,
    #[bits(2)]
    pub frame_type: u8,
    #[bits(4)]
    pub subtype: u8,
    pub to_ds: bool,
    pub from_ds: bool,
    pub more_fragments: bool,
    pub retry: bool,
    pub power_management: bool,
    pub more_data: bool,
    pub protected: bool,
    pub order: bool,
}
impl FrameControl {
    /// Read the frame control field from the start of a frame.
    ///
    /// Returns [None], if the frame is shorter than two bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let field = bytes.get(0..2)?;
        Some(Self::from_bits(u16::from_le_bytes([field[0], field[1]])))
    }
    pub const fn class(&self) -> FrameClass {
        FrameClass::from_type_bits(self.frame_type())
    }
}

/// An IEEE 802 MAC address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacAddress(pub [u8; 6]);
impl MacAddress {
    /// Copy an address out of the frame at `offset`, if enough bytes are there.
    pub fn from_frame(bytes: &[u8], offset: usize) -> Option<Self> {
        let octets = bytes.get(offset..offset.checked_add(6)?)?;
        let mut address = [0u8; 6];
        address.copy_from_slice(octets);
        Some(Self(address))
    }
}
impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// A frame as handed to us by the radio driver.
///
/// This only borrows the driver's buffer, so it has to be copied into a [CapturedFrame] before
/// the receive callback returns.
#[derive(Clone, Copy, Debug)]
pub struct RawFrame<'a> {
    /// The class reported by the radio for this frame.
    pub class: FrameClass,
    /// The Received Signal Strength Indicator (RSSI) in dBm.
    pub rssi: i8,
    /// The channel the frame was received on.
    pub channel: u8,
    /// The MPDU, without the header prepended by the hardware.
    pub payload: &'a [u8],
}

/// A fixed size copy of a received frame and its metadata.
///
/// Only the first [CapturedFrame::len] bytes of the buffer are meaningful, which is why the
/// buffer is only accessible through [CapturedFrame::bytes].
#[derive(Clone, Copy)]
pub struct CapturedFrame {
    timestamp: u32,
    channel: u8,
    rssi: i8,
    len: u16,
    data: [u8; MAX_COPY],
}
impl CapturedFrame {
    /// Copy at most [MAX_COPY] bytes of `payload`.
    pub fn new(timestamp: u32, channel: u8, rssi: i8, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_COPY);
        let mut data = [0u8; MAX_COPY];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            timestamp,
            channel,
            rssi,
            len: len as u16,
            data,
        }
    }
    /// Milliseconds since boot at reception.
    pub const fn timestamp(&self) -> u32 {
        self.timestamp
    }
    pub const fn channel(&self) -> u8 {
        self.channel
    }
    pub const fn rssi(&self) -> i8 {
        self.rssi
    }
    /// The amount of bytes copied.
    pub const fn len(&self) -> usize {
        self.len as usize
    }
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
    /// The copied prefix of the frame.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}
impl fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("timestamp", &self.timestamp)
            .field("channel", &self.channel)
            .field("rssi", &self.rssi)
            .field("bytes", &self.bytes())
            .finish()
    }
}
impl PartialEq for CapturedFrame {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.channel == other.channel
            && self.rssi == other.rssi
            && self.bytes() == other.bytes()
    }
}
impl Eq for CapturedFrame {}
