//! Decoding of the 802.11 MAC header and the information elements of management frames.
//!
//! Every accessor is bounds checked, so that truncated or otherwise malformed frames only
//! result in missing fields. Nothing in here keeps state between frames.

use heapless::Vec;

use crate::frame::{CapturedFrame, FrameClass, FrameControl, MacAddress};

/// The length of the MAC header of management frames, up to and including the sequence control
/// field.
pub const MGMT_HEADER_LEN: usize = 24;
/// Where the element walk starts in every management frame.
///
/// Fixed parameters, like the timestamp of a beacon, aren't skipped and are walked as if they
/// were elements. The walk simply ends, if they don't happen to form a valid element chain.
pub const ELEMENTS_OFFSET: usize = MGMT_HEADER_LEN;
/// addr1 and addr2 are only decoded if the frame reaches this length.
const ADDR2_END: usize = 16;

pub const TAG_SSID: u8 = 0;
pub const TAG_VENDOR_SPECIFIC: u8 = 221;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_VENDOR_OUIS: usize = 8;

/// An organizationally unique identifier.
pub type Oui = [u8; 3];

/// The SSID carried by a management frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Ssid {
    /// No SSID element was found, or the frame was too short to contain one.
    #[default]
    Absent,
    /// An SSID element of length zero, which is what hidden networks and wildcard probes send.
    Hidden,
    /// The raw SSID, which isn't guaranteed to be valid UTF-8.
    Named(Vec<u8, MAX_SSID_LEN>),
}

/// The sequence control field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequenceControl {
    pub sequence_number: u16,
    pub fragment_number: u8,
}

/// Everything we extract from a single frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedFrame {
    /// [None] for frames shorter than two bytes.
    pub frame_control: Option<FrameControl>,
    pub address_1: Option<MacAddress>,
    pub address_2: Option<MacAddress>,
    pub address_3: Option<MacAddress>,
    pub sequence_control: Option<SequenceControl>,
    pub ssid: Ssid,
    pub vendor_ouis: Vec<Oui, MAX_VENDOR_OUIS>,
}
impl ParsedFrame {
    pub fn class(&self) -> FrameClass {
        self.frame_control
            .map(|fc| fc.class())
            .unwrap_or(FrameClass::Misc)
    }
    /// The raw two bit frame type.
    pub fn frame_type(&self) -> u8 {
        self.frame_control.map(|fc| fc.frame_type()).unwrap_or(0)
    }
    /// The raw four bit subtype.
    pub fn subtype(&self) -> u8 {
        self.frame_control.map(|fc| fc.subtype()).unwrap_or(0)
    }
    /// A human readable name for the type and subtype combination.
    pub fn subtype_name(&self) -> &'static str {
        match self.frame_control {
            Some(fc) => subtype_name(fc.class(), fc.subtype()),
            None => "Other",
        }
    }
}

/// Look up the name of a subtype.
///
/// Combinations we don't know map to `MgmtOther`, `CtrlOther`, `DataOther` or `Other`.
pub const fn subtype_name(class: FrameClass, subtype: u8) -> &'static str {
    match class {
        FrameClass::Management => match subtype {
            0 => "AssocReq",
            1 => "AssocResp",
            2 => "ReassocReq",
            3 => "ReassocResp",
            4 => "ProbeReq",
            5 => "ProbeResp",
            6 => "TimingAdv",
            8 => "Beacon",
            9 => "ATIM",
            10 => "Disassoc",
            11 => "Auth",
            12 => "Deauth",
            13 => "Action",
            14 => "ActionNoAck",
            _ => "MgmtOther",
        },
        FrameClass::Control => match subtype {
            4 => "BeamformingRpt",
            5 => "VhtNdpAnn",
            7 => "CtrlWrapper",
            8 => "BlockAckReq",
            9 => "BlockAck",
            10 => "PsPoll",
            11 => "Rts",
            12 => "Cts",
            13 => "Ack",
            14 => "CfEnd",
            15 => "CfEndAck",
            _ => "CtrlOther",
        },
        FrameClass::Data => match subtype {
            0 => "Data",
            1 => "DataCfAck",
            2 => "DataCfPoll",
            3 => "DataCfAckPoll",
            4 => "Null",
            5 => "CfAck",
            6 => "CfPoll",
            7 => "CfAckPoll",
            8 => "QosData",
            9 => "QosDataCfAck",
            10 => "QosDataCfPoll",
            11 => "QosDataCfAckPoll",
            12 => "QosNull",
            14 => "QosCfPoll",
            15 => "QosCfAckPoll",
            _ => "DataOther",
        },
        FrameClass::Misc => "Other",
    }
}

/// An iterator over the information elements in a buffer.
///
/// Yields `(tag, body)` pairs and stops at the first element, whose declared length exceeds the
/// remaining buffer.
#[derive(Clone, Debug)]
pub struct Elements<'a> {
    remaining: &'a [u8],
}
impl<'a> Elements<'a> {
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { remaining: bytes }
    }
}
impl<'a> Iterator for Elements<'a> {
    type Item = (u8, &'a [u8]);
    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.remaining;
        let [tag, len, rest @ ..] = remaining else {
            self.remaining = &[];
            return None;
        };
        let len = *len as usize;
        let Some(body) = rest.get(..len) else {
            trace!("Element {} overruns the frame.", *tag);
            self.remaining = &[];
            return None;
        };
        let tag = *tag;
        self.remaining = &rest[len..];
        Some((tag, body))
    }
}

/// Parse a captured frame.
pub fn parse(frame: &CapturedFrame) -> ParsedFrame {
    parse_bytes(frame.bytes())
}

/// Parse the bytes of an MPDU, without the FCS.
pub fn parse_bytes(bytes: &[u8]) -> ParsedFrame {
    let mut parsed = ParsedFrame {
        frame_control: FrameControl::parse(bytes),
        ..Default::default()
    };
    let Some(frame_control) = parsed.frame_control else {
        return parsed;
    };
    if bytes.len() >= ADDR2_END {
        parsed.address_1 = MacAddress::from_frame(bytes, 4);
        parsed.address_2 = MacAddress::from_frame(bytes, 10);
    }
    if bytes.len() >= MGMT_HEADER_LEN {
        parsed.address_3 = MacAddress::from_frame(bytes, 16);
        let sequence_control = u16::from_le_bytes([bytes[22], bytes[23]]);
        parsed.sequence_control = Some(SequenceControl {
            sequence_number: sequence_control >> 4,
            fragment_number: (sequence_control & 0xf) as u8,
        });
    }
    if frame_control.class() != FrameClass::Management {
        return parsed;
    }
    let Some(elements) = bytes.get(ELEMENTS_OFFSET..) else {
        return parsed;
    };
    for (tag, body) in Elements::new(elements) {
        match tag {
            TAG_SSID if parsed.ssid == Ssid::Absent => {
                parsed.ssid = if body.is_empty() {
                    Ssid::Hidden
                } else {
                    let len = body.len().min(MAX_SSID_LEN);
                    // Can't fail, since we clamped the length.
                    Ssid::Named(Vec::from_slice(&body[..len]).unwrap_or_default())
                };
            }
            TAG_VENDOR_SPECIFIC => {
                if let Some(oui) = body.get(..3) {
                    let _ = parsed.vendor_ouis.push([oui[0], oui[1], oui[2]]);
                }
            }
            _ => {}
        }
    }
    parsed
}
