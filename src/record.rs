//! The JSON records emitted on the control link.
//!
//! Records are plain structs serialized with `serde-json-core`, so SSIDs containing quotes or
//! control characters are escaped properly.

use core::fmt::Write;

use heapless::String;
use serde::Serialize;

use crate::{
    frame::{CapturedFrame, MacAddress},
    parser::{Oui, ParsedFrame, Ssid, MAX_VENDOR_OUIS},
};

/// The maximum length of a line on the control link.
pub const LINE_MAX: usize = 640;
/// A single line of output, without the line terminator.
pub type Line = String<LINE_MAX>;

/// What a zero length SSID is rendered as.
pub const HIDDEN_SSID: &str = "<hidden>";

pub type MacText = String<17>;
/// Every byte of a 32 byte SSID could be replaced by U+FFFD, which takes three bytes.
pub type SsidText = String<96>;
pub type VendorText = String<{ MAX_VENDOR_OUIS * 7 }>;

/// Format an optional address. Missing addresses are rendered as an empty string.
pub fn mac_text(address: Option<MacAddress>) -> MacText {
    let mut text = MacText::new();
    if let Some(address) = address {
        let _ = write!(text, "{address}");
    }
    text
}

/// Render an SSID, replacing invalid UTF-8 with U+FFFD.
pub fn ssid_text(ssid: &Ssid) -> SsidText {
    let mut text = SsidText::new();
    match ssid {
        Ssid::Absent => {}
        Ssid::Hidden => {
            let _ = text.push_str(HIDDEN_SSID);
        }
        Ssid::Named(bytes) => {
            for chunk in bytes.utf8_chunks() {
                let _ = text.push_str(chunk.valid());
                if !chunk.invalid().is_empty() {
                    let _ = text.push(char::REPLACEMENT_CHARACTER);
                }
            }
        }
    }
    text
}

/// Join OUIs as upper case hex, separated by commas.
pub fn vendor_text(ouis: &[Oui]) -> VendorText {
    let mut text = VendorText::new();
    for (i, [a, b, c]) in ouis.iter().enumerate() {
        if i != 0 {
            let _ = text.push(',');
        }
        let _ = write!(text, "{a:02X}{b:02X}{c:02X}");
    }
    text
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FlagsRecord {
    pub tods: bool,
    pub fromds: bool,
    pub morefrag: bool,
    pub retry: bool,
    pub pwrmgmt: bool,
    pub moredata: bool,
    pub protected: bool,
    pub order: bool,
}

/// One parsed frame, as streamed while text output is enabled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LiveRecord<'a> {
    pub ts: u32,
    pub ch: u8,
    pub rssi: i8,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub subtype: &'a str,
    pub len: u16,
    pub addr1: &'a str,
    pub addr2: &'a str,
    pub addr3: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frag: Option<u8>,
    pub flags: FlagsRecord,
    pub ssid: &'a str,
    pub vendor: &'a str,
}

/// One entry of the capture log, as emitted by `FILE EXPORT`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExportRecord<'a> {
    pub ts: u32,
    pub mac: &'a str,
    pub rssi: i8,
    pub hdr_ch: u8,
    #[serde(rename = "type")]
    pub kind: u8,
    pub subtype: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frag: Option<u8>,
    pub ssid: &'a str,
    pub vendor: &'a str,
}

fn to_line(record: &impl Serialize) -> Option<Line> {
    match serde_json_core::to_string::<_, LINE_MAX>(record) {
        Ok(line) => Some(line),
        Err(_) => {
            warn!("Record didn't fit into a line.");
            None
        }
    }
}

/// Render a frame for the live stream.
pub fn render_live(frame: &CapturedFrame, parsed: &ParsedFrame) -> Option<Line> {
    let (addr1, addr2, addr3) = (
        mac_text(parsed.address_1),
        mac_text(parsed.address_2),
        mac_text(parsed.address_3),
    );
    let ssid = ssid_text(&parsed.ssid);
    let vendor = vendor_text(&parsed.vendor_ouis);
    let fc = parsed.frame_control.unwrap_or_default();
    to_line(&LiveRecord {
        ts: frame.timestamp(),
        ch: frame.channel(),
        rssi: frame.rssi(),
        kind: parsed.class().label(),
        subtype: parsed.subtype_name(),
        len: frame.len() as u16,
        addr1: &addr1,
        addr2: &addr2,
        addr3: &addr3,
        seq: parsed.sequence_control.map(|sc| sc.sequence_number),
        frag: parsed.sequence_control.map(|sc| sc.fragment_number),
        flags: FlagsRecord {
            tods: fc.to_ds(),
            fromds: fc.from_ds(),
            morefrag: fc.more_fragments(),
            retry: fc.retry(),
            pwrmgmt: fc.power_management(),
            moredata: fc.more_data(),
            protected: fc.protected(),
            order: fc.order(),
        },
        ssid: &ssid,
        vendor: &vendor,
    })
}

/// Render a frame read back from the capture log.
pub fn render_export(frame: &CapturedFrame, parsed: &ParsedFrame) -> Option<Line> {
    let mac = mac_text(parsed.address_2);
    let ssid = ssid_text(&parsed.ssid);
    let vendor = vendor_text(&parsed.vendor_ouis);
    to_line(&ExportRecord {
        ts: frame.timestamp(),
        mac: &mac,
        rssi: frame.rssi(),
        hdr_ch: frame.channel(),
        kind: parsed.frame_type(),
        subtype: parsed.subtype(),
        seq: parsed.sequence_control.map(|sc| sc.sequence_number),
        frag: parsed.sequence_control.map(|sc| sc.fragment_number),
        ssid: &ssid,
        vendor: &vendor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn probe_request(elements: &[u8]) -> CapturedFrame {
        let mut bytes = heapless::Vec::<u8, 128>::new();
        bytes.extend_from_slice(&[0x40, 0x08, 0, 0]).unwrap();
        bytes.extend_from_slice(&[0xff; 6]).unwrap();
        bytes
            .extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01])
            .unwrap();
        bytes.extend_from_slice(&[0xff; 6]).unwrap();
        bytes.extend_from_slice(&(42u16 << 4).to_le_bytes()).unwrap();
        bytes.extend_from_slice(elements).unwrap();
        CapturedFrame::new(1000, 6, -55, &bytes)
    }

    #[test]
    fn live_record() {
        let frame = probe_request(&[0, 3, b'a', b'"', b'\n', 221, 3, 0x00, 0x50, 0xf2]);
        let line = render_live(&frame, &parse(&frame)).unwrap();
        assert_eq!(
            line.as_str(),
            concat!(
                r#"{"ts":1000,"ch":6,"rssi":-55,"type":"Management","subtype":"ProbeReq","len":34,"#,
                r#""addr1":"ff:ff:ff:ff:ff:ff","addr2":"de:ad:be:ef:00:01","addr3":"ff:ff:ff:ff:ff:ff","#,
                r#""seq":42,"frag":0,"#,
                r#""flags":{"tods":false,"fromds":false,"morefrag":false,"retry":true,"pwrmgmt":false,"moredata":false,"protected":false,"order":false},"#,
                r#""ssid":"a\"\n","vendor":"0050F2"}"#
            )
        );
    }

    #[test]
    fn export_record() {
        let frame = probe_request(&[0, 0]);
        let line = render_export(&frame, &parse(&frame)).unwrap();
        assert_eq!(
            line.as_str(),
            r#"{"ts":1000,"mac":"de:ad:be:ef:00:01","rssi":-55,"hdr_ch":6,"type":0,"subtype":4,"seq":42,"frag":0,"ssid":"<hidden>","vendor":""}"#
        );
    }

    #[test]
    fn short_frame_omits_sequence() {
        let frame = CapturedFrame::new(5, 1, -90, &[0xd4, 0x00]);
        let line = render_live(&frame, &parse(&frame)).unwrap();
        assert!(line.contains(r#""subtype":"Ack""#));
        assert!(line.contains(r#""addr1":"""#));
        assert!(!line.contains("seq"));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let ssid = Ssid::Named(heapless::Vec::from_slice(&[b'o', 0xff, b'k']).unwrap());
        assert_eq!(ssid_text(&ssid).as_str(), "o\u{fffd}k");
        assert_eq!(ssid_text(&Ssid::Absent).as_str(), "");
    }

    #[test]
    fn worst_case_record_fits() {
        let mut elements = heapless::Vec::<u8, 128>::new();
        elements.extend_from_slice(&[0, 32]).unwrap();
        elements.extend_from_slice(&[0x01; 32]).unwrap();
        for _ in 0..MAX_VENDOR_OUIS {
            elements.extend_from_slice(&[221, 3, 0xab, 0xcd, 0xef]).unwrap();
        }
        let frame = probe_request(&elements);
        assert!(render_live(&frame, &parse(&frame)).is_some());
    }
}
