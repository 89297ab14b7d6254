//! Device reply frames
//!
//! A reply is a finite sequence of notification frames closed by an empty
//! frame. Text replies use fixed-width, null-padded ASCII frames. A log
//! download is a binary header frame followed by big-endian tenths-of-a-degree
//! records and a `.` end marker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::errors::DecodeError;
use crate::protocol::command::Command;
use crate::types::Celsius;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Width of a device frame in bytes
pub const FRAME_WIDTH: usize = 20;

/// Marks the end of temperature records inside a log download
pub const LOG_END_MARKER: u8 = b'.';

/// Acknowledgement text sent by the firmware
pub const ACK_TEXT: &str = "Ok";

const INTERVAL_PREFIX: &str = "Interval:";
const SETTINGS_HEADER: &str = "SETTINGS";
const LOG_HEADER_LEN: usize = 15;

// ----------------------------------------------------------------------------
// Decoded Events
// ----------------------------------------------------------------------------

/// A fully decoded device reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Plain acknowledgement
    Ack,
    /// The firmware echoed its logging interval
    LogInterval { seconds: u32 },
    /// Settings block returned by `*info`
    Info(DeviceInfo),
    /// Stored temperature records returned by `*logall`
    LogDownload(LogDownload),
    /// A well-formed text reply that is not what the command expects
    Rejected { reply: String },
}

impl DeviceEvent {
    /// The command this reply echoes, where the protocol defines an echo
    pub fn echoed_command(&self) -> Option<Command> {
        match self {
            DeviceEvent::LogInterval { seconds } => {
                Some(Command::SetLogInterval { seconds: *seconds })
            }
            _ => None,
        }
    }

    /// The command this reply answers, given the command in flight
    ///
    /// Interval echoes name their own command; any other acknowledging reply
    /// maps back to `in_flight`.
    pub fn answered_command(&self, in_flight: &Command) -> Option<Command> {
        match self.echoed_command() {
            Some(echoed) => Some(echoed),
            None if self.acknowledges(in_flight) => Some(*in_flight),
            None => None,
        }
    }

    /// Whether this reply is a valid answer to `command`
    pub fn acknowledges(&self, command: &Command) -> bool {
        match (command, self) {
            (Command::Blink | Command::ToggleLogging, DeviceEvent::Ack) => true,
            (Command::SetLogInterval { .. }, DeviceEvent::LogInterval { .. }) => {
                self.echoed_command().as_ref() == Some(command)
            }
            (Command::Info, DeviceEvent::Info(_)) => true,
            (Command::DownloadLogs, DeviceEvent::LogDownload(_)) => true,
            _ => false,
        }
    }

    /// Encode this event as the frames a device would notify, terminator included
    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        let mut frames = match self {
            DeviceEvent::Ack => vec![text_frame(ACK_TEXT)],
            DeviceEvent::LogInterval { seconds } => {
                vec![text_frame(&format!("{} {}s", INTERVAL_PREFIX, seconds))]
            }
            DeviceEvent::Info(info) => info.lines.iter().map(|line| text_frame(line)).collect(),
            DeviceEvent::LogDownload(download) => download.to_frames(),
            DeviceEvent::Rejected { reply } => vec![text_frame(reply)],
        };
        frames.push(Vec::new());
        frames
    }
}

/// Settings reported by `*info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Raw lines in device order, header included
    pub lines: Vec<String>,
    /// `Key: value` lines, keyed by the trimmed key
    pub fields: BTreeMap<String, String>,
}

impl DeviceInfo {
    pub fn from_lines(lines: Vec<String>) -> Self {
        let fields = lines
            .iter()
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                let value = value.trim();
                if value.is_empty() {
                    return None;
                }
                Some((key.trim().to_string(), value.to_string()))
            })
            .collect();
        Self { lines, fields }
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.get("Name").map(String::as_str)
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.fields.get("Ver no").map(String::as_str)
    }

    /// Battery percentage from `Batt lvl: 100%`
    pub fn battery_level(&self) -> Option<u8> {
        self.fields
            .get("Batt lvl")
            .and_then(|v| v.trim_end_matches('%').trim().parse().ok())
    }
}

/// Temperature records from `*logall`, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDownload {
    pub temperatures: Vec<Celsius>,
}

impl LogDownload {
    pub fn new(temperatures: Vec<Celsius>) -> Self {
        Self { temperatures }
    }

    /// Encode as the device sends it; the u16 count caps the records sent
    fn to_frames(&self) -> Vec<Vec<u8>> {
        let count = u16::try_from(self.temperatures.len()).unwrap_or(u16::MAX);
        if usize::from(count) < self.temperatures.len() {
            warn!(
                "Log download of {} records exceeds the device limit, sending {}",
                self.temperatures.len(),
                count
            );
        }
        let records = &self.temperatures[..usize::from(count)];
        let mut header = Vec::with_capacity(LOG_HEADER_LEN);
        for _ in 0..3 {
            header.extend_from_slice(&count.to_be_bytes());
        }
        header.resize(LOG_HEADER_LEN, 0);

        let mut body = Vec::with_capacity(records.len() * 2 + 1);
        for t in records {
            body.extend_from_slice(&t.wire_tenths().to_be_bytes());
        }
        body.push(LOG_END_MARKER);

        let mut frames = vec![header];
        for chunk in body.chunks(FRAME_WIDTH) {
            let mut frame = chunk.to_vec();
            frame.resize(FRAME_WIDTH, 0);
            frames.push(frame);
        }
        frames
    }
}

// ----------------------------------------------------------------------------
// Reply Assembly
// ----------------------------------------------------------------------------

/// Buffers notification frames until the terminating empty frame arrives
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    frames: SmallVec<[Vec<u8>; 4]>,
}

impl ReplyAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification; returns the complete reply once terminated
    pub fn push(&mut self, frame: &[u8]) -> Option<Vec<Vec<u8>>> {
        if frame.is_empty() {
            if self.frames.is_empty() {
                return None;
            }
            return Some(self.frames.drain(..).collect());
        }
        trace!("Buffered frame {}", hex::encode(frame));
        self.frames.push(frame.to_vec());
        None
    }

    /// Frames received since the last terminator
    pub fn pending(&self) -> usize {
        self.frames.len()
    }

    /// Discard a partially received reply
    pub fn reset(&mut self) {
        self.frames.clear();
    }
}

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

/// Decode a complete reply
///
/// `expected` is the command in flight, if any. Without it the reply kind is
/// inferred from its contents, which is how unsolicited monitor traffic is
/// decoded.
pub fn decode_reply(
    frames: &[Vec<u8>],
    expected: Option<&Command>,
) -> Result<DeviceEvent, DecodeError> {
    let first = frames.first().ok_or(DecodeError::EmptyReply)?;

    match expected {
        Some(Command::DownloadLogs) => decode_log_download(frames),
        Some(Command::Info) => {
            let lines = text_lines(frames)?;
            if lines.first().map(String::as_str) == Some(SETTINGS_HEADER) {
                Ok(DeviceEvent::Info(DeviceInfo::from_lines(lines)))
            } else {
                Ok(DeviceEvent::Rejected {
                    reply: lines.join("\n"),
                })
            }
        }
        Some(_) => {
            let lines = text_lines(frames)?;
            Ok(decode_short_text(&lines))
        }
        None => match frame_text(first) {
            Some(text) if text == SETTINGS_HEADER => decode_reply(frames, Some(&Command::Info)),
            Some(_) => {
                let lines = text_lines(frames)?;
                Ok(decode_short_text(&lines))
            }
            None => decode_log_download(frames),
        },
    }
}

fn decode_short_text(lines: &[String]) -> DeviceEvent {
    let text = lines.join("\n");
    if text == ACK_TEXT {
        return DeviceEvent::Ack;
    }
    if let Some(rest) = text.strip_prefix(INTERVAL_PREFIX) {
        if let Ok(seconds) = rest.trim().trim_end_matches('s').parse() {
            return DeviceEvent::LogInterval { seconds };
        }
    }
    DeviceEvent::Rejected { reply: text }
}

fn decode_log_download(frames: &[Vec<u8>]) -> Result<DeviceEvent, DecodeError> {
    let header = frames.first().ok_or(DecodeError::EmptyReply)?;
    if header.len() < 2 {
        return Err(DecodeError::malformed(format!(
            "log header too short: {} bytes",
            header.len()
        )));
    }
    let expected = usize::from(u16::from_be_bytes([header[0], header[1]]));

    let body: Vec<u8> = frames[1..].iter().flatten().copied().collect();
    let mut temperatures = Vec::with_capacity(expected);
    let mut offset = 0;
    let mut terminated = false;
    while offset < body.len() {
        if body[offset] == LOG_END_MARKER {
            terminated = true;
            break;
        }
        if offset + 1 >= body.len() {
            return Err(DecodeError::malformed("odd trailing byte in log records"));
        }
        let raw = i16::from_be_bytes([body[offset], body[offset + 1]]);
        temperatures.push(Celsius::from_tenths(i32::from(raw)));
        offset += 2;
    }

    if temperatures.len() < expected || (!terminated && temperatures.len() != expected) {
        return Err(DecodeError::Truncated {
            expected,
            actual: temperatures.len(),
        });
    }
    if temperatures.len() > expected {
        return Err(DecodeError::malformed(format!(
            "header announces {} records, body holds {}",
            expected,
            temperatures.len()
        )));
    }

    Ok(DeviceEvent::LogDownload(LogDownload::new(temperatures)))
}

fn text_lines(frames: &[Vec<u8>]) -> Result<Vec<String>, DecodeError> {
    frames
        .iter()
        .map(|frame| {
            frame_text(frame).ok_or_else(|| {
                DecodeError::malformed(format!("non-text frame {}", hex::encode(frame)))
            })
        })
        .collect()
}

/// Text content of a null-padded frame, if it is printable ASCII
fn frame_text(frame: &[u8]) -> Option<String> {
    let end = frame.iter().position(|b| *b == 0).unwrap_or(frame.len());
    let content = &frame[..end];
    if content.is_empty() || !content.iter().all(|b| (0x20..0x7f).contains(b)) {
        return None;
    }
    if frame[end..].iter().any(|b| *b != 0) {
        return None;
    }
    String::from_utf8(content.to_vec()).ok().map(|s| s.trim_end().to_string())
}

/// Build a fixed-width, null-padded text frame
pub fn text_frame(text: &str) -> Vec<u8> {
    let mut frame = text.as_bytes().to_vec();
    frame.truncate(FRAME_WIDTH);
    frame.resize(FRAME_WIDTH, 0);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_log_frames() -> Vec<Vec<u8>> {
        vec![
            hex::decode("00110011001100020100000000003a").unwrap(),
            hex::decode("0117011701170117011701170117011701170117").unwrap(),
            hex::decode("01170117011701160116011601182e0000000000").unwrap(),
        ]
    }

    #[test]
    fn test_decodes_reference_log_download() {
        let event = decode_reply(&reference_log_frames(), Some(&Command::DownloadLogs)).unwrap();
        match event {
            DeviceEvent::LogDownload(download) => {
                assert_eq!(download.temperatures.len(), 17);
                assert_eq!(download.temperatures[0], Celsius::from_tenths(279));
                assert_eq!(download.temperatures[13], Celsius::from_tenths(278));
                assert_eq!(download.temperatures[16], Celsius::from_tenths(280));
            }
            other => panic!("Expected log download, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_log_download() {
        let mut frames = reference_log_frames();
        frames.pop();
        let result = decode_reply(&frames, Some(&Command::DownloadLogs));
        assert!(matches!(result, Err(DecodeError::Truncated { expected: 17, .. })));
    }

    #[test]
    fn test_sniffs_reply_kind_without_context() {
        let event = decode_reply(&reference_log_frames(), None).unwrap();
        assert!(matches!(event, DeviceEvent::LogDownload(_)));

        let ack = decode_reply(&[b"Ok\0".to_vec()], None).unwrap();
        assert_eq!(ack, DeviceEvent::Ack);

        let interval = decode_reply(&[text_frame("Interval: 60s")], None).unwrap();
        assert_eq!(interval, DeviceEvent::LogInterval { seconds: 60 });
    }

    #[test]
    fn test_decodes_info_block() {
        let frames: Vec<Vec<u8>> = ["SETTINGS", "Name:   E72296DE", "Ver no: 13", "Batt lvl: 100%"]
            .iter()
            .map(|line| text_frame(line))
            .collect();
        let event = decode_reply(&frames, Some(&Command::Info)).unwrap();
        match event {
            DeviceEvent::Info(info) => {
                assert_eq!(info.name(), Some("E72296DE"));
                assert_eq!(info.firmware_version(), Some("13"));
                assert_eq!(info.battery_level(), Some(100));
            }
            other => panic!("Expected info, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_text_is_rejection_not_decode_error() {
        let event = decode_reply(&[text_frame("Err")], Some(&Command::Blink)).unwrap();
        assert_eq!(
            event,
            DeviceEvent::Rejected {
                reply: "Err".to_string()
            }
        );
        assert!(!event.acknowledges(&Command::Blink));
    }

    #[test]
    fn test_binary_where_text_expected_is_malformed() {
        let result = decode_reply(&[vec![0x01, 0x17]], Some(&Command::Blink));
        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_assembler_waits_for_terminator() {
        let mut assembler = ReplyAssembler::new();
        let frames = reference_log_frames();
        assert!(assembler.push(&frames[0]).is_none());
        assert!(assembler.push(&frames[1]).is_none());
        assert!(assembler.push(&frames[2]).is_none());
        assert_eq!(assembler.pending(), 3);
        let reply = assembler.push(&[]).unwrap();
        assert_eq!(reply, frames);
        assert_eq!(assembler.pending(), 0);
        // A stray terminator with nothing buffered yields nothing
        assert!(assembler.push(&[]).is_none());
    }

    #[test]
    fn test_interval_echo_round_trips() {
        let command = Command::SetLogInterval { seconds: 300 };
        let event = DeviceEvent::LogInterval { seconds: 300 };
        let frames = event.to_frames();
        let decoded = decode_reply(&frames[..frames.len() - 1], Some(&command)).unwrap();
        assert_eq!(decoded.echoed_command(), Some(command));
        assert!(decoded.acknowledges(&command));
        assert!(!DeviceEvent::LogInterval { seconds: 60 }.acknowledges(&command));
    }

    #[test]
    fn test_ok_reply_maps_back_to_command() {
        let frames = DeviceEvent::Ack.to_frames();
        let decoded = decode_reply(&frames[..frames.len() - 1], Some(&Command::Blink)).unwrap();
        assert_eq!(decoded, DeviceEvent::Ack);
        assert_eq!(decoded.echoed_command(), None);
        assert_eq!(decoded.answered_command(&Command::Blink), Some(Command::Blink));
        assert_eq!(
            decoded.answered_command(&Command::ToggleLogging),
            Some(Command::ToggleLogging)
        );
        assert_eq!(decoded.answered_command(&Command::DownloadLogs), None);

        let echo = DeviceEvent::LogInterval { seconds: 60 };
        assert_eq!(
            echo.answered_command(&Command::SetLogInterval { seconds: 60 }),
            Some(Command::SetLogInterval { seconds: 60 })
        );
    }

    #[test]
    fn test_out_of_range_temperatures_saturate_on_the_wire() {
        let event = DeviceEvent::LogDownload(LogDownload::new(vec![
            Celsius::from_tenths(40_000),
            Celsius::from_tenths(-40_000),
            Celsius::from_tenths(-15),
        ]));
        let frames = event.to_frames();
        match decode_reply(&frames[..frames.len() - 1], Some(&Command::DownloadLogs)).unwrap() {
            DeviceEvent::LogDownload(download) => assert_eq!(
                download.temperatures,
                vec![
                    Celsius::from_tenths(i32::from(i16::MAX)),
                    Celsius::from_tenths(i32::from(i16::MIN)),
                    Celsius::from_tenths(-15),
                ]
            ),
            other => panic!("Expected log download, got {:?}", other),
        }
    }

    #[test]
    fn test_record_count_is_capped_at_header_width() {
        let records = vec![Celsius::from_tenths(45); usize::from(u16::MAX) + 10];
        let frames = DeviceEvent::LogDownload(LogDownload::new(records)).to_frames();
        assert_eq!(&frames[0][..2], &u16::MAX.to_be_bytes());
        match decode_reply(&frames[..frames.len() - 1], Some(&Command::DownloadLogs)).unwrap() {
            DeviceEvent::LogDownload(download) => {
                assert_eq!(download.temperatures.len(), usize::from(u16::MAX))
            }
            other => panic!("Expected log download, got {:?}", other),
        }
    }
}
