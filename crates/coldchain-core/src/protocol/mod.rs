//! Sensor wire protocol
//!
//! Command encoding, reply frame assembly and decoding, and advertisement
//! parsing. Everything here is pure; I/O lives in the transport crate.

pub mod advertisement;
pub mod command;
pub mod reply;

pub use advertisement::{Advertisement, SENSOR_COMPANY_ID};
pub use command::{encode, parse_command, Command, FirmwareProfile, COMMAND_PREFIX};
pub use reply::{
    decode_reply, text_frame, DeviceEvent, DeviceInfo, LogDownload, ReplyAssembler, FRAME_WIDTH,
    LOG_END_MARKER,
};
