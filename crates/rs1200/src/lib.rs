#![doc = include_str!("../readme.md")]
pub mod aprs;
pub mod ax25;
pub mod data;
pub mod kiss;
pub mod source;

pub mod prelude {
    pub use crate::aprs::message::{AprsMessage, MessageKind};
    pub use crate::aprs::position::PositionReport;
    pub use crate::aprs::weather::WeatherReport;
    pub use crate::aprs::{AprsData, AprsError};
    pub use crate::ax25::link::{
        Action, DisconnectReason, Link, LinkEvent, LinkState,
    };
    pub use crate::ax25::{
        Address, Callsign, Control, DecodeError, Frame, Supervisory,
        Unnumbered, PID_NO_LAYER3,
    };
    pub use crate::kiss::{self, KissDecoder};
    pub use crate::source::{LinkStatus, TncAddress, TncHandle};

    /// This re-export is necessary to iterate frame streams
    pub use futures_util::stream::StreamExt;
}
