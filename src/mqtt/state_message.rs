use color_eyre::Result;
use serde::Serialize;

use crate::{
    pwm::PwmDriver,
    strip::{color_state::Snapshot, StripController},
};

/// Payload published (retained) on the state topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StateMessage<'a> {
    pub device: &'a str,
    pub data: Snapshot,
}

impl<'a> StateMessage<'a> {
    pub fn from_strip<D: PwmDriver>(strip: &'a StripController<D>) -> Self {
        StateMessage {
            device: strip.name(),
            data: strip.snapshot(),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
