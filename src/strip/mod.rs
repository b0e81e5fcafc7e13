use eyre::Report;

use crate::pwm::PwmDriver;

use self::{
    color_state::{ColorState, Snapshot},
    command::{interpret, Applied, Command},
};

pub mod color_state;
pub mod command;

/// The single LED strip driven by this process.
#[derive(Debug)]
pub struct StripController<D> {
    name: String,
    state: ColorState<D>,
}

impl<D: PwmDriver> StripController<D> {
    pub fn new(name: impl Into<String>, driver: D) -> Self {
        StripController {
            name: name.into(),
            state: ColorState::new(driver),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&mut self, command: &Command) -> Applied {
        interpret(command, &mut self.state)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    /// Error of the duty writes that failed while applying the last commands.
    pub fn take_write_error(&mut self) -> Option<Report> {
        self.state.take_write_error()
    }
}
