//! The UI event a host passes along with row actions.

/// Minimal view of a UI event that triggered a controller action.
pub trait UiEvent {
    fn prevent_default(&mut self);
    fn stop_propagation(&mut self);
}

/// Records what a controller did to the event; handy for hosts without a
/// native event type and for tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActionEvent {
    pub default_prevented: bool,
    pub propagation_stopped: bool,
}

impl UiEvent for ActionEvent {
    fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }
}
