//! Reconnect state machine.
//!
//! A pure function of `(state, event)`; the timer and the socket live in
//! [`ReconnectSupervisor`](crate::reconnect::ReconnectSupervisor) and
//! [`ClientSession`](crate::ClientSession).

use serde::Serialize;

/// Lifecycle of the client's single logical connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    #[default]
    Disconnected,
    /// A dial is in progress.
    Connecting,
    /// The channel is open.
    Connected,
    /// Waiting for the reconnect timer.
    Reconnecting,
}

/// Inputs to the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// Session started.
    Connect,
    /// The dial succeeded.
    Opened,
    /// The channel closed with anything but the deliberate close code, or a
    /// dial failed.
    AbnormalClose,
    /// The reconnect delay elapsed.
    TimerFired,
    /// The channel closed with the deliberate close code.
    DeliberateClose,
    /// The session was ended by the user.
    Logout,
}

/// Side effect requested by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Open a new channel.
    Dial,
    /// Arm the reconnect timer.
    ScheduleReconnect,
    /// Disarm the reconnect timer.
    CancelTimer,
}

/// Close code a client sends on logout; a closure with this code never
/// triggers a reconnect.
pub const DELIBERATE_CLOSE_CODE: u16 = 1000;

/// Apply one event.
///
/// Events that make no sense in the current state (a stale timer after
/// logout, a close after the session ended) leave it unchanged.
pub fn transition(state: ConnectionState, event: ConnectionEvent) -> (ConnectionState, Option<Action>) {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (state, event) {
        (_, E::DeliberateClose | E::Logout) => (S::Disconnected, Some(Action::CancelTimer)),
        (S::Disconnected, E::Connect) => (S::Connecting, Some(Action::Dial)),
        (S::Connecting | S::Reconnecting, E::Opened) => (S::Connected, None),
        (S::Connected | S::Connecting, E::AbnormalClose) => {
            (S::Reconnecting, Some(Action::ScheduleReconnect))
        }
        (S::Reconnecting, E::TimerFired) => (S::Connecting, Some(Action::Dial)),
        (current, _) => (current, None),
    }
}
