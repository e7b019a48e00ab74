/// Live friends panel over WebSocket.
///
/// The client receives a `PanelSnapshot` whenever the panel changes (realtime
/// refresh, notice shown or expired) and may drive the panel with the same
/// actions the HTTP routes offer.
pub mod handler;
pub mod message;
