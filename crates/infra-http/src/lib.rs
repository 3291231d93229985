// Workgate Infrastructure - Outbound HTTP
// Implements: CallbackTransport

pub mod callback_transport;

pub use callback_transport::HttpCallbackTransport;
