pub mod bus;
pub mod dispatcher;
pub mod envelope;

// Re-export common types
pub use bus::BusConsumer;
pub use dispatcher::Dispatcher;
pub use envelope::{JobPayload, Request, RequestEnvelope, Response, ResponseStatus};
