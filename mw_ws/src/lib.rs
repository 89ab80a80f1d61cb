pub mod backoff;
pub mod error;
pub mod frame;
pub mod gate;
pub mod listener;
pub mod pipeline;
pub mod sink;

pub use backoff::BackoffSchedule;
pub use error::ListenerError;
pub use gate::ConnectionGate;
pub use listener::ListenerStatus;
pub use listener::Phase;
pub use listener::SearchListener;
pub use listener::SearchListenerConfig;
pub use listener::StartTicket;
pub use pipeline::FetchPipeline;
pub use sink::DirectSink;
pub use sink::NotificationSink;
pub use sink::SessionProvider;
pub use sink::StaticSession;
