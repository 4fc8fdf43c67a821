pub mod handler;
pub mod notify;
pub mod persist;
pub mod ringbuf;

pub use handler::FrameHandler;
pub use notify::{Dispatcher, Event, Notifier};
pub use persist::{NamingConfig, PersistenceSink};
pub use ringbuf::FrameRing;
