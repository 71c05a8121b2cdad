pub mod message;
pub mod registry;
pub mod router;

pub use message::{MessageKind, RealtimeMessage, Role};
pub use registry::ConnectionRegistry;
pub use router::BroadcastRouter;
