//! Engine process lifecycle: port selection, launch, handshake, restart, teardown.

pub mod handshake;
pub mod port;
pub(crate) mod process;
pub mod supervisor;

pub use handshake::{parse_handshake_line, HandshakeInfo, HANDSHAKE_MARKER};
pub use port::{find_free_port, is_port_in_use};
pub use supervisor::EngineSupervisor;
