mod coding;
mod conn;
mod error;
mod group;
mod quic;
mod scope;
mod server;
mod session;
mod setup;
mod stream;
mod track;
mod web_transport;

pub use coding::*;
pub use conn::*;
pub use error::*;
pub use group::*;
pub use quic::*;
pub use server::*;
pub use session::*;
pub use setup::*;
pub use stream::*;
pub use track::*;
pub use web_transport::*;

#[cfg(test)]
mod mock;
#[cfg(test)]
mod tests;

/// The ALPN for MOQ over raw QUIC.
pub static ALPN_MOQ: &[u8] = b"moq-00";

/// The ALPN for HTTP/3, used by the WebTransport path.
pub static ALPN_H3: &[u8] = b"h3";
