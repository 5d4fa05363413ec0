use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // General Errors
    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    // Framing Errors
    #[error("reserved flags set")]
    ReservedFlagsSet,

    #[error("fragmented control frame")]
    FragmentedControlFrame,

    #[error("unexpected continuation")]
    UnexpectedContinuation,

    #[error("data interleaved with fragment")]
    DataInterleavedWithFragment,

    #[error("unmasked frame")]
    UnmaskedFrame,

    #[error("payload over 2 GiB")]
    PayloadTooLarge,

    #[error("Invalid Opcode")]
    InvalidOpcode,

    // Broker command Errors
    #[error("invalid broker command")]
    InvalidCommand,

    // Handshake Errors
    #[error("handshake rejected: {code} {reason}")]
    HandshakeRejected { code: u16, reason: &'static str },

    // Tabserver line protocol Errors
    #[error("client did not open with HELLO")]
    InvalidHello,

    #[error("receive buffer filled before the HELLO sequence completed")]
    HelloTooLong,
}
