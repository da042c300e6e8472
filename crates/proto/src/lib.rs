#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Wire protocol for the `mcp-queue` daemon: length-prefixed JSON frames
//! over a Unix stream socket, with both async (daemon) and sync (client)
//! transports sharing one encoding.

mod codec;
mod message;

pub use codec::{
    decode_message, encode_message, recv_frame, recv_message, send_message, sync_recv_message,
    sync_send_message, CodecError, HEADER_SIZE, MAX_MESSAGE_SIZE,
};
pub use message::{JobInfo, JobRequest, Message, QueueStatus};
