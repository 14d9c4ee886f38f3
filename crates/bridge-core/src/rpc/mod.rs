//! Request/response RPC over a `Connection`.
//!
//! Two independent channels use this layer: the command channel (consumer
//! calls the engine) and the event channel (engine calls the consumer). Each
//! runs over its own transport so events are never stuck behind a command.
//!
//! - **Protocol**: framing, JSON-RPC envelopes and the tagged message codec
//! - **Client**: one outstanding request at a time
//! - **Host**: serve loop dispatching to a service table

pub mod client;
pub mod host;
pub mod protocol;

pub use client::RpcClient;
pub use host::{HostExit, RpcDispatch, RpcHost, RpcHostHandle};
pub use protocol::{FaultRecord, RpcRequest, RpcResponse};
