//! LLM transport for the bias-scoring ensemble.
//!
//! A single OpenAI-compatible chat-completion client, generalized from the
//! provider-specific clients this crate used to carry: one `Transport`
//! instead of one struct per vendor, since every model in the ensemble
//! roster speaks the same wire protocol and differs only in URL/credential.

mod transport;

pub use transport::{Transport, TransportReply};
