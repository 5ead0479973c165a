//! Streaming two-party computation: two mutually distrustful parties
//! evaluate a Boolean circuit over private inputs with Yao's garbled
//! circuits, free XOR, point-and-permute and half-gates, with input labels
//! delivered through oblivious transfer.

/// Programmatic circuit construction and stock circuits
pub mod builder;
/// Boolean circuit representation, statistics and serialization
pub mod circuit;
/// Framed, buffered duplex connection between the parties
pub mod conn;
/// Shared constants used across the library
pub mod constants;
/// Garbled circuit evaluation session
pub mod evaluator;
/// Garbling primitives: free XOR and half-gates
pub mod garble;
/// Circuit garbling session owning the global offset
pub mod garbler;
/// Wire label algebra
pub mod label;
/// Wire usage analysis for memory reclamation
pub mod liveness;
/// Base 1-out-of-2 oblivious transfer
pub mod ot;
/// IKNP oblivious transfer extension
pub mod ot_ext;
/// The streaming garbler-evaluator protocol
pub mod protocol;
/// Vector oblivious linear evaluation for triple preprocessing
pub mod vole;
