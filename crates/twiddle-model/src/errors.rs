// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors surfaced by the streaming decoder, accumulator, and chat client
/// (spec §7: Transport, Protocol).
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("malformed SSE stream: {0}")]
    StreamFormat(String),
    #[error("request payload exceeded the size bound")]
    PayloadTooLarge,
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("upstream rejected the request: {0}")]
    UpstreamRejected(String),
}
