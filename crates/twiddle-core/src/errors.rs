// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;
use twiddle_model::ModelError;

/// Failures the session runner surfaces to the CLI (spec §4.10, §7).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed tool call: {0}")]
    ToolEnvelopeInvalid(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}
