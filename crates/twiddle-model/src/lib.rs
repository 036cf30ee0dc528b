// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod accumulator;
mod client;
mod errors;
mod sse;
mod types;

pub use accumulator::ToolCallAccumulator;
pub use client::{ChatClient, Conversation, Snapshot, ToolDescriptor};
pub use errors::ModelError;
pub use sse::{dispatch_chunk, ChunkDispatch, SseDecoder, ToolCallFragment};
pub use types::{ContextUsage, Message, Role, ToolCall, Usage};
