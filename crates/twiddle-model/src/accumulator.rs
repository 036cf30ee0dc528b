// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Merge partial, index-keyed tool-call fragments from the SSE stream into
//! well-formed [`ToolCall`]s (spec §4.4).

use crate::errors::ModelError;
use crate::types::ToolCall;

#[derive(Debug, Default, Clone)]
pub(crate) struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: Vec<u8>,
}

/// Sparse, index-ordered accumulation of in-flight tool-call fragments.
///
/// Backed by a dynamic `Vec` with holes filled by `PartialToolCall::default`
/// (spec §9: "sparse ordered map ... backed by a dynamic list").
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partials: Vec<PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&mut self, index: usize) -> &mut PartialToolCall {
        if index >= self.partials.len() {
            self.partials.resize_with(index + 1, PartialToolCall::default);
        }
        &mut self.partials[index]
    }

    /// `index = None` is only legal when no fragments have arrived yet
    /// (spec §4.4, §9: servers either always index or never).
    fn resolve_index(&self, index: Option<u32>) -> Result<usize, ModelError> {
        match index {
            Some(i) => Ok(i as usize),
            None if self.partials.is_empty() => Ok(0),
            None => Err(ModelError::StreamFormat(
                "tool-call fragment omitted index after fragments were already indexed".into(),
            )),
        }
    }

    pub fn set_id(&mut self, index: Option<u32>, id: &str) -> Result<(), ModelError> {
        let i = self.resolve_index(index)?;
        let partial = self.acquire(i);
        match &partial.id {
            None => partial.id = Some(id.to_string()),
            Some(existing) if existing == id => {}
            Some(existing) => {
                return Err(ModelError::StreamFormat(format!(
                    "tool-call id changed mid-stream: '{existing}' -> '{id}'"
                )))
            }
        }
        Ok(())
    }

    pub fn set_name(&mut self, index: Option<u32>, name: &str) -> Result<(), ModelError> {
        if name.is_empty() {
            return Err(ModelError::StreamFormat(
                "tool-call fragment carried an empty name".into(),
            ));
        }
        let i = self.resolve_index(index)?;
        let partial = self.acquire(i);
        match &partial.name {
            None => partial.name = Some(name.to_string()),
            Some(existing) if existing == name => {}
            Some(existing) => {
                return Err(ModelError::StreamFormat(format!(
                    "tool-call name changed mid-stream: '{existing}' -> '{name}'"
                )))
            }
        }
        Ok(())
    }

    pub fn append_arguments(&mut self, index: Option<u32>, chunk: &str) -> Result<(), ModelError> {
        let i = self.resolve_index(index)?;
        self.acquire(i).arguments.extend_from_slice(chunk.as_bytes());
        Ok(())
    }

    /// Finalize all accumulated partials into [`ToolCall`]s and reset the
    /// accumulator, regardless of outcome (spec §4.4).
    pub fn take(&mut self) -> Result<Vec<ToolCall>, ModelError> {
        let partials = std::mem::take(&mut self.partials);
        let mut calls = Vec::with_capacity(partials.len());
        for partial in partials {
            let id = partial
                .id
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ModelError::StreamFormat("tool call finalized without an id".into()))?;
            let name = partial.name.filter(|s| !s.is_empty()).ok_or_else(|| {
                ModelError::StreamFormat("tool call finalized without a name".into())
            })?;
            let arguments_json = String::from_utf8_lossy(&partial.arguments).into_owned();
            calls.push(ToolCall {
                id,
                name,
                arguments_json,
            });
        }
        Ok(calls)
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_fragments_finalize_into_one_call() {
        let mut acc = ToolCallAccumulator::new();
        acc.set_id(Some(0), "a").unwrap();
        acc.set_name(Some(0), "read_file").unwrap();
        acc.append_arguments(Some(0), "{\"").unwrap();
        acc.append_arguments(Some(0), "file_path\":\"x\"}").unwrap();
        let calls = acc.take().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments_json, "{\"file_path\":\"x\"}");
    }

    #[test]
    fn missing_index_defaults_to_zero_only_when_empty() {
        let mut acc = ToolCallAccumulator::new();
        acc.set_id(None, "a").unwrap();
        acc.set_name(Some(1), "search").unwrap();
        let err = acc.append_arguments(None, "{}").unwrap_err();
        assert!(matches!(err, ModelError::StreamFormat(_)));
    }

    #[test]
    fn id_mismatch_is_stream_format_error() {
        let mut acc = ToolCallAccumulator::new();
        acc.set_id(Some(0), "a").unwrap();
        let err = acc.set_id(Some(0), "b").unwrap_err();
        assert!(matches!(err, ModelError::StreamFormat(_)));
    }

    #[test]
    fn finalize_requires_id_and_name() {
        let mut acc = ToolCallAccumulator::new();
        acc.append_arguments(Some(0), "{}").unwrap();
        let err = acc.take().unwrap_err();
        assert!(matches!(err, ModelError::StreamFormat(_)));
    }

    #[test]
    fn take_resets_accumulator() {
        let mut acc = ToolCallAccumulator::new();
        acc.set_id(Some(0), "a").unwrap();
        acc.set_name(Some(0), "x").unwrap();
        let _ = acc.take().unwrap();
        assert!(acc.is_empty());
    }

    #[test]
    fn parallel_indices_finalize_independently() {
        let mut acc = ToolCallAccumulator::new();
        acc.set_id(Some(1), "b").unwrap();
        acc.set_name(Some(1), "search").unwrap();
        acc.set_id(Some(0), "a").unwrap();
        acc.set_name(Some(0), "read_file").unwrap();
        let calls = acc.take().unwrap();
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[1].id, "b");
    }
}
