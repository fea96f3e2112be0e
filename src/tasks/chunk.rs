//! Text chunking task

use crate::core::{ItemResult, ItemStream, Task, TaskContext, TaskDefinition, TaskError};
use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::debug;

/// Splits item text into chunks of bounded size
#[derive(Debug, Clone)]
pub struct ChunkTask {
    max_chunk_chars: usize,
}

impl ChunkTask {
    pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1024;

    pub fn new(max_chunk_chars: usize) -> Self {
        Self {
            max_chunk_chars: max_chunk_chars.max(1),
        }
    }

    /// Build from a definition (`max_chunk_chars` parameter)
    pub fn from_definition(definition: &TaskDefinition) -> Result<Self, TaskError> {
        let max = definition
            .param_usize("max_chunk_chars")?
            .unwrap_or(Self::DEFAULT_MAX_CHUNK_CHARS);
        Ok(Self::new(max))
    }
}

impl Default for ChunkTask {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CHUNK_CHARS)
    }
}

impl Task for ChunkTask {
    fn run(&self, input: ItemStream, ctx: TaskContext) -> ItemStream {
        let max = self.max_chunk_chars;
        let task_name = ctx.task_name;

        input
            .flat_map(move |result| {
                let out: Vec<ItemResult> = match result {
                    Ok(item) => {
                        let chunks = split_into_chunks(&item.content, max);
                        debug!(task = %task_name, item = %item.id, chunks = chunks.len(), "Chunked item");
                        chunks
                            .into_iter()
                            .enumerate()
                            .map(|(index, chunk)| {
                                Ok(item.derive(chunk).with_metadata("chunk_index", json!(index)))
                            })
                            .collect()
                    }
                    Err(err) => vec![Err(err)],
                };
                stream::iter(out)
            })
            .boxed()
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks of at most `max_chars` characters
///
/// Paragraphs (separated by a blank line) are packed together while they fit.
/// Longer paragraphs are broken at whitespace, and words longer than the
/// limit are cut.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let pieces = if char_len(paragraph) <= max_chars {
            vec![paragraph.to_string()]
        } else {
            split_words(paragraph, max_chars)
        };

        for piece in pieces {
            if !current.is_empty() && char_len(&current) + 2 + char_len(&piece) > max_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_words(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in paragraph.split_whitespace() {
        if char_len(word) > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max_chars).map(|part| part.iter().collect::<String>()));
            continue;
        }

        if !current.is_empty() && char_len(&current) + 1 + char_len(word) > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
