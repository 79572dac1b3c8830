//! Regroups streamed text into chunks that end at natural breaks
//!
//! Synthesis latency is lowest when text is flushed at punctuation or word
//! boundaries instead of token by token.

use futures::{Stream, StreamExt};

/// Characters that end a chunk
pub const SPLITTERS: [char; 14] = [
    '.', ',', '?', '!', ';', ':', '—', '-', '(', ')', '[', ']', '}', ' ',
];

fn is_splitter(c: char) -> bool {
    SPLITTERS.contains(&c)
}

/// Incremental chunker over text fragments
#[derive(Debug, Default)]
pub struct TextChunker {
    buffer: String,
}

impl TextChunker {
    /// Create an empty chunker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment, returning a chunk if a break was reached
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if self.buffer.ends_with(is_splitter) {
            let ready = std::mem::replace(&mut self.buffer, fragment.to_string());
            return finish_chunk(&ready);
        }

        if let Some(first) = fragment.chars().next().filter(|c| is_splitter(*c)) {
            let mut ready = std::mem::take(&mut self.buffer);
            ready.push(first);
            self.buffer.push_str(&fragment[first.len_utf8()..]);
            return finish_chunk(&ready);
        }

        self.buffer.push_str(fragment);
        None
    }

    /// Flush whatever remains once the input is exhausted
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        finish_chunk(&rest)
    }
}

/// Normalize to exactly one trailing space; whitespace-only text is dropped
fn finish_chunk(raw: &str) -> Option<String> {
    let body = raw.trim();
    if body.is_empty() {
        None
    } else {
        Some(format!("{body} "))
    }
}

/// Lazily chunk a stream of text fragments
pub fn chunk_text<S>(fragments: S) -> impl Stream<Item = String>
where
    S: Stream<Item = String>,
{
    let state = (Box::pin(fragments), TextChunker::new(), false);

    futures::stream::unfold(state, |(mut fragments, mut chunker, exhausted)| async move {
        if exhausted {
            return None;
        }

        loop {
            match fragments.next().await {
                Some(fragment) => {
                    if let Some(chunk) = chunker.push(&fragment) {
                        return Some((chunk, (fragments, chunker, false)));
                    }
                }
                None => {
                    return chunker
                        .finish()
                        .map(|chunk| (chunk, (fragments, chunker, true)));
                }
            }
        }
    })
}
