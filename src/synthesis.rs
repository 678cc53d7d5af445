//! Long-text synthesis: sentence chunking and stitching.

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::audio::AudioBuffer;
use crate::engine::{Synthesizer, VoiceReference};
use crate::error::SynthesisError;

/// Default longest chunk handed to the engine, in characters.
pub const DEFAULT_MAX_CHARS: usize = 256;

/// Silence inserted between synthesized chunks.
pub const CHUNK_GAP_SECS: f32 = 0.15;

const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', '?', '…'];

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Sentences are packed greedily. A single sentence longer than `max_chars`
/// is split on word boundaries; a single word longer than `max_chars` becomes
/// its own chunk.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    for sentence in split_sentences(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if char_len(sentence) <= max_chars {
            let candidate_len = if buffer.is_empty() {
                char_len(sentence)
            } else {
                char_len(&buffer) + 1 + char_len(sentence)
            };
            if candidate_len <= max_chars {
                if !buffer.is_empty() {
                    buffer.push(' ');
                }
                buffer.push_str(sentence);
            } else {
                chunks.push(std::mem::take(&mut buffer));
                buffer.push_str(sentence);
            }
            continue;
        }

        if !buffer.is_empty() {
            chunks.push(std::mem::take(&mut buffer));
        }
        let mut current = String::new();
        for word in sentence.split_whitespace() {
            let candidate_len = if current.is_empty() {
                char_len(word)
            } else {
                char_len(&current) + 1 + char_len(word)
            };
            if candidate_len > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current.push_str(word);
            } else {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
    }

    if !buffer.is_empty() {
        chunks.push(buffer);
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

/// Split after sentence terminators that are followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if c.is_whitespace() && prev.is_some_and(|p| SENTENCE_TERMINATORS.contains(&p)) {
            sentences.push(&text[start..idx]);
            let mut next_start = idx + c.len_utf8();
            while let Some(&(j, d)) = chars.peek() {
                if !d.is_whitespace() {
                    break;
                }
                next_start = j + d.len_utf8();
                chars.next();
            }
            start = next_start;
            prev = None;
            continue;
        }
        prev = Some(c);
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Audio for a long text plus bookkeeping for the caller.
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub audio: AudioBuffer,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// Synthesize arbitrarily long text through `engine`.
///
/// Uses the engine's native batch call when `prefer_batch` is set, the engine
/// supports it, and there is more than one chunk.
pub async fn synthesize_long<S>(
    engine: &S,
    text: &str,
    reference: &VoiceReference,
    max_chars: usize,
    prefer_batch: bool,
) -> Result<SynthesisOutcome, SynthesisError>
where
    S: Synthesizer + ?Sized,
{
    let started = Instant::now();
    let chunks = split_into_chunks(text, max_chars);
    if chunks.is_empty() {
        return Err(SynthesisError::EmptyText);
    }

    let clips = if prefer_batch && chunks.len() > 1 && engine.supports_batch() {
        debug!(chunks = chunks.len(), "Synthesizing in batch mode");
        engine.infer_batch(&chunks, reference).await?
    } else {
        let mut clips = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            debug!(chunk = i + 1, total = chunks.len(), chars = char_len(chunk), "Synthesizing chunk");
            clips.push(engine.infer(chunk, reference).await?);
        }
        clips
    };

    let audio = AudioBuffer::concat(clips, CHUNK_GAP_SECS)?;
    let elapsed = started.elapsed();
    info!(
        chunks = chunks.len(),
        audio_secs = audio.duration_secs(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Synthesis complete"
    );

    Ok(SynthesisOutcome {
        audio,
        chunks: chunks.len(),
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_into_chunks("Xin chào. Hôm nay trời đẹp!", 256), vec!["Xin chào. Hôm nay trời đẹp!"]);
    }

    #[test]
    fn sentences_are_packed_up_to_the_limit() {
        let chunks = split_into_chunks("One two. Three four. Five six.", 20);
        assert_eq!(chunks, vec!["One two. Three four.", "Five six."]);
    }

    #[test]
    fn terminator_without_whitespace_does_not_split() {
        assert_eq!(split_sentences("v1.2 is out. Yes"), vec!["v1.2 is out.", "Yes"]);
        assert_eq!(split_sentences("Wait…  what?\nOk"), vec!["Wait…", "what?", "Ok"]);
    }

    #[test]
    fn long_sentences_split_on_words() {
        let chunks = split_into_chunks("alpha beta gamma delta epsilon", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta", "epsilon"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 11));
    }

    #[test]
    fn oversized_word_stands_alone() {
        let chunks = split_into_chunks("a supercalifragilistic b", 5);
        assert_eq!(chunks, vec!["a", "supercalifragilistic", "b"]);
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        let text = "ệệệệ. ệệệệ.";
        assert_eq!(split_into_chunks(text, 11), vec![text]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(split_into_chunks("   \n\t ", 10).is_empty());
        assert!(split_into_chunks("", 10).is_empty());
    }

    struct Counting {
        batch: bool,
        single_calls: AtomicUsize,
        batch_calls: AtomicUsize,
    }

    #[async_trait]
    impl Synthesizer for Counting {
        async fn infer(&self, _: &str, _: &VoiceReference) -> Result<AudioBuffer, SynthesisError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            Ok(AudioBuffer::new(vec![0.25; 100], 1_000))
        }

        fn supports_batch(&self) -> bool {
            self.batch
        }

        async fn infer_batch(&self, chunks: &[String], _: &VoiceReference) -> Result<Vec<AudioBuffer>, SynthesisError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(chunks.iter().map(|_| AudioBuffer::new(vec![0.25; 100], 1_000)).collect())
        }
    }

    fn counting(batch: bool) -> Counting {
        Counting {
            batch,
            single_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn chunks_are_joined_with_gaps() {
        let engine = counting(false);
        let outcome = synthesize_long(&engine, "First. Second. Third.", &VoiceReference::default(), 8, true)
            .await
            .unwrap();
        assert_eq!(outcome.chunks, 3);
        assert_eq!(engine.single_calls.load(Ordering::SeqCst), 3);
        // 3 clips of 100 samples plus two 150-sample gaps at 1 kHz.
        assert_eq!(outcome.audio.samples.len(), 600);
    }

    #[tokio::test]
    async fn batch_entry_point_is_used_when_supported() {
        let engine = counting(true);
        synthesize_long(&engine, "First. Second.", &VoiceReference::default(), 8, true)
            .await
            .unwrap();
        assert_eq!(engine.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.single_calls.load(Ordering::SeqCst), 0);

        let engine = counting(true);
        synthesize_long(&engine, "First. Second.", &VoiceReference::default(), 8, false)
            .await
            .unwrap();
        assert_eq!(engine.batch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let engine = counting(false);
        let err = synthesize_long(&engine, "  ", &VoiceReference::default(), 8, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::EmptyText));
    }
}
