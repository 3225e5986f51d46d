//! Incremental terminal rendering of a transcript.
//!
//! Snapshots arrive after every transition, each carrying the whole
//! transcript. [`TranscriptPrinter`] remembers how much it has already written
//! so each call only prints what is new: fresh token suffixes of the streaming
//! assistant turn, and whole system turns.

use std::io::{self, Write};
use tutor_core::transcript::{Role, Transcript};

#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    /// Turns fully written out.
    done: usize,
    /// Bytes already written of the first unfinished turn.
    partial: usize,
}

impl TranscriptPrinter {
    /// Starts printing after the turns already present in `transcript`.
    pub fn resume_after(transcript: &Transcript) -> Self {
        Self {
            done: transcript.len(),
            partial: 0,
        }
    }

    pub fn render(&mut self, transcript: &Transcript, out: &mut impl Write) -> io::Result<()> {
        for turn in transcript.turns().iter().skip(self.done) {
            match turn.role {
                // The user typed it; no need to echo.
                Role::User => {}
                Role::Assistant => {
                    out.write_all(turn.text[self.partial..].as_bytes())?;
                    self.partial = turn.text.len();
                    if turn.is_streaming() {
                        break;
                    }
                    writeln!(out)?;
                }
                Role::System => writeln!(out, "[system] {}", turn.text)?,
            }
            self.done += 1;
            self.partial = 0;
        }
        out.flush()
    }
}
