//! Running transcript of a session
//!
//! Entries arrive from three places: model text parts, server-side user
//! transcripts, and the local speech detector's onset marker. The log asks
//! for a save every `save_interval` entries so a crash loses little.

use crate::storage::{Speaker, TranscriptEntry};

/// User entry recorded at every local speech onset
pub const SPEECH_MARKER: &str = "[AUDIO_DETECTED]";

#[derive(Debug, Clone)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
    save_interval: usize,
}

impl TranscriptLog {
    pub fn new(save_interval: usize) -> Self {
        Self {
            entries: Vec::new(),
            save_interval: save_interval.max(1),
        }
    }

    /// Append an entry. Returns true when a periodic save is due.
    pub fn push(&mut self, speaker: Speaker, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.entries.push(TranscriptEntry::now(speaker, text));

        if self.entries.len() % 10 == 0 {
            log::debug!("Transcript: {} entries", self.entries.len());
        }
        self.entries.len() % self.save_interval == 0
    }

    /// Server-side user transcript. The onset marker is local only and is
    /// never accepted from the wire.
    pub fn push_user_text(&mut self, text: &str) -> bool {
        if text.trim() == SPEECH_MARKER {
            return false;
        }
        self.push(Speaker::User, text)
    }

    pub fn push_marker(&mut self) -> bool {
        self.push(Speaker::User, SPEECH_MARKER)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn markers(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.speaker == Speaker::User && e.text == SPEECH_MARKER)
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_is_due_every_interval() {
        let mut log = TranscriptLog::new(5);
        let due: Vec<bool> = (0..10)
            .map(|i| log.push(Speaker::Assistant, &format!("line {}", i)))
            .collect();
        assert_eq!(
            due,
            vec![false, false, false, false, true, false, false, false, false, true]
        );
    }

    #[test]
    fn blank_text_is_ignored() {
        let mut log = TranscriptLog::new(5);
        assert!(!log.push(Speaker::Assistant, "   "));
        assert!(log.is_empty());
    }

    #[test]
    fn wire_markers_are_rejected() {
        let mut log = TranscriptLog::new(5);
        log.push_user_text(SPEECH_MARKER);
        log.push_user_text("I said water");
        log.push_marker();

        assert_eq!(log.len(), 2);
        assert_eq!(log.markers(), 1);
        assert_eq!(log.entries()[0].text, "I said water");
    }
}
