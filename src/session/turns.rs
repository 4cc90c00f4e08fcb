//! Turn Aggregator: transcript deltas in, finalized turns out.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    /// The local user at the microphone.
    Author,
    /// The remote conversational agent.
    Agent,
}

/// Incremental fragment of one speaker's utterance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptDelta {
    pub speaker: Speaker,
    pub text: String,
    /// Arrival order across both speakers.
    pub seq: u64,
}

/// Committed text of one utterance. Provisional turns are exported from an
/// open accumulator and never enter the finalized log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub provisional: bool,
}

/// Open utterance of one speaker, stamped with the arrival of its first delta.
#[derive(Debug, Default)]
struct Accumulator {
    text: String,
    first_seq: Option<u64>,
}

#[derive(Debug, Default)]
pub struct TurnAggregator {
    author: Accumulator,
    agent: Accumulator,
    finalized: Vec<Turn>,
    next_seq: u64,
}

impl TurnAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp an incoming fragment with its arrival order and accumulate it.
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) -> TranscriptDelta {
        let delta = TranscriptDelta {
            speaker,
            text: text.into(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let open = self.accumulator_mut(speaker);
        open.first_seq.get_or_insert(delta.seq);
        open.text.push_str(&delta.text);
        delta
    }

    /// Turn boundary. Finalizes both speakers in the order they started
    /// talking; returns what was committed.
    pub fn complete_turn(&mut self) -> Vec<Turn> {
        let mut committed = Vec::new();
        for speaker in self.open_order() {
            let open = std::mem::take(self.accumulator_mut(speaker));
            let text = open.text.trim();
            if text.is_empty() {
                continue;
            }
            let turn = Turn {
                speaker,
                text: text.to_string(),
                provisional: false,
            };
            self.finalized.push(turn.clone());
            committed.push(turn);
        }
        committed
    }

    /// Finalized turns, then (optionally) open accumulators as provisional
    /// turns. Does not disturb accumulation.
    pub fn export_history(&self, include_provisional: bool) -> Vec<Turn> {
        let mut history = self.finalized.clone();
        if include_provisional {
            for speaker in self.open_order() {
                let text = self.pending(speaker).trim();
                if !text.is_empty() {
                    history.push(Turn {
                        speaker,
                        text: text.to_string(),
                        provisional: true,
                    });
                }
            }
        }
        history
    }

    /// Text accumulated for `speaker` since their last finalized turn.
    pub fn pending(&self, speaker: Speaker) -> &str {
        &self.accumulator(speaker).text
    }

    pub fn finalized(&self) -> &[Turn] {
        &self.finalized
    }

    /// Speakers with an open utterance, earliest first delta first.
    fn open_order(&self) -> Vec<Speaker> {
        let mut open: Vec<(u64, Speaker)> = [Speaker::Author, Speaker::Agent]
            .into_iter()
            .filter_map(|speaker| Some((self.accumulator(speaker).first_seq?, speaker)))
            .collect();
        open.sort_unstable_by_key(|(seq, _)| *seq);
        open.into_iter().map(|(_, speaker)| speaker).collect()
    }

    fn accumulator(&self, speaker: Speaker) -> &Accumulator {
        match speaker {
            Speaker::Author => &self.author,
            Speaker::Agent => &self.agent,
        }
    }

    fn accumulator_mut(&mut self, speaker: Speaker) -> &mut Accumulator {
        match speaker {
            Speaker::Author => &mut self.author,
            Speaker::Agent => &mut self.agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_join_into_one_trimmed_turn() {
        let mut turns = TurnAggregator::new();
        turns.push(Speaker::Author, "Hel");
        turns.push(Speaker::Author, "lo ");
        let committed = turns.complete_turn();

        assert_eq!(
            committed,
            vec![Turn {
                speaker: Speaker::Author,
                text: "Hello".into(),
                provisional: false
            }]
        );
        assert_eq!(turns.pending(Speaker::Author), "");
    }

    #[test]
    fn both_speakers_finalize_on_one_boundary() {
        let mut turns = TurnAggregator::new();
        turns.push(Speaker::Author, "Where were we?");
        turns.push(Speaker::Agent, " The winter");
        turns.push(Speaker::Agent, " of 1998.");
        let committed = turns.complete_turn();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].speaker, Speaker::Author);
        assert_eq!(committed[1].text, "The winter of 1998.");
    }

    #[test]
    fn boundary_with_nothing_pending_commits_nothing() {
        let mut turns = TurnAggregator::new();
        turns.push(Speaker::Agent, "  \n");
        assert!(turns.complete_turn().is_empty());
        assert!(turns.finalized().is_empty());
    }

    #[test]
    fn export_includes_open_text_without_consuming_it() {
        let mut turns = TurnAggregator::new();
        turns.push(Speaker::Agent, "Tell me");
        turns.complete_turn();
        turns.push(Speaker::Author, "It was cold");

        let history = turns.export_history(true);
        assert_eq!(history.len(), 2);
        assert!(!history[0].provisional);
        assert_eq!(history[1].text, "It was cold");
        assert!(history[1].provisional);

        // Accumulation carries on unchanged.
        turns.push(Speaker::Author, " that night.");
        let committed = turns.complete_turn();
        assert_eq!(committed[0].text, "It was cold that night.");
        assert_eq!(turns.export_history(false).len(), 2);
    }

    #[test]
    fn arrival_order_is_monotonic_across_speakers() {
        let mut turns = TurnAggregator::new();
        let a = turns.push(Speaker::Author, "a");
        let b = turns.push(Speaker::Agent, "b");
        let c = turns.push(Speaker::Author, "c");
        assert!(a.seq < b.seq && b.seq < c.seq);
        assert_eq!(turns.pending(Speaker::Author), "ac");
    }

    #[test]
    fn barge_in_keeps_the_agent_line_first() {
        let mut turns = TurnAggregator::new();
        turns.push(Speaker::Agent, "So tell me about the first");
        turns.push(Speaker::Author, "Wait, let me start earlier");
        turns.push(Speaker::Agent, " winter.");

        let open = turns.export_history(true);
        assert_eq!(open[0].speaker, Speaker::Agent);
        assert_eq!(open[1].speaker, Speaker::Author);

        let committed = turns.complete_turn();
        assert_eq!(committed[0].speaker, Speaker::Agent);
        assert_eq!(committed[0].text, "So tell me about the first winter.");
        assert_eq!(committed[1].speaker, Speaker::Author);
        assert_eq!(turns.finalized(), committed.as_slice());

        // The next boundary orders by its own first deltas.
        turns.push(Speaker::Author, "It was 1998.");
        turns.push(Speaker::Agent, "Go on.");
        let committed = turns.complete_turn();
        assert_eq!(committed[0].speaker, Speaker::Author);
    }
}
