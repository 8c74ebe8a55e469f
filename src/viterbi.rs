//! Viterbi-style hard-assignment re-estimation.

use crate::model::Hmm;
use crate::utils::to_log;
use crate::wdag::EdgeLabel;

pub(crate) struct ViterbiUpdate {
    pub changed: bool,
    pub predicted_states: Vec<usize>,
}

/// Re-estimate transition and emission probabilities from the hard counts
/// along a decoded best path, and read off the hidden state sequence.
///
/// A state that never appears as a source on the path gets the uniform
/// pseudocount fallback for its row; zero counts within a visited row map
/// to the log-zero sentinel. Initial state probabilities are not updated
/// here. `changed` is true iff any stored log-probability differs
/// bit-for-bit from its prior value.
pub(crate) fn reestimate(hmm: &mut Hmm, best_path: &[EdgeLabel]) -> ViterbiUpdate {
    let n = hmm.n_states();
    let m = hmm.n_symbols();
    let t_len = hmm.n_timepoints();

    let mut trans_counts = vec![vec![0usize; n]; n];
    let mut emiss_counts = vec![vec![0usize; m]; n];
    let mut state_counts = vec![0usize; n];
    let mut predicted_states = Vec::with_capacity(t_len);

    for label in best_path {
        match *label {
            EdgeLabel::Trans { from, to } => trans_counts[from][to] += 1,
            EdgeLabel::Emit { state, symbol } => {
                if let Some(s) = symbol {
                    emiss_counts[state][s] += 1;
                }
                state_counts[state] += 1;
                predicted_states.push(state);
            }
            EdgeLabel::Start(_) | EdgeLabel::Finish => {}
        }
    }

    // Every timepoint contributes exactly one emission edge to the path.
    debug_assert_eq!(predicted_states.len(), t_len);

    hmm.state_freqs = state_counts
        .iter()
        .map(|&c| c as f64 / t_len as f64)
        .collect();

    let mut changed = false;

    for (i, counts) in trans_counts.iter().enumerate() {
        let total: usize = counts.iter().sum();
        for (j, &count) in counts.iter().enumerate() {
            let new_prob = if total == 0 {
                -(n as f64).ln()
            } else {
                to_log(count as f64 / total as f64)
            };
            if hmm.trans_log[i][j].to_bits() != new_prob.to_bits() {
                changed = true;
            }
            hmm.trans_log[i][j] = new_prob;
        }
    }

    if hmm.is_discrete() {
        for (i, counts) in emiss_counts.iter().enumerate() {
            let total: usize = counts.iter().sum();
            for (s, &count) in counts.iter().enumerate() {
                let new_prob = if total == 0 {
                    -(m as f64).ln()
                } else {
                    to_log(count as f64 / total as f64)
                };
                if hmm.symbol_emiss_log[i][s].to_bits() != new_prob.to_bits() {
                    changed = true;
                }
                hmm.symbol_emiss_log[i][s] = new_prob;
            }
        }
    }

    ViterbiUpdate {
        changed,
        predicted_states,
    }
}
