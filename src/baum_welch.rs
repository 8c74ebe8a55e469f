//! Baum-Welch (forward-backward) posterior re-estimation.

use crate::error::HmmError;
use crate::model::Hmm;
use crate::utils::{lnsum, LOG_ZERO};
use crate::wdag::{EdgeLabel, Wdag};

/// Re-estimate all parameters from the posterior soft counts of a solved
/// trellis.
///
/// Every edge `(parent -> child, weight w)` carries posterior log-mass
/// `fw[parent] + w + bw[child]`; the masses are accumulated per label into
/// fresh log-zero tables and each table is normalised by its own `lnsum`
/// total, which is where the division by alpha implicitly happens.
/// `changed` is true iff any stored log-probability differs bit-for-bit
/// from its prior value.
pub(crate) fn reestimate(hmm: &mut Hmm, wdag: &Wdag) -> Result<bool, HmmError> {
    let n = hmm.n_states();
    let m = hmm.n_symbols();

    let mut new_init = vec![LOG_ZERO; n];
    let mut new_trans = vec![vec![LOG_ZERO; n]; n];
    let mut new_emiss = vec![vec![LOG_ZERO; m]; n];
    let mut new_state_freqs = vec![LOG_ZERO; n];
    let mut n_emissions = 0usize;

    // All edges, visited as each node's in-edges in topological order.
    for child in 0..wdag.len() {
        let bw = wdag.bw(child);
        for edge in wdag.edges_into(child) {
            let p = wdag.fw(edge.parent) + edge.weight + bw;
            if p.is_nan() {
                return Err(HmmError::NumericError);
            }

            match edge.label {
                // Exactly one start edge per state, so this is an assignment.
                EdgeLabel::Start(i) => new_init[i] = p,
                EdgeLabel::Trans { from, to } => {
                    new_trans[from][to] = lnsum(new_trans[from][to], p);
                }
                EdgeLabel::Emit { state, symbol } => {
                    if let Some(s) = symbol {
                        new_emiss[state][s] = lnsum(new_emiss[state][s], p);
                    }
                    new_state_freqs[state] = lnsum(new_state_freqs[state], p);
                    n_emissions += 1;
                }
                EdgeLabel::Finish => {}
            }
        }
    }

    debug_assert_eq!(n_emissions, n * hmm.n_timepoints());

    // State occupancy frequencies leave log space here.
    let mut denom = LOG_ZERO;
    for &mass in &new_state_freqs {
        denom = lnsum(denom, mass);
    }
    hmm.state_freqs = new_state_freqs
        .iter()
        .map(|&mass| {
            if mass <= LOG_ZERO {
                0.0
            } else {
                (mass - denom).exp()
            }
        })
        .collect();

    let mut changed = false;

    let mut denom = LOG_ZERO;
    for &mass in &new_init {
        denom = lnsum(denom, mass);
    }
    for (j, &mass) in new_init.iter().enumerate() {
        let new_prob = normalise(mass, denom);
        if hmm.init_log[j].to_bits() != new_prob.to_bits() {
            changed = true;
        }
        hmm.init_log[j] = new_prob;
    }

    for (i, row) in new_trans.iter().enumerate() {
        let mut denom = LOG_ZERO;
        for &mass in row {
            denom = lnsum(denom, mass);
        }
        for (j, &mass) in row.iter().enumerate() {
            let new_prob = normalise(mass, denom);
            if hmm.trans_log[i][j].to_bits() != new_prob.to_bits() {
                changed = true;
            }
            hmm.trans_log[i][j] = new_prob;
        }
    }

    if hmm.is_discrete() {
        for (i, row) in new_emiss.iter().enumerate() {
            let mut denom = LOG_ZERO;
            for &mass in row {
                denom = lnsum(denom, mass);
            }
            for (s, &mass) in row.iter().enumerate() {
                let new_prob = normalise(mass, denom);
                if hmm.symbol_emiss_log[i][s].to_bits() != new_prob.to_bits() {
                    changed = true;
                }
                hmm.symbol_emiss_log[i][s] = new_prob;
            }
        }
    }

    Ok(changed)
}

/// `mass - denom`, with zero mass pinned to the sentinel so the tables
/// never drift off it through rounding.
fn normalise(mass: f64, denom: f64) -> f64 {
    if mass <= LOG_ZERO {
        LOG_ZERO
    } else {
        mass - denom
    }
}
