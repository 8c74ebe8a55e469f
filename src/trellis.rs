//! Unrolls an HMM over its timepoints into a trellis WDAG.

use crate::model::Hmm;
use crate::wdag::{EdgeLabel, Wdag};

/// Build the trellis for the model's current parameters.
///
/// Layout: one start node, then for each timepoint a layer of
/// "state-reached" nodes followed by a layer of "symbol-emitted" nodes,
/// then one end node. Each timepoint contributes `2 * n_states` nodes, so
/// the graph has `2 * n_states * n_timepoints + 2` nodes in total.
///
/// The caller guarantees `has_all_data()`.
pub(crate) fn build(hmm: &Hmm) -> Wdag {
    let n = hmm.n_states();
    let t_len = hmm.n_timepoints();

    let mut wdag = Wdag::with_capacity(2 * n * t_len + 2);

    let start = wdag.add_node();
    wdag.set_required_start(start);

    // state_a: the chain has reached this state at this timepoint.
    // state_b: the state has emitted this timepoint's observation.
    let mut state_a = vec![0usize; n];
    let mut state_b = vec![0usize; n];

    for t in 0..t_len {
        for (i, slot) in state_a.iter_mut().enumerate() {
            *slot = wdag.add_node();

            if t == 0 {
                // Initial-state assignment, weighted by the init distribution.
                wdag.add_edge(*slot, start, EdgeLabel::Start(i), hmm.init_log[i]);
            } else {
                // Join to every emitted node of the previous timepoint.
                for (i_prev, &prev) in state_b.iter().enumerate() {
                    wdag.add_edge(
                        *slot,
                        prev,
                        EdgeLabel::Trans { from: i_prev, to: i },
                        hmm.trans_log[i_prev][i],
                    );
                }
            }
        }

        for (i, slot) in state_b.iter_mut().enumerate() {
            let (symbol, weight) = if hmm.is_discrete() {
                let obs = hmm.observations[t];
                (Some(obs), hmm.symbol_emiss_log[i][obs])
            } else {
                (None, hmm.time_emiss_log[t][i])
            };

            *slot = wdag.add_node();
            wdag.add_edge(*slot, state_a[i], EdgeLabel::Emit { state: i, symbol }, weight);
        }
    }

    let end = wdag.add_node();
    for &b in &state_b {
        wdag.add_edge(end, b, EdgeLabel::Finish, 0.0);
    }
    wdag.set_required_end(end);

    debug_assert_eq!(wdag.len(), 2 * n * t_len + 2);
    wdag
}
