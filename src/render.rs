//! Diagnostic GraphViz rendering of the trellis around a timepoint.
//!
//! Writes a DOT description file only; converting it to an image is the
//! caller's business.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::HmmError;
use crate::model::Hmm;
use crate::utils::LOG_ZERO;

impl Hmm {
    /// Write a DOT digraph of the trellis in the vicinity of timepoint `t`,
    /// covering `depth` timepoints in each direction.
    ///
    /// Edges of zero mass are not drawn. Edge labels show real-space
    /// probabilities for transitions and emissions.
    pub fn write_dot<P: AsRef<Path>>(
        &self,
        path: P,
        t: usize,
        depth: usize,
    ) -> Result<(), HmmError> {
        std::fs::write(path, self.trellis_dot(t, depth)?)?;
        Ok(())
    }

    fn trellis_dot(&self, t: usize, depth: usize) -> Result<String, HmmError> {
        if !self.has_all_data() {
            return Err(HmmError::MissingData(
                "model parameters or observations not fully loaded",
            ));
        }
        let t_len = self.n_timepoints();
        if t >= t_len {
            return Err(HmmError::TimepointOutOfRange {
                timepoint: t,
                n_timepoints: t_len,
            });
        }

        let n = self.n_states;
        let min_t = t.saturating_sub(depth);
        let max_t = (t + depth).min(t_len - 1);

        // Node ids match the trellis builder's layout: the start node is 0,
        // the state-reached layer of timepoint tp starts at 2*n*tp + 1 and
        // the symbol-emitted layer at 2*n*tp + n + 1.
        let a_id = |tp: usize, i: usize| 2 * n * tp + 1 + i;
        let b_id = |tp: usize, i: usize| 2 * n * tp + n + 1 + i;

        let mut dot = String::new();
        let _ = writeln!(dot, "digraph trellis_at_{t} {{");

        for tp in min_t..=max_t {
            for i in 0..n {
                let _ = writeln!(dot, "{} [label=\"{}_{}_a\"]", a_id(tp, i), tp, i);
                let _ = writeln!(dot, "{} [label=\"{}_{}_b\"]", b_id(tp, i), tp, i);
            }

            if tp == 0 {
                let _ = writeln!(dot, "0 [label=\"START\"]");
                for (i, &lp) in self.init_log.iter().enumerate() {
                    if lp > LOG_ZERO {
                        let _ = writeln!(
                            dot,
                            "0 -> {} [ label = \"S_{:.5}\" ];",
                            a_id(0, i),
                            lp.exp()
                        );
                    }
                }
            } else {
                for i in 0..n {
                    for j in 0..n {
                        let lp = self.trans_log[i][j];
                        if lp > LOG_ZERO {
                            let _ = writeln!(
                                dot,
                                "{} -> {} [ label = \"T_{:.5}\" ];",
                                b_id(tp - 1, i),
                                a_id(tp, j),
                                lp.exp()
                            );
                        }
                    }
                }
            }

            for i in 0..n {
                let lp = if self.is_discrete() {
                    self.symbol_emiss_log[i][self.observations[tp]]
                } else {
                    self.time_emiss_log[tp][i]
                };
                if lp > LOG_ZERO {
                    let _ = writeln!(
                        dot,
                        "{} -> {} [ label = \"E_{:.5}\" ];",
                        a_id(tp, i),
                        b_id(tp, i),
                        lp.exp()
                    );
                }
            }
        }

        dot.push_str("}\n");
        Ok(dot)
    }
}
