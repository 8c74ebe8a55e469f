use crate::baum_welch;
use crate::error::HmmError;
use crate::trellis;
use crate::utils::{to_log, LOG_ZERO};
use crate::viterbi;
use crate::wdag::Wdag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const PROB_EPSILON: f64 = 1e-6;

/// Symbol emission matrices wider than this are summarized by `Display`
/// instead of printed in full.
const MAX_PRINTED_SYMBOLS: usize = 200;

/// A Hidden Markov Model parameter store.
///
/// All probability tables are held as natural logarithms; real-space inputs
/// are validated and converted on the way in. `n_symbols == 0` selects the
/// continuous variant, where the caller supplies per-timepoint emission
/// log-likelihoods instead of a symbol emission matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Hmm {
    pub(crate) n_states: usize,
    pub(crate) n_symbols: usize,
    pub(crate) init_log: Vec<f64>,
    pub(crate) trans_log: Vec<Vec<f64>>,
    pub(crate) symbol_emiss_log: Vec<Vec<f64>>,
    pub(crate) observations: Vec<usize>,
    pub(crate) time_emiss_log: Vec<Vec<f64>>,
    /// Real-valued state occupancy frequencies, populated by training.
    pub(crate) state_freqs: Vec<f64>,
    pub(crate) has_init: bool,
    pub(crate) has_trans: bool,
    pub(crate) has_symbol_emiss: bool,
    pub(crate) has_observations: bool,
    pub(crate) has_time_emiss: bool,
    pub(crate) ran_viterbi: bool,
    pub(crate) ran_baum_welch: bool,
}

impl Hmm {
    /// Create an empty model. `n_symbols == 0` means continuous.
    pub fn new(n_states: usize, n_symbols: usize) -> Result<Self, HmmError> {
        if n_states == 0 {
            return Err(HmmError::InvalidStateCount(0));
        }
        Ok(Hmm {
            n_states,
            n_symbols,
            init_log: Vec::new(),
            trans_log: Vec::new(),
            symbol_emiss_log: Vec::new(),
            observations: Vec::new(),
            time_emiss_log: Vec::new(),
            state_freqs: Vec::new(),
            has_init: false,
            has_trans: false,
            has_symbol_emiss: false,
            has_observations: false,
            has_time_emiss: false,
            ran_viterbi: false,
            ran_baum_welch: false,
        })
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn n_symbols(&self) -> usize {
        self.n_symbols
    }

    pub fn is_discrete(&self) -> bool {
        self.n_symbols > 0
    }

    /// Number of timepoints: the observation count (discrete) or the number
    /// of rows in the time emission table (continuous).
    pub fn n_timepoints(&self) -> usize {
        if self.is_discrete() {
            self.observations.len()
        } else {
            self.time_emiss_log.len()
        }
    }

    /// True once every table needed for training has been loaded.
    pub fn has_all_data(&self) -> bool {
        if !self.has_init || !self.has_trans {
            return false;
        }
        if self.is_discrete() {
            self.has_symbol_emiss && self.has_observations
        } else {
            self.has_time_emiss
        }
    }

    // -----------------------------------------------------------------------
    // Setters
    // -----------------------------------------------------------------------

    /// Load the initial state probabilities (real space).
    pub fn set_init_probs(&mut self, probs: &[f64]) -> Result<(), HmmError> {
        validate_prob_vector(probs, self.n_states)?;
        self.init_log = probs.iter().map(|&p| to_log(p)).collect();
        self.has_init = true;
        Ok(())
    }

    /// Load the state-to-state transition matrix (real space, rows sum to 1).
    pub fn set_trans_probs(&mut self, probs: &[Vec<f64>]) -> Result<(), HmmError> {
        if probs.len() != self.n_states {
            return Err(HmmError::DimensionMismatch {
                expected: self.n_states,
                actual: probs.len(),
            });
        }
        for (i, row) in probs.iter().enumerate() {
            if row.len() != self.n_states {
                return Err(HmmError::DimensionMismatch {
                    expected: self.n_states,
                    actual: row.len(),
                });
            }
            for (j, &p) in row.iter().enumerate() {
                if !(0.0..=1.0).contains(&p) {
                    return Err(HmmError::InvalidProbability { index: j, value: p });
                }
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > PROB_EPSILON {
                return Err(HmmError::InvalidTransitionRow { row: i, sum });
            }
        }
        self.trans_log = probs
            .iter()
            .map(|row| row.iter().map(|&p| to_log(p)).collect())
            .collect();
        self.has_trans = true;
        Ok(())
    }

    /// Discrete only: load the per-state symbol emission matrix (real space).
    pub fn set_symbol_emiss_probs(&mut self, probs: &[Vec<f64>]) -> Result<(), HmmError> {
        if !self.is_discrete() {
            return Err(HmmError::VariantMismatch {
                expected: "discrete",
            });
        }
        if probs.len() != self.n_states {
            return Err(HmmError::DimensionMismatch {
                expected: self.n_states,
                actual: probs.len(),
            });
        }
        for row in probs {
            validate_prob_vector(row, self.n_symbols)?;
        }
        self.symbol_emiss_log = probs
            .iter()
            .map(|row| row.iter().map(|&p| to_log(p)).collect())
            .collect();
        self.has_symbol_emiss = true;
        Ok(())
    }

    /// Discrete only: load the observed symbol sequence.
    pub fn set_observations(&mut self, observations: &[usize]) -> Result<(), HmmError> {
        if !self.is_discrete() {
            return Err(HmmError::VariantMismatch {
                expected: "discrete",
            });
        }
        if observations.is_empty() {
            return Err(HmmError::EmptyObservations);
        }
        for (index, &symbol) in observations.iter().enumerate() {
            if symbol >= self.n_symbols {
                return Err(HmmError::SymbolOutOfRange {
                    index,
                    symbol,
                    n_symbols: self.n_symbols,
                });
            }
        }
        self.observations = observations.to_vec();
        self.has_observations = true;
        Ok(())
    }

    /// Continuous only: load per-timepoint emission log-likelihoods.
    ///
    /// `log_likes[t][j]` is the log-likelihood of the data at timepoint `t`
    /// under state `j`. Entries must be finite and above the zero sentinel:
    /// every state must be able to generate every observation, otherwise the
    /// trellis can end up with no solution. Each row is normalised by
    /// subtracting its maximum, which shifts path weights by a per-row
    /// constant and leaves best paths and posteriors unchanged.
    pub fn set_time_emiss_log(&mut self, log_likes: &[Vec<f64>]) -> Result<(), HmmError> {
        if self.is_discrete() {
            return Err(HmmError::VariantMismatch {
                expected: "continuous",
            });
        }
        if log_likes.is_empty() {
            return Err(HmmError::EmptyObservations);
        }
        for (t, row) in log_likes.iter().enumerate() {
            if row.len() != self.n_states {
                return Err(HmmError::DimensionMismatch {
                    expected: self.n_states,
                    actual: row.len(),
                });
            }
            for (state, &ll) in row.iter().enumerate() {
                if !ll.is_finite() || ll <= LOG_ZERO {
                    return Err(HmmError::NonFiniteEmission {
                        timepoint: t,
                        state,
                    });
                }
            }
        }
        self.time_emiss_log = log_likes
            .iter()
            .map(|row| {
                let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                row.iter().map(|&ll| ll - max).collect()
            })
            .collect();
        self.has_time_emiss = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Log-space initial state probabilities.
    pub fn init_log(&self) -> &[f64] {
        &self.init_log
    }

    /// Log-space transition matrix.
    pub fn trans_log(&self) -> &[Vec<f64>] {
        &self.trans_log
    }

    /// Log-space symbol emission matrix (discrete models).
    pub fn symbol_emiss_log(&self) -> &[Vec<f64>] {
        &self.symbol_emiss_log
    }

    /// The loaded observation sequence (discrete models).
    pub fn observations(&self) -> &[usize] {
        &self.observations
    }

    /// Real-valued state occupancy frequencies from the last training call.
    pub fn state_freqs(&self) -> &[f64] {
        &self.state_freqs
    }

    /// Whether Viterbi training has run on this model. Observability only.
    pub fn ran_viterbi(&self) -> bool {
        self.ran_viterbi
    }

    /// Whether Baum-Welch training has run on this model. Observability only.
    pub fn ran_baum_welch(&self) -> bool {
        self.ran_baum_welch
    }

    // -----------------------------------------------------------------------
    // Trellis construction and training
    // -----------------------------------------------------------------------

    /// Unroll this model over its timepoints into a trellis WDAG.
    ///
    /// The graph has `2 * n_states * n_timepoints + 2` nodes and its edge
    /// weights are the current log-space parameters.
    pub fn to_wdag(&self) -> Result<Wdag, HmmError> {
        if !self.has_all_data() {
            return Err(HmmError::MissingData(
                "model parameters or observations not fully loaded",
            ));
        }
        Ok(trellis::build(self))
    }

    /// One round of Viterbi training: decode the best path and re-estimate
    /// transition and emission probabilities from its hard counts.
    ///
    /// Returns whether any parameter changed, plus the decoded hidden state
    /// sequence (one state per timepoint). Initial state probabilities are
    /// left untouched. For iterative training, call repeatedly until the
    /// change flag comes back false.
    pub fn viterbi_training(&mut self) -> Result<(bool, Vec<usize>), HmmError> {
        let mut wdag = self.to_wdag()?;
        let path = wdag.find_best_path()?;

        let update = viterbi::reestimate(self, &path.labels);
        self.ran_viterbi = true;
        Ok((update.changed, update.predicted_states))
    }

    /// One round of Baum-Welch training: compute forward and backward masses
    /// over the trellis and re-estimate all parameters from the posterior
    /// soft counts.
    ///
    /// Returns whether any parameter changed, plus the total log-likelihood
    /// of the observations under the *pre-update* parameters, in bits.
    /// For iterative training, call repeatedly until the change flag comes
    /// back false.
    pub fn baum_welch_training(&mut self) -> Result<(bool, f64), HmmError> {
        let mut wdag = self.to_wdag()?;
        let alpha = wdag.find_posterior_probs()?;

        let changed = baum_welch::reestimate(self, &wdag)?;
        self.ran_baum_welch = true;
        Ok((changed, alpha / std::f64::consts::LN_2))
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load a model from a JSON file.
    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<Self, HmmError> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HmmError::ModelFileNotFound(path_ref.display().to_string())
            } else {
                HmmError::IoError(e)
            }
        })?;

        let model: Self = serde_json::from_str(&content)?;
        model.validate()?;
        Ok(model)
    }

    /// Save this model to a JSON file.
    pub fn save_to_json<P: AsRef<Path>>(&self, path: P) -> Result<(), HmmError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Structural checks for a deserialized model.
    fn validate(&self) -> Result<(), HmmError> {
        if self.n_states == 0 {
            return Err(HmmError::InvalidStateCount(0));
        }
        if self.has_init && self.init_log.len() != self.n_states {
            return Err(HmmError::DimensionMismatch {
                expected: self.n_states,
                actual: self.init_log.len(),
            });
        }
        if self.has_trans {
            if self.trans_log.len() != self.n_states {
                return Err(HmmError::DimensionMismatch {
                    expected: self.n_states,
                    actual: self.trans_log.len(),
                });
            }
            for row in &self.trans_log {
                if row.len() != self.n_states {
                    return Err(HmmError::DimensionMismatch {
                        expected: self.n_states,
                        actual: row.len(),
                    });
                }
            }
        }
        if self.has_symbol_emiss {
            if !self.is_discrete() {
                return Err(HmmError::VariantMismatch {
                    expected: "discrete",
                });
            }
            if self.symbol_emiss_log.len() != self.n_states {
                return Err(HmmError::DimensionMismatch {
                    expected: self.n_states,
                    actual: self.symbol_emiss_log.len(),
                });
            }
        }
        if self.has_observations {
            for (index, &symbol) in self.observations.iter().enumerate() {
                if symbol >= self.n_symbols {
                    return Err(HmmError::SymbolOutOfRange {
                        index,
                        symbol,
                        n_symbols: self.n_symbols,
                    });
                }
            }
        }
        if self.has_time_emiss {
            for row in &self.time_emiss_log {
                if row.len() != self.n_states {
                    return Err(HmmError::DimensionMismatch {
                        expected: self.n_states,
                        actual: row.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn validate_prob_vector(probs: &[f64], expected_len: usize) -> Result<(), HmmError> {
    if probs.len() != expected_len {
        return Err(HmmError::DimensionMismatch {
            expected: expected_len,
            actual: probs.len(),
        });
    }
    for (index, &p) in probs.iter().enumerate() {
        if !(0.0..=1.0).contains(&p) {
            return Err(HmmError::InvalidProbability { index, value: p });
        }
    }
    let sum: f64 = probs.iter().sum();
    if (sum - 1.0).abs() > PROB_EPSILON {
        return Err(HmmError::InvalidProbabilitySum { sum });
    }
    Ok(())
}

impl fmt::Display for Hmm {
    /// Parameter summary in real space; unloaded tables are marked as such.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hidden Markov model")?;
        writeln!(f, "{} states", self.n_states)?;
        if self.is_discrete() {
            writeln!(
                f,
                "Discrete HMM with {} observable symbols over {} timepoints",
                self.n_symbols,
                self.n_timepoints()
            )?;
        } else {
            writeln!(
                f,
                "Continuous HMM with {} timepoints",
                self.n_timepoints()
            )?;
        }
        writeln!(f)?;

        write!(f, "Initial state probabilities:")?;
        if self.has_init {
            for &lp in &self.init_log {
                write!(f, "\t{:.5}", lp.exp())?;
            }
            writeln!(f)?;
        } else {
            writeln!(f, "\tNOT LOADED")?;
        }

        writeln!(f, "State-to-state transition probabilities:")?;
        if self.has_trans {
            for j in 0..self.n_states {
                write!(f, "\tS{}", j + 1)?;
            }
            writeln!(f)?;
            for (i, row) in self.trans_log.iter().enumerate() {
                write!(f, "S{}", i + 1)?;
                for &lp in row {
                    write!(f, "\t{:.5}", lp.exp())?;
                }
                writeln!(f)?;
            }
        } else {
            writeln!(f, "\tNOT LOADED")?;
        }

        if self.is_discrete() {
            writeln!(f, "Symbol emission probabilities:")?;
            if self.has_symbol_emiss && self.n_symbols <= MAX_PRINTED_SYMBOLS {
                for j in 0..self.n_symbols {
                    write!(f, "\tSYM{j}")?;
                }
                writeln!(f)?;
                for (i, row) in self.symbol_emiss_log.iter().enumerate() {
                    write!(f, "S{}", i + 1)?;
                    for &lp in row {
                        write!(f, "\t{:.5}", lp.exp())?;
                    }
                    writeln!(f)?;
                }
            } else if self.has_symbol_emiss {
                writeln!(
                    f,
                    "\t<matrix of size {} states x {} symbols>",
                    self.n_states, self.n_symbols
                )?;
            } else {
                writeln!(f, "\tNOT LOADED")?;
            }

            write!(f, "Sequence of observed symbols:")?;
            if self.has_observations {
                writeln!(f, "\t<sequence of length {}>", self.n_timepoints())?;
            } else {
                writeln!(f, "\tNOT LOADED")?;
            }
        } else {
            writeln!(f, "Time emission log-likelihoods:")?;
            if self.has_time_emiss {
                writeln!(
                    f,
                    "\t<matrix of size {} timepoints x {} states>",
                    self.n_timepoints(),
                    self.n_states
                )?;
            } else {
                writeln!(f, "\tNOT LOADED")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::LOG_ZERO;

    fn discrete_model() -> Hmm {
        Hmm::new(2, 2).unwrap()
    }

    // -----------------------------------------------------------------------
    // Construction and validation
    // -----------------------------------------------------------------------

    #[test]
    fn zero_states_is_rejected() {
        assert!(matches!(
            Hmm::new(0, 2),
            Err(HmmError::InvalidStateCount(0))
        ));
    }

    #[test]
    fn init_probs_are_validated_and_logged() {
        let mut hmm = discrete_model();
        assert!(matches!(
            hmm.set_init_probs(&[0.5]),
            Err(HmmError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            hmm.set_init_probs(&[1.2, -0.2]),
            Err(HmmError::InvalidProbability { .. })
        ));
        assert!(matches!(
            hmm.set_init_probs(&[0.3, 0.3]),
            Err(HmmError::InvalidProbabilitySum { .. })
        ));

        hmm.set_init_probs(&[1.0, 0.0]).unwrap();
        assert_eq!(hmm.init_log(), &[0.0, LOG_ZERO]);
    }

    #[test]
    fn trans_rows_must_be_stochastic() {
        let mut hmm = discrete_model();
        let bad = vec![vec![0.9, 0.1], vec![0.6, 0.6]];
        assert!(matches!(
            hmm.set_trans_probs(&bad),
            Err(HmmError::InvalidTransitionRow { row: 1, .. })
        ));
        let good = vec![vec![0.9, 0.1], vec![0.4, 0.6]];
        hmm.set_trans_probs(&good).unwrap();
        assert!(hmm.has_trans);
    }

    #[test]
    fn discrete_setters_reject_continuous_models_and_vice_versa() {
        let mut continuous = Hmm::new(2, 0).unwrap();
        assert!(matches!(
            continuous.set_symbol_emiss_probs(&[vec![], vec![]]),
            Err(HmmError::VariantMismatch { .. })
        ));
        assert!(matches!(
            continuous.set_observations(&[0]),
            Err(HmmError::VariantMismatch { .. })
        ));

        let mut discrete = discrete_model();
        assert!(matches!(
            discrete.set_time_emiss_log(&[vec![-1.0, -2.0]]),
            Err(HmmError::VariantMismatch { .. })
        ));
    }

    #[test]
    fn observations_are_range_checked() {
        let mut hmm = discrete_model();
        assert!(matches!(
            hmm.set_observations(&[]),
            Err(HmmError::EmptyObservations)
        ));
        assert!(matches!(
            hmm.set_observations(&[0, 1, 2]),
            Err(HmmError::SymbolOutOfRange { index: 2, .. })
        ));
        hmm.set_observations(&[0, 1, 1]).unwrap();
        assert_eq!(hmm.n_timepoints(), 3);
    }

    #[test]
    fn continuous_emissions_reject_zero_mass_entries() {
        let mut hmm = Hmm::new(2, 0).unwrap();
        assert!(matches!(
            hmm.set_time_emiss_log(&[vec![-1.0, LOG_ZERO]]),
            Err(HmmError::NonFiniteEmission {
                timepoint: 0,
                state: 1
            })
        ));
        assert!(matches!(
            hmm.set_time_emiss_log(&[vec![-1.0, f64::NEG_INFINITY]]),
            Err(HmmError::NonFiniteEmission { .. })
        ));
    }

    #[test]
    fn continuous_rows_are_max_normalised() {
        let mut hmm = Hmm::new(2, 0).unwrap();
        hmm.set_time_emiss_log(&[vec![-3.0, -5.0], vec![-10.0, -2.0]])
            .unwrap();
        assert_eq!(hmm.time_emiss_log[0], vec![0.0, -2.0]);
        assert_eq!(hmm.time_emiss_log[1], vec![-8.0, 0.0]);
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    #[test]
    fn has_all_data_tracks_every_table() {
        let mut hmm = discrete_model();
        assert!(!hmm.has_all_data());
        hmm.set_init_probs(&[0.5, 0.5]).unwrap();
        hmm.set_trans_probs(&[vec![0.9, 0.1], vec![0.1, 0.9]])
            .unwrap();
        assert!(!hmm.has_all_data());
        hmm.set_symbol_emiss_probs(&[vec![0.5, 0.5], vec![0.1, 0.9]])
            .unwrap();
        assert!(!hmm.has_all_data());
        hmm.set_observations(&[0, 1]).unwrap();
        assert!(hmm.has_all_data());

        let mut cont = Hmm::new(2, 0).unwrap();
        cont.set_init_probs(&[0.5, 0.5]).unwrap();
        cont.set_trans_probs(&[vec![0.9, 0.1], vec![0.1, 0.9]])
            .unwrap();
        assert!(!cont.has_all_data());
        cont.set_time_emiss_log(&[vec![-1.0, -2.0]]).unwrap();
        assert!(cont.has_all_data());
    }

    #[test]
    fn training_requires_all_data() {
        let mut hmm = discrete_model();
        assert!(matches!(
            hmm.viterbi_training(),
            Err(HmmError::MissingData(_))
        ));
        assert!(matches!(
            hmm.baum_welch_training(),
            Err(HmmError::MissingData(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Persistence and display
    // -----------------------------------------------------------------------

    #[test]
    fn json_round_trip_preserves_log_tables() {
        let mut hmm = discrete_model();
        hmm.set_init_probs(&[1.0, 0.0]).unwrap();
        hmm.set_trans_probs(&[vec![0.9, 0.1], vec![0.1, 0.9]])
            .unwrap();
        hmm.set_symbol_emiss_probs(&[vec![0.5, 0.5], vec![0.1, 0.9]])
            .unwrap();
        hmm.set_observations(&[0, 1, 1]).unwrap();

        let json = serde_json::to_string(&hmm).unwrap();
        let back: Hmm = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();

        assert_eq!(back.init_log(), hmm.init_log());
        assert_eq!(back.trans_log(), hmm.trans_log());
        assert_eq!(back.observations(), hmm.observations());
        assert!(back.has_all_data());
    }

    #[test]
    fn display_marks_unloaded_tables() {
        let mut hmm = discrete_model();
        let text = hmm.to_string();
        assert!(text.contains("Hidden Markov model"));
        assert!(text.contains("NOT LOADED"));

        hmm.set_init_probs(&[0.5, 0.5]).unwrap();
        let text = hmm.to_string();
        assert!(text.contains("0.50000"));
    }
}
