// SPDX-License-Identifier: CC0-1.0
//
//! # changeless-coin-selection
//!
//! Lazily enumerate subsets of a wallet's UTXO pool that pay a target output
//! exactly once the fee for spending the subset is deducted, so the resulting
//! transaction needs no change output.  Skipping the change output improves
//! privacy and saves the cost of creating and later spending it.
//!
//! The search runs three strategies over an immutable snapshot of the pool: a
//! single-coin pass (the cheapest possible transaction shape, always first),
//! an ascending-value branch and bound, and a descending-value largest-first
//! search.  Results are produced on demand through [`Iterator::next`], the
//! caller paces the search and may abandon it at any time through a
//! [`CancellationToken`], and each strategy stops quietly once it has
//! evaluated [`SearchParams::iteration_limit`] subsets.
//!
//! ```
//! use bitcoin::{Amount, FeeRate, ScriptBuf, TxOut, Weight};
//! use changeless_coin_selection::{
//!     select_changeless, CancellationToken, SearchParams, WeightedUtxo,
//! };
//!
//! struct Coin {
//!     value: Amount,
//!     weight: Weight,
//! }
//!
//! impl WeightedUtxo for Coin {
//!     fn value(&self) -> Amount {
//!         self.value
//!     }
//!     fn weight(&self) -> Weight {
//!         self.weight
//!     }
//! }
//!
//! let coins: Vec<Coin> = [30u64, 70, 100]
//!     .iter()
//!     .map(|v| Coin { value: Amount::from_sat(*v), weight: Weight::ZERO })
//!     .collect();
//! let target = TxOut { value: Amount::from_sat(100), script_pubkey: ScriptBuf::new() };
//!
//! let selections = select_changeless(
//!     &coins,
//!     &target,
//!     FeeRate::ZERO,
//!     2,
//!     SearchParams::default(),
//!     CancellationToken::new(),
//! )
//! .expect("valid invocation");
//!
//! for selection in selections {
//!     assert!(selection.deliverable >= target.value);
//! }
//! ```

mod branch_and_bound;
mod cost;
mod largest_first;
mod single_coin;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitcoin::amount::CheckedSum;
use bitcoin::{Amount, FeeRate, TxOut, Weight};
use thiserror::Error;
use tracing::debug;

use crate::branch_and_bound::BranchAndBound;
use crate::largest_first::LargestFirst;
use crate::single_coin::SingleCoin;

pub use crate::cost::{deliverable_amount, estimate_fee};

/// A spendable output the wallet can offer as a transaction input.
pub trait WeightedUtxo {
    /// Value locked in the output.
    fn value(&self) -> Amount;

    /// Weight this output adds to a transaction when spent as an input,
    /// including the satisfaction (script sig or witness) weight.
    fn weight(&self) -> Weight;

    /// Whether the output may be spent right now, e.g. it is confirmed.
    /// Outputs reporting `false` are left out of the search.
    fn is_spendable(&self) -> bool {
        true
    }
}

/// Wallet-policy knobs for one search.
///
/// The dust threshold and the skeleton weight vary by wallet policy and
/// output type, so they are inputs rather than constants.
#[derive(Clone, Copy, Debug)]
pub struct SearchParams {
    /// Largest leftover above the target that may be folded into the fee
    /// instead of becoming a change output.
    pub dust_threshold: Amount,
    /// Weight of the transaction skeleton: version, locktime and the
    /// input/output count prefixes.  The target output's own weight is
    /// added on top of this.
    pub skeleton_weight: Weight,
    /// Maximum number of search-tree nodes each strategy may evaluate
    /// before ending its part of the sequence.
    pub iteration_limit: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            dust_threshold: Amount::from_sat(546),
            skeleton_weight: Weight::from_wu(40),
            iteration_limit: 100_000,
        }
    }
}

/// Cooperative cancellation flag shared between the caller and a running
/// search.
///
/// The flag is sampled at every node evaluation; once observed, the
/// sequence ends without yielding further results.  Cancelling is a normal
/// way to abandon a search, not an error.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Invocation errors, reported before any search begins.
///
/// Everything that goes wrong during the search itself degrades to fewer or
/// zero results instead: infeasible candidates are pruned, budget exhaustion
/// and cancellation end the sequence quietly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("the candidate coin set is empty")]
    EmptyCoinPool,
    #[error("max input count must be at least 1, got {0}")]
    InvalidMaxInputCount(usize),
    #[error("the target amount must be greater than zero")]
    ZeroTarget,
}

/// A candidate subset accepted as changeless.
///
/// The deliverable amount is the input sum minus the fee and always lies
/// inside `[target, target + dust_threshold)`; any leftover above the target
/// is folded into the fee.  The engine keeps no reference to a yielded
/// selection.
#[derive(Clone, Debug)]
pub struct Selection<'a, Utxo> {
    /// The chosen coins, in the order the strategy selected them.
    pub coins: Vec<&'a Utxo>,
    /// Amount the destination actually receives: input sum minus fee.
    pub deliverable: Amount,
}

impl<Utxo> Selection<'_, Utxo> {
    /// Number of inputs the resulting transaction would have.
    pub fn input_count(&self) -> usize {
        self.coins.len()
    }
}

/// Per-strategy search lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SearchState {
    NotStarted,
    Searching,
    Exhausted,
    Cancelled,
    BudgetExceeded,
}

impl SearchState {
    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            SearchState::Exhausted | SearchState::Cancelled | SearchState::BudgetExceeded
        )
    }
}

/// A filtered, spend-eligible pool entry.
pub(crate) struct Candidate<'a, Utxo> {
    pub(crate) value: Amount,
    pub(crate) weight: Weight,
    pub(crate) utxo: &'a Utxo,
}

impl<Utxo> Clone for Candidate<'_, Utxo> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Utxo> Copy for Candidate<'_, Utxo> {}

/// Everything a strategy needs for one invocation.  Each strategy owns its
/// copy so it can order the candidates its own way.
pub(crate) struct SearchContext<'a, Utxo> {
    pub(crate) candidates: Vec<Candidate<'a, Utxo>>,
    pub(crate) target: Amount,
    pub(crate) dust_threshold: Amount,
    /// Skeleton weight plus the target output's weight.
    pub(crate) fixed_weight: Weight,
    pub(crate) fee_rate: FeeRate,
    pub(crate) max_inputs: usize,
    pub(crate) iteration_limit: u32,
    pub(crate) cancel: CancellationToken,
}

impl<Utxo> Clone for SearchContext<'_, Utxo> {
    fn clone(&self) -> Self {
        SearchContext {
            candidates: self.candidates.clone(),
            target: self.target,
            dust_threshold: self.dust_threshold,
            fixed_weight: self.fixed_weight,
            fee_rate: self.fee_rate,
            max_inputs: self.max_inputs,
            iteration_limit: self.iteration_limit,
            cancel: self.cancel.clone(),
        }
    }
}

/// Where a candidate's deliverable amount lands relative to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Window {
    /// Below the target; the subset can still grow into the window.
    Short,
    /// Pays the target exactly, or with a leftover small enough to fold
    /// into the fee.
    Changeless,
    /// Leftover at or above the dust threshold; a change output would be
    /// required.
    Overshoot,
}

pub(crate) fn classify(deliverable: Amount, target: Amount, dust_threshold: Amount) -> Window {
    match deliverable.checked_sub(target) {
        None => Window::Short,
        Some(leftover) if leftover == Amount::ZERO || leftover < dust_threshold => {
            Window::Changeless
        }
        Some(_) => Window::Overshoot,
    }
}

// The sum of candidate values after each index, e.g. lookahead[5] is the
// total value of candidates[6..].  Used to prune subtrees that cannot reach
// the target no matter what they add.
pub(crate) fn build_lookahead<Utxo>(
    candidates: &[Candidate<'_, Utxo>],
    total_value: Amount,
) -> Vec<Amount> {
    candidates
        .iter()
        .scan(total_value, |remaining, candidate| {
            *remaining -= candidate.value;
            Some(*remaining)
        })
        .collect()
}

// Sums values and weights up front so the traversals can use plain
// arithmetic afterwards.  `None` signals an overflowing pool, which is
// treated as having no viable candidates.
pub(crate) fn pool_totals<Utxo>(candidates: &[Candidate<'_, Utxo>]) -> Option<(Amount, Weight)> {
    let total_value = candidates.iter().map(|c| c.value).checked_sum()?;
    let total_weight = candidates
        .iter()
        .try_fold(Weight::ZERO, |acc, c| acc.checked_add(c.weight))?;

    Some((total_value, total_weight))
}

fn prepare_candidates<Utxo: WeightedUtxo>(
    coins: &[Utxo],
    fee_rate: FeeRate,
) -> Vec<Candidate<'_, Utxo>> {
    coins
        .iter()
        .filter(|coin| coin.is_spendable())
        .map(|coin| Candidate { value: coin.value(), weight: coin.weight(), utxo: coin })
        .filter(|candidate| candidate.value > Amount::ZERO)
        // A coin whose value does not exceed the fee its own weight adds can
        // only lower the deliverable amount.  Dropping it here also keeps the
        // deliverable amount strictly increasing along an inclusion path,
        // which the overshoot pruning depends on.
        .filter(|candidate| {
            match cost::estimate_fee(fee_rate, candidate.weight, Weight::ZERO) {
                Some(own_fee) => candidate.value > own_fee,
                None => false,
            }
        })
        .collect()
}

/// Searches `coins` for subsets that pay `target` with no change output.
///
/// Runs the single-coin pass first, then ascending branch and bound, then
/// the descending largest-first search, merged into one lazy sequence.  A
/// subset is yielded when its deliverable amount (input sum minus fee)
/// equals the target exactly or exceeds it by less than the dust threshold.
/// No subset uses more than `max_input_count` coins.
///
/// The returned sequence is finite and fresh per invocation.  An empty
/// sequence means no changeless subset was found within budget; only an
/// invalid invocation is an error.
pub fn select_changeless<'a, Utxo: WeightedUtxo>(
    coins: &'a [Utxo],
    target: &TxOut,
    fee_rate: FeeRate,
    max_input_count: usize,
    params: SearchParams,
    cancel: CancellationToken,
) -> Result<ChangelessSelections<'a, Utxo>, SelectionError> {
    if coins.is_empty() {
        return Err(SelectionError::EmptyCoinPool);
    }
    if max_input_count < 1 {
        return Err(SelectionError::InvalidMaxInputCount(max_input_count));
    }
    if target.value == Amount::ZERO {
        return Err(SelectionError::ZeroTarget);
    }

    let candidates = prepare_candidates(coins, fee_rate);
    let fixed_weight = params
        .skeleton_weight
        .checked_add(target.weight())
        .unwrap_or(Weight::MAX);
    let max_inputs = max_input_count.min(coins.len());

    debug!(
        pool = coins.len(),
        candidates = candidates.len(),
        target = %target.value,
        max_inputs,
        "starting changeless selection"
    );

    let ctx = SearchContext {
        candidates,
        target: target.value,
        dust_threshold: params.dust_threshold,
        fixed_weight,
        fee_rate,
        max_inputs,
        iteration_limit: params.iteration_limit,
        cancel,
    };

    Ok(ChangelessSelections {
        single_coin: SingleCoin::new(ctx.clone()),
        branch_and_bound: BranchAndBound::new(ctx.clone()),
        largest_first: LargestFirst::new(ctx),
    })
}

/// Merged lazy sequence over all strategies.
///
/// The single-coin pass is consumed first, then ascending branch and bound,
/// then the descending largest-first search.  Two strategies may rediscover
/// the same subset; collapsing results that deliver the same amount is left
/// to the caller, since two distinct subsets are distinct transactions even
/// when their amounts coincide.
pub struct ChangelessSelections<'a, Utxo> {
    single_coin: SingleCoin<'a, Utxo>,
    branch_and_bound: BranchAndBound<'a, Utxo>,
    largest_first: LargestFirst<'a, Utxo>,
}

impl<'a, Utxo> Iterator for ChangelessSelections<'a, Utxo> {
    type Item = Selection<'a, Utxo>;

    fn next(&mut self) -> Option<Self::Item> {
        self.single_coin
            .next()
            .or_else(|| self.branch_and_bound.next())
            .or_else(|| self.largest_first.next())
    }
}
