// SPDX-License-Identifier: CC0-1.0
//
//! Transaction cost model.
//!
//! Pure helpers that price a candidate input set: the fee the set would pay
//! at a given fee rate, and the amount left over for the destination after
//! that fee.  No state is kept, so the search strategies can call these
//! freely from any point of the tree traversal.

use bitcoin::{Amount, FeeRate, Weight};

/// Computes the fee for a transaction whose inputs weigh `input_weight`.
///
/// `fixed_weight` covers everything the subset does not change: the
/// transaction skeleton (version, locktime, count prefixes) plus the single
/// target output.  The fee is the fee rate multiplied by the total weight,
/// rounded up to the next satoshi, which makes the result monotonically
/// non-decreasing in `input_weight` for a fixed rate.  The tree searches
/// rely on that monotonicity for pruning.
///
/// Returns `None` on overflow.
pub fn estimate_fee(
    fee_rate: FeeRate,
    input_weight: Weight,
    fixed_weight: Weight,
) -> Option<Amount> {
    let total_weight = input_weight.checked_add(fixed_weight)?;

    // sat/kwu times wu, rounding up.
    let fee = fee_rate
        .to_sat_per_kwu()
        .checked_mul(total_weight.to_wu())?
        .checked_add(999)?
        / 1000;

    Some(Amount::from_sat(fee))
}

/// Computes the amount the destination receives when inputs summing to
/// `input_sum` and weighing `input_weight` fund the transaction.
///
/// Returns `None` when the fee exceeds the input sum.  Such a candidate can
/// never pay the target; the search prunes it instead of failing.
pub fn deliverable_amount(
    input_sum: Amount,
    input_weight: Weight,
    fee_rate: FeeRate,
    fixed_weight: Weight,
) -> Option<Amount> {
    let fee = estimate_fee(fee_rate, input_weight, fixed_weight)?;
    input_sum.checked_sub(fee)
}
