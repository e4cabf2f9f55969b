// SPDX-License-Identifier: CC0-1.0
//
//! Ascending-value branch and bound.
//!
//! Depth-first search over the inclusion/exclusion tree of the candidate
//! pool, sorted by value ascending so combinations of small coins are
//! explored first.  Unlike the classic Core search, which keeps the single
//! best match, this traversal yields every subset whose deliverable amount
//! lands inside the tolerance window, one per `next` call.
//
// The left branch of each node includes the next candidate, the right
// branch excludes it.  The traversal keeps an index stack (`selection`)
// and a cursor (`next_index`); moving the tail from its inclusion branch
// to its exclusion branch is a pop plus a cursor bump.  Two bounds prune
// the tree:
//
//  * reach: the subset value plus everything after the tail cannot cover
//    target + fee.  Ascending order means later siblings leave even less
//    behind them, so the whole depth level is abandoned.
//
//  * overshoot: the deliverable amount already exceeds the window.  Every
//    candidate is filtered to a strictly positive effective value, so the
//    deliverable amount only grows along an inclusion path and no superset
//    can land back in the window; ascending order also makes every later
//    sibling overshoot.

use bitcoin::{Amount, Weight};
use tracing::trace;

use crate::{
    build_lookahead, classify, cost, pool_totals, SearchContext, SearchState, Selection, Window,
};

pub(crate) struct BranchAndBound<'a, Utxo> {
    ctx: SearchContext<'a, Utxo>,
    lookahead: Vec<Amount>,
    selection: Vec<usize>,
    next_index: usize,
    value_sum: Amount,
    weight_sum: Weight,
    iterations: u32,
    state: SearchState,
}

impl<'a, Utxo> BranchAndBound<'a, Utxo> {
    pub(crate) fn new(mut ctx: SearchContext<'a, Utxo>) -> Self {
        ctx.candidates.sort_by_key(|candidate| candidate.value);

        let lookahead = match pool_totals(&ctx.candidates) {
            Some((total_value, _)) if total_value >= ctx.target => {
                build_lookahead(&ctx.candidates, total_value)
            }
            // An overflowing or insufficient pool cannot produce a match.
            _ => {
                ctx.candidates.clear();
                Vec::new()
            }
        };

        BranchAndBound {
            ctx,
            lookahead,
            selection: Vec::new(),
            next_index: 0,
            value_sum: Amount::ZERO,
            weight_sum: Weight::ZERO,
            iterations: 0,
            state: SearchState::NotStarted,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SearchState {
        self.state
    }

    fn deselect_tail(&mut self) -> Option<usize> {
        let tail = self.selection.pop()?;
        let candidate = self.ctx.candidates[tail];
        self.value_sum -= candidate.value;
        self.weight_sum -= candidate.weight;
        Some(tail)
    }

    // Moves the tail from its inclusion branch to its exclusion branch.
    // False once the root's exclusion branch is reached, i.e. the tree is
    // exhausted.
    fn backtrack(&mut self) -> bool {
        match self.deselect_tail() {
            Some(tail) => {
                self.next_index = tail + 1;
                true
            }
            None => false,
        }
    }

    fn selected_coins(&self) -> Vec<&'a Utxo> {
        self.selection.iter().map(|&i| self.ctx.candidates[i].utxo).collect()
    }
}

impl<'a, Utxo> Iterator for BranchAndBound<'a, Utxo> {
    type Item = Selection<'a, Utxo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = SearchState::Searching;

        loop {
            if self.ctx.cancel.is_cancelled() {
                self.state = SearchState::Cancelled;
                return None;
            }

            // The tail's subtree is spent, or deepening is not allowed.
            if self.next_index == self.ctx.candidates.len()
                || self.selection.len() == self.ctx.max_inputs
            {
                if !self.backtrack() {
                    self.state = SearchState::Exhausted;
                    return None;
                }
                continue;
            }

            if self.iterations >= self.ctx.iteration_limit {
                self.state = SearchState::BudgetExceeded;
                trace!(iterations = self.iterations, "branch and bound budget exhausted");
                return None;
            }

            // Take the inclusion branch of the next candidate.
            let tail = self.next_index;
            let candidate = self.ctx.candidates[tail];
            self.selection.push(tail);
            self.value_sum += candidate.value;
            self.weight_sum += candidate.weight;
            self.next_index = tail + 1;
            self.iterations += 1;

            let fee =
                cost::estimate_fee(self.ctx.fee_rate, self.weight_sum, self.ctx.fixed_weight);
            let reachable = match fee.and_then(|f| self.ctx.target.checked_add(f)) {
                Some(required) => self.value_sum + self.lookahead[tail] >= required,
                None => false,
            };
            if !reachable {
                // Not even the entire remaining tail covers target + fee;
                // later siblings leave less behind, so drop the depth level.
                self.deselect_tail();
                if !self.backtrack() {
                    self.state = SearchState::Exhausted;
                    return None;
                }
                continue;
            }

            let deliverable = match fee.and_then(|f| self.value_sum.checked_sub(f)) {
                Some(deliverable) => deliverable,
                // The fee still exceeds the inputs; deeper subsets can
                // recover, the reach bound said so.
                None => continue,
            };

            match classify(deliverable, self.ctx.target, self.ctx.dust_threshold) {
                Window::Changeless => {
                    // The tree position is left as is: when the dust
                    // threshold allows it a superset may land in the window
                    // too, and the loop head backtracks otherwise.
                    return Some(Selection { coins: self.selected_coins(), deliverable });
                }
                Window::Overshoot => {
                    // Every later sibling overshoots as well.
                    self.deselect_tail();
                    if !self.backtrack() {
                        self.state = SearchState::Exhausted;
                        return None;
                    }
                }
                Window::Short => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;

    use super::*;
    use crate::tests::{make_context, memberships, pool};

    #[test]
    fn yields_small_combination_then_single() {
        let coins = pool(&[30, 45, 70, 100]);
        let search = BranchAndBound::new(make_context(&coins, 100, 0, 2, 100_000));

        // Depth first over ascending values reaches {30, 70} before {100}.
        assert_eq!(memberships(search), vec![vec![30, 70], vec![100]]);
    }

    #[test]
    fn respects_the_input_ceiling() {
        let coins = pool(&[10, 20, 30]);

        let capped = BranchAndBound::new(make_context(&coins, 60, 0, 2, 100_000));
        assert_eq!(capped.count(), 0);

        let full = BranchAndBound::new(make_context(&coins, 60, 0, 3, 100_000));
        assert_eq!(memberships(full), vec![vec![10, 20, 30]]);
    }

    #[test]
    fn supersets_inside_a_wide_window_are_yielded_too() {
        let coins = pool(&[100, 3]);
        let search = BranchAndBound::new(make_context(&coins, 100, 5, 2, 100_000));

        // {3, 100} delivers 103 with a leftover of 3, inside the window.
        assert_eq!(memberships(search), vec![vec![3, 100], vec![100]]);
    }

    #[test]
    fn no_subset_reaches_the_target() {
        let coins = pool(&[10, 20, 30]);
        let mut search = BranchAndBound::new(make_context(&coins, 1_000, 0, 3, 100_000));

        assert!(search.next().is_none());
        assert_eq!(search.state(), SearchState::Exhausted);
    }

    #[test]
    fn budget_exhaustion_ends_the_sequence_cleanly() {
        // Reaching {30, 70} takes a third node evaluation.
        let coins = pool(&[30, 45, 70]);
        let mut search = BranchAndBound::new(make_context(&coins, 100, 0, 2, 2));

        assert!(search.next().is_none());
        assert_eq!(search.state(), SearchState::BudgetExceeded);
    }

    #[test]
    fn cancellation_stops_production_after_the_current_result() {
        let coins = pool(&[30, 45, 70, 100]);
        let ctx = make_context(&coins, 100, 0, 2, 100_000);
        let cancel = ctx.cancel.clone();
        let mut search = BranchAndBound::new(ctx);

        assert_eq!(search.next().unwrap().deliverable, Amount::from_sat(100));

        cancel.cancel();
        assert!(search.next().is_none());
        assert_eq!(search.state(), SearchState::Cancelled);
    }

    #[test]
    fn lookahead_holds_the_value_after_each_index() {
        let coins = pool(&[1, 2, 3]);
        let ctx = make_context(&coins, 1, 0, 3, 100_000);

        let (total_value, _) = crate::pool_totals(&ctx.candidates).unwrap();
        assert_eq!(total_value, Amount::from_sat(6));

        let lookahead = crate::build_lookahead(&ctx.candidates, total_value);
        let expected: Vec<Amount> = [5u64, 3, 0].iter().map(|v| Amount::from_sat(*v)).collect();
        assert_eq!(lookahead, expected);
    }
}
