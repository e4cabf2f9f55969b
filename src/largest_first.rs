// SPDX-License-Identifier: CC0-1.0
//
//! Descending-value largest-first search.
//!
//! Greedy with backtracking: the candidates are sorted by value descending
//! (lighter coin wins a value tie), so subsets of few large coins are tried
//! before many-coin combinations.  Fewer inputs weigh less and pay less
//! fee, which makes these the most attractive matches.  When a large coin
//! overshoots the window, the search falls back to its smaller sibling at
//! the same depth and keeps branching over the remainder, so combinations
//! an ascending traversal only reaches late are discovered early here.

use bitcoin::{Amount, Weight};
use tracing::trace;

use crate::{
    build_lookahead, classify, cost, pool_totals, SearchContext, SearchState, Selection, Window,
};

pub(crate) struct LargestFirst<'a, Utxo> {
    ctx: SearchContext<'a, Utxo>,
    lookahead: Vec<Amount>,
    selection: Vec<usize>,
    next_index: usize,
    value_sum: Amount,
    weight_sum: Weight,
    iterations: u32,
    state: SearchState,
}

impl<'a, Utxo> LargestFirst<'a, Utxo> {
    pub(crate) fn new(mut ctx: SearchContext<'a, Utxo>) -> Self {
        ctx.candidates
            .sort_by(|a, b| b.value.cmp(&a.value).then(a.weight.cmp(&b.weight)));

        let lookahead = match pool_totals(&ctx.candidates) {
            Some((total_value, _)) if total_value >= ctx.target => {
                build_lookahead(&ctx.candidates, total_value)
            }
            _ => {
                ctx.candidates.clear();
                Vec::new()
            }
        };

        LargestFirst {
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

impl<'a, Utxo> Iterator for LargestFirst<'a, Utxo> {
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
                trace!(iterations = self.iterations, "largest first budget exhausted");
                return None;
            }

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
                // Swapping the tail for any later, smaller sibling leaves
                // even less value in play, so the depth level is done.
                self.deselect_tail();
                if !self.backtrack() {
                    self.state = SearchState::Exhausted;
                    return None;
                }
                continue;
            }

            let deliverable = match fee.and_then(|f| self.value_sum.checked_sub(f)) {
                Some(deliverable) => deliverable,
                None => continue,
            };

            match classify(deliverable, self.ctx.target, self.ctx.dust_threshold) {
                Window::Changeless => {
                    return Some(Selection { coins: self.selected_coins(), deliverable });
                }
                Window::Overshoot => {
                    // Descending order: the next sibling is smaller and may
                    // fit, so only the tail is excluded before moving on.
                    self.deselect_tail();
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
    fn prefers_the_single_large_coin() {
        let coins = pool(&[100, 70, 30]);
        let search = LargestFirst::new(make_context(&coins, 100, 0, 2, 100_000));

        assert_eq!(memberships(search), vec![vec![100], vec![30, 70]]);
    }

    #[test]
    fn overshooting_coin_falls_back_to_smaller_siblings() {
        // 120 alone overshoots; the search moves on to {60, 40}.
        let coins = pool(&[120, 60, 40]);
        let search = LargestFirst::new(make_context(&coins, 100, 0, 3, 100_000));

        assert_eq!(memberships(search), vec![vec![40, 60]]);
    }

    #[test]
    fn respects_the_input_ceiling() {
        let coins = pool(&[10, 20, 30]);

        let capped = LargestFirst::new(make_context(&coins, 60, 0, 2, 100_000));
        assert_eq!(capped.count(), 0);

        let full = LargestFirst::new(make_context(&coins, 60, 0, 3, 100_000));
        assert_eq!(memberships(full), vec![vec![10, 20, 30]]);
    }

    #[test]
    fn budget_exhaustion_ends_the_sequence_cleanly() {
        let coins = pool(&[30, 45, 70]);
        let mut search = LargestFirst::new(make_context(&coins, 100, 0, 2, 2));

        assert!(search.next().is_none());
        assert_eq!(search.state(), SearchState::BudgetExceeded);
    }

    #[test]
    fn cancellation_stops_production() {
        let coins = pool(&[100, 70, 30]);
        let ctx = make_context(&coins, 100, 0, 2, 100_000);
        let cancel = ctx.cancel.clone();
        let mut search = LargestFirst::new(ctx);

        assert_eq!(search.next().unwrap().deliverable, Amount::from_sat(100));

        cancel.cancel();
        assert!(search.next().is_none());
        assert_eq!(search.state(), SearchState::Cancelled);
    }
}
