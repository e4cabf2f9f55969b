// SPDX-License-Identifier: CC0-1.0
//
//! Single-coin exact match.
//!
//! One input paying the target outright is the cheapest transaction shape
//! there is, so this O(n) pass over the candidates runs before either tree
//! search and its results are yielded first.

use crate::{classify, cost, SearchContext, SearchState, Selection, Window};

pub(crate) struct SingleCoin<'a, Utxo> {
    ctx: SearchContext<'a, Utxo>,
    next_index: usize,
    iterations: u32,
    state: SearchState,
}

impl<'a, Utxo> SingleCoin<'a, Utxo> {
    pub(crate) fn new(ctx: SearchContext<'a, Utxo>) -> Self {
        SingleCoin { ctx, next_index: 0, iterations: 0, state: SearchState::NotStarted }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SearchState {
        self.state
    }
}

impl<'a, Utxo> Iterator for SingleCoin<'a, Utxo> {
    type Item = Selection<'a, Utxo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = SearchState::Searching;

        while self.next_index < self.ctx.candidates.len() {
            if self.ctx.cancel.is_cancelled() {
                self.state = SearchState::Cancelled;
                return None;
            }
            if self.iterations >= self.ctx.iteration_limit {
                self.state = SearchState::BudgetExceeded;
                return None;
            }

            let candidate = self.ctx.candidates[self.next_index];
            self.next_index += 1;
            self.iterations += 1;

            let deliverable = cost::deliverable_amount(
                candidate.value,
                candidate.weight,
                self.ctx.fee_rate,
                self.ctx.fixed_weight,
            );

            if let Some(deliverable) = deliverable {
                if classify(deliverable, self.ctx.target, self.ctx.dust_threshold)
                    == Window::Changeless
                {
                    return Some(Selection { coins: vec![candidate.utxo], deliverable });
                }
            }
        }

        self.state = SearchState::Exhausted;
        None
    }
}
