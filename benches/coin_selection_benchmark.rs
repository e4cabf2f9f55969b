use bitcoin::{Amount, FeeRate, ScriptBuf, TxOut, Weight};
use changeless_coin_selection::{
    select_changeless, CancellationToken, SearchParams, WeightedUtxo,
};
use criterion::{criterion_group, criterion_main, Criterion};

#[derive(Clone, Debug)]
struct BenchUtxo {
    value: Amount,
    weight: Weight,
}

impl WeightedUtxo for BenchUtxo {
    fn value(&self) -> Amount {
        self.value
    }

    fn weight(&self) -> Weight {
        self.weight
    }
}

pub fn criterion_benchmark(c: &mut Criterion) {
    const ONE_BTC: u64 = 100_000_000;

    let utxo_pool: Vec<BenchUtxo> = (ONE_BTC..ONE_BTC + 10_000)
        .map(|v| BenchUtxo { value: Amount::from_sat(v), weight: Weight::from_wu(272) })
        .collect();

    let target =
        TxOut { value: Amount::from_sat(2 * ONE_BTC + 1), script_pubkey: ScriptBuf::new() };

    c.bench_function("changeless_search_large_pool", |b| {
        b.iter(|| {
            let selections = select_changeless(
                &utxo_pool,
                &target,
                FeeRate::from_sat_per_kwu(250),
                2,
                SearchParams::default(),
                CancellationToken::new(),
            )
            .unwrap();
            selections.take(5).count()
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
