use super::*;

use proptest::prelude::*;
use std::collections::BTreeMap;

fn validate_trie<L: Copy + Default, I: Copy + Default>(t: &Trie<L, I>) {
    let mut stack: Vec<Handle> = (0..t.num_roots).map(Trie::<L, I>::root_handle).collect();
    let mut leaf_count = 0usize;
    let mut reachable = 0usize;

    while let Some(h) = stack.pop() {
        reachable += 1;
        let node = t.nodes.get(h);
        let entries = node.entries(&t.entries);
        assert!(
            entries.windows(2).all(|w| w[0].key() < w[1].key()),
            "node entries must be strictly ascending"
        );
        for (pos, d) in entries.iter().enumerate() {
            let child = node.child(&t.children, pos);
            assert_eq!(
                d.has_children(),
                child.is_some(),
                "children flag must match the child array"
            );
            if d.is_leaf() {
                leaf_count += 1;
            }
            if let Some(c) = child {
                stack.push(c);
            }
        }
    }

    assert_eq!(leaf_count, t.count, "reachable leaf count must match Trie::len");
    assert_eq!(reachable, t.nodes.live(), "every live node must be reachable");
}

#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<u32>, u64),
    SetInternal(Vec<u32>, u32),
    Get(Vec<u32>),
    Sum(Vec<u32>, usize, usize),
    RoundTrip,
    Clear,
}

fn key_strategy() -> impl Strategy<Value = Vec<u32>> + Clone {
    // A small alphabet makes shared prefixes and bucket collisions common.
    prop::collection::vec(0u32..12, 1..=5)
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        45 => (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        15 => (key.clone(), 1u32..).prop_map(|(k, v)| Op::SetInternal(k, v)),
        20 => key.clone().prop_map(Op::Get),
        15 => (key.clone(), 1usize..=5, 0usize..=4)
            .prop_map(|(k, lo, span)| Op::Sum(k, lo, lo + span)),
        4 => Just(Op::RoundTrip),
        1 => Just(Op::Clear),
    ];
    prop::collection::vec(op, 0..=1500)
}

/// Deepest stored prefix of `key`, as `Trie::find` reports it.
fn model_find(m: &BTreeMap<Vec<u32>, u64>, key: &[u32]) -> Find<u64> {
    let mut res = Find { found: false, value: 0, depth: 0 };
    for d in 1..=key.len() {
        if let Some(&v) = m.get(&key[..d]) {
            res.value = v;
            res.depth = d;
        }
    }
    res.found = res.depth == key.len();
    res
}

fn check_equivalence(bits: u8, ops: Vec<Op>) -> std::result::Result<(), TestCaseError> {
    let mut t: Trie<u64, u32> = Trie::build(bits);
    let mut m: BTreeMap<Vec<u32>, u64> = BTreeMap::new();
    let mut internal: BTreeMap<Vec<u32>, u32> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Insert(key, value) => {
                let old_t = t.insert(&key, value).map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(old_t, m.insert(key, value));
            }
            Op::SetInternal(key, value) => {
                t.set_internal_node_value(&key, value)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                internal.insert(key, value);
            }
            Op::Get(key) => {
                prop_assert_eq!(t.find(&key), model_find(&m, &key));
            }
            Op::Sum(key, lo, hi) => {
                let mut naive: Option<u64> = None;
                for d in lo..=hi.min(key.len()) {
                    if let Some(&v) = m.get(&key[..d]) {
                        naive = Some(naive.unwrap_or(0).wrapping_add(v));
                    }
                }
                let got = sum_wrapping(&t, &key, lo, hi);
                prop_assert_eq!(got, naive);
            }
            Op::RoundTrip => {
                let bytes = t.to_binary_bytes();
                let mut back: Trie<u64, u32> = Trie::new();
                back.read_binary(&bytes)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                validate_trie(&back);
                t = back;
            }
            Op::Clear => {
                t.clear();
                m.clear();
                internal.clear();
            }
        }

        prop_assert_eq!(t.len(), m.len());
    }

    validate_trie(&t);
    for (key, &v) in &internal {
        prop_assert_eq!(t.get_internal_node_value(key), Some(v));
    }
    let mut got: Vec<(Vec<u32>, u64)> = t.iter().map(|(k, v)| (k, *v)).collect();
    if bits > 0 {
        got.sort();
    }
    let expected: Vec<(Vec<u32>, u64)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
    prop_assert_eq!(got, expected);
    Ok(())
}

/// `Trie::sum` needs `AddAssign`, which overflows on `u64`; walk the prefixes
/// through `find` instead to compare with wrapping addition.
fn sum_wrapping(t: &Trie<u64, u32>, key: &[u32], lo: usize, hi: usize) -> Option<u64> {
    let mut acc: Option<u64> = None;
    for d in lo..=hi.min(key.len()) {
        if let Some(v) = t.get(&key[..d]) {
            acc = Some(acc.unwrap_or(0).wrapping_add(v));
        }
    }
    acc
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_single_bucket(ops in ops_strategy()) {
        check_equivalence(0, ops)?;
    }

    #[test]
    fn prop_equivalence_hashed_roots(ops in ops_strategy()) {
        check_equivalence(3, ops)?;
    }

    #[test]
    fn prop_sum_matches_prefix_walk(
        keys in prop::collection::vec((key_strategy(), -1000i64..1000), 0..=300),
        probe in key_strategy(),
        lo in 1usize..=5,
        span in 0usize..=4,
    ) {
        let mut t: Trie<i64, i64> = Trie::build(2);
        for (k, v) in &keys {
            t.insert(k, *v).map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        let hi = lo + span;
        let mut naive: Option<i64> = None;
        for d in lo..=hi.min(probe.len()) {
            if let Some(v) = t.get(&probe[..d]) {
                *naive.get_or_insert(0) += v;
            }
        }
        prop_assert_eq!(t.sum(&probe, lo..=hi), naive);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<Vec<u32>> = vec![
        vec![1],
        vec![2],
        vec![3],
        vec![1, 1],
        vec![1, 2],
        vec![2, 1, 3],
    ];

    for_each_permutation(&keys, |perm| {
        let mut t: Trie<u64, u32> = Trie::new();
        let mut m: BTreeMap<Vec<u32>, u64> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as u64;
            assert_eq!(t.insert(&k, v).unwrap(), m.insert(k, v));
        }

        validate_trie(&t);
        let got: Vec<(Vec<u32>, u64)> = t.iter().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(Vec<u32>, u64)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_filtered_load_small_set() {
    let keys: Vec<Vec<u32>> = vec![vec![1], vec![1, 2], vec![1, 2, 3], vec![2, 3], vec![3]];
    let mut t: Trie<u64, u32> = Trie::new();
    for (i, k) in keys.iter().enumerate() {
        t.insert(k, i as u64).unwrap();
    }
    let bytes = t.to_binary_bytes();

    // Every subset of allowed first keys, crossed with every order limit.
    for mask in 0u32..8 {
        for order in 1..=3usize {
            let allowed = |k: u32| mask & (1 << (k - 1)) != 0;
            let mut back: Trie<u64, u32> = Trie::new();
            back.read_binary_with(
                &bytes,
                |path: &[u32]| path.len() <= order && path.iter().all(|&k| allowed(k)),
                &IdentityMapper,
            )
            .unwrap();
            validate_trie(&back);

            let expected: Vec<Vec<u32>> = keys
                .iter()
                .filter(|k| k.len() <= order && k.iter().all(|&x| allowed(x)))
                .cloned()
                .collect();
            let got: Vec<Vec<u32>> = back.iter().map(|(k, _)| k).collect();
            assert_eq!(got, expected, "mask={mask:#b} order={order}");
        }
    }
}
