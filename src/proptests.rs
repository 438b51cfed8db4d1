use super::*;

use proptest::prelude::*;

use crate::address::{join_words, GROUP_WORDS};

type Load = (u32, u32, u32);

/// Straightforward recursive definition of the search, kept independent of
/// the codec and the node table.
fn model_search(config: &TreeConfig, nodes: &[(u32, u32)], word: u32, address: u32) -> u32 {
    let first_leaf = (1u32 << (config.num_levels - 1)) - 1;
    if address >= first_leaf {
        return address;
    }
    let (field_index, value) = nodes[address as usize];
    let shift = (config.num_fields - 1 - field_index) * config.num_bits_per_field;
    let field = (u64::from(word) >> shift) & ((1u64 << config.num_bits_per_field) - 1);
    let next = if field == u64::from(value) {
        2 * address + 1
    } else {
        2 * address + 2
    };
    model_search(config, nodes, word, next)
}

fn config_strategy() -> impl Strategy<Value = TreeConfig> {
    (1u32..=8, 1u32..=8).prop_flat_map(|(num_levels, num_fields)| {
        let max_bits = (32 / num_fields).min(16);
        (1u32..=max_bits).prop_map(move |bits| TreeConfig::new(num_fields, bits, num_levels))
    })
}

fn load_strategy(config: TreeConfig) -> impl Strategy<Value = Load> {
    let layout = config.validate().unwrap();
    (0..layout.node_count, 0..config.num_fields, 0..layout.value_bound())
        .prop_map(|(a, f, v)| (a, f, v as u32))
}

fn word_strategy(config: TreeConfig) -> impl Strategy<Value = u32> {
    let bits = config.num_fields * config.num_bits_per_field;
    (0..(1u64 << bits)).prop_map(|w| w as u32)
}

fn tree_case() -> impl Strategy<Value = (TreeConfig, Vec<Load>, Load)> {
    config_strategy().prop_flat_map(|c| {
        (
            Just(c),
            prop::collection::vec(load_strategy(c), 0..64),
            load_strategy(c),
        )
    })
}

fn batch_case() -> impl Strategy<Value = (TreeConfig, Vec<Load>, Vec<u32>)> {
    config_strategy().prop_flat_map(|c| {
        (
            Just(c),
            prop::collection::vec(load_strategy(c), 0..128),
            prop::collection::vec(word_strategy(c), 0..256),
        )
    })
}

fn build(config: TreeConfig, loads: &[Load]) -> PackedTreeStore {
    let mut store = PackedTreeStore::with_config(config).unwrap();
    for &(a, f, v) in loads {
        store.load(a, f, v).unwrap();
    }
    store
}

fn groups(regs: &RegisterFile) -> [[u32; GROUP_WORDS]; 3] {
    [regs.node_value, regs.field_index, regs.address]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_level_is_unique(a in 0u32..u32::MAX) {
        let n = address::level_of(a);
        let a = u64::from(a);
        prop_assert!((1u64 << n) - 1 <= a);
        prop_assert!(a < (1u64 << (n + 1)) - 1);
        prop_assert_eq!(
            u64::from(address::offset_in_level(a as u32, n)) + (1u64 << n) - 1,
            a
        );
    }

    #[test]
    fn prop_load_roundtrip((config, preload, (a, f, v)) in tree_case()) {
        let mut store = build(config, &preload);
        store.load(a, f, v).unwrap();

        let level = address::level_of(a);
        let slot = store.staged(level).unwrap();
        prop_assert_eq!(slot.ram_row, address::offset_in_level(a, level));
        prop_assert_eq!(slot.field_index, f);
        prop_assert_eq!(slot.value, v);
        prop_assert_eq!(store.node(a).unwrap(), Node { field_index: f, value: v });
    }

    #[test]
    fn prop_load_touches_only_its_level((config, preload, (a, f, v)) in tree_case()) {
        let mut store = build(config, &preload);
        let layout = *store.layout();
        let level = address::level_of(a);

        let before = *store.read_raw();
        let staged_before: Vec<StagedSlot> =
            (0..layout.num_levels()).map(|l| store.staged(l).unwrap()).collect();

        store.load(a, f, v).unwrap();
        let after = *store.read_raw();

        let masks = [
            address::bit_range_for_value(level, layout.num_bits_per_field())
                .mask(layout.value_bits),
            address::bit_range_for_field(level, layout.field_index_width)
                .mask(layout.field_bits),
            address::address_slot(level).mask(layout.address_bits),
        ];
        for ((old, new), mask) in groups(&before).iter().zip(groups(&after).iter()).zip(masks) {
            let diff = join_words(old) ^ join_words(new);
            prop_assert_eq!(diff & !mask, 0);
        }

        for l in (0..layout.num_levels()).filter(|&l| l != level) {
            prop_assert_eq!(store.staged(l).unwrap(), staged_before[l as usize]);
        }
    }

    #[test]
    fn prop_strategies_agree((config, loads, words) in batch_case()) {
        let store = build(config, &loads);

        let mut nodes = vec![(0u32, 0u32); store.layout().node_count as usize];
        for &(a, f, v) in &loads {
            nodes[a as usize] = (f, v);
        }
        let expected: Vec<u32> = words.iter().map(|&w| model_search(&config, &nodes, w, 0)).collect();

        let mut reference = Traversal::new();
        prop_assert_eq!(reference.search(&store, &words).unwrap(), expected.clone());
        prop_assert_eq!(Traversal::par_search_batch(&store, &words, 7), expected.clone());

        let mut pipelined = BatchEvaluator::new(PipelinedEvaluator::new(*store.layout()));
        prop_assert_eq!(pipelined.search(&store, &words).unwrap(), expected);
    }

    #[test]
    fn prop_write_through_matches_resync((config, loads, words) in batch_case()) {
        let mut tree = DecisionTree::new(config).unwrap();
        for &(a, f, v) in &loads {
            tree.load(a, f, v).unwrap();
        }
        let through = tree.search_pipelined(&words).unwrap();

        let store = build(config, &loads);
        let mut fresh = BatchEvaluator::new(PipelinedEvaluator::new(*store.layout()));
        prop_assert_eq!(fresh.evaluate(&store, &words).unwrap(), through);
    }

    #[test]
    fn prop_reset_replay_is_idempotent((config, loads, _) in batch_case()) {
        let mut store = build(config, &loads);
        let first = store.read_raw().as_words();

        store.reset();
        store.reset();
        for &(a, f, v) in &loads {
            store.load(a, f, v).unwrap();
        }
        prop_assert_eq!(store.read_raw().as_words(), first);

        let mut coproc = PipelinedEvaluator::new(*store.layout());
        for &(a, f, v) in &loads {
            coproc.configure(a, f, v).unwrap();
        }
        coproc.reset().unwrap();
        for &(a, f, v) in &loads {
            coproc.configure(a, f, v).unwrap();
        }
        prop_assert_eq!(coproc.registers().as_words(), first);
    }

    #[test]
    fn prop_codec_field_extraction(config in config_strategy(), seed in any::<u64>()) {
        let codec = BatchCodec::new(&config.validate().unwrap());
        let mask = (1u64 << config.num_bits_per_field) - 1;
        let values: Vec<u32> = (0..config.num_fields)
            .map(|i| (seed.rotate_left(i * 7) & mask) as u32)
            .collect();
        let word = codec.encode_values(&values).unwrap();
        prop_assert_eq!(codec.decode_record(word), values);
    }
}

#[test]
fn exhaustive_three_level_trees() {
    // Every tree of 2 fields x 2 bits x 3 levels against every input record.
    let config = TreeConfig::new(2, 2, 3);
    let choices: Vec<(u32, u32)> = (0..2).flat_map(|f| (0..4).map(move |v| (f, v))).collect();
    let words: Vec<u32> = (0..16).collect();

    for &root in &choices {
        for &left in &choices {
            for &right in &choices {
                let loads = [(0, root.0, root.1), (1, left.0, left.1), (2, right.0, right.1)];
                let store = build(config, &loads);
                let nodes = [root, left, right, (0, 0), (0, 0), (0, 0), (0, 0)];

                let expected: Vec<u32> =
                    words.iter().map(|&w| model_search(&config, &nodes, w, 0)).collect();
                assert_eq!(Traversal::search_batch(&store, &words), expected);

                let mut ev = BatchEvaluator::new(PipelinedEvaluator::new(*store.layout()));
                assert_eq!(ev.evaluate(&store, &words).unwrap(), expected);
            }
        }
    }
}

#[test]
fn exhaustive_levels_of_every_deep_tree_address() {
    let mut expected_level = 0;
    for a in 0..address::node_count(16) {
        if a == address::level_start(expected_level + 1) {
            expected_level += 1;
        }
        assert_eq!(address::level_of(a), expected_level);
        assert!(address::bit_range_for_address(a, 16).is_ok());
    }
    assert!(address::bit_range_for_address(address::node_count(16), 16).is_err());
}
