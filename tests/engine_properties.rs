mod common;

use byteminer::miner::MineView;
use byteminer::{Engine, EngineConfig, ExtractFlags, Stream, StreamStatus};
use common::{shared_test_library, tokens, TEST_LIBRARY};
use proptest::prelude::*;

/// Tokens of the whole buffer, seen in one view
fn reference(text: &[u8]) -> Vec<(u64, usize)> {
    let view = MineView::new(text, 0, text.len(), true, None);
    tokens(&view)
        .into_iter()
        .map(|(start, len)| (start as u64, len))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn drain_matches_single_view(
        words in prop::collection::vec("[a-z0-9]{1,6}", 0..40),
        seps in prop::collection::vec("[ ,.\n]{1,3}", 40),
        threads in 1usize..5,
        slice_size in 1usize..48,
        batch_size in 1usize..20,
    ) {
        let mut text = String::new();
        for (word, sep) in words.iter().zip(&seps) {
            text.push_str(word);
            text.push_str(sep);
        }

        let mut engine = Engine::with_config(EngineConfig {
            threads,
            slice_size,
            max_span: 8,
            flags: ExtractFlags::NONE,
        })
        .unwrap();
        engine.provide_library(shared_test_library());
        prop_assert!(engine.add_miner(TEST_LIBRARY, "match_token", ""));

        let stream = Stream::open_buffer(text.as_bytes()).into_shared();
        prop_assert!(engine.bind_stream(&stream));

        let mut found = Vec::new();
        let mut calls = 0;
        while !engine.is_at_end() {
            let batch = engine.next(batch_size);
            calls += 1;
            prop_assert!(calls <= text.len() + 1);
            if !engine.is_at_end() {
                prop_assert!(batch.len() >= batch_size);
            }
            for pair in batch.windows(2) {
                prop_assert!(pair[0].position < pair[1].position);
            }
            found.extend(batch.into_iter().map(|o| (o.position, o.length)));
        }

        for pair in found.windows(2) {
            prop_assert!(pair[0].0 < pair[1].0);
        }
        prop_assert_eq!(found, reference(text.as_bytes()));
        let guard = stream.lock();
        prop_assert_eq!(guard.position(), text.len() as u64);
        prop_assert_eq!(guard.status(), StreamStatus::EndOfInput);
    }
}
