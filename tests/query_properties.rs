use kiosk_lib::search::filter::paginate;
use kiosk_lib::search::QueryBuilder;
use proptest::prelude::*;

fn adversarial() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        "[\"'*()^:;%_\\\\ a-zA-Z0-9-]{0,80}",
        "(AND|OR|NOT|and|or|not|\"|\\*| |x|DROP TABLE|--){0,30}",
        ".{190,400}",
    ]
}

proptest! {
    #[test]
    fn builder_never_panics_and_output_validates(raw in adversarial()) {
        let builder = QueryBuilder::default();
        let built = builder.build(&raw);
        let _ = builder.build_boolean(&raw);
        let _ = builder.build_suggestion_query(&raw, Some("title"));
        let _ = builder.build_similarity_query(&raw);
        let _ = builder.validate(&raw);
        let _ = builder.complexity(&raw);
        if !built.is_empty() {
            let check = builder.validate(&built);
            prop_assert!(check.valid, "{built:?} -> {:?}", check.error);
        }
    }

    #[test]
    fn optimize_never_grows(raw in adversarial(), max_len in 0usize..120) {
        let builder = QueryBuilder::default();
        let optimized = builder.optimize(&raw, max_len);
        prop_assert!(optimized.chars().count() <= max_len.max(raw.chars().count()));
        prop_assert!(
            optimized.split_whitespace().count() <= raw.split_whitespace().count()
        );
    }

    #[test]
    fn capped_queries_fit_their_budget(raw in adversarial(), budget in 0u32..80) {
        let builder = QueryBuilder::default();
        let capped = builder.build_within(&raw, budget);
        if !capped.is_empty() {
            let single_term = !capped.contains(" OR ");
            prop_assert!(single_term || builder.complexity(&capped) <= budget, "{capped:?}");
            let check = builder.validate(&capped);
            prop_assert!(check.valid, "{capped:?} -> {:?}", check.error);
        }
    }

    #[test]
    fn pages_concatenate_to_the_original_list(
        items in proptest::collection::vec(any::<u32>(), 0..200),
        page_size in 1usize..50,
    ) {
        let first = paginate(&items, 1, page_size);
        let mut rebuilt = first.items.clone();
        for page in 2..=first.total_pages {
            rebuilt.extend(paginate(&items, page, page_size).items);
        }
        prop_assert_eq!(&rebuilt, &items);
        prop_assert!(paginate(&items, first.total_pages + 1, page_size).items.is_empty());
    }
}
