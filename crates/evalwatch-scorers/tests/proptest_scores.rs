use evalwatch_scorers::{
    extract_judge_score, KeywordClassifier, SimilarityModel, TokenCosineSimilarity,
    ToxicityClassifier,
};
use proptest::prelude::*;
use proptest::test_runner::Config;

proptest! {
    #![proptest_config(Config::with_cases(128))]
    #[test]
    fn judge_scores_stay_in_unit_interval(text in ".{0,64}") {
        if let Some(score) = extract_judge_score(&text) {
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn token_cosine_is_bounded_and_symmetric(a in "[a-z ]{0,40}", b in "[a-z ]{0,40}") {
        let sim = TokenCosineSimilarity;
        let ab = sim.similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert!((ab - sim.similarity(&b, &a)).abs() < 1e-9);
    }

    #[test]
    fn keyword_scores_are_probabilities(words in proptest::collection::vec("(hate|attack|damn|hello|report)", 0..40)) {
        let text = words.join(" ");
        let scores = KeywordClassifier::default().classify(&text).unwrap();
        for value in scores.values() {
            prop_assert!((0.0..=1.0).contains(value));
        }
        prop_assert!(scores["toxic"] >= scores["threat"]);
    }
}
