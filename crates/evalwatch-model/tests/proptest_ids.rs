use evalwatch_model::{EventId, MetricName, ModelId, ResultId};
use proptest::prelude::*;
use proptest::test_runner::Config;

proptest! {
    #![proptest_config(Config::with_cases(128))]
    #[test]
    fn result_ids_are_valid_digests(
        event in "[A-Za-z0-9._:-]{1,40}",
        metric in "[a-z][a-z0-9]{0,10}(_[a-z0-9]{1,8}){0,2}",
    ) {
        let event = EventId::new(event).expect("event id");
        let metric = MetricName::new(metric).expect("metric name");
        let id = ResultId::derive(&event, &metric);
        prop_assert_eq!(id.as_str().len(), 64);
        prop_assert!(ResultId::new(id.as_str()).is_ok());
    }

    #[test]
    fn model_ids_round_trip_through_json(raw in "[A-Za-z0-9._:/-]{1,60}") {
        let id = ModelId::new(raw.clone()).expect("model id");
        let json = serde_json::to_string(&id).expect("serialize");
        let back: ModelId = serde_json::from_str(&json).expect("deserialize");
        prop_assert_eq!(back.as_str(), raw.as_str());
    }
}
