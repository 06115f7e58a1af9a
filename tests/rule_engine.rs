//! Rule documents and the evaluator, end to end.

mod common;

use common::{field, sample_record};
use proptest::prelude::*;
use rdacore::rules::engine::evaluate;
use rdacore::{FieldRef, IngestError, Leader, Record, RuleSet};

#[test]
fn test_bundled_manifestation_rules_extract_sample() {
    let rules =
        RuleSet::from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/data/rules/manifestation.json"))
            .unwrap();
    let extracted = rules.apply(&sample_record());

    assert_eq!(extracted["titleProper"], vec!["Walden"]);
    assert_eq!(extracted["statementOfResponsibility"], vec!["Henry David Thoreau."]);
    assert_eq!(extracted["carrierType"], vec!["vd"]);
    assert_eq!(extracted["extent"], vec!["357 p."]);
    assert!(!extracted.contains_key("mediaType"));
}

#[test]
fn test_bundled_expression_conditions() {
    let rules =
        RuleSet::from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/data/rules/expression.json"))
            .unwrap();
    let mut record = sample_record();
    record.add_field(field("336", ' ', ' ', &[('a', "txt"), ('2', "rdacontent-code")]));
    let extracted = rules.apply(&record);

    assert_eq!(extracted["contentType"], vec!["text"]);
    assert_eq!(extracted["languageOfExpression"], vec!["eng"]);
}

#[test]
fn test_multiple_field_instances_accumulate() {
    let rules = RuleSet::from_json_str(
        r#"{ "subject": { "650": { "subfields": ["a", "x"], "indicators": { "1": ["0"] } } } }"#,
    )
    .unwrap();
    let record = Record::builder(Leader::default())
        .field(field("650", ' ', '0', &[('a', "Nature"), ('x', "Poetry")]))
        .field(field("650", ' ', '7', &[('a', "Ignored")]))
        .field(field("650", ' ', '0', &[('a', "Solitude")]))
        .build();

    assert_eq!(
        rules.apply(&record)["subject"],
        vec!["NaturePoetry".to_string(), "Solitude".to_string()]
    );
}

#[test]
fn test_unknown_indicator_yields_nothing() {
    let rules = RuleSet::from_json_str(
        r#"{ "number": { "028": { "indicators": { "0": {
            "4": { "subfields": ["a"], "label": "videorecording-number" }
        } } } } }"#,
    )
    .unwrap();
    let record = Record::builder(Leader::default())
        .field(field("028", '2', '0', &[('a', "ABC-1")]))
        .build();
    assert!(rules.apply(&record).is_empty());
}

#[test]
fn test_invalid_documents_fail_at_load_time() {
    let cases = [
        r#"{ "x": { "245": {} } }"#,
        r#"{ "x": { "245": { "subfields": ["a"], "positions": { "start": 0, "end": 1 } } } }"#,
        r#"{ "x": { "008": { "positions": { "start": 5, "end": 1 } } } }"#,
        r#"{ "x": { "245": { "subfields": ["a"], "condition": "__import__('os')" } } }"#,
        r#"{ "shapes": { "245": { "subfields": ["a"] } } }"#,
        r#"{ "x": { "245": { "subfields": ["a"], "unknown": true } } }"#,
    ];
    for case in cases {
        let err = RuleSet::from_json_str(case).unwrap_err();
        assert!(
            matches!(err, IngestError::InvalidRuleConfiguration { .. }),
            "{case}: {err}"
        );
    }
}

proptest! {
    #[test]
    fn prop_positions_return_inclusive_slice_or_none(
        value in "[a-z0-9 ]{0,40}",
        start in 0usize..40,
        len in 0usize..10,
    ) {
        let end = start + len;
        let rules = RuleSet::from_json_str(&format!(
            r#"{{ "slice": {{ "008": {{ "positions": {{ "start": {start}, "end": {end} }} }} }} }}"#
        ))
        .unwrap();
        let rule = rules.iter().next().unwrap();
        let result = evaluate(rule, FieldRef::Control { tag: "008", value: &value });

        if end < value.len() {
            prop_assert_eq!(result.unwrap().values, vec![value[start..=end].to_string()]);
        } else {
            prop_assert!(result.is_none());
        }
    }

    #[test]
    fn prop_positions_near_usize_max_yield_none(
        value in "[a-z0-9 ]{0,40}",
        start in prop_oneof![0usize..40, (usize::MAX - 8)..=usize::MAX],
        back in 0usize..8,
    ) {
        let end = usize::MAX - back;
        prop_assume!(start <= end);
        let rules = RuleSet::from_json_str(&format!(
            r#"{{ "slice": {{ "008": {{ "positions": {{ "start": {start}, "end": {end} }} }} }} }}"#
        ))
        .unwrap();
        let rule = rules.iter().next().unwrap();
        let result = evaluate(rule, FieldRef::Control { tag: "008", value: &value });
        prop_assert!(result.is_none());
    }
}
