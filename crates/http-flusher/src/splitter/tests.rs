use bytes::Bytes;

use super::*;
use crate::convert::{ConvertConfig, Encoding, Protocol};
use crate::models::{Group, KeyValues, Log, LogContent, Metric, PipelineEvent};
use crate::testing::{METRIC_1, METRIC_2, weather_log};

fn converter(protocol: Protocol, encoding: Encoding, separator: Option<&str>) -> Converter {
    Converter::new(&ConvertConfig {
        protocol: Some(protocol),
        encoding: Some(encoding),
        separator: separator.map(str::to_owned),
    })
    .unwrap()
}

fn plan(pairs: &[(&str, &str)]) -> QueryPlan {
    let query: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    QueryPlan::compile(&query)
}

fn db_query() -> Vec<(String, String)> {
    vec![("db".to_owned(), "mydb".to_owned())]
}

fn with_record_tag(mut log: Log, key: &str, value: &str) -> Log {
    log.contents.push(LogContent {
        key: format!("__tag__:{key}"),
        value: value.to_owned(),
    });
    log
}

fn metadata_group(events: Vec<PipelineEvent>) -> PipelineGroupEvents {
    PipelineGroupEvents {
        group: Group::new(KeyValues::from_pairs([("db", "mydb")]), KeyValues::new()),
        events,
    }
}

#[test]
fn group_scope_joins_each_group_into_one_draft() {
    let conv = converter(Protocol::Influxdb, Encoding::Custom, None);
    let groups = vec![
        LogGroup {
            logs: vec![
                weather_log("30", "1668653452000000000"),
                weather_log("32", "1668653452000000001"),
            ],
            ..LogGroup::default()
        }
        .with_tags(&[("__tag__:db", "mydb")]),
        LogGroup {
            logs: vec![
                weather_log("30", "1668653452000000003"),
                weather_log("32", "1668653452000000004"),
            ],
            ..LogGroup::default()
        }
        .with_tags(&[("__tag__:db", "mydb")]),
    ];

    let outcome = split_log_groups(&groups, &conv, &plan(&[("db", "%{tag.db}")]));

    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.drafts.len(), 2, "one draft per group");
    assert_eq!(
        outcome.drafts[0].body,
        Bytes::from(
            "weather,location=hangzhou,province=zhejiang value=30 1668653452000000000\n\
             weather,location=hangzhou,province=zhejiang value=32 1668653452000000001\n"
        )
    );
    assert_eq!(
        outcome.drafts[1].body,
        Bytes::from(
            "weather,location=hangzhou,province=zhejiang value=30 1668653452000000003\n\
             weather,location=hangzhou,province=zhejiang value=32 1668653452000000004\n"
        )
    );
    assert!(outcome.drafts.iter().all(|d| d.query == db_query()));
}

#[test]
fn record_scope_splits_every_log() {
    let conv = converter(Protocol::CustomSingle, Encoding::Json, None);
    let groups = vec![LogGroup {
        logs: vec![
            with_record_tag(weather_log("30", "1"), "db", "a"),
            with_record_tag(weather_log("32", "2"), "db", "b"),
            weather_log("34", "3"),
        ],
        ..LogGroup::default()
    }];

    let outcome = split_log_groups(&groups, &conv, &plan(&[("db", "%{tag.db}")]));

    assert_eq!(outcome.drafts.len(), 3, "one draft per log");
    let dbs: Vec<&str> = outcome
        .drafts
        .iter()
        .map(|d| d.query[0].1.as_str())
        .collect();
    assert_eq!(dbs, ["a", "b", ""], "each log resolves its own tags");
    assert!(
        !outcome.drafts[0].body.ends_with(b"\n"),
        "single-record bodies carry no terminator"
    );
}

#[test]
fn record_scope_without_placeholders_shares_one_draft() {
    let conv = converter(Protocol::CustomSingle, Encoding::Json, None);
    let groups = vec![LogGroup {
        logs: vec![Log::new(&[("a", "1")]), Log::new(&[("a", "2")])],
        ..LogGroup::default()
    }];

    let outcome = split_log_groups(&groups, &conv, &plan(&[("precision", "ns")]));

    assert_eq!(outcome.drafts.len(), 1);
    let body = std::str::from_utf8(&outcome.drafts[0].body).unwrap();
    assert_eq!(body.lines().count(), 2);
    assert!(body.lines().next().unwrap().contains(r#""a":"1""#));
}

#[test]
fn undecodable_log_is_skipped_not_fatal() {
    let conv = converter(Protocol::Influxdb, Encoding::Custom, None);
    let groups = vec![LogGroup {
        logs: vec![
            weather_log("30", "1"),
            Log::new(&[("__value__", "1")]),
            weather_log("32", "2"),
        ],
        ..LogGroup::default()
    }];

    let outcome = split_log_groups(&groups, &conv, &QueryPlan::default());

    assert_eq!(outcome.drafts.len(), 1);
    assert_eq!(
        std::str::from_utf8(&outcome.drafts[0].body)
            .unwrap()
            .lines()
            .count(),
        2
    );
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!((outcome.skipped[0].group, outcome.skipped[0].record), (0, 1));
}

#[test]
fn empty_group_produces_nothing() {
    let conv = converter(Protocol::Influxdb, Encoding::Custom, None);
    let outcome = split_log_groups(&[LogGroup::default()], &conv, &QueryPlan::default());
    assert!(outcome.drafts.is_empty());
    assert!(outcome.skipped.is_empty());
}

#[test]
fn generic_without_separator_sends_each_event() {
    let conv = converter(Protocol::Raw, Encoding::Custom, None);
    let groups = vec![metadata_group(vec![
        PipelineEvent::byte_array(METRIC_1),
        PipelineEvent::byte_array(METRIC_2),
    ])];

    let outcome = split_group_events(&groups, &conv, &plan(&[("db", "%{metadata.db}")]));

    assert_eq!(outcome.drafts.len(), 2);
    assert_eq!(outcome.drafts[0].body, Bytes::from(METRIC_1));
    assert_eq!(outcome.drafts[1].body, Bytes::from(METRIC_2));
    assert!(outcome.drafts.iter().all(|d| d.query == db_query()));
}

#[test]
fn generic_with_separator_joins_group() {
    let conv = converter(Protocol::Raw, Encoding::Custom, Some("\n"));
    let groups = vec![metadata_group(vec![
        PipelineEvent::byte_array(METRIC_1),
        PipelineEvent::byte_array(METRIC_2),
    ])];

    let outcome = split_group_events(&groups, &conv, &plan(&[("db", "%{metadata.db}")]));

    assert_eq!(outcome.drafts.len(), 1);
    assert_eq!(
        outcome.drafts[0].body,
        Bytes::from(format!("{METRIC_1}\n{METRIC_2}"))
    );
    assert_eq!(outcome.drafts[0].query, db_query());
}

#[test]
fn generic_separator_never_merges_across_groups() {
    let conv = converter(Protocol::Raw, Encoding::Custom, Some("\n"));
    let groups = vec![
        metadata_group(vec![PipelineEvent::byte_array(METRIC_1)]),
        metadata_group(vec![PipelineEvent::byte_array(METRIC_2)]),
    ];

    let outcome = split_group_events(&groups, &conv, &plan(&[("db", "%{metadata.db}")]));

    assert_eq!(outcome.drafts.len(), 2);
    assert_eq!(outcome.drafts[0].body, Bytes::from(METRIC_1));
    assert_eq!(outcome.drafts[1].body, Bytes::from(METRIC_2));
}

#[test]
fn unsupported_event_is_skipped_rest_continue() {
    let conv = converter(Protocol::Raw, Encoding::Custom, None);
    let metric = PipelineEvent::Metric(Metric {
        name: "cpu.load.short".into(),
        timestamp: 1_672_321_328_000_000_000,
        tags: KeyValues::from_pairs([("host", "server01"), ("region", "cn")]),
        value: 0.64,
    });
    let groups = vec![metadata_group(vec![
        PipelineEvent::byte_array(METRIC_1),
        metric,
        PipelineEvent::byte_array(METRIC_2),
    ])];

    let outcome = split_group_events(&groups, &conv, &QueryPlan::default());

    assert_eq!(outcome.drafts.len(), 2);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].record, 1);
    assert_eq!(
        outcome.skipped[0].error.to_string(),
        "unsupported event type: metric"
    );
}

#[test]
fn only_unsupported_events_yield_no_draft() {
    let conv = converter(Protocol::Raw, Encoding::Custom, Some(","));
    let span = PipelineEvent::Span(crate::models::Span {
        name: "GET /".into(),
        trace_id: "t".into(),
        span_id: "s".into(),
        start_time: 1,
        end_time: 2,
        tags: KeyValues::new(),
    });
    let outcome = split_group_events(&[metadata_group(vec![span])], &conv, &QueryPlan::default());
    assert!(outcome.drafts.is_empty());
    assert_eq!(outcome.skipped.len(), 1);
}
