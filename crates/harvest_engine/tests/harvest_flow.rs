mod common;

use std::fs;

use common::*;
use harvest_core::{ChannelConfig, Message, MessageSet, MessageTs};
use harvest_engine::{
    expand_threads, harvest_channel, list_all, partition_path, run_channels, ChannelOutcome,
    FailureKind, HarvestContext, HarvestWriter, Pacing, SourceError, UserNameCache,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn channel(id: &str, label: &str) -> ChannelConfig {
    ChannelConfig {
        id: id.to_string(),
        label: label.to_string(),
        enabled: true,
    }
}

fn no_author(channel: &str, seconds: u64, text: &str) -> Message {
    Message {
        user_id: None,
        ..message(channel, seconds, "", text)
    }
}

fn joined(channel: &str, seconds: u64) -> Message {
    Message {
        subtype: Some("channel_join".to_string()),
        ..message(channel, seconds, "U3", "<@U3> has joined the channel")
    }
}

/// Two history pages, one thread with two replies, one join event, one
/// duplicate across pages and one message without an author.
fn busy_channel() -> ScriptedSource {
    ScriptedSource::new()
        .channel("C1", "general")
        .user("U1", "Ann")
        .user("U2", "Bo")
        .history(
            "C1",
            None,
            Ok(page(
                vec![
                    message("C1", 10, "U1", "morning"),
                    parent("C1", 20, "U2", "question?", 2),
                    message("C1", 30, "U1", "line one\nline two"),
                    message("C1", 40, "U2", "tab\there"),
                ],
                Some("p2"),
            )),
        )
        .history(
            "C1",
            Some("p2"),
            Ok(page(
                vec![
                    message("C1", 40, "U2", "tab\there"),
                    message("C1", 50, "U1", "lunch"),
                    no_author("C1", 60, "bot post"),
                    joined("C1", 70),
                ],
                None,
            )),
        )
        .replies(
            "C1",
            20,
            None,
            Ok(page(
                vec![
                    parent("C1", 20, "U2", "question?", 2),
                    reply("C1", 25, 20, "U1", "answer"),
                    reply("C1", 27, 20, "U2", "thanks"),
                ],
                None,
            )),
        )
}

#[tokio::test]
async fn listing_walks_every_page_and_drops_duplicates() {
    engine_logging::initialize_for_tests();
    let source = busy_channel();
    let pacing = Pacing::unthrottled(fast_backoff(3));
    let ctx = HarvestContext::new(&source, &pacing);

    let messages = list_all(ctx, &window("C1")).await.unwrap();

    assert_eq!(messages.len(), 7);
    assert_eq!(
        source.calls(),
        vec![
            "history C1 None".to_string(),
            "history C1 Some(\"p2\")".to_string()
        ]
    );
}

#[tokio::test]
async fn listing_keeps_only_messages_inside_the_window() {
    engine_logging::initialize_for_tests();
    let before = Message {
        ts: MessageTs::parse(&format!("{}.999999", DAY_START - 1)).unwrap(),
        ..message("C1", 0, "U1", "late last night")
    };
    let next_day = message("C1", 86_400, "U1", "tomorrow");
    let source = ScriptedSource::new().history(
        "C1",
        None,
        Ok(page(
            vec![before, message("C1", 0, "U1", "midnight"), next_day],
            None,
        )),
    );
    let pacing = Pacing::unthrottled(fast_backoff(3));

    let messages = list_all(HarvestContext::new(&source, &pacing), &window("C1"))
        .await
        .unwrap();

    let texts: Vec<String> = messages.into_sorted().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["midnight".to_string()]);
}

#[tokio::test]
async fn repeated_cursor_ends_the_listing_with_an_error() {
    engine_logging::initialize_for_tests();
    let source = ScriptedSource::new()
        .history("C1", None, Ok(page(vec![message("C1", 10, "U1", "a")], Some("c1"))))
        .history("C1", Some("c1"), Ok(page(vec![message("C1", 20, "U1", "b")], Some("c1"))));
    let pacing = Pacing::unthrottled(fast_backoff(3));

    let err = list_all(HarvestContext::new(&source, &pacing), &window("C1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Request("cursor_loop".to_string()));
    assert_eq!(source.count("history"), 2);
}

#[tokio::test]
async fn channel_harvest_writes_sorted_rows_with_thread_links() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let source = busy_channel();
    let pacing = Pacing::unthrottled(fast_backoff(3));
    let ctx = HarvestContext::new(&source, &pacing);
    let writer = HarvestWriter::new(temp.path());
    let mut names = UserNameCache::new();
    let window = window("C1");

    let harvest = harvest_channel(ctx, &channel("C1", "general-note"), &window, &writer, &mut names)
        .await
        .unwrap();

    let expected_path = partition_path(temp.path(), &window);
    assert!(expected_path.ends_with("C1/2024/03/C1_2024-03-01.tsv"));
    assert_eq!(harvest.channel_name, "general");
    assert_eq!(
        harvest.outcome,
        ChannelOutcome::Written {
            path: expected_path.clone(),
            rows: 8
        }
    );
    assert!(harvest.failed_threads.is_empty());

    let content = fs::read_to_string(&expected_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 9);
    assert_eq!(
        lines[0],
        "timestamp_utc\tchannel_name\tuser_id\tuser_name\ttext\tthread_ts"
    );
    assert_eq!(
        lines[1],
        "2024-02-29T15:00:10.000100+00:00\tgeneral\tU1\tAnn\tmorning\t"
    );

    let rows: Vec<Vec<&str>> = lines[1..].iter().map(|l| l.split('\t').collect()).collect();
    assert!(rows.iter().all(|cells| cells.len() == 6));

    let stamps: Vec<&str> = rows.iter().map(|cells| cells[0]).collect();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted);

    let threaded: Vec<&Vec<&str>> = rows.iter().filter(|cells| !cells[5].is_empty()).collect();
    assert_eq!(threaded.len(), 2);
    assert!(threaded.iter().all(|cells| cells[5] == ts(20)));
    assert_eq!(threaded[0][4], "answer");

    assert!(content.contains("\tline one line two\t"));
    assert!(content.contains("\ttab here\t"));
    assert!(content.contains("\tN/A\tN/A\tbot post\t"));
    assert!(!content.contains("has joined"));
}

#[tokio::test]
async fn rewriting_the_same_window_is_byte_identical() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let source = busy_channel();
    let pacing = Pacing::unthrottled(fast_backoff(3));
    let ctx = HarvestContext::new(&source, &pacing);
    let writer = HarvestWriter::new(temp.path());
    let window = window("C1");
    let general = channel("C1", "");

    harvest_channel(ctx, &general, &window, &writer, &mut UserNameCache::new())
        .await
        .unwrap();
    let first = fs::read(partition_path(temp.path(), &window)).unwrap();

    harvest_channel(ctx, &general, &window, &writer, &mut UserNameCache::new())
        .await
        .unwrap();
    let second = fs::read(partition_path(temp.path(), &window)).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn failed_thread_is_skipped_and_others_survive() {
    engine_logging::initialize_for_tests();
    let source = ScriptedSource::new()
        .replies(
            "C1",
            10,
            None,
            Ok(page(vec![reply("C1", 11, 10, "U1", "partial")], Some("r2"))),
        )
        .replies(
            "C1",
            10,
            Some("r2"),
            Err(SourceError::new(
                FailureKind::Request("thread_not_found".into()),
                "thread_not_found",
            )),
        )
        .replies(
            "C1",
            20,
            None,
            Ok(page(
                vec![
                    parent("C1", 20, "U2", "second", 1),
                    reply("C1", 22, 20, "U1", "kept"),
                ],
                None,
            )),
        );
    let pacing = Pacing::unthrottled(fast_backoff(3));
    let top_level: MessageSet = vec![
        parent("C1", 10, "U1", "first", 1),
        parent("C1", 20, "U2", "second", 1),
    ]
    .into_iter()
    .collect();

    let expansion = expand_threads(HarvestContext::new(&source, &pacing), "C1", top_level).await;

    let first = MessageTs::parse(&ts(10)).unwrap();
    assert_eq!(expansion.failed_threads(), vec![first.clone()]);
    assert_eq!(expansion.outcomes.len(), 2);
    assert_eq!(expansion.outcomes[1].result, Ok(1));

    assert!(expansion.messages.contains(&first));
    assert!(!expansion.messages.contains(&MessageTs::parse(&ts(11)).unwrap()));
    assert!(expansion.messages.contains(&MessageTs::parse(&ts(22)).unwrap()));
    assert_eq!(expansion.messages.len(), 3);
}

#[tokio::test]
async fn channel_name_falls_back_to_label_then_id() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .history("C1", None, Ok(page(vec![message("C1", 5, "U1", "hi")], None)))
        .history("C2", None, Ok(page(vec![message("C2", 5, "U1", "hi")], None)))
        .user("U1", "Ann");
    let pacing = Pacing::unthrottled(fast_backoff(3));
    let ctx = HarvestContext::new(&source, &pacing);
    let writer = HarvestWriter::new(temp.path());
    let mut names = UserNameCache::new();

    let labelled = harvest_channel(ctx, &channel("C1", "ops-note"), &window("C1"), &writer, &mut names)
        .await
        .unwrap();
    let bare = harvest_channel(ctx, &channel("C2", ""), &window("C2"), &writer, &mut names)
        .await
        .unwrap();

    assert_eq!(labelled.channel_name, "ops-note");
    assert_eq!(bare.channel_name, "C2");
    assert_eq!(names.lookups(), 1);
}

#[tokio::test]
async fn empty_window_writes_nothing() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let source = ScriptedSource::new().channel("C1", "general");
    let pacing = Pacing::unthrottled(fast_backoff(3));
    let window = window("C1");

    let harvest = harvest_channel(
        HarvestContext::new(&source, &pacing),
        &channel("C1", ""),
        &window,
        &HarvestWriter::new(temp.path()),
        &mut UserNameCache::new(),
    )
    .await
    .unwrap();

    assert_eq!(harvest.outcome, ChannelOutcome::Empty);
    assert!(!partition_path(temp.path(), &window).exists());
    assert_eq!(source.count("replies"), 0);
}

#[tokio::test]
async fn unreadable_channel_is_reported_and_run_continues() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .channel("C2", "random")
        .user("U1", "Ann")
        .history(
            "C1",
            None,
            Err(SourceError::new(
                FailureKind::Auth("not_in_channel".into()),
                "not_in_channel",
            )),
        )
        .history("C2", None, Ok(page(vec![message("C2", 5, "U1", "hi")], None)));
    let pacing = Pacing::unthrottled(fast_backoff(3));
    let mut names = UserNameCache::new();

    let report = run_channels(
        HarvestContext::new(&source, &pacing),
        &[channel("C1", ""), channel("C2", "")],
        day(),
        jst(),
        &HarvestWriter::new(temp.path()),
        &mut names,
        std::time::Duration::ZERO,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].channel_id, "C1");
    assert!(report.failed[0].auth);
    assert_eq!(report.harvested.len(), 1);
    assert_eq!(report.harvested[0].channel_name, "random");
    // Fatal failures are not retried.
    assert_eq!(source.count("history C1"), 1);
}

#[tokio::test]
async fn cancelled_run_starts_no_channels() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let source = ScriptedSource::new();
    let pacing = Pacing::unthrottled(fast_backoff(3));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = run_channels(
        HarvestContext::new(&source, &pacing),
        &[channel("C1", ""), channel("C2", "")],
        day(),
        jst(),
        &HarvestWriter::new(temp.path()),
        &mut UserNameCache::new(),
        std::time::Duration::ZERO,
        &cancel,
    )
    .await;

    assert_eq!(report.skipped, vec!["C1".to_string(), "C2".to_string()]);
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn user_names_are_looked_up_once_and_fall_back_to_id() {
    engine_logging::initialize_for_tests();
    let source = ScriptedSource::new().user("U1", "Ann");
    let pacing = Pacing::unthrottled(fast_backoff(3));
    let ctx = HarvestContext::new(&source, &pacing);
    let mut names = UserNameCache::new();

    assert_eq!(names.resolve(ctx, "U1").await, "Ann");
    assert_eq!(names.resolve(ctx, "U1").await, "Ann");
    assert_eq!(names.resolve(ctx, "U404").await, "U404");
    assert_eq!(names.resolve(ctx, "U404").await, "U404");

    assert_eq!(names.lookups(), 2);
    assert_eq!(names.len(), 2);
    assert_eq!(source.count("user U1"), 1);
    assert_eq!(source.count("user U404"), 1);
}
