//! Append-only record of queue events, replayed on startup so pending
//! operations survive a restart.
//!
//! Each line is a JSON object carrying a format version and an `event` tag.
//! Replay also understands the plain-text log lines written by earlier
//! releases of the bot.

use crate::queue::{Operation, OperationQueue};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use pb_channels::UserId;
use pb_render::{RenderConfig, Shape};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    Enqueued {
        id: Uuid,
        user_id: UserId,
        image_path: PathBuf,
        config: RenderConfig,
        at: DateTime<Utc>,
    },
    Finished {
        id: Uuid,
        at: DateTime<Utc>,
    },
    Failed {
        id: Uuid,
        error: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JournalRecord {
    v: u32,
    #[serde(flatten)]
    event: JournalEvent,
}

pub struct Journal {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl Journal {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create journal dir {}", parent.display()))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("open journal {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, event: JournalEvent) -> Result<()> {
        let record = JournalRecord {
            v: JOURNAL_VERSION,
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn record_enqueued(&self, op: &Operation) -> Result<()> {
        self.append(JournalEvent::Enqueued {
            id: op.id,
            user_id: op.owner,
            image_path: op.image_path.clone(),
            config: op.config,
            at: op.enqueued_at,
        })
        .await
    }

    pub async fn record_finished(&self, id: Uuid) -> Result<()> {
        self.append(JournalEvent::Finished { id, at: Utc::now() })
            .await
    }

    pub async fn record_failed(&self, id: Uuid, error: &str) -> Result<()> {
        self.append(JournalEvent::Failed {
            id,
            error: error.to_string(),
            at: Utc::now(),
        })
        .await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub enqueued: usize,
    pub completed: usize,
    pub skipped: usize,
}

/// Rebuild the pending queue from the journal at `path`. A missing file is
/// an empty journal.
#[tracing::instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn replay(path: &Path, queue: &OperationQueue) -> Result<ReplaySummary> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ReplaySummary::default()),
        Err(e) => return Err(anyhow::anyhow!("read journal {}: {e}", path.display())),
    };

    let legacy = LegacyLog::new()?;
    let legacy_marker = legacy.completion_marker(&contents);
    let mut summary = ReplaySummary::default();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('{') {
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) if record.v == JOURNAL_VERSION => {
                    apply_event(queue, record.event, &mut summary);
                }
                Ok(record) => {
                    tracing::warn!(line = index + 1, version = record.v, "unknown journal version");
                    summary.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(line = index + 1, %e, "unreadable journal record");
                    summary.skipped += 1;
                }
            }
            continue;
        }

        match legacy.parse(line) {
            Some(LegacyEntry::Enqueued(op)) => {
                queue.enqueue(op);
                summary.enqueued += 1;
            }
            Some(LegacyEntry::Completed(marker)) if Some(marker) == legacy_marker => {
                if queue.dequeue().is_some() {
                    summary.completed += 1;
                } else {
                    tracing::warn!(line = index + 1, "legacy completion with empty queue");
                }
            }
            Some(LegacyEntry::Completed(_)) | None => {}
        }
    }

    tracing::info!(
        enqueued = summary.enqueued,
        completed = summary.completed,
        skipped = summary.skipped,
        pending = queue.len(),
        "journal replayed"
    );
    Ok(summary)
}

fn apply_event(queue: &OperationQueue, event: JournalEvent, summary: &mut ReplaySummary) {
    match event {
        JournalEvent::Enqueued {
            id,
            user_id,
            image_path,
            config,
            at,
        } => {
            queue.enqueue(Operation {
                id,
                owner: user_id,
                image_path,
                config,
                enqueued_at: at,
            });
            summary.enqueued += 1;
        }
        JournalEvent::Finished { id, .. } | JournalEvent::Failed { id, .. } => {
            match queue.dequeue() {
                Some(front) if front.id == id => {}
                Some(front) => {
                    tracing::warn!(expected = %id, found = %front.id, "journal id mismatch");
                }
                None => {
                    tracing::warn!(%id, "journal completion with empty queue");
                }
            }
            summary.completed += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyMarker {
    Sent,
    Finished,
}

#[derive(Debug)]
enum LegacyEntry {
    Enqueued(Operation),
    Completed(LegacyMarker),
}

/// Reader for the tab-separated text log of earlier releases.
struct LegacyLog {
    enqueued: Regex,
    completed: Regex,
}

impl LegacyLog {
    fn new() -> Result<Self> {
        Ok(Self {
            enqueued: Regex::new(
                r"^INFO\s+(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) Enqueued: user id (\d+) \| input (.+?) \| iterations=(\d+), shape=(\d+), alpha=(\d+), repeat=(\d+), resolution=(\d+), extension=(\w+)$",
            )?,
            completed: Regex::new(r"^INFO\s+\S+ \S+ (Sent|Finished): user id \d+")?,
        })
    }

    /// Older logs record both a `Finished:` and a `Sent:` line per job;
    /// whichever comes first in the file marks completion.
    fn completion_marker(&self, contents: &str) -> Option<LegacyMarker> {
        contents.lines().find_map(|line| match self.parse_completed(line.trim()) {
            Some(LegacyEntry::Completed(marker)) => Some(marker),
            _ => None,
        })
    }

    fn parse(&self, line: &str) -> Option<LegacyEntry> {
        if let Some(caps) = self.enqueued.captures(line) {
            let at = NaiveDateTime::parse_from_str(&caps[1], "%Y/%m/%d %H:%M:%S")
                .map(|t| t.and_utc())
                .unwrap_or_else(|_| Utc::now());
            let config = RenderConfig {
                iterations: caps[4].parse().ok()?,
                shape: Shape::from_index(caps[5].parse().ok()?)?,
                alpha: caps[6].parse().ok()?,
                repeat: caps[7].parse().ok()?,
                output_size: caps[8].parse().ok()?,
                extension: caps[9].parse().ok()?,
            };
            return Some(LegacyEntry::Enqueued(Operation {
                id: Uuid::new_v4(),
                owner: UserId::new(caps[2].parse().ok()?),
                image_path: PathBuf::from(&caps[3]),
                config,
                enqueued_at: at,
            }));
        }
        self.parse_completed(line)
    }

    fn parse_completed(&self, line: &str) -> Option<LegacyEntry> {
        let caps = self.completed.captures(line)?;
        let marker = match &caps[1] {
            "Sent" => LegacyMarker::Sent,
            _ => LegacyMarker::Finished,
        };
        Some(LegacyEntry::Completed(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn replay_text(text: &str) -> (OperationQueue, ReplaySummary) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queue.journal");
        tokio::fs::write(&path, text).await.unwrap();
        let queue = OperationQueue::new();
        let summary = replay(&path, &queue).await.unwrap();
        (queue, summary)
    }

    fn summary_of(queue: &OperationQueue) -> Vec<(i64, u32, Shape)> {
        queue
            .snapshot()
            .into_iter()
            .map(|op| (op.owner.get(), op.config.iterations, op.config.shape))
            .collect()
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_journal() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = OperationQueue::new();
        let summary = replay(&tmp.path().join("absent"), &queue).await.unwrap();
        assert_eq!(summary, ReplaySummary::default());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn structured_records_round_trip_through_replay() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("queue.journal");
        let journal = Journal::open(&path).await.unwrap();

        let first = Operation::new(UserId::new(1), "inputs/a.jpg", RenderConfig::default());
        let second = Operation::new(
            UserId::new(2),
            "inputs/b.jpg",
            RenderConfig {
                shape: Shape::Circle,
                ..RenderConfig::default()
            },
        );
        let third = Operation::new(UserId::new(1), "inputs/c.jpg", RenderConfig::default());
        journal.record_enqueued(&first).await.unwrap();
        journal.record_enqueued(&second).await.unwrap();
        journal.record_finished(first.id).await.unwrap();
        journal.record_enqueued(&third).await.unwrap();
        journal.record_failed(second.id, "exit status 1").await.unwrap();

        let queue = OperationQueue::new();
        let summary = replay(&path, &queue).await.unwrap();
        assert_eq!(summary.enqueued, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(queue.snapshot(), vec![third]);
    }

    #[tokio::test]
    async fn records_are_versioned_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queue.journal");
        let journal = Journal::open(&path).await.unwrap();
        let op = Operation::new(UserId::new(9), "inputs/z.jpg", RenderConfig::default());
        journal.record_enqueued(&op).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["event"], "enqueued");
        assert_eq!(value["user_id"], 9);
        assert_eq!(value["config"]["extension"], "jpg");
    }

    #[tokio::test]
    async fn garbage_and_unknown_versions_are_skipped() {
        let (queue, summary) = replay_text(
            "{not json\n{\"v\":2,\"event\":\"finished\",\"id\":\"00000000-0000-0000-0000-000000000000\",\"at\":\"2021-05-23T16:00:42Z\"}\nplain words\n",
        )
        .await;
        assert!(queue.is_empty());
        assert_eq!(summary.skipped, 2);
    }

    #[tokio::test]
    async fn legacy_log_with_one_pending_operation() {
        let (queue, _) = replay_text(
            "
INFO\t2021/05/23 16:00:42 Starting to listen for updates...
INFO\t2021/05/23 16:00:48 Message: text '' from the user 'Kir' with the ID '295434263'
INFO\t2021/05/23 16:00:49 Callback Query: data '/create' from the user 'Kir' with the ID '295434263'
INFO\t2021/05/23 16:00:49 Enqueued: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | iterations=200, shape=0, alpha=128, repeat=1, resolution=1280, extension=jpg
INFO\t2021/05/23 16:00:49 Creating: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | output outputs/295434263_1621774849.jpg | iterations=200, shape=0, alpha=128, repeat=1, resolution=1280, extension=jpg
",
        )
        .await;
        let ops = queue.snapshot();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].owner, UserId::new(295434263));
        assert_eq!(
            ops[0].image_path,
            PathBuf::from("inputs/AQADntiNoi4AAwSIAgAB.jpg")
        );
        assert_eq!(ops[0].config, RenderConfig::default());
        assert_eq!(
            ops[0].enqueued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2021-05-23 16:00:49"
        );
    }

    #[tokio::test]
    async fn legacy_finished_and_sent_complete_once() {
        let (queue, _) = replay_text(
            "
INFO\t2021/05/23 16:45:06 Starting to listen for updates...
INFO\t2021/05/23 16:45:23 Enqueued: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | iterations=10, shape=0, alpha=128, repeat=1, resolution=1280, extension=jpg
INFO\t2021/05/23 16:45:23 Creating: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | output outputs/295434263_1621777523.jpg | iterations=200, shape=0, alpha=128, repeat=1, resolution=1280, extension=jpg
INFO\t2021/05/23 16:45:24 Enqueued: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | iterations=20, shape=2, alpha=128, repeat=1, resolution=1280, extension=jpg
INFO\t2021/05/23 16:45:25 Enqueued: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | iterations=30, shape=1, alpha=128, repeat=1, resolution=1280, extension=jpg
INFO\t2021/05/23 16:49:12 Finished: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | output outputs/295434263_1621774849.jpg | 5.1 seconds
INFO\t2021/05/23 16:49:20 Sent: user id 295434263 | output outputs/295434263_1621774849.jpg
",
        )
        .await;
        assert_eq!(
            summary_of(&queue),
            vec![
                (295434263, 20, Shape::Rectangle),
                (295434263, 30, Shape::Triangle),
            ]
        );
    }

    #[tokio::test]
    async fn legacy_log_with_everything_finished() {
        let (queue, summary) = replay_text(
            "
INFO\t2021/05/23 16:54:21 Enqueued: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | iterations=10, shape=0, alpha=128, repeat=1, resolution=1280, extension=jpg
INFO\t2021/05/23 16:54:22 Callback Query: data '/shape' from the user 'Kir' with the ID '295434263'
INFO\t2021/05/23 16:54:24 Finished: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | output outputs/295434263_1621778062.jpg | 1.7 seconds
INFO\t2021/05/23 16:54:24 Sent: user id 295434263 | output outputs/295434263_1621778062.jpg
INFO\t2021/05/23 16:54:27 Enqueued: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | iterations=10, shape=1, alpha=128, repeat=1, resolution=1280, extension=jpg
INFO\t2021/05/23 16:54:29 Finished: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | output outputs/295434263_1621778068.jpg | 1.4 seconds
INFO\t2021/05/23 16:54:30 Callback Query: data '/shape/6' from the user 'Kir' with the ID '295434263'
INFO\t2021/05/23 16:54:30 Sent: user id 295434263 | output outputs/295434263_1621778068.jpg
INFO\t2021/05/23 16:54:32 Enqueued: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | iterations=10, shape=6, alpha=128, repeat=1, resolution=1280, extension=jpg
INFO\t2021/05/23 16:54:33 Finished: user id 295434263 | input inputs/AQADntiNoi4AAwSIAgAB.jpg | output outputs/295434263_1621778072.jpg | 1.0 seconds
INFO\t2021/05/23 16:54:33 Sent: user id 295434263 | output outputs/295434263_1621778072.jpg
",
        )
        .await;
        assert!(queue.is_empty());
        assert_eq!(summary.enqueued, 3);
        assert_eq!(summary.completed, 3);
    }

    #[tokio::test]
    async fn legacy_sent_only_logs_complete_on_sent() {
        let (queue, _) = replay_text(
            "INFO\t2021/05/23 16:00:49 Enqueued: user id 1 | input inputs/a.jpg | iterations=200, shape=0, alpha=128, repeat=1, resolution=1280, extension=png
INFO\t2021/05/23 16:00:50 Enqueued: user id 2 | input inputs/b.jpg | iterations=200, shape=3, alpha=0, repeat=2, resolution=512, extension=svg
INFO\t2021/05/23 16:00:55 Sent: user id 1 | output outputs/1_1621774849.png
",
        )
        .await;
        let ops = queue.snapshot();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].owner, UserId::new(2));
        assert_eq!(ops[0].config.shape, Shape::Ellipse);
        assert_eq!(ops[0].config.repeat, 2);
        assert_eq!(ops[0].config.output_size, 512);
    }
}
