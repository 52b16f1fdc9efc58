use anyhow::Result;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::db::Preview;

const DETAIL_KEY: &str = "che168:detail_queue";
const LIST_KEY: &str = "che168:list_queue";

/// A unit of crawl work: either a list page index or a previously
/// discovered listing awaiting its detail pass.
#[derive(Debug)]
pub enum Task {
    List(u32),
    Detail(Preview),
}

/// Two FIFO lanes over Redis lists. Enqueue never blocks and never
/// deduplicates; the store's upsert absorbs duplicates. Pop is atomic
/// across worker processes, with no redelivery after a pop.
pub struct TaskQueue {
    conn: ConnectionManager,
}

impl TaskQueue {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub async fn enqueue_list(&mut self, page: u32) -> Result<()> {
        let _: () = redis::cmd("RPUSH")
            .arg(LIST_KEY)
            .arg(page)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    pub async fn enqueue_detail(&mut self, preview: &Preview) -> Result<()> {
        let _: () = redis::cmd("RPUSH")
            .arg(DETAIL_KEY)
            .arg(serde_json::to_string(preview)?)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    /// Block until a task is available on either lane or the timeout
    /// elapses. When both lanes hold work the detail lane wins, bounding
    /// queue growth from list-page fan-out.
    pub async fn dequeue_any(&mut self, timeout_secs: u64) -> Result<Option<Task>> {
        let reply: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(DETAIL_KEY)
            .arg(LIST_KEY)
            .arg(timeout_secs)
            .query_async(&mut self.conn)
            .await?;
        let Some((lane, payload)) = reply else {
            return Ok(None);
        };
        Ok(decode_task(&lane, &payload))
    }
}

fn decode_task(lane: &str, payload: &str) -> Option<Task> {
    let task = if lane == DETAIL_KEY {
        serde_json::from_str(payload).map(Task::Detail).ok()
    } else {
        payload.parse().map(Task::List).ok()
    };
    if task.is_none() {
        warn!(lane, payload, "dropping malformed queue payload");
    }
    task
}

// ── Tests ──
