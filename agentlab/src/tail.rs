//! Cursor-based tailing of event and message streams.
//!
//! The first fetch asks for the `tail` most recent items; follow mode then
//! polls with `after=<cursor>&limit=<limit>`. The cursor only moves forward:
//! it is the maximum of every emitted id and the server's `last_id`.

use agentlab_common::endpoint::Query;
use agentlab_common::protocol::{EventsResponse, MessagesResponse};
use agentlab_common::{Event, Message};
use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::context::{Interrupted, RequestContext};
use crate::transport::{ApiError, Client, api_path};

pub const DEFAULT_TAIL: u32 = 50;
pub const DEFAULT_LIMIT: u32 = 200;
pub const MAX_PAGE: u32 = 1000;
pub const FOLLOW_INTERVAL: Duration = Duration::from_secs(2);

/// One page of a stream.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub last_id: Option<i64>,
}

pub trait TailItem: Serialize {
    fn id(&self) -> i64;
}

impl TailItem for Event {
    fn id(&self) -> i64 {
        self.id
    }
}

impl TailItem for Message {
    fn id(&self) -> i64 {
        self.id
    }
}

/// A paginated stream the tailer can poll.
#[allow(async_fn_in_trait)]
pub trait TailSource {
    type Item: TailItem;

    async fn fetch_tail(&self, ctx: &RequestContext, tail: u32)
    -> Result<Page<Self::Item>, ApiError>;

    async fn fetch_after(
        &self,
        ctx: &RequestContext,
        after: i64,
        limit: u32,
    ) -> Result<Page<Self::Item>, ApiError>;
}

/// Monotonic stream position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor(Option<i64>);

impl Cursor {
    pub fn position(&self) -> Option<i64> {
        self.0
    }

    /// Keep items strictly past the cursor and advance it.
    pub fn advance<T: TailItem>(&mut self, page: Page<T>) -> Vec<T> {
        let fresh: Vec<T> = page
            .items
            .into_iter()
            .filter(|item| self.0.is_none_or(|c| item.id() > c))
            .collect();
        let newest = fresh.iter().map(TailItem::id).chain(page.last_id).max();
        if let Some(newest) = newest {
            self.0 = Some(self.0.map_or(newest, |c| c.max(newest)));
        }
        fresh
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TailOptions {
    pub tail: u32,
    pub limit: u32,
    pub follow: bool,
    pub interval: Duration,
}

impl TailOptions {
    /// Apply defaults and clamp both sizes to the server cap.
    pub fn new(tail: Option<u32>, limit: Option<u32>, follow: bool) -> Self {
        Self {
            tail: tail.unwrap_or(DEFAULT_TAIL).min(MAX_PAGE),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_PAGE),
            follow,
            interval: FOLLOW_INTERVAL,
        }
    }
}

/// Emit the initial batch, then poll until cancelled when following.
/// Cancellation ends a follow without error.
pub async fn run_tail<S, F>(
    source: &S,
    ctx: &RequestContext,
    opts: TailOptions,
    mut emit: F,
) -> Result<Cursor>
where
    S: TailSource,
    F: FnMut(&S::Item) -> Result<()>,
{
    let mut cursor = Cursor::default();
    let first = source.fetch_tail(ctx, opts.tail).await?;
    for item in cursor.advance(first) {
        emit(&item)?;
    }
    if !opts.follow {
        return Ok(cursor);
    }

    loop {
        match ctx.sleep(opts.interval).await {
            Ok(()) => {}
            Err(Interrupted::Canceled) => return Ok(cursor),
            Err(Interrupted::DeadlineExceeded) => return Ok(cursor),
        }
        let page = match cursor.position() {
            Some(after) => source.fetch_after(ctx, after, opts.limit).await,
            None => source.fetch_tail(ctx, opts.tail).await,
        };
        let page = match page {
            Ok(page) => page,
            Err(ApiError::Canceled { .. }) => return Ok(cursor),
            Err(e) => return Err(e.into()),
        };
        let fresh = cursor.advance(page);
        debug!("tail poll: {} new, cursor {:?}", fresh.len(), cursor.position());
        for item in fresh {
            emit(&item)?;
        }
    }
}

// =============================================================================
// Sources
// =============================================================================

/// `/v1/sandboxes/{vmid}/events`.
pub struct SandboxEvents<'a> {
    pub client: &'a Client,
    pub vmid: u32,
}

impl TailSource for SandboxEvents<'_> {
    type Item = Event;

    async fn fetch_tail(&self, ctx: &RequestContext, tail: u32) -> Result<Page<Event>, ApiError> {
        let path = api_path("/v1/sandboxes", &[&self.vmid.to_string(), "events"])?;
        let resp: EventsResponse = self
            .client
            .get(ctx, &Query::new().push("tail", tail).apply(&path))
            .await?;
        Ok(Page {
            items: resp.events,
            last_id: resp.last_id,
        })
    }

    async fn fetch_after(
        &self,
        ctx: &RequestContext,
        after: i64,
        limit: u32,
    ) -> Result<Page<Event>, ApiError> {
        let path = api_path("/v1/sandboxes", &[&self.vmid.to_string(), "events"])?;
        let query = Query::new().push("after", after).push("limit", limit);
        let resp: EventsResponse = self.client.get(ctx, &query.apply(&path)).await?;
        Ok(Page {
            items: resp.events,
            last_id: resp.last_id,
        })
    }
}

/// `/v1/messages` scoped to one job, workspace or session.
pub struct ScopedMessages<'a> {
    pub client: &'a Client,
    pub scope_type: &'static str,
    pub scope_id: String,
}

impl ScopedMessages<'_> {
    fn query(&self) -> Query {
        Query::new()
            .push("scope_type", self.scope_type)
            .push("scope_id", &self.scope_id)
    }
}

impl TailSource for ScopedMessages<'_> {
    type Item = Message;

    async fn fetch_tail(
        &self,
        ctx: &RequestContext,
        tail: u32,
    ) -> Result<Page<Message>, ApiError> {
        let path = self.query().push("tail", tail).apply("/v1/messages");
        let resp: MessagesResponse = self.client.get(ctx, &path).await?;
        Ok(Page {
            items: resp.messages,
            last_id: resp.last_id,
        })
    }

    async fn fetch_after(
        &self,
        ctx: &RequestContext,
        after: i64,
        limit: u32,
    ) -> Result<Page<Message>, ApiError> {
        let path = self
            .query()
            .push("after", after)
            .push("limit", limit)
            .apply("/v1/messages");
        let resp: MessagesResponse = self.client.get(ctx, &path).await?;
        Ok(Page {
            items: resp.messages,
            last_id: resp.last_id,
        })
    }
}

/// `ts\tkind\tjob\tmsg`.
pub fn format_event(event: &Event) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        event.timestamp,
        event.kind,
        event.job_id.as_deref().unwrap_or("-"),
        event.message
    )
}

/// `ts\tkind\tauthor\ttext`.
pub fn format_message(message: &Message) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        message.timestamp,
        if message.kind.is_empty() { "-" } else { &message.kind },
        if message.author.is_empty() { "-" } else { &message.author },
        message.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    fn event(id: i64) -> Event {
        Event {
            id,
            timestamp: format!("2026-01-01T00:00:{:02}Z", id % 60),
            kind: "sandbox.state".into(),
            sandbox_vmid: Some(9001),
            job_id: None,
            message: format!("event {id}"),
            payload: None,
        }
    }

    /// In-memory stream that serves `after`/`tail` the way the daemon does.
    struct MemorySource {
        events: Vec<Event>,
        calls: Mutex<Vec<String>>,
    }

    impl TailSource for MemorySource {
        type Item = Event;

        async fn fetch_tail(&self, _: &RequestContext, tail: u32) -> Result<Page<Event>, ApiError> {
            self.calls.lock().unwrap().push(format!("tail={tail}"));
            let start = self.events.len().saturating_sub(tail as usize);
            Ok(Page {
                items: self.events[start..].to_vec(),
                last_id: self.events.last().map(|e| e.id),
            })
        }

        async fn fetch_after(
            &self,
            _: &RequestContext,
            after: i64,
            limit: u32,
        ) -> Result<Page<Event>, ApiError> {
            self.calls.lock().unwrap().push(format!("after={after}&limit={limit}"));
            Ok(Page {
                items: self
                    .events
                    .iter()
                    .filter(|e| e.id > after)
                    .take(limit as usize)
                    .cloned()
                    .collect(),
                last_id: self.events.last().map(|e| e.id),
            })
        }
    }

    #[test]
    fn test_tail_options_clamp() {
        let opts = TailOptions::new(None, None, false);
        assert_eq!((opts.tail, opts.limit), (DEFAULT_TAIL, DEFAULT_LIMIT));
        let opts = TailOptions::new(Some(5000), Some(0), true);
        assert_eq!((opts.tail, opts.limit), (MAX_PAGE, 1));
    }

    #[test]
    fn test_cursor_uses_server_last_id() {
        let mut cursor = Cursor::default();
        let fresh = cursor.advance(Page {
            items: vec![event(3), event(4)],
            last_id: Some(10),
        });
        assert_eq!(fresh.len(), 2);
        assert_eq!(cursor.position(), Some(10));

        let fresh = cursor.advance(Page {
            items: vec![event(4), event(11)],
            last_id: Some(5),
        });
        assert_eq!(fresh.iter().map(|e| e.id).collect::<Vec<_>>(), vec![11]);
        assert_eq!(cursor.position(), Some(11));
    }

    #[tokio::test]
    async fn test_run_tail_without_follow() {
        let source = MemorySource {
            events: (1..=5).map(event).collect(),
            calls: Mutex::new(Vec::new()),
        };
        let mut seen = Vec::new();
        let cursor = run_tail(
            &source,
            &RequestContext::default(),
            TailOptions::new(Some(2), None, false),
            |e| {
                seen.push(e.id);
                Ok(())
            },
        )
        .await
        .unwrap();
        assert_eq!(seen, vec![4, 5]);
        assert_eq!(cursor.position(), Some(5));
        assert_eq!(*source.calls.lock().unwrap(), vec!["tail=2"]);
    }

    #[tokio::test]
    async fn test_follow_stops_cleanly_on_cancel() {
        let source = MemorySource {
            events: (1..=3).map(event).collect(),
            calls: Mutex::new(Vec::new()),
        };
        let token = CancellationToken::new();
        let ctx = RequestContext::new(token.clone());
        let mut opts = TailOptions::new(Some(10), Some(50), true);
        opts.interval = Duration::from_millis(10);

        let canceller = token.clone();
        let mut seen = Vec::new();
        let cursor = run_tail(&source, &ctx, opts, |e| {
            seen.push(e.id);
            if seen.len() == 3 {
                canceller.cancel();
            }
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(cursor.position(), Some(3));
    }

    #[test]
    fn test_format_lines() {
        let mut e = event(7);
        e.job_id = Some("job_1".into());
        assert_eq!(
            format_event(&e),
            "2026-01-01T00:00:07Z\tsandbox.state\tjob_1\tevent 7"
        );
    }

    proptest! {
        #[test]
        fn prop_cursor_is_max_and_never_repeats(
            pages in prop::collection::vec(
                (prop::collection::vec(0i64..200, 0..8), prop::option::of(0i64..200)),
                1..6,
            )
        ) {
            let mut cursor = Cursor::default();
            let mut emitted: Vec<i64> = Vec::new();
            let mut max_seen: Option<i64> = None;
            for (ids, last_id) in pages {
                let mut ids = ids;
                ids.sort_unstable();
                ids.dedup();
                let before = cursor.position();
                let fresh = cursor.advance(Page { items: ids.iter().map(|&i| event(i)).collect(), last_id });
                for e in &fresh {
                    prop_assert!(before.is_none_or(|b| e.id > b));
                    prop_assert!(!emitted.contains(&e.id));
                    emitted.push(e.id);
                }
                max_seen = fresh.iter().map(|e| e.id).chain(last_id).chain(max_seen).max();
                prop_assert!(cursor.position() >= before);
                prop_assert_eq!(cursor.position(), max_seen);

                let replay = cursor.advance(Page { items: ids.iter().map(|&i| event(i)).collect(), last_id });
                prop_assert!(replay.is_empty());
            }
        }
    }
}
