use std::collections::VecDeque;

use crate::db::{CompositeKey, IndexName, KeyRange, Repository};
use crate::error::Result;

use super::PagingOptions;

/// One boundary handed out by `next`/`prev`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub value: Option<CompositeKey>,
    pub done: bool,
}

impl Step {
    fn key(key: CompositeKey) -> Self {
        Self {
            value: Some(key),
            done: false,
        }
    }

    fn done() -> Self {
        Self {
            value: None,
            done: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No call made in this direction yet.
    Idle,
    Growing,
    /// The last call in this direction found nothing new. A later call
    /// probes again, so new rows resume growth.
    Exhausted,
}

/// Hands out anchor keys of one index range one at a time, in traversal
/// order (`next`) or against it (`prev`), fetching anchors from the cursor
/// pager in batches as the pointers run out.
///
/// `anchors` is kept in traversal order. `next` returns `anchors[end]` and
/// advances `end`; `prev` returns `anchors[start - 1]` and retreats `start`.
/// Both pointers shift when anchors are prepended, so a key is never handed
/// out twice.
pub struct WindowController {
    repo: Repository,
    index: IndexName,
    range: KeyRange,
    reverse: bool,
    options: PagingOptions,
    anchors: VecDeque<CompositeKey>,
    start: usize,
    end: usize,
    forward: Progress,
    backward: Progress,
}

impl WindowController {
    pub fn new(
        repo: Repository,
        index: IndexName,
        range: KeyRange,
        reverse: bool,
        options: PagingOptions,
    ) -> Self {
        Self {
            repo,
            index,
            range: range.normalized(index),
            reverse,
            options,
            anchors: VecDeque::new(),
            start: 0,
            end: 0,
            forward: Progress::Idle,
            backward: Progress::Idle,
        }
    }

    pub fn index(&self) -> IndexName {
        self.index
    }

    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn anchors(&self) -> impl Iterator<Item = &CompositeKey> {
        self.anchors.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn forward_progress(&self) -> Progress {
        self.forward
    }

    pub fn backward_progress(&self) -> Progress {
        self.backward
    }

    /// The next boundary in traversal order.
    pub async fn next(&mut self) -> Result<Step> {
        if self.end >= self.anchors.len() {
            self.grow_forward().await?;
        }
        if self.end < self.anchors.len() {
            let key = self.anchors[self.end].clone();
            self.end += 1;
            self.forward = Progress::Growing;
            Ok(Step::key(key))
        } else {
            self.forward = Progress::Exhausted;
            Ok(Step::done())
        }
    }

    /// The next boundary against traversal order.
    pub async fn prev(&mut self) -> Result<Step> {
        if self.start == 0 {
            self.grow_backward().await?;
        }
        if self.start > 0 {
            self.start -= 1;
            self.backward = Progress::Growing;
            Ok(Step::key(self.anchors[self.start].clone()))
        } else {
            self.backward = Progress::Exhausted;
            Ok(Step::done())
        }
    }

    async fn grow_forward(&mut self) -> Result<()> {
        let last = self.anchors.back().cloned();
        let scan = match &last {
            Some(key) => self.toward_end(key),
            None => self.range.clone(),
        };
        let mut batch = self
            .repo
            .page_anchors(self.index, scan, self.reverse, self.options.page_size, self.batch_len(last.as_ref()))
            .await?;
        // The scan starts at the last anchor itself.
        if last.is_some() && batch.first() == last.as_ref() {
            batch.remove(0);
        }

        if batch.is_empty() {
            let terminal = self
                .repo
                .boundary_key(self.index, self.range.clone(), !self.reverse)
                .await?;
            if let Some(key) = terminal {
                if last.as_ref().map_or(true, |l| self.is_after(&key, l)) {
                    batch.push(key);
                }
            }
        }

        tracing::debug!("window {:?}: {} anchors appended", self.index, batch.len());
        self.anchors.extend(batch);
        Ok(())
    }

    async fn grow_backward(&mut self) -> Result<()> {
        let first = self.anchors.front().cloned();
        let scan = match &first {
            Some(key) => self.toward_start(key),
            // Nothing loaded yet: start from the far end of the range.
            None => self.range.clone(),
        };
        let mut batch = self
            .repo
            .page_anchors(self.index, scan, !self.reverse, self.options.page_size, self.batch_len(first.as_ref()))
            .await?;
        if first.is_some() && batch.first() == first.as_ref() {
            batch.remove(0);
        }

        if batch.is_empty() {
            let leading = self
                .repo
                .boundary_key(self.index, self.range.clone(), self.reverse)
                .await?;
            if let Some(key) = leading {
                if first.as_ref().map_or(true, |f| self.is_after(f, &key)) {
                    batch.push(key);
                }
            }
        }

        let count = batch.len();
        for key in batch {
            self.anchors.push_front(key);
        }
        self.start += count;
        self.end += count;
        tracing::debug!("window {:?}: {} anchors prepended", self.index, count);
        Ok(())
    }

    /// Anchors to request for one refill. A scan continuing from `edge`
    /// returns `edge` itself first, so it asks for one more.
    fn batch_len(&self, edge: Option<&CompositeKey>) -> usize {
        match edge {
            Some(_) => self.options.anchor_batch + 1,
            None => self.options.anchor_batch,
        }
    }

    /// Whether `a` comes after `b` in traversal order.
    fn is_after(&self, a: &CompositeKey, b: &CompositeKey) -> bool {
        if self.reverse {
            a < b
        } else {
            a > b
        }
    }

    /// From `key` (inclusive) to the end of the traversal.
    fn toward_end(&self, key: &CompositeKey) -> KeyRange {
        if self.reverse {
            KeyRange {
                upper: key.clone(),
                include_upper: true,
                ..self.range.clone()
            }
        } else {
            KeyRange {
                lower: key.clone(),
                include_lower: true,
                ..self.range.clone()
            }
        }
    }

    /// From the start of the traversal to `key` (inclusive).
    fn toward_start(&self, key: &CompositeKey) -> KeyRange {
        if self.reverse {
            KeyRange {
                lower: key.clone(),
                include_lower: true,
                ..self.range.clone()
            }
        } else {
            KeyRange {
                upper: key.clone(),
                include_upper: true,
                ..self.range.clone()
            }
        }
    }
}
