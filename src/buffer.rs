//! Content store. `Buffer` is the trait the algorithm applies operations
//! against; `TextBuffer` is the reference implementation used by tests and
//! the CLI. Notifications mirror the original's `insert-text`/`erase-text`
//! signals (`inf-text-buffer.c`): synchronous callbacks carrying the
//! affected range and the acting user, fired from the task that owns the
//! buffer.

use crate::chunk::{Chunk, Segment};
use crate::error::BufferError;

/// Semantic container of text with per-segment authorship.
pub trait Buffer {
    fn length(&self) -> usize;
    fn slice(&self, pos: usize, len: usize) -> Result<Chunk, BufferError>;
    fn insert_chunk(&mut self, pos: usize, chunk: Chunk, user: u32) -> Result<(), BufferError>;
    fn erase(&mut self, pos: usize, len: usize, user: u32) -> Result<Chunk, BufferError>;
    fn is_modified(&self) -> bool;
    fn clear_modified(&mut self);
}

/// Notification payload for an applied insert, mirroring the `insert-text`
/// signal.
#[derive(Debug, Clone)]
pub struct InsertNotification {
    pub pos: usize,
    pub chunk: Chunk,
    pub user: u32,
}

/// Notification payload for an applied erase, mirroring the `erase-text`
/// signal.
#[derive(Debug, Clone)]
pub struct EraseNotification {
    pub pos: usize,
    pub len: usize,
    pub user: u32,
}

type InsertListener = Box<dyn FnMut(&InsertNotification)>;
type EraseListener = Box<dyn FnMut(&EraseNotification)>;

/// An append-structured, arbitrary-content ordered list of authored
/// segments. Insertion splits a segment if needed and may merge the new
/// text into an adjacent same-author segment (delegated to `Chunk`'s
/// RLE-compacting push).
#[derive(Default)]
pub struct TextBuffer {
    content: Chunk,
    modified: bool,
    on_insert: Vec<InsertListener>,
    on_erase: Vec<EraseListener>,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_insert_text(&mut self, listener: impl FnMut(&InsertNotification) + 'static) {
        self.on_insert.push(Box::new(listener));
    }

    pub fn on_erase_text(&mut self, listener: impl FnMut(&EraseNotification) + 'static) {
        self.on_erase.push(Box::new(listener));
    }

    pub fn to_text(&self) -> String {
        self.content.to_text()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.content.segments()
    }
}

impl Buffer for TextBuffer {
    fn length(&self) -> usize {
        self.content.len()
    }

    fn slice(&self, pos: usize, len: usize) -> Result<Chunk, BufferError> {
        if pos + len > self.content.len() {
            return Err(BufferError::OutOfRange { pos, len });
        }
        Ok(self.content.sub_slice(pos, len))
    }

    fn insert_chunk(&mut self, pos: usize, chunk: Chunk, user: u32) -> Result<(), BufferError> {
        if pos > self.content.len() {
            return Err(BufferError::OutOfRange { pos, len: 0 });
        }
        let before = self.content.sub_slice(0, pos);
        let after = self.content.sub_slice(pos, self.content.len() - pos);
        self.content = before.concat(chunk.clone()).concat(after);
        self.modified = true;
        let notification = InsertNotification { pos, chunk, user };
        for listener in &mut self.on_insert {
            listener(&notification);
        }
        Ok(())
    }

    fn erase(&mut self, pos: usize, len: usize, user: u32) -> Result<Chunk, BufferError> {
        if pos + len > self.content.len() {
            return Err(BufferError::OutOfRange { pos, len });
        }
        let removed = self.content.sub_slice(pos, len);
        let before = self.content.sub_slice(0, pos);
        let after = self.content.sub_slice(pos + len, self.content.len() - pos - len);
        self.content = before.concat(after);
        self.modified = true;
        let notification = EraseNotification { pos, len, user };
        for listener in &mut self.on_erase {
            listener(&notification);
        }
        Ok(removed)
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn clear_modified(&mut self) {
        self.modified = false;
    }
}
