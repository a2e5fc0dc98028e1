//! Transformable, invertible edits against a [`crate::buffer::Buffer`].
//!
//! This is naturally a sum type with a handful of variants, and
//! operation-vs-operation transformation is a small matrix - encoded
//! directly as a match rather than through double dispatch.

use crate::buffer::Buffer;
use crate::chunk::Chunk;
use crate::error::BufferError;
use crate::state_vector::StateVector;

/// Tie-break result for two concurrent inserts that land on the same
/// position. `ThisSide` / `OtherSide` name the two sides of
/// `Operation::transform(self, against, cid)`: `OtherSide` means `self` wins
/// the left slot (stays put); `ThisSide` means `against` wins it and `self`
/// shifts right. (Named `ThisSide`/`OtherSide` rather than `Self`/`Other`
/// because `Self` is a reserved identifier in Rust.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyId {
    ThisSide,
    OtherSide,
}

/// Resolve the tie-break deterministically: the side with the
/// lexicographically smaller request-vector wins the left slot, ties
/// broken by issuer id. Called from both sides of a
/// concurrent pair, each with its own operation as "this" - the result is
/// symmetric (if A sees itself winning, B sees itself losing).
pub fn resolve_concurrency_id(
    this_vector: &StateVector,
    this_issuer: u32,
    other_vector: &StateVector,
    other_issuer: u32,
) -> ConcurrencyId {
    use std::cmp::Ordering;
    match this_vector.compare(other_vector) {
        Ordering::Less => ConcurrencyId::OtherSide,
        Ordering::Greater => ConcurrencyId::ThisSide,
        Ordering::Equal => {
            if this_issuer < other_issuer {
                ConcurrencyId::OtherSide
            } else {
                ConcurrencyId::ThisSide
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOp {
    pub pos: usize,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOp {
    pub pos: usize,
    pub len: usize,
    /// `None` until reversibility promotion fills it in from the buffer's
    /// projection at application time.
    pub chunk: Option<Chunk>,
}

impl DeleteOp {
    pub fn new(pos: usize, len: usize) -> Self {
        Self { pos, len, chunk: None }
    }

    pub fn with_chunk(pos: usize, chunk: Chunk) -> Self {
        Self { pos, len: chunk.len(), chunk: Some(chunk) }
    }

    fn sub(&self, offset: usize, len: usize) -> DeleteOp {
        let chunk = self.chunk.as_ref().map(|c| c.sub_slice(offset, len));
        DeleteOp { pos: self.pos + offset, len, chunk }
    }
}

/// A value type: the concrete operation kinds the engine knows about, plus
/// `Composite`, used only to represent a Delete that a concurrent edit has
/// split into two disjoint remaining pieces. A dedicated composite form is
/// preferred here over re-ordering pieces on the fly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert(InsertOp),
    Delete(DeleteOp),
    /// Two or more Deletes that must be applied in order; never produced
    /// with fewer than two elements (a single element is always
    /// flattened back to a plain `Delete`, and zero collapses to `NoOp`).
    Composite(Vec<Operation>),
    NoOp,
}

impl Operation {
    pub fn insert(pos: usize, chunk: Chunk) -> Self {
        Operation::Insert(InsertOp { pos, chunk })
    }

    pub fn delete(pos: usize, len: usize) -> Self {
        Operation::Delete(DeleteOp::new(pos, len))
    }

    /// True if applying this operation mutates the buffer (used to decide
    /// whether to advance the issuer's `current` counter).
    pub fn affects_buffer(&self) -> bool {
        match self {
            Operation::Insert(op) => !op.chunk.is_empty(),
            Operation::Delete(op) => op.len > 0,
            Operation::Composite(ops) => ops.iter().any(Operation::affects_buffer),
            Operation::NoOp => false,
        }
    }

    /// True only for an `Insert` whose payload chunk is fully known, or a
    /// `Delete`/`Composite` whose removed chunk(s) are all known.
    pub fn is_reversible(&self) -> bool {
        match self {
            Operation::Insert(_) => true,
            Operation::Delete(op) => op.chunk.is_some() || op.len == 0,
            Operation::Composite(ops) => ops.iter().all(Operation::is_reversible),
            Operation::NoOp => true,
        }
    }

    /// Only Insert-vs-Insert at equal positions needs a tie-break.
    pub fn need_concurrency_id(&self, against: &Operation) -> bool {
        matches!(
            (self, against),
            (Operation::Insert(a), Operation::Insert(b)) if a.pos == b.pos && !a.chunk.is_empty() && !b.chunk.is_empty()
        )
    }

    /// Apply this operation to `buffer`. Returns the chunk actually removed
    /// (for a Delete/Composite, used to promote the request to reversible)
    /// or `None` (Insert, NoOp never remove anything).
    pub fn apply(&self, buffer: &mut dyn Buffer, user: u32) -> Result<Option<Chunk>, BufferError> {
        match self {
            Operation::Insert(op) => {
                if !op.chunk.is_empty() {
                    buffer.insert_chunk(op.pos, op.chunk.clone(), user)?;
                }
                Ok(None)
            }
            Operation::Delete(op) => {
                if op.len == 0 {
                    return Ok(None);
                }
                let removed = buffer.erase(op.pos, op.len, user)?;
                Ok(Some(removed))
            }
            Operation::Composite(ops) => {
                // All pieces are the same kind (a transform-produced
                // Composite is all Deletes; `revert`ing one produces all
                // Inserts), and all share one coordinate frame, so applying
                // them in declared order would need every later piece's
                // `pos` compensated for however much an earlier piece
                // already shifted the buffer (see
                // `composite_apply_order_is_descending`'s doc comment).
                // Deletes need right-to-left (removing from
                // the right never moves anything still to be removed to its
                // left); Inserts need the opposite, left-to-right (each
                // insert's declared `pos` already assumes the lower-pos
                // pieces landed first and pushed it forward).
                let mut order: Vec<usize> = (0..ops.len()).collect();
                if composite_apply_order_is_descending(ops) {
                    order.sort_by_key(|&i| std::cmp::Reverse(op_pos(&ops[i])));
                } else {
                    order.sort_by_key(|&i| op_pos(&ops[i]));
                }
                let mut removed_by_index: Vec<Option<Chunk>> = vec![None; ops.len()];
                for i in order {
                    removed_by_index[i] = ops[i].apply(buffer, user)?;
                }
                let mut removed = Chunk::new();
                for piece in removed_by_index {
                    if let Some(piece) = piece {
                        removed = removed.concat(piece);
                    }
                }
                Ok(Some(removed))
            }
            Operation::NoOp => Ok(None),
        }
    }

    /// Fill in an as-yet-unknown Delete/Composite payload from the chunk
    /// that `apply` just removed. A no-op for Insert/NoOp and for an
    /// already-reversible Delete.
    pub fn make_reversible(&mut self, removed: Option<Chunk>) {
        match (self, removed) {
            (Operation::Delete(op), Some(chunk)) if op.chunk.is_none() => {
                op.chunk = Some(chunk);
            }
            (Operation::Composite(ops), Some(chunk)) => {
                // Re-distribute the stitched removed chunk back across the
                // pieces in order, matching each piece's declared length.
                let mut offset = 0;
                for op in ops {
                    if let Operation::Delete(d) = op {
                        if d.chunk.is_none() {
                            d.chunk = Some(chunk.sub_slice(offset, d.len));
                        }
                    }
                    offset += op_len(op);
                }
            }
            _ => {}
        }
    }

    /// The inverse of a reversible operation. `None` if not reversible.
    pub fn revert(&self) -> Option<Operation> {
        match self {
            Operation::Insert(op) => Some(Operation::Delete(DeleteOp::with_chunk(op.pos, op.chunk.clone()))),
            Operation::Delete(op) => {
                let chunk = op.chunk.clone()?;
                Some(Operation::Insert(InsertOp { pos: op.pos, chunk }))
            }
            Operation::Composite(ops) => {
                // Stitch c1, c2, ... back together into one insert at the
                // position of the first piece.
                let mut pos = None;
                let mut stitched = Chunk::new();
                for op in ops {
                    let Operation::Delete(d) = op else { return None };
                    let chunk = d.chunk.clone()?;
                    if pos.is_none() {
                        pos = Some(d.pos);
                    }
                    stitched = stitched.concat(chunk);
                }
                Some(Operation::Insert(InsertOp { pos: pos?, chunk: stitched }))
            }
            Operation::NoOp => Some(Operation::NoOp),
        }
    }

    /// Transform `self` (recorded at some earlier state) past a concurrent
    /// `against` (already applied), per the transform matrix below. `cid`
    /// is only consulted for the Insert-vs-Insert same-position case; pass
    /// any value when `need_concurrency_id` would be false.
    pub fn transform(&self, against: &Operation, cid: ConcurrencyId) -> Operation {
        match (self, against) {
            (_, Operation::NoOp) => self.clone(),
            (Operation::NoOp, _) => Operation::NoOp,

            (Operation::Composite(ops), _) => flatten_composite(
                ops.iter().map(|op| op.transform(against, cid)).collect(),
            ),
            (_, Operation::Composite(ops)) => {
                // Transform against each piece in turn; each piece was
                // itself a Delete, applied in order.
                let mut result = self.clone();
                for op in ops {
                    result = result.transform(op, cid);
                }
                result
            }

            (Operation::Insert(a), Operation::Insert(b)) => {
                transform_insert_insert(a, b, cid)
            }
            (Operation::Insert(a), Operation::Delete(b)) => transform_insert_delete(a, b),
            (Operation::Delete(a), Operation::Insert(b)) => transform_delete_insert(a, b),
            (Operation::Delete(a), Operation::Delete(b)) => transform_delete_delete(a, b),
        }
    }
}

fn op_len(op: &Operation) -> usize {
    match op {
        Operation::Delete(d) => d.len,
        Operation::Insert(i) => i.chunk.len(),
        Operation::Composite(ops) => ops.iter().map(op_len).sum(),
        Operation::NoOp => 0,
    }
}

/// Deletes shrink the buffer, so a Delete composite must apply right-to-left
/// (descending `pos`) to avoid shifting not-yet-applied pieces. Inserts grow
/// it, so an Insert composite (only ever produced by reverting a Delete
/// composite) must apply left-to-right (ascending `pos`) for the same
/// reason, mirrored. A composite's pieces are never mixed kinds.
fn composite_apply_order_is_descending(ops: &[Operation]) -> bool {
    ops.iter().any(|op| matches!(op, Operation::Delete(_)))
}

fn op_pos(op: &Operation) -> usize {
    match op {
        Operation::Delete(d) => d.pos,
        Operation::Insert(i) => i.pos,
        Operation::Composite(ops) => ops.iter().map(op_pos).min().unwrap_or(0),
        Operation::NoOp => 0,
    }
}

fn flatten_composite(mut ops: Vec<Operation>) -> Operation {
    ops.retain(|op| !matches!(op, Operation::NoOp));
    match ops.len() {
        0 => Operation::NoOp,
        1 => ops.pop().unwrap(),
        _ => Operation::Composite(ops),
    }
}

fn transform_insert_insert(a: &InsertOp, b: &InsertOp, cid: ConcurrencyId) -> Operation {
    let d_len = b.chunk.len();
    let unchanged = a.pos < b.pos || (a.pos == b.pos && cid == ConcurrencyId::OtherSide);
    if unchanged {
        Operation::Insert(a.clone())
    } else {
        Operation::Insert(InsertOp { pos: a.pos + d_len, chunk: a.chunk.clone() })
    }
}

fn transform_insert_delete(a: &InsertOp, b: &DeleteOp) -> Operation {
    if a.pos <= b.pos {
        Operation::Insert(a.clone())
    } else if a.pos > b.pos + b.len {
        Operation::Insert(InsertOp { pos: a.pos - b.len, chunk: a.chunk.clone() })
    } else {
        // Inside the deleted region: collapses to the delete's start.
        Operation::Insert(InsertOp { pos: b.pos, chunk: a.chunk.clone() })
    }
}

fn transform_delete_insert(a: &DeleteOp, b: &InsertOp) -> Operation {
    let d_len = b.chunk.len();
    if d_len == 0 {
        return Operation::Delete(a.clone());
    }
    if b.pos <= a.pos {
        Operation::Delete(DeleteOp { pos: a.pos + d_len, len: a.len, chunk: a.chunk.clone() })
    } else if b.pos >= a.pos + a.len {
        Operation::Delete(a.clone())
    } else {
        // Split: the insert landed strictly inside the deleted range.
        let split_at = b.pos - a.pos;
        let first = a.sub(0, split_at);
        let mut second = a.sub(split_at, a.len - split_at);
        second.pos += d_len;
        flatten_composite(vec![Operation::Delete(first), Operation::Delete(second)])
    }
}

fn transform_delete_delete(a: &DeleteOp, b: &DeleteOp) -> Operation {
    let a_end = a.pos + a.len;
    let b_end = b.pos + b.len;

    if a_end <= b.pos {
        return Operation::Delete(a.clone());
    }
    if b_end <= a.pos {
        return Operation::Delete(DeleteOp { pos: a.pos - b.len, len: a.len, chunk: a.chunk.clone() });
    }

    // Overlapping. Restrict `a`'s range to its complement against `b`'s
    // range, re-expressed in post-`b` coordinates.
    let mut pieces = Vec::with_capacity(2);

    if b.pos > a.pos {
        // Left remainder: [a.pos, b.pos), entirely before b's range, so its
        // position is unaffected by b having been applied.
        let len = b.pos - a.pos;
        pieces.push(Operation::Delete(a.sub(0, len)));
    }
    if b_end < a_end {
        // Right remainder: [b_end, a_end), entirely after b's range, so it
        // shifts left by b.len; its new absolute position is b.pos.
        let offset = b_end - a.pos;
        let len = a_end - b_end;
        let mut piece = a.sub(offset, len);
        piece.pos = b.pos;
        pieces.push(Operation::Delete(piece));
    }

    flatten_composite(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(pos: usize, s: &str) -> Operation {
        Operation::insert(pos, Chunk::single(1, s))
    }

    fn del_known(pos: usize, s: &str) -> Operation {
        Operation::Delete(DeleteOp::with_chunk(pos, Chunk::single(1, s)))
    }

    #[test]
    fn identity_against_noop() {
        let op = ins(3, "x");
        assert_eq!(op.transform(&Operation::NoOp, ConcurrencyId::ThisSide), op);
    }

    #[test]
    fn insert_insert_before() {
        let a = ins(1, "a");
        let b = ins(5, "bb");
        assert_eq!(a.transform(&b, ConcurrencyId::ThisSide), ins(1, "a"));
    }

    #[test]
    fn insert_insert_after() {
        let a = ins(5, "a");
        let b = ins(1, "bb");
        assert_eq!(a.transform(&b, ConcurrencyId::ThisSide), ins(7, "a"));
    }

    #[test]
    fn insert_insert_tie_break() {
        let a = ins(2, "a");
        let b = ins(2, "bb");
        assert_eq!(a.transform(&b, ConcurrencyId::OtherSide), ins(2, "a"));
        assert_eq!(a.transform(&b, ConcurrencyId::ThisSide), ins(4, "a"));
    }

    #[test]
    fn insert_vs_delete_before_after_inside() {
        let Operation::Delete(d) = del_known(5, "xxx") else { unreachable!() };
        assert_eq!(ins(5, "a").transform(&Operation::Delete(d.clone()), ConcurrencyId::ThisSide), ins(5, "a"));
        assert_eq!(ins(10, "a").transform(&Operation::Delete(d.clone()), ConcurrencyId::ThisSide), ins(7, "a"));
        assert_eq!(ins(6, "a").transform(&Operation::Delete(d), ConcurrencyId::ThisSide), ins(5, "a"));
    }

    #[test]
    fn delete_vs_insert_shift_and_unchanged() {
        let d = Operation::Delete(DeleteOp::new(5, 3));
        let before = ins(2, "xx");
        let after = ins(8, "xx");
        assert_eq!(d.transform(&before, ConcurrencyId::ThisSide), Operation::Delete(DeleteOp::new(7, 3)));
        assert_eq!(d.transform(&after, ConcurrencyId::ThisSide), d);
    }

    #[test]
    fn delete_vs_insert_split() {
        let d = Operation::Delete(DeleteOp::with_chunk(5, Chunk::single(1, "abcde")));
        let mid = ins(7, "XY");
        let result = d.transform(&mid, ConcurrencyId::ThisSide);
        let Operation::Composite(pieces) = result else { panic!("expected composite, got {result:?}") };
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], Operation::Delete(DeleteOp::with_chunk(5, Chunk::single(1, "ab"))));
        assert_eq!(pieces[1], Operation::Delete(DeleteOp::with_chunk(9, Chunk::single(1, "cde"))));
    }

    #[test]
    fn delete_vs_delete_disjoint() {
        let a = Operation::Delete(DeleteOp::new(10, 3));
        let before = Operation::Delete(DeleteOp::new(0, 2));
        let after = Operation::Delete(DeleteOp::new(20, 2));
        assert_eq!(a.transform(&before, ConcurrencyId::ThisSide), Operation::Delete(DeleteOp::new(8, 3)));
        assert_eq!(a.transform(&after, ConcurrencyId::ThisSide), a);
    }

    #[test]
    fn delete_vs_delete_full_overlap_degenerates_to_noop() {
        let a = Operation::Delete(DeleteOp::with_chunk(5, Chunk::single(1, "abc")));
        let b = Operation::Delete(DeleteOp::new(4, 6));
        assert_eq!(a.transform(&b, ConcurrencyId::ThisSide), Operation::NoOp);
    }

    #[test]
    fn delete_vs_delete_partial_overlap() {
        // a deletes [5,10) "abcde", b deletes [8,12) already applied.
        // overlap [8,10); a's remainder is [5,8) "abc", mapped unchanged.
        let a = Operation::Delete(DeleteOp::with_chunk(5, Chunk::single(1, "abcde")));
        let b = Operation::Delete(DeleteOp::new(8, 4));
        let result = a.transform(&b, ConcurrencyId::ThisSide);
        assert_eq!(result, Operation::Delete(DeleteOp::with_chunk(5, Chunk::single(1, "abc"))));
    }

    #[test]
    fn delete_vs_delete_middle_overlap_splits() {
        // a deletes [0,10), b deletes [3,6) (strictly inside a, already applied).
        let a = Operation::Delete(DeleteOp::with_chunk(0, Chunk::single(1, "0123456789")));
        let b = Operation::Delete(DeleteOp::new(3, 3));
        let result = a.transform(&b, ConcurrencyId::ThisSide);
        let Operation::Composite(pieces) = result else { panic!("expected composite, got {result:?}") };
        assert_eq!(pieces, vec![
            Operation::Delete(DeleteOp::with_chunk(0, Chunk::single(1, "012"))),
            Operation::Delete(DeleteOp::with_chunk(3, Chunk::single(1, "6789"))),
        ]);
    }

    #[test]
    fn revert_insert_is_delete() {
        let op = ins(2, "ab");
        let reverted = op.revert().unwrap();
        assert_eq!(reverted, Operation::Delete(DeleteOp::with_chunk(2, Chunk::single(1, "ab"))));
    }

    #[test]
    fn revert_unpromoted_delete_is_none() {
        let op = Operation::Delete(DeleteOp::new(0, 3));
        assert!(op.revert().is_none());
    }

    #[test]
    fn make_reversible_fills_in_chunk() {
        let mut op = Operation::Delete(DeleteOp::new(0, 3));
        op.make_reversible(Some(Chunk::single(1, "abc")));
        assert!(op.is_reversible());
        assert_eq!(op.revert().unwrap(), ins(0, "abc"));
    }

    #[test]
    fn composite_revert_stitches_chunks() {
        let composite = Operation::Composite(vec![
            Operation::Delete(DeleteOp::with_chunk(0, Chunk::single(1, "ab"))),
            Operation::Delete(DeleteOp::with_chunk(5, Chunk::single(1, "cd"))),
        ]);
        assert_eq!(composite.revert().unwrap(), ins(0, "abcd"));
    }

    #[test]
    fn composite_apply_does_not_shift_later_pieces() {
        use crate::buffer::{Buffer, TextBuffer};

        // Pieces as produced by `delete_vs_delete_middle_overlap_splits`:
        // both positions are in the shared post-b coordinate frame, i.e.
        // the frame of the 7-char buffer left behind once b's own delete
        // ([3,6) "345" out of "0123456789") has already happened.
        let composite = Operation::Composite(vec![
            Operation::Delete(DeleteOp::new(0, 3)),
            Operation::Delete(DeleteOp::new(3, 4)),
        ]);
        let mut buffer = TextBuffer::new();
        buffer.insert_chunk(0, Chunk::single(1, "0126789"), 1).unwrap();

        let removed = composite.apply(&mut buffer, 1).unwrap().unwrap();
        assert_eq!(buffer.to_text(), "");
        // Stitched back in the pieces' declared order, not execution order.
        assert_eq!(removed.to_text(), "0126789");
    }

    #[test]
    fn composite_apply_of_inserts_applies_ascending() {
        use crate::buffer::{Buffer, TextBuffer};

        // The mirror image of `composite_apply_does_not_shift_later_pieces`:
        // reverting a split delete produces a Composite of Inserts whose
        // positions are in the frame *before* either insert has happened, so
        // applying the higher position first (as a Delete composite would)
        // would land out of range - the lower one must land first to grow
        // the buffer out from under the higher one.
        let composite = Operation::Composite(vec![ins(0, "He"), ins(3, "llo")]);
        let mut buffer = TextBuffer::new();
        buffer.insert_chunk(0, Chunk::single(2, "X"), 2).unwrap();

        composite.apply(&mut buffer, 1).unwrap();
        assert_eq!(buffer.to_text(), "HeXllo");
    }
}
