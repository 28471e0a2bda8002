//! Handles for requests in flight

use std::marker::PhantomData;
use std::mem;

use super::connection::{Connection, ConnectionResult, UsageError};
use crate::protocol::Unpacker;
use crate::wire::Reply;

/// Proof that a request was sent, redeemable once for its outcome
///
/// `reply` and `check` consume the cookie. A cookie dropped unredeemed
/// tells the connection to throw away whatever arrives for its sequence.
#[must_use = "an unredeemed cookie discards its reply"]
pub struct Cookie<'c, R: Reply> {
    conn: &'c Connection,
    sequence: u64,
    checked: bool,
    _reply: PhantomData<fn() -> R>,
}

impl<'c, R: Reply> Cookie<'c, R> {
    pub(crate) fn new(conn: &'c Connection, sequence: u64, checked: bool) -> Self {
        Self {
            conn,
            sequence,
            checked,
            _reply: PhantomData,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// Release the sequence without discarding its outcome
    fn into_sequence(self) -> u64 {
        let sequence = self.sequence;
        mem::forget(self);
        sequence
    }

    /// Block for the reply and decode it
    pub fn reply(self) -> ConnectionResult<R> {
        if R::IS_VOID {
            return Err(UsageError::VoidReply.into());
        }

        let conn = self.conn;
        let bytes = conn.wait_for_reply(self.into_sequence())?;
        let mut unpacker = Unpacker::new(bytes).with_order(conn.byte_order());
        Ok(R::decode(&mut unpacker)?)
    }

    /// Block until a checked void request is known to have succeeded
    pub fn check(self) -> ConnectionResult<()> {
        if !R::IS_VOID {
            return Err(UsageError::CheckOnReply.into());
        }
        if !self.checked {
            return Err(UsageError::UncheckedRequest.into());
        }

        let conn = self.conn;
        conn.check_request(self.into_sequence())
    }
}

impl<R: Reply> Drop for Cookie<'_, R> {
    fn drop(&mut self) {
        self.conn.discard(self.sequence);
    }
}

impl<R: Reply> std::fmt::Debug for Cookie<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cookie")
            .field("sequence", &self.sequence)
            .field("checked", &self.checked)
            .finish()
    }
}
