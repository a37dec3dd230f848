use crate::coap::{BlockInfo, ResponseCode};

/// Largest request body reassembled from Block1 transfers.
pub const MAX_BLOCK1_SIZE: usize = 4096;

/// Result of feeding one block.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BlockOutcome {
    /// More blocks follow. Answer 2.31 Continue echoing the block option.
    Continue,
    /// The last block arrived. The body is in [`Block1::body`].
    Complete,
}

/// Reassembly of one Block1 transfer from a server.
///
/// Block 0 starts a transfer, every later block must continue exactly where
/// the buffer ends. A block repeating the message id of the last accepted one
/// is a retransmission and is answered without appending.
#[derive(Debug, Default)]
pub(crate) struct Block1 {
    buffer: Option<Vec<u8>>,
    last_mid: Option<u16>,
    complete: bool,
}

impl Block1 {
    pub fn accept(&mut self, mid: u16, block: BlockInfo, payload: &[u8]) -> Result<BlockOutcome, ResponseCode> {
        if self.last_mid == Some(mid) && self.buffer.is_some() {
            trace!("Block1 retransmission mid {}", mid);
            return Ok(if block.more() {
                BlockOutcome::Continue
            } else {
                BlockOutcome::Complete
            });
        }

        if block.num() == 0 {
            self.buffer = Some(Vec::with_capacity(block.size()));
            self.complete = false;
        }

        let Some(buffer) = self.buffer.as_mut() else {
            debug!("Block1 {} without a transfer", block);
            return Err(ResponseCode::RequestEntityIncomplete);
        };

        if self.complete || buffer.len() != block.offset() {
            debug!("Block1 {} does not continue at {}", block, buffer.len());
            return Err(ResponseCode::RequestEntityIncomplete);
        }

        if buffer.len() + payload.len() > MAX_BLOCK1_SIZE {
            warn!("Block1 transfer over {} bytes", MAX_BLOCK1_SIZE);
            self.buffer = None;
            self.last_mid = None;
            return Err(ResponseCode::RequestEntityTooLarge);
        }

        buffer.extend_from_slice(payload);
        self.last_mid = Some(mid);

        if block.more() {
            Ok(BlockOutcome::Continue)
        } else {
            self.complete = true;
            Ok(BlockOutcome::Complete)
        }
    }

    /// Body of the last completed transfer.
    pub fn body(&self) -> Option<&[u8]> {
        if self.complete {
            self.buffer.as_deref()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.as_ref().map(|b| b.len()).unwrap_or(0)
    }
}
