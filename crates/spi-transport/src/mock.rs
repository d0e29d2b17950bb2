use crate::{Result, TransferStats, Transport, TransportError};
use std::collections::VecDeque;

/// A scripted in-process transport. Each instance is independent.
///
/// Replies are served from a queue in order; once the queue is empty every
/// exchange answers with the idle word. Every transmitted word is recorded so
/// tests can assert on what reached the bus (or that nothing did).
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: VecDeque<Result<u32>>,
    sent: Vec<u32>,
    idle: u32,
    initialized: bool,
    fail_init: bool,
    stats: TransferStats,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Word returned once the reply script runs dry.
    pub fn with_idle(mut self, idle: u32) -> Self {
        self.idle = idle;
        self
    }

    pub fn push_reply(&mut self, word: u32) {
        self.replies.push_back(Ok(word));
    }

    pub fn push_replies(&mut self, words: &[u32]) {
        self.replies.extend(words.iter().map(|w| Ok(*w)));
    }

    /// Queue a failing exchange.
    pub fn push_error(&mut self, err: TransportError) {
        self.replies.push_back(Err(err));
    }

    pub fn fail_init(&mut self, fail: bool) {
        self.fail_init = fail;
    }

    pub fn sent(&self) -> &[u32] {
        &self.sent
    }

    pub fn transfer_count(&self) -> usize {
        self.sent.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }
}

impl Transport for MockTransport {
    fn init(&mut self) -> Result<()> {
        if self.fail_init {
            return Err(TransportError::InterfaceNotFound("mock0".to_string()));
        }
        self.initialized = true;
        Ok(())
    }

    fn transfer(&mut self, tx: u32) -> Result<u32> {
        self.sent.push(tx);
        self.stats.words += 1;
        match self.replies.pop_front() {
            Some(Ok(word)) => Ok(word),
            Some(Err(e)) => {
                self.stats.errors += 1;
                Err(e)
            }
            None => Ok(self.idle),
        }
    }

    fn delay(&mut self, micros: u32) {
        self.stats.delay_us += u64::from(micros);
    }
}
