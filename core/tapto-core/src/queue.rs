//! Hand-off point between the session loop and the launch worker.

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::token::Token;

/// Cloneable producer side of the launch queue. The session loop and the
/// API both enqueue; a single worker drains the receiver.
#[derive(Debug, Clone)]
pub struct LaunchQueue {
    sender: Sender<Token>,
}

impl LaunchQueue {
    pub fn new() -> (Self, Receiver<Token>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, token: Token) {
        if let Err(err) = self.sender.send(token) {
            warn!(token = %err.0, "Launch queue has no consumer; dropping token");
        }
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    #[test]
    fn tokens_drain_in_order() {
        let (queue, receiver) = LaunchQueue::new();
        let producer = queue.clone();
        producer.enqueue(Token::new(TokenKind::Pn532, "01", "a"));
        queue.enqueue(Token::new(TokenKind::Pn532, "02", "b"));
        assert_eq!(queue.len(), 2);

        let drained: Vec<String> = receiver.try_iter().map(|token| token.uid).collect();
        assert_eq!(drained, vec!["01", "02"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_without_consumer_does_not_panic() {
        let (queue, receiver) = LaunchQueue::new();
        drop(receiver);
        queue.enqueue(Token::new(TokenKind::Pn532, "01", "a"));
    }
}
