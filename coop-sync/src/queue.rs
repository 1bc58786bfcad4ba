//! Admission control for the bounded pending queue.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::token::Token;

/// Which token is dropped when an admission would push a bounded pending
/// queue over its capacity.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OverflowStrategy {
    /// The incoming token itself is canceled and never inserted; the queue
    /// is left untouched. This is the default.
    RejectIncoming,
    /// The oldest waiting token is evicted and the incoming one appended.
    DropOldest,
    /// The newest waiting token is evicted and the incoming one takes its
    /// place at the end of the queue.
    DropNewest,
}

impl Default for OverflowStrategy {
    fn default() -> OverflowStrategy {
        OverflowStrategy::RejectIncoming
    }
}

/// Configuration of the pending queue, shared by both primitives.
///
/// Options are copied into a primitive at construction and can be replaced
/// later through `set_options`. Shrinking `max_queue_size` on a live
/// instance never trims the queue by itself; trimming only happens through
/// an explicit `reduce_queue` call.
#[derive(Clone, Copy, Default, Debug)]
pub struct QueueOptions {
    /// Upper bound on *waiting* tokens. The currently executing token does
    /// not count against the bound. `None` means unbounded, the default.
    pub max_queue_size: Option<usize>,
    /// Eviction rule applied when an admission hits the bound.
    pub overflow_strategy: OverflowStrategy,
}

/// Decides which tokens survive when a queue admission hits the configured
/// bound.
///
/// The default implementation is [`FifoOverflow`]; a custom policy can be
/// injected through the primitive builders. Implementations may only
/// rearrange the passed queue — they must not call back into the primitive
/// that invoked them, and they must not run or drop user callbacks. Victims
/// are returned to the caller, which marks them canceled and finalizes them
/// outside of its state borrow.
pub trait QueuePolicy {
    /// Admits `incoming` into `queue`, evicting per `options`, and returns
    /// the victims (possibly including `incoming` itself, which then must
    /// not have been inserted).
    ///
    /// Called with `incoming = None` for maintenance re-trims of a queue
    /// that options mutation has left over capacity.
    fn reduce(
        &self,
        queue: &mut VecDeque<Rc<Token>>,
        incoming: Option<Rc<Token>>,
        options: &QueueOptions,
    ) -> Vec<Rc<Token>>;
}

/// The stock queue policy: strict FIFO with single-slot eviction.
///
/// With a bound of `n`, an admission into a queue already holding `n`
/// waiters resolves as follows:
///
/// * [`RejectIncoming`](OverflowStrategy::RejectIncoming) — the incoming
///   token is the victim and the queue is unchanged.
/// * [`DropOldest`](OverflowStrategy::DropOldest) — the head of the queue is
///   the victim and the incoming token is appended.
/// * [`DropNewest`](OverflowStrategy::DropNewest) — the tail of the queue is
///   the victim and the incoming token is appended in its place.
///
/// A bound of zero admits nothing into the queue: there is no slot an
/// eviction could free, so the incoming token is rejected regardless of
/// strategy.
#[derive(Clone, Copy, Default, Debug)]
pub struct FifoOverflow;

impl QueuePolicy for FifoOverflow {
    fn reduce(
        &self,
        queue: &mut VecDeque<Rc<Token>>,
        incoming: Option<Rc<Token>>,
        options: &QueueOptions,
    ) -> Vec<Rc<Token>> {
        let mut victims = Vec::new();
        match incoming {
            Some(token) => {
                if let Some(max) = options.max_queue_size {
                    if queue.len() >= max {
                        if max == 0 {
                            victims.push(token);
                            return victims;
                        }
                        let victim = match options.overflow_strategy {
                            OverflowStrategy::RejectIncoming => {
                                victims.push(token);
                                return victims;
                            }
                            OverflowStrategy::DropOldest => queue.pop_front(),
                            OverflowStrategy::DropNewest => queue.pop_back(),
                        };
                        if let Some(victim) = victim {
                            victims.push(victim);
                        }
                    }
                }
                queue.push_back(token);
            }
            None => {
                // Maintenance pass: bring an over-capacity queue back under
                // the bound. RejectIncoming has no incoming token to reject
                // and therefore trims nothing.
                if let Some(max) = options.max_queue_size {
                    loop {
                        if queue.len() <= max {
                            break;
                        }
                        let victim = match options.overflow_strategy {
                            OverflowStrategy::RejectIncoming => break,
                            OverflowStrategy::DropOldest => queue.pop_front(),
                            OverflowStrategy::DropNewest => queue.pop_back(),
                        };
                        match victim {
                            Some(victim) => victims.push(victim),
                            None => break,
                        }
                    }
                }
            }
        }
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenId;

    fn token(id: u64) -> Rc<Token> {
        Rc::new(Token::new(TokenId::new(id)))
    }

    fn ids(queue: &VecDeque<Rc<Token>>) -> Vec<TokenId> {
        queue.iter().map(|t| t.id()).collect()
    }

    #[test]
    fn unbounded_always_appends() {
        let policy = FifoOverflow;
        let options = QueueOptions::default();
        let mut queue = VecDeque::new();
        for id in 0..16 {
            let victims = policy.reduce(&mut queue, Some(token(id)), &options);
            assert!(victims.is_empty());
        }
        assert_eq!(queue.len(), 16);
    }

    #[test]
    fn reject_incoming_leaves_queue_untouched() {
        let policy = FifoOverflow;
        let options = QueueOptions {
            max_queue_size: Some(3),
            overflow_strategy: OverflowStrategy::RejectIncoming,
        };
        let mut queue: VecDeque<_> = (0..3).map(token).collect();
        let before = ids(&queue);

        let incoming = token(99);
        let victims = policy.reduce(&mut queue, Some(incoming.clone()), &options);

        assert_eq!(victims.len(), 1);
        assert!(Rc::ptr_eq(&victims[0], &incoming));
        assert_eq!(ids(&queue), before);
    }

    #[test]
    fn drop_oldest_evicts_head() {
        let policy = FifoOverflow;
        let options = QueueOptions {
            max_queue_size: Some(3),
            overflow_strategy: OverflowStrategy::DropOldest,
        };
        let mut queue: VecDeque<_> = (0..3).map(token).collect();

        let victims = policy.reduce(&mut queue, Some(token(99)), &options);

        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].id(), TokenId::new(0));
        assert_eq!(
            ids(&queue),
            vec![TokenId::new(1), TokenId::new(2), TokenId::new(99)]
        );
    }

    #[test]
    fn drop_newest_evicts_tail() {
        let policy = FifoOverflow;
        let options = QueueOptions {
            max_queue_size: Some(3),
            overflow_strategy: OverflowStrategy::DropNewest,
        };
        let mut queue: VecDeque<_> = (0..3).map(token).collect();

        let victims = policy.reduce(&mut queue, Some(token(99)), &options);

        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].id(), TokenId::new(2));
        assert_eq!(
            ids(&queue),
            vec![TokenId::new(0), TokenId::new(1), TokenId::new(99)]
        );
    }

    #[test]
    fn zero_capacity_rejects_under_any_strategy() {
        let policy = FifoOverflow;
        for strategy in &[
            OverflowStrategy::RejectIncoming,
            OverflowStrategy::DropOldest,
            OverflowStrategy::DropNewest,
        ] {
            let options = QueueOptions {
                max_queue_size: Some(0),
                overflow_strategy: *strategy,
            };
            let mut queue = VecDeque::new();
            let incoming = token(7);
            let victims = policy.reduce(&mut queue, Some(incoming.clone()), &options);
            assert_eq!(victims.len(), 1);
            assert!(Rc::ptr_eq(&victims[0], &incoming));
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn maintenance_trims_only_evicting_strategies() {
        let policy = FifoOverflow;
        let mut queue: VecDeque<_> = (0..5).map(token).collect();

        let keep = QueueOptions {
            max_queue_size: Some(2),
            overflow_strategy: OverflowStrategy::RejectIncoming,
        };
        assert!(policy.reduce(&mut queue, None, &keep).is_empty());
        assert_eq!(queue.len(), 5);

        let trim = QueueOptions {
            max_queue_size: Some(2),
            overflow_strategy: OverflowStrategy::DropOldest,
        };
        let victims = policy.reduce(&mut queue, None, &trim);
        assert_eq!(victims.len(), 3);
        assert_eq!(ids(&queue), vec![TokenId::new(3), TokenId::new(4)]);
    }
}
