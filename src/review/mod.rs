pub mod queue;
pub mod weight_adjust;

pub use queue::{FeedbackStatus, ReviewQueue, ReviewQueueItem};
pub use weight_adjust::{RuleWeightChange, WeightChangeLog};
