pub mod registry;
pub mod router;

pub use registry::{Subscriber, SubscriberId, SubscriberRegistry};
pub use router::{channel, BarSender, BroadcastRouter};
