//! Notification delivery
//!
//! - `RunLoop` / `ExecutorHandle` - Thread-bound executors deliveries run on
//! - `CollectionNotifier` - One live subscription's state machine
//! - `ObjectNotifier` - Property changes of one observed object
//! - `NotificationCoordinator` - Per-file registry driven by commits
//! - `NotificationToken` - Registration lifetime

mod callback;
mod coordinator;
mod executor;
mod notifier;
mod object_notifier;
mod token;

pub use callback::Callback;
pub(crate) use callback::CallbackSlot;
pub(crate) use coordinator::DeliveryTarget;
pub use coordinator::{NotificationCoordinator, TargetId};
pub use executor::{ExecutorHandle, ExecutorId, RunLoop, Task};
pub(crate) use notifier::Notifier;
pub use notifier::{CollectionNotifier, NotifierId, NotifierPhase};
pub use object_notifier::ObjectNotifier;
pub use token::NotificationToken;
